//! Simulated analog output device for tests, demos and CI.
//!
//! Every task call is recorded in a [journal](Dummy::journal). Written samples are generated
//! as soon as the task is running: immediately on start without a trigger, or once a
//! matching edge is delivered through [`Dummy::fire_edge`].
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;

use crate::Args;
use crate::DeviceTask;
use crate::DeviceTrait;
use crate::Driver;
use crate::Edge;
use crate::Error;
use crate::PinnedSamples;
use crate::Range;
use crate::RangeItem;
use crate::SampleMode;
use crate::VoltageUnit;

const NUM_CHANNELS: usize = 4;
const NUM_TERMINALS: usize = 8;
const MIN_VOLTAGE: f64 = -10.0;
const MAX_VOLTAGE: f64 = 10.0;
const MIN_RATE: f64 = 1.0;
const MAX_RATE: f64 = 1e6;

/// Something that happened on the dummy device. The first field is the task id.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Created(usize),
    Channel(usize, String),
    Verified(usize),
    SampleClock(usize, String, f64, Edge, SampleMode, usize),
    DigitalEdgeTrigger(usize, String, Edge),
    /// Samples per channel.
    Write(usize, usize),
    Started(usize),
    /// An edge delivered with [`Dummy::fire_edge`].
    Edge(String, Edge),
    /// Written samples are being clocked out.
    Generating(usize),
    WaitUntilDone(usize),
    Done(usize),
    Stopped(usize),
    Released(usize),
}

/// Dummy Device
#[derive(Clone)]
pub struct Dummy {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    journal: Mutex<Vec<Event>>,
    tasks: Mutex<Vec<Weak<Shared>>>,
    outputs: Mutex<HashMap<usize, Vec<Vec<f64>>>>,
    next_id: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl Inner {
    fn record(&self, event: Event) {
        log::trace!("dummy: {event:?}");
        lock(&self.journal).push(event);
    }
}

struct Shared {
    id: usize,
    state: Mutex<TaskState>,
    done: Condvar,
}

struct Channel {
    physical: String,
    min: f64,
    max: f64,
    unit: VoltageUnit,
}

struct Clock {
    mode: SampleMode,
    samples: usize,
}

#[derive(Default)]
struct TaskState {
    channels: Vec<Channel>,
    verified: bool,
    clock: Option<Clock>,
    trigger: Option<(String, Edge)>,
    started: bool,
    generating: bool,
    written: usize,
    generated: usize,
    released: bool,
}

impl TaskState {
    fn is_done(&self) -> bool {
        match &self.clock {
            Some(Clock {
                mode: SampleMode::Finite,
                samples,
            }) => self.generated >= *samples,
            _ => false,
        }
    }
}

/// Dummy analog output task
pub struct DummyTask {
    dev: Arc<Inner>,
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn physical_channels() -> Vec<String> {
    (0..NUM_CHANNELS).map(|i| format!("dummy/ao{i}")).collect()
}

fn terminals() -> Vec<String> {
    (0..NUM_TERMINALS).map(|i| format!("PFI{i}")).collect()
}

fn config_err(msg: impl Into<String>) -> Error {
    Error::Configuration(msg.into())
}

impl Dummy {
    /// Get a list of Devices
    ///
    /// Will only return exactly one device, if `dummy` is set as driver.
    pub fn probe(args: &Args) -> Result<Vec<Args>, Error> {
        match args.get::<String>("driver").as_deref() {
            Ok("dummy") => {
                let mut a = Args::new();
                a.set("driver", "dummy");
                Ok(vec![a])
            }
            _ => Ok(Vec::new()),
        }
    }
    /// Create a Dummy Device
    pub fn open<A: TryInto<Args>>(args: A) -> Result<Self, Error> {
        let args: Args = args.try_into().or(Err(Error::ValueError))?;
        log::debug!("opening dummy device ({args})");
        Ok(Self {
            inner: Arc::new(Inner::default()),
        })
    }

    /// Everything that happened on the device so far, in order.
    pub fn journal(&self) -> Vec<Event> {
        lock(&self.inner.journal).clone()
    }

    /// Number of tasks created but not yet released.
    pub fn live_tasks(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live tasks seen so far.
    pub fn max_live_tasks(&self) -> usize {
        self.inner.max_live.load(Ordering::SeqCst)
    }

    /// Samples written to task `id`, one vector per channel.
    pub fn output(&self, id: usize) -> Vec<Vec<f64>> {
        lock(&self.inner.outputs).get(&id).cloned().unwrap_or_default()
    }

    /// Samples per channel task `id` has clocked out.
    pub fn generated(&self, id: usize) -> usize {
        self.with_task(id, |s| s.generated).unwrap_or(0)
    }

    /// Deliver a digital edge on `terminal`. Started tasks waiting for exactly this edge begin
    /// generating.
    pub fn fire_edge(&self, terminal: &str, edge: Edge) {
        self.inner.record(Event::Edge(terminal.to_string(), edge));
        let tasks: Vec<Arc<Shared>> = lock(&self.inner.tasks)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for shared in tasks {
            let mut s = lock(&shared.state);
            let armed = s.started && !s.generating && !s.released;
            if armed && s.trigger.as_ref() == Some(&(terminal.to_string(), edge)) {
                s.generating = true;
                s.generated = s.written;
                self.inner.record(Event::Generating(shared.id));
                shared.done.notify_all();
            }
        }
    }

    fn with_task<R>(&self, id: usize, f: impl FnOnce(&TaskState) -> R) -> Option<R> {
        let tasks = lock(&self.inner.tasks);
        let shared = tasks.iter().filter_map(Weak::upgrade).find(|s| s.id == id)?;
        let s = lock(&shared.state);
        Some(f(&s))
    }
}

impl DummyTask {
    /// Task id, as used in [`Event`]s.
    pub fn id(&self) -> usize {
        self.shared.id
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        lock(&self.shared.state)
    }
}

impl DeviceTrait for Dummy {
    type Task = DummyTask;

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn driver(&self) -> Driver {
        Driver::Dummy
    }

    fn id(&self) -> Result<String, Error> {
        Ok("dummy".to_string())
    }

    fn info(&self) -> Result<Args, Error> {
        let mut a = Args::new();
        a.set("driver", "dummy");
        a.set("ao_channels", NUM_CHANNELS.to_string());
        Ok(a)
    }

    fn ao_channels(&self) -> Result<Vec<String>, Error> {
        Ok(physical_channels())
    }

    fn terminals(&self) -> Result<Vec<String>, Error> {
        Ok(terminals())
    }

    fn voltage_range(&self, physical_channel: &str) -> Result<Range, Error> {
        if physical_channels().iter().any(|c| c == physical_channel) {
            Ok(Range::new(vec![RangeItem::Interval(MIN_VOLTAGE, MAX_VOLTAGE)]))
        } else {
            Err(Error::NotFound)
        }
    }

    fn sample_rate_range(&self) -> Result<Range, Error> {
        Ok(Range::new(vec![RangeItem::Interval(MIN_RATE, MAX_RATE)]))
    }

    fn create_task(&self, name: &str) -> Result<Self::Task, Error> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(TaskState::default()),
            done: Condvar::new(),
        });
        {
            let mut tasks = lock(&self.inner.tasks);
            tasks.retain(|t| t.strong_count() > 0);
            tasks.push(Arc::downgrade(&shared));
        }
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_live.fetch_max(live, Ordering::SeqCst);
        log::debug!("dummy: created task {id} ({name:?}), {live} live");
        self.inner.record(Event::Created(id));
        Ok(DummyTask {
            dev: self.inner.clone(),
            shared,
        })
    }
}

impl DeviceTask for DummyTask {
    fn create_voltage_channel(
        &mut self,
        physical_channel: &str,
        _name: &str,
        min: f64,
        max: f64,
        unit: VoltageUnit,
    ) -> Result<(), Error> {
        if !physical_channels().iter().any(|c| c == physical_channel) {
            return Err(config_err(format!(
                "unknown physical channel {physical_channel:?}"
            )));
        }
        let mut s = self.state();
        if s.released {
            return Err(config_err("task has been released"));
        }
        s.channels.push(Channel {
            physical: physical_channel.to_string(),
            min,
            max,
            unit,
        });
        s.verified = false;
        self.dev
            .record(Event::Channel(self.id(), physical_channel.to_string()));
        Ok(())
    }

    fn verify(&mut self) -> Result<(), Error> {
        let mut s = self.state();
        if s.channels.is_empty() {
            return Err(config_err("task contains no channels"));
        }
        let device_range = Range::new(vec![RangeItem::Interval(MIN_VOLTAGE, MAX_VOLTAGE)]);
        for (i, c) in s.channels.iter().enumerate() {
            if s.channels[..i].iter().any(|p| p.physical == c.physical) {
                return Err(config_err(format!("{} is used twice", c.physical)));
            }
            if c.unit != VoltageUnit::Volts {
                return Err(config_err(format!("{}: no custom scale registered", c.physical)));
            }
            if !(c.min < c.max) {
                return Err(config_err(format!(
                    "{}: minimum {} is not below maximum {}",
                    c.physical, c.min, c.max
                )));
            }
            if !device_range.contains_interval(c.min, c.max) {
                return Err(config_err(format!(
                    "{}: range [{}, {}] V not supported, device supports [{MIN_VOLTAGE}, {MAX_VOLTAGE}] V",
                    c.physical, c.min, c.max
                )));
            }
        }
        s.verified = true;
        self.dev.record(Event::Verified(self.id()));
        Ok(())
    }

    fn configure_sample_clock(
        &mut self,
        source: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
        samples_per_channel: usize,
    ) -> Result<(), Error> {
        let mut s = self.state();
        if s.channels.is_empty() {
            return Err(config_err("sample clock requires at least one channel"));
        }
        let rates = Range::new(vec![RangeItem::Interval(MIN_RATE, MAX_RATE)]);
        if !rates.contains(rate) {
            return Err(config_err(format!(
                "sample rate {rate} not supported, closest is {:?}",
                rates.closest(rate)
            )));
        }
        if !source.is_empty() && !terminals().iter().any(|t| t == source) {
            return Err(config_err(format!("unknown clock terminal {source:?}")));
        }
        if samples_per_channel == 0 {
            return Err(config_err("buffer size must be positive"));
        }
        s.clock = Some(Clock {
            mode,
            samples: samples_per_channel,
        });
        self.dev.record(Event::SampleClock(
            self.id(),
            source.to_string(),
            rate,
            active_edge,
            mode,
            samples_per_channel,
        ));
        Ok(())
    }

    fn configure_digital_edge_trigger(&mut self, source: &str, edge: Edge) -> Result<(), Error> {
        if !terminals().iter().any(|t| t == source) {
            return Err(config_err(format!("unknown trigger terminal {source:?}")));
        }
        self.state().trigger = Some((source.to_string(), edge));
        self.dev
            .record(Event::DigitalEdgeTrigger(self.id(), source.to_string(), edge));
        Ok(())
    }

    fn write(
        &mut self,
        samples: &PinnedSamples<'_>,
        auto_start: bool,
        _timeout: Duration,
    ) -> Result<usize, Error> {
        let id = self.id();
        let mut s = self.state();
        if s.released {
            return Err(Error::DeviceWrite("task has been released".into()));
        }
        let (mode, capacity) = match (&s.clock, s.verified) {
            (Some(c), true) => (c.mode, c.samples),
            _ => return Err(Error::DeviceWrite("task is not configured".into())),
        };
        if samples.rows() != s.channels.len() {
            return Err(Error::DeviceWrite(format!(
                "{} rows written to a task with {} channels",
                samples.rows(),
                s.channels.len()
            )));
        }
        for (i, c) in s.channels.iter().enumerate() {
            if let Some(v) = samples.row(i).iter().find(|v| !(c.min..=c.max).contains(*v)) {
                return Err(Error::DeviceWrite(format!(
                    "sample {v} on {} outside [{}, {}] V",
                    c.physical, c.min, c.max
                )));
            }
        }
        let n = samples.cols();
        if mode == SampleMode::Finite && s.written + n > capacity {
            return Err(Error::DeviceWrite(format!(
                "writing {n} samples exceeds the finite buffer of {capacity} ({} already written)",
                s.written
            )));
        }

        {
            let mut outputs = lock(&self.dev.outputs);
            let rows = outputs
                .entry(id)
                .or_insert_with(|| vec![Vec::new(); samples.rows()]);
            for (i, row) in rows.iter_mut().enumerate() {
                row.extend_from_slice(samples.row(i));
            }
        }
        s.written += n;
        self.dev.record(Event::Write(id, n));

        if !s.started && auto_start {
            s.started = true;
            self.dev.record(Event::Started(id));
            if s.trigger.is_none() {
                s.generating = true;
                self.dev.record(Event::Generating(id));
            }
        }
        if s.generating {
            s.generated = s.written;
            self.shared.done.notify_all();
        }
        Ok(n)
    }

    fn wait_until_done(&mut self, timeout: Duration) -> Result<(), Error> {
        let id = self.id();
        self.dev.record(Event::WaitUntilDone(id));
        let s = self.state();
        match &s.clock {
            Some(Clock {
                mode: SampleMode::Finite,
                ..
            }) => {}
            _ => return Err(Error::NotSupported),
        }
        if !s.started {
            self.dev.record(Event::Done(id));
            return Ok(());
        }
        let (s, res) = self
            .shared
            .done
            .wait_timeout_while(s, timeout, |s| !s.is_done() && !s.released)
            .unwrap_or_else(PoisonError::into_inner);
        if res.timed_out() && !s.is_done() {
            return Err(Error::Timeout);
        }
        self.dev.record(Event::Done(id));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let mut s = self.state();
        s.started = false;
        s.generating = false;
        self.dev.record(Event::Stopped(self.id()));
        Ok(())
    }

    fn release(&mut self) -> Result<(), Error> {
        let mut s = self.state();
        if s.released {
            return Err(Error::ValueError);
        }
        s.released = true;
        self.shared.done.notify_all();
        let live = self.dev.live.fetch_sub(1, Ordering::SeqCst) - 1;
        log::debug!("dummy: released task {}, {live} live", self.id());
        self.dev.record(Event::Released(self.id()));
        Ok(())
    }
}

impl Drop for DummyTask {
    fn drop(&mut self) {
        if !self.state().released {
            log::warn!("dummy: task {} dropped without release", self.id());
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StagingArena;

    fn armed(dev: &Dummy, mode: SampleMode, samples: usize, trigger: Option<&str>) -> DummyTask {
        let mut t = dev.create_task("test").unwrap();
        t.create_voltage_channel("dummy/ao0", "a", -1.0, 1.0, VoltageUnit::Volts)
            .unwrap();
        t.verify().unwrap();
        t.configure_sample_clock("", 1000.0, Edge::Rising, mode, samples)
            .unwrap();
        if let Some(trigger) = trigger {
            t.configure_digital_edge_trigger(trigger, Edge::Rising)
                .unwrap();
        }
        t
    }

    fn write(t: &mut DummyTask, values: &[f64]) -> Result<usize, Error> {
        let mut arena = StagingArena::new();
        let mut staged = arena.pin(1, values.len());
        staged
            .stage(ndarray::ArrayView2::from_shape((1, values.len()), values).unwrap())
            .unwrap();
        t.write(&staged, true, Duration::from_secs(1))
    }

    #[test]
    fn probe() {
        assert!(Dummy::probe(&Args::new()).unwrap().is_empty());
        let devs = Dummy::probe(&"driver=dummy".try_into().unwrap()).unwrap();
        assert_eq!(devs.len(), 1);
    }

    #[test]
    fn unknown_channel() {
        let dev = Dummy::open("").unwrap();
        let mut t = dev.create_task("t").unwrap();
        assert!(matches!(
            t.create_voltage_channel("dummy/ao9", "", -1.0, 1.0, VoltageUnit::Volts),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(t.verify(), Err(Error::Configuration(_))));
    }

    #[test]
    fn custom_scale_and_inverted_range_fail_verify() {
        let dev = Dummy::open("").unwrap();
        let mut t = dev.create_task("t").unwrap();
        t.create_voltage_channel("dummy/ao0", "", -1.0, 1.0, VoltageUnit::FromCustomScale)
            .unwrap();
        assert!(matches!(t.verify(), Err(Error::Configuration(_))));

        let mut t = dev.create_task("t").unwrap();
        t.create_voltage_channel("dummy/ao0", "", 1.0, -1.0, VoltageUnit::Volts)
            .unwrap();
        assert!(matches!(t.verify(), Err(Error::Configuration(_))));
    }

    #[test]
    fn write_checks_ranges_and_capacity() {
        let dev = Dummy::open("").unwrap();
        let mut t = armed(&dev, SampleMode::Finite, 4, None);
        assert!(matches!(write(&mut t, &[0.0, 2.0]), Err(Error::DeviceWrite(_))));
        assert_eq!(write(&mut t, &[0.0, 0.5, -0.5]), Ok(3));
        assert!(matches!(write(&mut t, &[0.0, 0.0]), Err(Error::DeviceWrite(_))));
        assert_eq!(dev.output(t.id()), vec![vec![0.0, 0.5, -0.5]]);
    }

    #[test]
    fn untriggered_finite_task_completes() {
        let dev = Dummy::open("").unwrap();
        let mut t = armed(&dev, SampleMode::Finite, 4, None);
        write(&mut t, &[0.0; 2]).unwrap();
        assert_eq!(t.wait_until_done(Duration::from_millis(10)), Err(Error::Timeout));
        write(&mut t, &[0.0; 2]).unwrap();
        assert_eq!(t.wait_until_done(Duration::from_millis(10)), Ok(()));
        assert_eq!(dev.generated(t.id()), 4);
    }

    #[test]
    fn trigger_gates_generation() {
        let dev = Dummy::open("").unwrap();
        let mut t = armed(&dev, SampleMode::Finite, 2, Some("PFI1"));
        write(&mut t, &[0.25, 0.5]).unwrap();
        assert_eq!(dev.generated(t.id()), 0);

        dev.fire_edge("PFI0", Edge::Rising);
        dev.fire_edge("PFI1", Edge::Falling);
        assert_eq!(dev.generated(t.id()), 0);

        let waiter = {
            let dev = dev.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                dev.fire_edge("PFI1", Edge::Rising);
            })
        };
        assert_eq!(t.wait_until_done(Duration::from_secs(5)), Ok(()));
        waiter.join().unwrap();
        assert_eq!(dev.generated(t.id()), 2);
    }

    #[test]
    fn continuous_tasks_never_complete() {
        let dev = Dummy::open("").unwrap();
        let mut t = armed(&dev, SampleMode::Continuous, 2, None);
        write(&mut t, &[0.0; 8]).unwrap();
        assert_eq!(
            t.wait_until_done(Duration::from_millis(1)),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn live_task_accounting() {
        let dev = Dummy::open("").unwrap();
        let mut a = dev.create_task("a").unwrap();
        let b = dev.create_task("b").unwrap();
        assert_eq!(dev.live_tasks(), 2);
        a.release().unwrap();
        assert_eq!(a.release(), Err(Error::ValueError));
        drop(b);
        assert_eq!(dev.live_tasks(), 0);
        assert_eq!(dev.max_live_tasks(), 2);
    }
}
