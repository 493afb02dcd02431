//! One activation of an analog output: build, write, dispose.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use ndarray::ArrayView2;

use crate::builder;
use crate::DeviceTask;
use crate::DeviceTrait;
use crate::Error;
use crate::OutputConfig;
use crate::Sample;
use crate::SampleMode;
use crate::StreamingWriter;

// Slice of the completion wait between cancellation checks.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing touched the device yet.
    Unbuilt,
    Building,
    /// Task built, clocked and, optionally, armed for a trigger. Nothing written.
    Armed,
    Writing,
    Disposing,
    /// Terminal. The task has been stopped and released.
    Disposed,
    /// Configuration or device write failed. Disposal still releases the task.
    Error,
}

/// Aborts a pending finite-mode completion wait.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single activation, owning at most one live task.
///
/// The task is created by [`activate`](Session::activate), fed by [`write`](Session::write)
/// and torn down by [`dispose`](Session::dispose) or on drop. A disposed session cannot be
/// reactivated.
pub struct Session<D: DeviceTrait> {
    device: D,
    config: Arc<OutputConfig>,
    name: String,
    state: State,
    task: Option<D::Task>,
    writer: Option<StreamingWriter>,
    mode: SampleMode,
    cancel: CancelHandle,
}

impl<D: DeviceTrait> Session<D> {
    pub fn new(device: D, config: Arc<OutputConfig>, name: impl Into<String>) -> Self {
        let mode = config.timing.sample_mode;
        Self {
            device,
            config,
            name: name.into(),
            state: State::Unbuilt,
            task: None,
            writer: None,
            mode,
            cancel: CancelHandle::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The live task, if the session is built and not yet disposed.
    pub fn task(&self) -> Option<&D::Task> {
        self.task.as_ref()
    }

    /// Samples per channel written during this activation.
    pub fn samples_written(&self) -> usize {
        self.writer.as_ref().map_or(0, StreamingWriter::samples_written)
    }

    /// Build, verify and configure the task.
    ///
    /// On failure the session moves to [`State::Error`] with no task left live.
    pub fn activate(&mut self) -> Result<(), Error> {
        if self.state != State::Unbuilt {
            return Err(Error::InvalidState(self.state));
        }
        self.state = State::Building;
        let config = self.config.clone();

        let mut task = match builder::build(&self.device, &self.name, &config.channels, &config.timing) {
            Ok(t) => t,
            Err(e) => {
                self.state = State::Error;
                return Err(e);
            }
        };
        if let Err(e) = builder::configure(&mut task, &config.timing, &config.trigger) {
            log::debug!("{}: configuration failed: {e}", self.name);
            if let Err(r) = task.release() {
                log::warn!("{}: releasing task after failed configuration: {r}", self.name);
            }
            self.state = State::Error;
            return Err(e);
        }

        self.mode = config.timing.sample_mode;
        self.writer = Some(StreamingWriter::new(
            config.channels.len(),
            config.write_timeout,
        ));
        self.task = Some(task);
        self.state = State::Armed;
        log::debug!(
            "{}: armed, {} mode{}",
            self.name,
            self.mode,
            if config.trigger.is_enabled() {
                format!(", waiting for {} edge on {:?}", config.trigger.edge, config.trigger.source)
            } else {
                String::new()
            }
        );
        Ok(())
    }

    /// Write one buffer, one row per channel. The first write starts the task.
    ///
    /// A buffer that cannot be converted leaves the session as it was. A device fault moves
    /// it to [`State::Error`].
    pub fn write<S: Sample>(&mut self, buffer: ArrayView2<'_, S>) -> Result<usize, Error> {
        if !matches!(self.state, State::Armed | State::Writing) {
            return Err(Error::InvalidState(self.state));
        }
        let (Some(task), Some(writer)) = (self.task.as_mut(), self.writer.as_mut()) else {
            return Err(Error::InvalidState(self.state));
        };

        match writer.on_buffer(task, buffer) {
            Ok(n) => {
                if self.state == State::Armed {
                    log::debug!("{}: first write, task started", self.name);
                }
                self.state = State::Writing;
                Ok(n)
            }
            Err(e @ Error::Conversion(_)) => Err(e),
            Err(e) => {
                log::debug!("{}: write failed: {e}", self.name);
                self.state = State::Error;
                Err(e)
            }
        }
    }

    /// Tear the task down: wait for completion in finite mode, then stop and release.
    ///
    /// Stop and release are performed even if the wait times out or is cancelled, which is
    /// reported as [`Error::DisposalTimeout`]. The first error encountered is returned.
    /// Disposing a disposed session is a no-op.
    pub fn dispose(&mut self) -> Result<(), Error> {
        if self.state == State::Disposed {
            return Ok(());
        }
        let Some(task) = self.task.take() else {
            log::debug!("{}: disposed without a live task", self.name);
            self.state = State::Disposed;
            return Ok(());
        };
        self.state = State::Disposing;
        let res = self.teardown(task);
        self.state = State::Disposed;
        res
    }

    fn teardown(&self, mut task: D::Task) -> Result<(), Error> {
        let written = self.samples_written();
        let waited = match self.mode {
            SampleMode::Finite if written > 0 => {
                log::debug!("{}: waiting for {written} samples to be generated", self.name);
                self.await_done(&mut task)
            }
            // never started, so there is nothing to wait for
            SampleMode::Finite => Ok(()),
            SampleMode::Continuous => {
                log::debug!("{}: stopping continuous generation", self.name);
                Ok(())
            }
        };
        let stopped = task.stop();
        let released = task.release();

        for (step, r) in [("stop", &stopped), ("release", &released)] {
            if let Err(e) = r {
                log::warn!("{}: {step} failed: {e}", self.name);
            }
        }
        log::debug!("{}: disposed after {written} samples", self.name);
        waited.and(stopped).and(released)
    }

    fn await_done(&self, task: &mut D::Task) -> Result<(), Error> {
        let deadline = Instant::now() + self.config.done_timeout;
        loop {
            if self.cancel.is_cancelled() {
                log::warn!("{}: completion wait cancelled", self.name);
                return Err(Error::DisposalTimeout);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match task.wait_until_done(remaining.min(WAIT_SLICE)) {
                Ok(()) => return Ok(()),
                Err(Error::Timeout) if remaining > WAIT_SLICE => {}
                Err(Error::Timeout) => {
                    log::warn!(
                        "{}: generation not done after {:?}",
                        self.name,
                        self.config.done_timeout
                    );
                    return Err(Error::DisposalTimeout);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<D: DeviceTrait> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("{}: disposal on drop failed: {e}", self.name);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::impls::dummy::Event;
    use crate::impls::Dummy;
    use crate::Edge;
    use ndarray::Array2;

    fn config(s: &str) -> Arc<OutputConfig> {
        Arc::new(s.parse().unwrap())
    }

    fn position(journal: &[Event], f: impl Fn(&Event) -> bool) -> usize {
        journal.iter().position(f).unwrap()
    }

    #[test]
    fn lifecycle() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(dev.clone(), config("channels=dummy/ao0"), "s");
        let buffer = Array2::<f64>::zeros((1, 4));
        assert_eq!(s.state(), State::Unbuilt);
        assert_eq!(
            s.write(buffer.view()),
            Err(Error::InvalidState(State::Unbuilt))
        );
        assert_eq!(dev.max_live_tasks(), 0);

        s.activate().unwrap();
        assert_eq!(s.state(), State::Armed);
        assert_eq!(s.activate(), Err(Error::InvalidState(State::Armed)));
        assert_eq!(s.write(buffer.view()), Ok(4));
        assert_eq!(s.state(), State::Writing);
        assert!(matches!(
            s.write(Array2::<f64>::zeros((2, 4)).view()),
            Err(Error::Conversion(_))
        ));
        assert_eq!(s.state(), State::Writing);

        s.dispose().unwrap();
        assert_eq!(s.state(), State::Disposed);
        assert_eq!(dev.live_tasks(), 0);
        assert_eq!(s.dispose(), Ok(()));
        assert_eq!(s.activate(), Err(Error::InvalidState(State::Disposed)));
    }

    #[test]
    fn failed_configuration_releases_task() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, trigger_source=PFI99"),
            "s",
        );
        assert!(matches!(s.activate(), Err(Error::Configuration(_))));
        assert_eq!(s.state(), State::Error);
        assert_eq!(dev.live_tasks(), 0);
        assert!(s.task().is_none());
        assert_eq!(s.dispose(), Ok(()));
    }

    #[test]
    fn finite_waits_before_stop() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, sample_mode=finite, buffer_size=8"),
            "s",
        );
        s.activate().unwrap();
        s.write(Array2::<f32>::ones((1, 8)).view()).unwrap();
        s.dispose().unwrap();

        let j = dev.journal();
        let done = position(&j, |e| matches!(e, Event::Done(_)));
        let stopped = position(&j, |e| matches!(e, Event::Stopped(_)));
        let released = position(&j, |e| matches!(e, Event::Released(_)));
        assert!(done < stopped && stopped < released);
    }

    #[test]
    fn unwritten_finite_task_skips_wait() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, sample_mode=finite, buffer_size=8"),
            "s",
        );
        s.activate().unwrap();
        s.dispose().unwrap();
        assert!(!dev
            .journal()
            .iter()
            .any(|e| matches!(e, Event::WaitUntilDone(_))));
        assert_eq!(dev.live_tasks(), 0);
    }

    #[test]
    fn continuous_never_waits() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(dev.clone(), config("channels=dummy/ao0"), "s");
        s.activate().unwrap();
        s.write(Array2::<f32>::ones((1, 8)).view()).unwrap();
        s.dispose().unwrap();
        assert!(!dev
            .journal()
            .iter()
            .any(|e| matches!(e, Event::WaitUntilDone(_))));
        assert!(matches!(dev.journal().last(), Some(Event::Released(_))));
    }

    #[test]
    fn finite_timeout_still_releases() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, sample_mode=finite, buffer_size=4, trigger_source=PFI0, done_timeout=0.1"),
            "s",
        );
        s.activate().unwrap();
        s.write(Array2::<f64>::zeros((1, 4)).view()).unwrap();
        let start = Instant::now();
        assert_eq!(s.dispose(), Err(Error::DisposalTimeout));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(s.state(), State::Disposed);
        assert_eq!(dev.live_tasks(), 0);
        assert!(dev.journal().iter().any(|e| matches!(e, Event::Stopped(_))));
    }

    #[test]
    fn cancel_aborts_wait() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, sample_mode=finite, buffer_size=4, trigger_source=PFI0, done_timeout=60"),
            "s",
        );
        s.activate().unwrap();
        s.write(Array2::<f64>::zeros((1, 4)).view()).unwrap();
        let cancel = s.cancel_handle();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        let start = Instant::now();
        assert_eq!(s.dispose(), Err(Error::DisposalTimeout));
        assert!(start.elapsed() < Duration::from_secs(30));
        t.join().unwrap();
        assert_eq!(dev.live_tasks(), 0);
    }

    #[test]
    fn triggered_finite_completes_after_edge() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(
            dev.clone(),
            config("channels=dummy/ao0, sample_mode=finite, buffer_size=4, trigger_source=PFI3, trigger_edge=falling"),
            "s",
        );
        s.activate().unwrap();
        s.write(Array2::<f64>::zeros((1, 4)).view()).unwrap();
        let id = s.task().unwrap().id();
        assert_eq!(dev.generated(id), 0);
        let edge = {
            let dev = dev.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                dev.fire_edge("PFI3", Edge::Falling);
            })
        };
        assert_eq!(s.dispose(), Ok(()));
        edge.join().unwrap();
    }

    #[test]
    fn drop_disposes() {
        let dev = Dummy::open("").unwrap();
        {
            let mut s = Session::new(dev.clone(), config("channels=dummy/ao0"), "s");
            s.activate().unwrap();
            assert_eq!(dev.live_tasks(), 1);
        }
        assert_eq!(dev.live_tasks(), 0);
        assert!(dev.journal().iter().any(|e| matches!(e, Event::Stopped(_))));
    }

    #[test]
    fn device_fault_moves_to_error() {
        let dev = Dummy::open("").unwrap();
        let mut s = Session::new(dev.clone(), config("channels=dummy/ao0:a:-1:1"), "s");
        s.activate().unwrap();
        let buffer = Array2::from_elem((1, 2), 5.0);
        assert!(matches!(s.write(buffer.view()), Err(Error::DeviceWrite(_))));
        assert_eq!(s.state(), State::Error);
        assert!(matches!(
            s.write(buffer.view()),
            Err(Error::InvalidState(State::Error))
        ));
        s.dispose().unwrap();
        assert_eq!(dev.live_tasks(), 0);
    }
}
