use std::time::Duration;

use ndarray::ArrayView2;

use crate::DeviceTask;
use crate::Error;
use crate::Sample;
use crate::StagingArena;

/// Stages incoming buffers and writes them to a task, one call per buffer.
pub struct StreamingWriter {
    channels: usize,
    timeout: Duration,
    arena: StagingArena,
    writes: usize,
    samples: usize,
}

impl StreamingWriter {
    /// Writer for a task with `channels` output channels.
    pub fn new(channels: usize, timeout: Duration) -> Self {
        Self {
            channels,
            timeout,
            arena: StagingArena::new(),
            writes: 0,
            samples: 0,
        }
    }

    /// Samples per channel written so far.
    pub fn samples_written(&self) -> usize {
        self.samples
    }

    /// Number of device writes issued so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn arena(&self) -> &StagingArena {
        &self.arena
    }

    /// Convert `buffer` to the device layout and write it, auto-starting the task.
    ///
    /// Returns the number of samples per channel written. A device that accepts fewer than
    /// all columns fails the write with [`Error::DeviceWrite`]. A buffer without columns is
    /// accepted without a device write.
    pub fn on_buffer<T: DeviceTask + ?Sized, S: Sample>(
        &mut self,
        task: &mut T,
        buffer: ArrayView2<'_, S>,
    ) -> Result<usize, Error> {
        let (rows, cols) = buffer.dim();
        if rows != self.channels {
            return Err(Error::Conversion(format!(
                "buffer has {rows} rows, task has {} channels",
                self.channels
            )));
        }
        if cols == 0 {
            log::trace!("skipping write of empty buffer");
            return Ok(0);
        }

        let mut staged = self.arena.pin(rows, cols);
        staged.stage(buffer)?;
        let n = task.write(&staged, true, self.timeout)?;
        drop(staged);
        if n != cols {
            return Err(Error::DeviceWrite(format!(
                "device accepted {n} of {cols} samples per channel"
            )));
        }

        self.writes += 1;
        self.samples += n;
        log::trace!(
            "write #{}: {n} of {cols} {:?} samples per channel, {} total",
            self.writes,
            S::DEPTH,
            self.samples
        );
        Ok(n)
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::builder;
    use crate::Edge;
    use crate::PinnedSamples;
    use crate::SampleMode;
    use crate::VoltageUnit;
    use crate::impls::dummy::Event;
    use crate::impls::Dummy;
    use crate::ChannelRegistry;
    use crate::DeviceTrait;
    use crate::TimingConfig;
    use crate::TriggerConfig;
    use ndarray::array;
    use ndarray::Array2;

    fn armed(dev: &Dummy, channels: &str) -> <Dummy as DeviceTrait>::Task {
        let channels: ChannelRegistry = channels.parse().unwrap();
        let timing = TimingConfig::default();
        let mut task = builder::build(dev, "w", &channels, &timing).unwrap();
        builder::configure(&mut task, &timing, &TriggerConfig::default()).unwrap();
        task
    }

    fn writes(dev: &Dummy) -> Vec<usize> {
        dev.journal()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(_, n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn row_mismatch_never_writes() {
        let dev = Dummy::open("").unwrap();
        let mut task = armed(&dev, "dummy/ao0;dummy/ao1");
        let mut w = StreamingWriter::new(2, Duration::from_secs(1));
        let buffer = Array2::<f64>::zeros((3, 10));
        assert!(matches!(
            w.on_buffer(&mut task, buffer.view()),
            Err(Error::Conversion(_))
        ));
        assert!(writes(&dev).is_empty());
        assert_eq!(w.writes(), 0);
        assert!(!w.arena().is_pinned());
    }

    #[test]
    fn writes_rows_to_channels_in_order() {
        let dev = Dummy::open("").unwrap();
        let mut task = armed(&dev, "dummy/ao2;dummy/ao0");
        let mut w = StreamingWriter::new(2, Duration::from_secs(1));
        let a = array![[1i16, 2, 3], [-1, -2, -3]];
        assert_eq!(w.on_buffer(&mut task, a.view()), Ok(3));
        let b = array![[4.5f32], [-4.5]];
        assert_eq!(w.on_buffer(&mut task, b.view()), Ok(1));

        assert_eq!(
            dev.output(task.id()),
            vec![vec![1.0, 2.0, 3.0, 4.5], vec![-1.0, -2.0, -3.0, -4.5]]
        );
        assert_eq!(writes(&dev), vec![3, 1]);
        assert_eq!(w.samples_written(), 4);
        assert!(dev.journal().contains(&Event::Started(task.id())));
    }

    #[test]
    fn empty_buffer_skips_device() {
        let dev = Dummy::open("").unwrap();
        let mut task = armed(&dev, "dummy/ao0");
        let mut w = StreamingWriter::new(1, Duration::from_secs(1));
        let buffer = Array2::<f64>::zeros((1, 0));
        assert_eq!(w.on_buffer(&mut task, buffer.view()), Ok(0));
        assert!(writes(&dev).is_empty());
        assert!(!dev.journal().contains(&Event::Started(task.id())));
    }

    #[test]
    fn device_fault_releases_lease() {
        let dev = Dummy::open("").unwrap();
        let mut task = armed(&dev, "dummy/ao0");
        let mut w = StreamingWriter::new(1, Duration::from_secs(1));
        let buffer = array![[0.0, 11.0]];
        assert!(matches!(
            w.on_buffer(&mut task, buffer.view()),
            Err(Error::DeviceWrite(_))
        ));
        assert!(!w.arena().is_pinned());
        assert_eq!(w.samples_written(), 0);
    }

    #[test]
    fn unrepresentable_samples_never_write() {
        let dev = Dummy::open("").unwrap();
        let mut task = armed(&dev, "dummy/ao0");
        let mut w = StreamingWriter::new(1, Duration::from_secs(1));
        let buffer = array![[1i64, i64::MAX]];
        assert!(matches!(
            w.on_buffer(&mut task, buffer.view()),
            Err(Error::Conversion(_))
        ));
        assert!(writes(&dev).is_empty());
    }

    /// Task that accepts only half of every write.
    struct HalfTask {
        calls: usize,
    }

    impl DeviceTask for HalfTask {
        fn create_voltage_channel(
            &mut self,
            _: &str,
            _: &str,
            _: f64,
            _: f64,
            _: VoltageUnit,
        ) -> Result<(), Error> {
            Ok(())
        }
        fn verify(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn configure_sample_clock(
            &mut self,
            _: &str,
            _: f64,
            _: Edge,
            _: SampleMode,
            _: usize,
        ) -> Result<(), Error> {
            Ok(())
        }
        fn configure_digital_edge_trigger(&mut self, _: &str, _: Edge) -> Result<(), Error> {
            Ok(())
        }
        fn write(&mut self, s: &PinnedSamples<'_>, _: bool, _: Duration) -> Result<usize, Error> {
            self.calls += 1;
            Ok(s.cols() / 2)
        }
        fn wait_until_done(&mut self, _: Duration) -> Result<(), Error> {
            Ok(())
        }
        fn stop(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn release(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn short_write_is_a_device_fault() {
        let mut task = HalfTask { calls: 0 };
        let mut w = StreamingWriter::new(1, Duration::from_secs(1));
        let buffer = Array2::<f64>::zeros((1, 100));
        assert!(matches!(
            w.on_buffer(&mut task, buffer.view()),
            Err(Error::DeviceWrite(_))
        ));
        assert_eq!(task.calls, 1);
        assert_eq!(w.samples_written(), 0);
        assert_eq!(w.writes(), 0);
        assert!(!w.arena().is_pinned());
    }

    #[test]
    fn short_write_through_boxed_task() {
        let mut task: Box<dyn DeviceTask> = Box::new(HalfTask { calls: 0 });
        let mut w = StreamingWriter::new(2, Duration::from_secs(1));
        let buffer = Array2::<f32>::ones((2, 10));
        assert!(matches!(
            w.on_buffer(&mut task, buffer.view()),
            Err(Error::DeviceWrite(_))
        ));
    }
}
