//! Task construction and timing configuration.
//!
//! [`build`] turns a [`ChannelRegistry`] into a verified [`DeviceTask`]; [`configure`] then
//! binds its sample clock and start trigger. Both run before the first sample is written.
use crate::ChannelRegistry;
use crate::DeviceTask;
use crate::DeviceTrait;
use crate::Error;
use crate::TimingConfig;
use crate::TriggerConfig;

/// Create a task on `device`, add one voltage channel per entry of `channels` and verify it.
///
/// If anything fails after the task was created, it is released before the error is
/// returned.
pub fn build<D: DeviceTrait>(
    device: &D,
    name: &str,
    channels: &ChannelRegistry,
    timing: &TimingConfig,
) -> Result<D::Task, Error> {
    if channels.is_empty() {
        return Err(Error::Configuration(
            "no analog output channels configured".into(),
        ));
    }
    timing.validate()?;

    let mut task = device.create_task(name)?;
    log::debug!("created task {name:?} with {} channels", channels.len());

    let res = channels
        .iter()
        .try_for_each(|c| {
            task.create_voltage_channel(
                &c.physical_channel,
                &c.channel_name,
                c.min_voltage,
                c.max_voltage,
                c.voltage_unit,
            )
        })
        .and_then(|_| task.verify());

    match res {
        Ok(()) => Ok(task),
        Err(e) => {
            log::debug!("task {name:?} failed to build: {e}");
            if let Err(r) = task.release() {
                log::warn!("releasing task {name:?} after failed build: {r}");
            }
            Err(e)
        }
    }
}

/// Bind the sample clock and, if a trigger source is set, a digital-edge start trigger.
pub fn configure<T: DeviceTask>(
    task: &mut T,
    timing: &TimingConfig,
    trigger: &TriggerConfig,
) -> Result<(), Error> {
    task.configure_sample_clock(
        &timing.signal_source,
        timing.sample_rate,
        timing.active_edge,
        timing.sample_mode,
        timing.buffer_size,
    )?;
    log::debug!(
        "sample clock: {} S/s on {:?} ({} edge), {} mode, {} samples",
        timing.sample_rate,
        if timing.signal_source.is_empty() {
            "internal clock"
        } else {
            timing.signal_source.as_str()
        },
        timing.active_edge,
        timing.sample_mode,
        timing.buffer_size
    );

    if trigger.is_enabled() {
        task.configure_digital_edge_trigger(&trigger.source, trigger.edge)?;
        log::debug!("start trigger: {} edge on {:?}", trigger.edge, trigger.source);
    }
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::impls::dummy::Event;
    use crate::impls::Dummy;
    use crate::ChannelSpec;
    use crate::Edge;
    use crate::SampleMode;

    fn two_channels() -> ChannelRegistry {
        "dummy/ao0:x;dummy/ao1:y:-5:5".parse().unwrap()
    }

    #[test]
    fn builds_and_verifies_in_order() {
        let dev = Dummy::open("").unwrap();
        let mut task = build(&dev, "t", &two_channels(), &TimingConfig::default()).unwrap();
        let id = task.id();
        assert_eq!(
            dev.journal(),
            vec![
                Event::Created(id),
                Event::Channel(id, "dummy/ao0".into()),
                Event::Channel(id, "dummy/ao1".into()),
                Event::Verified(id),
            ]
        );
        task.release().unwrap();
    }

    #[test]
    fn empty_registry_creates_nothing() {
        let dev = Dummy::open("").unwrap();
        let res = build(&dev, "t", &ChannelRegistry::new(), &TimingConfig::default());
        assert!(matches!(res, Err(Error::Configuration(_))));
        assert!(dev.journal().is_empty());
    }

    #[test]
    fn invalid_timing_creates_nothing() {
        let dev = Dummy::open("").unwrap();
        let timing = TimingConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            build(&dev, "t", &two_channels(), &timing),
            Err(Error::Configuration(_))
        ));
        assert_eq!(dev.max_live_tasks(), 0);
    }

    #[test]
    fn failed_verify_releases_task() {
        let dev = Dummy::open("").unwrap();
        let mut channels = two_channels();
        channels.add(ChannelSpec::new("dummy/ao0"));
        let res = build(&dev, "t", &channels, &TimingConfig::default());
        assert!(matches!(res, Err(Error::Configuration(_))));
        assert_eq!(dev.live_tasks(), 0);
        assert!(matches!(dev.journal().last(), Some(Event::Released(_))));
        assert!(!dev.journal().iter().any(|e| matches!(e, Event::Verified(_))));
    }

    #[test]
    fn out_of_range_channel_fails_fast() {
        let dev = Dummy::open("").unwrap();
        let channels: ChannelRegistry = "dummy/ao0::-20:20".parse().unwrap();
        assert!(matches!(
            build(&dev, "t", &channels, &TimingConfig::default()),
            Err(Error::Configuration(_))
        ));
        assert_eq!(dev.live_tasks(), 0);
    }

    #[test]
    fn configures_clock_and_trigger() {
        let dev = Dummy::open("").unwrap();
        let timing = TimingConfig {
            sample_rate: 5000.0,
            signal_source: "PFI2".into(),
            active_edge: Edge::Falling,
            sample_mode: SampleMode::Finite,
            buffer_size: 250,
        };
        let mut task = build(&dev, "t", &two_channels(), &timing).unwrap();
        let id = task.id();
        configure(&mut task, &timing, &TriggerConfig::new("PFI0", Edge::Rising)).unwrap();
        let journal = dev.journal();
        assert_eq!(
            journal[journal.len() - 2..],
            [
                Event::SampleClock(id, "PFI2".into(), 5000.0, Edge::Falling, SampleMode::Finite, 250),
                Event::DigitalEdgeTrigger(id, "PFI0".into(), Edge::Rising),
            ]
        );
        task.release().unwrap();
    }

    #[test]
    fn no_trigger_source_binds_no_trigger() {
        let dev = Dummy::open("").unwrap();
        let timing = TimingConfig::default();
        let mut task = build(&dev, "t", &two_channels(), &timing).unwrap();
        configure(&mut task, &timing, &TriggerConfig::default()).unwrap();
        assert!(!dev
            .journal()
            .iter()
            .any(|e| matches!(e, Event::DigitalEdgeTrigger(..))));
        task.release().unwrap();
    }

    #[test]
    fn rejects_unsupported_rate_and_terminal() {
        let dev = Dummy::open("").unwrap();
        let timing = TimingConfig {
            sample_rate: 5e6,
            ..Default::default()
        };
        let mut task = build(&dev, "t", &two_channels(), &timing).unwrap();
        assert!(matches!(
            configure(&mut task, &timing, &TriggerConfig::default()),
            Err(Error::Configuration(_))
        ));
        let timing = TimingConfig::default();
        assert!(matches!(
            configure(&mut task, &timing, &TriggerConfig::new("PFI99", Edge::Rising)),
            Err(Error::Configuration(_))
        ));
        task.release().unwrap();
    }
}
