use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "dummy")]
use crate::impls;
use crate::Args;
use crate::Driver;
use crate::Edge;
use crate::Error;
use crate::PinnedSamples;
use crate::Range;
use crate::SampleMode;
use crate::VoltageUnit;

/// Central trait, implemented by hardware drivers.
pub trait DeviceTrait: Any + Send {
    /// Associated analog output task
    type Task: DeviceTask;

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Cast to Any for downcasting to a mutable reference.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Device [driver](Driver)
    fn driver(&self) -> Driver;
    /// Identifier for the device, e.g., its serial.
    fn id(&self) -> Result<String, Error>;
    /// Device info that can be displayed to the user.
    fn info(&self) -> Result<Args, Error>;

    //================================ CAPABILITIES ============================================
    /// Physical analog output channels, e.g., `Dev1/ao0`.
    fn ao_channels(&self) -> Result<Vec<String>, Error>;
    /// Terminals that can source a sample clock or a start trigger.
    fn terminals(&self) -> Result<Vec<String>, Error>;
    /// Output voltages supported by a physical channel.
    fn voltage_range(&self, physical_channel: &str) -> Result<Range, Error>;
    /// Supported sample clock rates in samples per second.
    fn sample_rate_range(&self) -> Result<Range, Error>;

    //================================ TASK ============================================
    /// Create an empty analog output task.
    ///
    /// The task owns hardware resources until [`DeviceTask::release`] is called.
    fn create_task(&self, name: &str) -> Result<Self::Task, Error>;
}

/// Live hardware binding of one analog output activation.
///
/// Call order: channels, [`verify`](DeviceTask::verify), sample clock, optional trigger,
/// writes, then [`stop`](DeviceTask::stop) and [`release`](DeviceTask::release). A released
/// task must not be used again.
pub trait DeviceTask: Send {
    /// Add a voltage output channel. Its position defines the row it takes from staged
    /// samples.
    fn create_voltage_channel(
        &mut self,
        physical_channel: &str,
        name: &str,
        min: f64,
        max: f64,
        unit: VoltageUnit,
    ) -> Result<(), Error>;

    /// Validate the channel set against the hardware without generating samples.
    ///
    /// Fails with [`Error::Configuration`].
    fn verify(&mut self) -> Result<(), Error>;

    /// Bind the sample clock.
    ///
    /// # Arguments:
    ///   * `source` -- clock terminal, empty for the internal clock
    ///   * `samples_per_channel` -- samples to generate in finite mode, buffer depth in
    ///     continuous mode
    fn configure_sample_clock(
        &mut self,
        source: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
        samples_per_channel: usize,
    ) -> Result<(), Error>;

    /// Hold generation until `edge` occurs on the `source` terminal.
    fn configure_digital_edge_trigger(&mut self, source: &str, edge: Edge) -> Result<(), Error>;

    /// Write staged samples, one row per channel.
    ///
    /// With `auto_start`, the first write also starts the task. The driver may read from
    /// `samples` by address until the call returns.
    ///
    /// Returns the number of samples written per channel. Fails with [`Error::DeviceWrite`].
    fn write(
        &mut self,
        samples: &PinnedSamples<'_>,
        auto_start: bool,
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// Block until a finite task has generated all its samples.
    ///
    /// Fails with [`Error::Timeout`] if `timeout` expires first.
    fn wait_until_done(&mut self, timeout: Duration) -> Result<(), Error>;

    /// Stop generation.
    fn stop(&mut self) -> Result<(), Error>;

    /// Free the hardware resources of the task.
    fn release(&mut self) -> Result<(), Error>;
}

#[doc(hidden)]
impl DeviceTask for Box<dyn DeviceTask> {
    fn create_voltage_channel(
        &mut self,
        physical_channel: &str,
        name: &str,
        min: f64,
        max: f64,
        unit: VoltageUnit,
    ) -> Result<(), Error> {
        self.as_mut()
            .create_voltage_channel(physical_channel, name, min, max, unit)
    }
    fn verify(&mut self) -> Result<(), Error> {
        self.as_mut().verify()
    }
    fn configure_sample_clock(
        &mut self,
        source: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
        samples_per_channel: usize,
    ) -> Result<(), Error> {
        self.as_mut()
            .configure_sample_clock(source, rate, active_edge, mode, samples_per_channel)
    }
    fn configure_digital_edge_trigger(&mut self, source: &str, edge: Edge) -> Result<(), Error> {
        self.as_mut().configure_digital_edge_trigger(source, edge)
    }
    fn write(
        &mut self,
        samples: &PinnedSamples<'_>,
        auto_start: bool,
        timeout: Duration,
    ) -> Result<usize, Error> {
        self.as_mut().write(samples, auto_start, timeout)
    }
    fn wait_until_done(&mut self, timeout: Duration) -> Result<(), Error> {
        self.as_mut().wait_until_done(timeout)
    }
    fn stop(&mut self) -> Result<(), Error> {
        self.as_mut().stop()
    }
    fn release(&mut self) -> Result<(), Error> {
        self.as_mut().release()
    }
}

/// Wraps a driver, implementing the [DeviceTrait].
///
/// A `Device<GenericDevice>` is hardware independent and can be opened from [`Args`], e.g.,
/// `driver=dummy`.
#[derive(Clone)]
pub struct Device<T: DeviceTrait + Clone + Any> {
    dev: T,
}

impl Device<GenericDevice> {
    /// Creates a [`GenericDevice`] opening the first device with a given `driver`, specified in
    /// the `args` or the first device discovered through [`enumerate`](crate::enumerate) that
    /// matches the args.
    pub fn from_args<A: TryInto<Args>>(args: A) -> Result<Self, Error> {
        let args = args.try_into().or(Err(Error::ValueError))?;
        let driver = match args.get::<Driver>("driver") {
            Ok(d) => Some(d),
            Err(Error::NotFound) => None,
            Err(e) => return Err(e),
        };
        #[cfg(feature = "dummy")]
        {
            if driver.is_none() || matches!(driver, Some(Driver::Dummy)) {
                match impls::Dummy::open(&args) {
                    Ok(d) => {
                        return Ok(Device {
                            dev: Arc::new(DeviceWrapper { dev: d }),
                        })
                    }
                    Err(Error::NotFound) => {
                        if driver.is_some() {
                            return Err(Error::NotFound);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        let _ = driver;
        Err(Error::NotFound)
    }
}

/// Type for a generic/wrapped hardware driver, implementing the [`DeviceTrait`].
///
/// This is usually used to create a hardware-independent `Device<GenericDevice>`, for example,
/// through [`Device::from_args`], which doesn't know a priori which implementation will be used.
/// The type abstracts over the `DeviceTrait` implementation as well as its task type.
pub type GenericDevice = Arc<dyn DeviceTrait<Task = Box<dyn DeviceTask>> + Sync>;

impl<T: DeviceTrait + Clone + Any> Device<T> {
    /// Create a device from the device implementation.
    pub fn from_device(dev: T) -> Self {
        Self { dev }
    }
    /// Try to downcast to a given device implementation `D`, either directly (from `Device<D>`)
    /// or indirectly (from a `Device<GenericDevice>` that wraps a `D`).
    pub fn inner<D: DeviceTrait + Any>(&self) -> Result<&D, Error> {
        if let Some(d) = self.dev.as_any().downcast_ref::<D>() {
            return Ok(d);
        }

        let d = self
            .dev
            .as_any()
            .downcast_ref::<GenericDevice>()
            .ok_or(Error::ValueError)?;

        let d = (**d)
            .as_any()
            .downcast_ref::<DeviceWrapper<D>>()
            .ok_or(Error::ValueError)?;
        Ok(&d.dev)
    }
}

impl<T: DeviceTrait + Clone + Any> DeviceTrait for Device<T> {
    type Task = T::Task;

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn driver(&self) -> Driver {
        self.dev.driver()
    }
    fn id(&self) -> Result<String, Error> {
        self.dev.id()
    }
    fn info(&self) -> Result<Args, Error> {
        self.dev.info()
    }
    fn ao_channels(&self) -> Result<Vec<String>, Error> {
        self.dev.ao_channels()
    }
    fn terminals(&self) -> Result<Vec<String>, Error> {
        self.dev.terminals()
    }
    fn voltage_range(&self, physical_channel: &str) -> Result<Range, Error> {
        self.dev.voltage_range(physical_channel)
    }
    fn sample_rate_range(&self) -> Result<Range, Error> {
        self.dev.sample_rate_range()
    }
    fn create_task(&self, name: &str) -> Result<Self::Task, Error> {
        self.dev.create_task(name)
    }
}

struct DeviceWrapper<D: DeviceTrait> {
    dev: D,
}

impl<T: DeviceTask + 'static, D: DeviceTrait<Task = T>> DeviceTrait for DeviceWrapper<D> {
    type Task = Box<dyn DeviceTask>;

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn driver(&self) -> Driver {
        self.dev.driver()
    }
    fn id(&self) -> Result<String, Error> {
        self.dev.id()
    }
    fn info(&self) -> Result<Args, Error> {
        self.dev.info()
    }
    fn ao_channels(&self) -> Result<Vec<String>, Error> {
        self.dev.ao_channels()
    }
    fn terminals(&self) -> Result<Vec<String>, Error> {
        self.dev.terminals()
    }
    fn voltage_range(&self, physical_channel: &str) -> Result<Range, Error> {
        self.dev.voltage_range(physical_channel)
    }
    fn sample_rate_range(&self) -> Result<Range, Error> {
        self.dev.sample_rate_range()
    }
    fn create_task(&self, name: &str) -> Result<Self::Task, Error> {
        Ok(Box::new(self.dev.create_task(name)?))
    }
}

#[doc(hidden)]
impl DeviceTrait for GenericDevice {
    type Task = Box<dyn DeviceTask>;

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn driver(&self) -> Driver {
        self.as_ref().driver()
    }
    fn id(&self) -> Result<String, Error> {
        self.as_ref().id()
    }
    fn info(&self) -> Result<Args, Error> {
        self.as_ref().info()
    }
    fn ao_channels(&self) -> Result<Vec<String>, Error> {
        self.as_ref().ao_channels()
    }
    fn terminals(&self) -> Result<Vec<String>, Error> {
        self.as_ref().terminals()
    }
    fn voltage_range(&self, physical_channel: &str) -> Result<Range, Error> {
        self.as_ref().voltage_range(physical_channel)
    }
    fn sample_rate_range(&self) -> Result<Range, Error> {
        self.as_ref().sample_rate_range()
    }
    fn create_task(&self, name: &str) -> Result<Self::Task, Error> {
        self.as_ref().create_task(name)
    }
}
