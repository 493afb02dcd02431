#![doc = "Clocked, triggered multi-channel analog output streaming."]
//!
//! An [`AnalogOutput`] turns a sequence of two-dimensional sample buffers (one row per
//! channel) into a clocked voltage waveform on a data-acquisition device. The hardware is
//! reached through the [`DeviceTrait`]/[`DeviceTask`] capability, so the engine can be driven
//! against the in-process [`impls::Dummy`] device without real hardware.
//!
//! ```
//! # #[cfg(feature = "dummy")]
//! # fn main() -> Result<(), aostream::Error> {
//! use aostream::impls::Dummy;
//! use aostream::{AnalogOutput, OutputConfig};
//! use ndarray::Array2;
//!
//! let config: OutputConfig = "channels=dummy/ao0;dummy/ao1, sample_rate=1000, sample_mode=finite, buffer_size=100"
//!     .parse()?;
//! let output = AnalogOutput::new(Dummy::open("")?, config);
//!
//! let buffers = vec![Array2::<f32>::zeros((2, 100))];
//! for buffer in output.process_iter(buffers) {
//!     let _forwarded = buffer?;
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "dummy"))]
//! # fn main() {}
//! ```
mod args;
pub use args::Args;

pub mod builder;

mod channel;
pub use channel::ChannelRegistry;
pub use channel::ChannelSpec;

mod config;
pub use config::OutputConfig;
pub use config::TimingConfig;
pub use config::TriggerConfig;

mod device;
pub use device::Device;
pub use device::DeviceTask;
pub use device::DeviceTrait;
pub use device::GenericDevice;

pub mod impls;

mod output;
pub use output::AnalogOutput;
pub use output::Process;
pub use output::ProcessIter;

mod range;
pub use range::Range;
pub use range::RangeItem;

mod sample;
pub use sample::Depth;
pub use sample::Sample;
pub use sample::SampleBuffer;

mod session;
pub use session::CancelHandle;
pub use session::Session;
pub use session::State;

mod staging;
pub use staging::PinnedSamples;
pub use staging::StagingArena;

mod writer;
pub use writer::StreamingWriter;

use std::str::FromStr;
use thiserror::Error;

/// Analog output error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Invalid channel set, rate, range or trigger, raised before any write.
    #[error("Configuration Error: {0}")]
    Configuration(String),
    /// A buffer that cannot be converted into the device sample layout.
    #[error("Conversion Error: {0}")]
    Conversion(String),
    /// Driver-reported fault during a write.
    #[error("Device Write Error: {0}")]
    DeviceWrite(String),
    /// Finite generation did not complete within the disposal bound.
    #[error("Disposal Timeout")]
    DisposalTimeout,
    /// A bounded driver call expired.
    #[error("Timeout")]
    Timeout,
    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid State: {0:?}")]
    InvalidState(State),
    #[error("Value Error")]
    ValueError,
    #[error("Not Found")]
    NotFound,
    #[error("Not Supported")]
    NotSupported,
}

/// Device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Driver {
    #[cfg(feature = "dummy")]
    Dummy,
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        #[cfg(feature = "dummy")]
        {
            if s == "dummy" {
                return Ok(Driver::Dummy);
            }
        }
        log::debug!("unknown driver {s:?}");
        Err(Error::ValueError)
    }
}

/// Polarity of a clock or trigger signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    Rising,
    Falling,
}

impl FromStr for Edge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            _ => Err(Error::ValueError),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Rising => write!(f, "rising"),
            Edge::Falling => write!(f, "falling"),
        }
    }
}

/// Whether a task generates a fixed number of samples or runs from a circular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Generate `buffer_size` samples per channel, then complete.
    Finite,
    /// Generate until stopped; `buffer_size` is the ring depth.
    #[default]
    Continuous,
}

impl FromStr for SampleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "finite" => Ok(SampleMode::Finite),
            "continuous" => Ok(SampleMode::Continuous),
            _ => Err(Error::ValueError),
        }
    }
}

impl std::fmt::Display for SampleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleMode::Finite => write!(f, "finite"),
            SampleMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Units of an analog output voltage channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageUnit {
    #[default]
    Volts,
    /// Units defined by a custom scale registered with the driver.
    FromCustomScale,
}

impl FromStr for VoltageUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v" | "volts" => Ok(VoltageUnit::Volts),
            "custom" | "from_custom_scale" => Ok(VoltageUnit::FromCustomScale),
            _ => Err(Error::ValueError),
        }
    }
}

/// Enumerate devices.
pub fn enumerate() -> Result<Vec<Args>, Error> {
    enumerate_with_args(Args::new())
}

/// Enumerate devices with given [Args].
pub fn enumerate_with_args<A: TryInto<Args>>(a: A) -> Result<Vec<Args>, Error> {
    let args: Args = a.try_into().or(Err(Error::ValueError))?;
    let driver = match args.get::<Driver>("driver") {
        Ok(d) => Some(d),
        Err(Error::NotFound) => None,
        Err(e) => return Err(e),
    };
    let mut devs = Vec::new();

    #[cfg(feature = "dummy")]
    {
        if driver.is_none() || matches!(driver, Some(Driver::Dummy)) {
            devs.append(&mut impls::Dummy::probe(&args)?)
        }
    }

    let _ = driver;
    Ok(devs)
}
