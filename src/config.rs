use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationSecondsWithFrac;
use std::str::FromStr;
use std::time::Duration;

use crate::Args;
use crate::ChannelRegistry;
use crate::Edge;
use crate::Error;
use crate::SampleMode;

const DEFAULT_SAMPLE_RATE: f64 = 1000.0;
const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const KEYS: &[&str] = &[
    "driver",
    "channels",
    "sample_rate",
    "signal_source",
    "active_edge",
    "sample_mode",
    "buffer_size",
    "trigger_source",
    "trigger_edge",
    "write_timeout",
    "done_timeout",
];

/// Sample clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Samples per second and channel.
    pub sample_rate: f64,
    /// Source terminal of the sample clock. Empty selects the device's internal clock.
    pub signal_source: String,
    /// Clock edge on which samples are generated.
    pub active_edge: Edge,
    pub sample_mode: SampleMode,
    /// Samples per channel to generate ([`Finite`](SampleMode::Finite)) or ring depth
    /// ([`Continuous`](SampleMode::Continuous)).
    pub buffer_size: usize,
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::Configuration("buffer size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            signal_source: String::new(),
            active_edge: Edge::Rising,
            sample_mode: SampleMode::Continuous,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Digital-edge start trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Trigger terminal. Empty starts generation immediately.
    #[serde(rename = "trigger_source")]
    pub source: String,
    #[serde(rename = "trigger_edge")]
    pub edge: Edge,
}

impl TriggerConfig {
    pub fn new(source: impl Into<String>, edge: Edge) -> Self {
        Self {
            source: source.into(),
            edge,
        }
    }
    pub fn is_enabled(&self) -> bool {
        !self.source.is_empty()
    }
}

/// Everything needed to build, arm and tear down one analog output task.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub channels: ChannelRegistry,
    #[serde(flatten)]
    pub timing: TimingConfig,
    #[serde(flatten)]
    pub trigger: TriggerConfig,
    /// Bound of a single device write.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub write_timeout: Duration,
    /// Bound of the finite-mode completion wait during disposal.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub done_timeout: Duration,
}

impl OutputConfig {
    /// Build a configuration from flat [`Args`], e.g.,
    /// `channels="Dev1/ao0;Dev1/ao1:-5:5", sample_rate=1e4, sample_mode=finite`.
    ///
    /// Missing keys keep their defaults.
    pub fn from_args<A: TryInto<Args>>(args: A) -> Result<Self, Error> {
        let args: Args = args.try_into().or(Err(Error::ValueError))?;
        for key in args.map().keys() {
            if !KEYS.contains(&key.as_str()) {
                log::warn!("ignoring unknown output argument {key:?}");
            }
        }

        let mut c = Self::default();
        if let Some(channels) = args.get_opt("channels")? {
            c.channels = channels;
        }
        if let Some(rate) = args.get_opt("sample_rate")? {
            c.timing.sample_rate = rate;
        }
        if let Some(source) = args.get_opt("signal_source")? {
            c.timing.signal_source = source;
        }
        if let Some(edge) = args.get_opt("active_edge")? {
            c.timing.active_edge = edge;
        }
        if let Some(mode) = args.get_opt("sample_mode")? {
            c.timing.sample_mode = mode;
        }
        if let Some(size) = args.get_opt("buffer_size")? {
            c.timing.buffer_size = size;
        }
        if let Some(source) = args.get_opt("trigger_source")? {
            c.trigger.source = source;
        }
        if let Some(edge) = args.get_opt("trigger_edge")? {
            c.trigger.edge = edge;
        }
        if let Some(secs) = args.get_opt::<f64>("write_timeout")? {
            c.write_timeout = Duration::try_from_secs_f64(secs).or(Err(Error::ValueError))?;
        }
        if let Some(secs) = args.get_opt::<f64>("done_timeout")? {
            c.done_timeout = Duration::try_from_secs_f64(secs).or(Err(Error::ValueError))?;
        }
        Ok(c)
    }

    /// Load a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::Configuration(e.to_string()))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            channels: ChannelRegistry::new(),
            timing: TimingConfig::default(),
            trigger: TriggerConfig::default(),
            write_timeout: DEFAULT_TIMEOUT,
            done_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FromStr for OutputConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_args(s)
    }
}
