use nom::bytes::complete::tag;
use nom::bytes::complete::take_while;
use nom::bytes::complete::take_while1;
use nom::character::complete::multispace0;
use nom::combinator::all_consuming;
use nom::combinator::map_res;
use nom::combinator::opt;
use nom::multi::separated_list1;
use nom::number::complete::double;
use nom::sequence::delimited;
use nom::sequence::preceded;
use nom::sequence::separated_pair;
use nom::IResult;
use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

use crate::Error;
use crate::VoltageUnit;

const DEFAULT_MIN_VOLTAGE: f64 = -10.0;
const DEFAULT_MAX_VOLTAGE: f64 = 10.0;

/// One physical analog output line and its signal range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Physical channel, e.g., `Dev1/ao0`.
    pub physical_channel: String,
    /// Logical channel name. Empty lets the driver name the channel after its physical id.
    #[serde(default)]
    pub channel_name: String,
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    #[serde(default)]
    pub voltage_unit: VoltageUnit,
}

fn default_min_voltage() -> f64 {
    DEFAULT_MIN_VOLTAGE
}

fn default_max_voltage() -> f64 {
    DEFAULT_MAX_VOLTAGE
}

impl ChannelSpec {
    /// Channel on `physical_channel`, named after it, spanning ±10 V.
    pub fn new(physical_channel: impl Into<String>) -> Self {
        let physical_channel = physical_channel.into();
        Self {
            channel_name: physical_channel.clone(),
            physical_channel,
            min_voltage: DEFAULT_MIN_VOLTAGE,
            max_voltage: DEFAULT_MAX_VOLTAGE,
            voltage_unit: VoltageUnit::Volts,
        }
    }
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }
    pub fn with_range(mut self, min_voltage: f64, max_voltage: f64) -> Self {
        self.min_voltage = min_voltage;
        self.max_voltage = max_voltage;
        self
    }
    pub fn with_unit(mut self, unit: VoltageUnit) -> Self {
        self.voltage_unit = unit;
        self
    }
}

/// Ordered set of output channels. Row `i` of every sample buffer drives channel `i`.
///
/// Nothing is validated on insertion; the device checks the set when a task is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRegistry {
    channels: Vec<ChannelSpec>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, channel: ChannelSpec) -> &mut Self {
        self.channels.push(channel);
        self
    }
    pub fn iter(&self) -> std::slice::Iter<'_, ChannelSpec> {
        self.channels.iter()
    }
    pub fn len(&self) -> usize {
        self.channels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&ChannelSpec> {
        self.channels.get(index)
    }
}

impl FromIterator<ChannelSpec> for ChannelRegistry {
    fn from_iter<I: IntoIterator<Item = ChannelSpec>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ChannelRegistry {
    type Item = &'a ChannelSpec;
    type IntoIter = std::slice::Iter<'a, ChannelSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

fn is_field(c: char) -> bool {
    c != ':' && c != ';' && !c.is_whitespace()
}

// physical[:name[:min:max[:unit]]]
fn channel(input: &str) -> IResult<&str, ChannelSpec> {
    let (input, physical) = take_while1(is_field)(input)?;
    let (input, name) = opt(preceded(tag(":"), take_while(is_field)))(input)?;
    let (input, bounds) = opt(preceded(
        tag(":"),
        separated_pair(double, tag(":"), double),
    ))(input)?;
    let (input, unit) = opt(preceded(
        tag(":"),
        map_res(take_while1(is_field), VoltageUnit::from_str),
    ))(input)?;

    let mut spec = ChannelSpec::new(physical);
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        spec.channel_name = name.to_string();
    }
    if let Some((min, max)) = bounds {
        spec = spec.with_range(min, max);
    }
    if let Some(unit) = unit {
        spec = spec.with_unit(unit);
    }
    Ok((input, spec))
}

impl FromStr for ChannelSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(delimited(multispace0, channel, multispace0))(s)
            .map(|(_, c)| c)
            .or(Err(Error::ValueError))
    }
}

impl FromStr for ChannelRegistry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, channels) = all_consuming(separated_list1(
            tag(";"),
            delimited(multispace0, channel, multispace0),
        ))(s)
        .or(Err(Error::ValueError))?;
        Ok(Self { channels })
    }
}
