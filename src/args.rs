use nom::branch::alt;
use nom::bytes::complete::escaped;
use nom::bytes::complete::tag;
use nom::bytes::complete::take_while1;
use nom::character::complete::multispace0;
use nom::character::complete::none_of;
use nom::combinator::all_consuming;
use nom::error::{FromExternalError, ParseError};
use nom::multi::separated_list0;
use nom::sequence::delimited;
use nom::sequence::separated_pair;
use nom::IResult;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use crate::Error;

/// Arguments, e.g., `driver=dummy, sample_rate=1000, trigger_source="/Dev1/PFI0"`.
#[derive(Clone, Serialize)]
#[serde(transparent)]
pub struct Args {
    map: HashMap<String, String>,
}

impl Args {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
    pub fn get<V: FromStr<Err = impl std::fmt::Debug>>(&self, v: impl AsRef<str>) -> Result<V, Error> {
        self.map
            .get(v.as_ref())
            .ok_or(Error::NotFound)
            .and_then(|v| v.parse().or(Err(Error::ValueError)))
    }
    /// Like [`get`](Args::get), but a missing key is `Ok(None)` rather than an error.
    pub fn get_opt<V: FromStr<Err = impl std::fmt::Debug>>(
        &self,
        v: impl AsRef<str>,
    ) -> Result<Option<V>, Error> {
        match self.get(v) {
            Ok(v) => Ok(Some(v)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Option<String> {
        self.map.insert(key.into(), value.into())
    }
    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, String, String> {
        self.map.iter()
    }
    pub fn map(&self) -> &HashMap<String, String> {
        &self.map
    }
    pub fn deserialize<D: for<'a> Deserialize<'a>>(&self) -> Option<D> {
        let s = serde_json::to_string(&self).ok()?;
        serde_json::from_str(&s).ok()
    }
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.map.fmt(f)
    }
}

impl std::fmt::Display for Args {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort();
        let mut i = keys.into_iter();
        if let Some(k) = i.next() {
            write!(fmt, "{}={}", k, self.map[k])?;
            for k in i {
                write!(fmt, ", {}={}", k, self.map[k])?;
            }
        }
        Ok(())
    }
}

fn parse_string<'a, E>(input: &'a str) -> IResult<&'a str, &'a str, E>
where
    E: ParseError<&'a str> + FromExternalError<&'a str, std::num::ParseIntError> + std::fmt::Debug,
{
    let esc_single = escaped(none_of("\\\'"), '\\', tag("'"));
    let esc_or_empty_single = alt((esc_single, tag("")));
    let esc_double = escaped(none_of("\\\""), '\\', tag("\""));
    let esc_or_empty_double = alt((esc_double, tag("")));
    let filter = |c: char| c != ',' && c != '=' && !c.is_whitespace();

    delimited(
        multispace0,
        alt((
            delimited(tag("'"), esc_or_empty_single, tag("'")),
            delimited(tag("\""), esc_or_empty_double, tag("\"")),
            take_while1(filter),
        )),
        multispace0,
    )(input)
}

impl FromStr for Args {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = all_consuming(separated_list0(
            delimited(multispace0, tag(","), multispace0),
            separated_pair(
                parse_string::<nom::error::Error<_>>,
                delimited(multispace0, tag("="), multispace0),
                parse_string,
            ),
        ))(s.trim())
        .or(Err(Error::ValueError))?;
        Ok(Args {
            map: HashMap::from_iter(v.1.iter().cloned().map(|(a, b)| (a.into(), b.into()))),
        })
    }
}

impl TryInto<Args> for &str {
    type Error = Error;

    fn try_into(self) -> Result<Args, Self::Error> {
        self.parse()
    }
}

impl TryInto<Args> for String {
    type Error = Error;

    fn try_into(self) -> Result<Args, Self::Error> {
        self.parse()
    }
}

impl From<&Args> for Args {
    fn from(value: &Args) -> Self {
        value.clone()
    }
}

impl Default for Args {
    fn default() -> Self {
        Self::new()
    }
}
