//! Typed channel settings extracted from a [`ConfigMap`].
//!
//! Drivers never interpret raw strings directly; they go through the types
//! in this module so that every invalid value is reported as a
//! [`CounterError::Configuration`] before a single command is written.

use super::cfg_string::ConfigMap;
use crate::error::{CounterError, CounterResult};
use std::fmt;
use std::str::FromStr;

/// Marker that selects automatic trigger level (`trig1:a50`).
pub const AUTO_LEVEL_MARKER: char = 'a';

/// Lowest termination the inputs accept, in ohms.
pub const MIN_IMPEDANCE_OHMS: u32 = 50;
/// Highest explicit termination, in ohms.
pub const MAX_IMPEDANCE_OHMS: u32 = 1_000_000;

/// How a channel decides where its trigger threshold is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerMode {
    /// Fixed threshold in volts.
    Manual {
        /// Threshold voltage.
        volts: f64,
    },
    /// Threshold relative to the signal amplitude.
    Auto {
        /// Percentage of the peak-to-peak amplitude.
        percent: f64,
    },
}

impl TriggerMode {
    /// Parse the value of a `trig<N>` token.
    pub fn parse(value: &str, key: &str) -> CounterResult<Self> {
        if let Some(percent) = value.strip_prefix(AUTO_LEVEL_MARKER) {
            let percent = percent.parse::<f64>().map_err(|_| {
                CounterError::config(format!("'{key}:{value}' has an invalid auto-level percentage"))
            })?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(CounterError::config(format!(
                    "'{key}:{value}' auto-level must be within 0..100 %"
                )));
            }
            return Ok(TriggerMode::Auto { percent });
        }

        match value.parse::<f64>() {
            Ok(volts) if volts.is_finite() => Ok(TriggerMode::Manual { volts }),
            _ => Err(CounterError::config(format!(
                "'{key}:{value}' is not a trigger level in volts"
            ))),
        }
    }
}

/// Trigger setting for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTrigger {
    /// Input channel (1 or 2).
    pub channel: u8,
    /// Requested trigger mode.
    pub mode: TriggerMode,
}

/// Extract every `trig<N>` token, ascending by channel.
///
/// Fails when the map has no trigger tokens at all.
pub fn trigger_levels(map: &ConfigMap) -> CounterResult<Vec<ChannelTrigger>> {
    let tokens = map.trigger_tokens()?;
    if tokens.is_empty() {
        return Err(CounterError::config("no trig<N> parameters passed to trig_level"));
    }

    tokens
        .into_iter()
        .map(|(channel, value)| {
            let key = format!("trig{channel}");
            Ok(ChannelTrigger {
                channel,
                mode: TriggerMode::parse(value, &key)?,
            })
        })
        .collect()
}

/// Input signal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coupling {
    /// AC coupled.
    Ac,
    /// DC coupled.
    #[default]
    Dc,
}

impl Coupling {
    /// SCPI mnemonic.
    pub fn as_scpi(self) -> &'static str {
        match self {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
        }
    }
}

impl FromStr for Coupling {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ac" => Ok(Coupling::Ac),
            "dc" => Ok(Coupling::Dc),
            _ => Err(CounterError::config(format!(
                "coupling '{s}' is not one of ac, dc"
            ))),
        }
    }
}

/// Input termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impedance {
    /// Explicit termination in ohms.
    Ohms(u32),
    /// Highest termination the instrument offers.
    Max,
}

impl Impedance {
    /// SCPI argument for `INPUT<n>:IMPEDANCE`.
    pub fn as_scpi(self) -> String {
        match self {
            Impedance::Ohms(ohms) => ohms.to_string(),
            Impedance::Max => "MAX".to_string(),
        }
    }
}

impl FromStr for Impedance {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("max") {
            return Ok(Impedance::Max);
        }
        let ohms = s
            .parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .filter(|v| (MIN_IMPEDANCE_OHMS as f64..=MAX_IMPEDANCE_OHMS as f64).contains(v))
            .ok_or_else(|| {
                CounterError::config(format!(
                    "impedance '{s}' must be max or an integer within {MIN_IMPEDANCE_OHMS}..{MAX_IMPEDANCE_OHMS} ohms"
                ))
            })?;
        Ok(Impedance::Ohms(ohms as u32))
    }
}

impl fmt::Display for Impedance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Impedance::Ohms(ohms) => write!(f, "{ohms} Ω"),
            Impedance::Max => f.write_str("MAX"),
        }
    }
}

/// Coupling and termination applied to an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMeasureConfig {
    /// Signal path.
    pub coupling: Coupling,
    /// Termination.
    pub impedance: Impedance,
}

/// How many samples a time-interval run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCount {
    /// Exactly this many samples.
    Finite(u64),
    /// Run until the stop signal fires (`sampl:-1`).
    Unbounded,
}

impl SampleCount {
    /// Value of `sampl` that selects [`SampleCount::Unbounded`].
    pub const RUN_FOREVER: &'static str = "-1";

    /// Whether `taken` samples complete the run.
    pub fn is_done(self, taken: u64) -> bool {
        match self {
            SampleCount::Finite(n) => taken >= n,
            SampleCount::Unbounded => false,
        }
    }
}

impl FromStr for SampleCount {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::RUN_FOREVER {
            return Ok(SampleCount::Unbounded);
        }
        match s.parse::<u64>() {
            Ok(n) if n > 0 => Ok(SampleCount::Finite(n)),
            _ => Err(CounterError::config(format!(
                "sampl '{s}' must be a positive integer or -1"
            ))),
        }
    }
}

/// Resolve `(reference, other)` channels from the `ref` token.
pub fn channel_pair(reference: &str) -> (u8, u8) {
    if reference == "A" {
        (1, 2)
    } else {
        (2, 1)
    }
}

/// Fully validated time-interval request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeIntervalConfig {
    /// Channel whose edge starts the interval.
    pub reference: u8,
    /// Channel whose edge stops the interval.
    pub other: u8,
    /// Number of samples.
    pub samples: SampleCount,
    /// Ask the instrument for a timestamp with every sample.
    pub timestamps: bool,
    /// Coupling/termination applied to both channels.
    pub input: ChannelMeasureConfig,
}

impl TimeIntervalConfig {
    /// Keys that must be present.
    pub const REQUIRED: [&'static str; 4] = ["ref", "sampl", "coup", "imp"];
    /// Accepted spellings of the timestamp flag.
    pub const TIMESTAMP_KEYS: [&'static str; 2] = ["tstamp", "tst"];

    /// Validate and convert a parsed configuration.
    pub fn from_map(map: &ConfigMap) -> CounterResult<Self> {
        for key in Self::REQUIRED {
            map.require(key, "time_interval")?;
        }

        let (reference, other) = channel_pair(map.require("ref", "time_interval")?);
        let samples = map.require("sampl", "time_interval")?.parse()?;
        let coupling = map.require("coup", "time_interval")?.parse()?;
        let impedance = map.require("imp", "time_interval")?.parse()?;
        let timestamps = Self::TIMESTAMP_KEYS
            .iter()
            .find_map(|key| map.get(key))
            .is_some_and(|v| v.eq_ignore_ascii_case("y"));

        Ok(Self {
            reference,
            other,
            samples,
            timestamps,
            input: ChannelMeasureConfig {
                coupling,
                impedance,
            },
        })
    }
}
