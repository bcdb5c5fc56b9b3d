//! Driver contract shared by every supported frequency counter.
//!
//! A counter is constructed from a [`ConnectionDescriptor`]; the interface
//! kind is checked before any I/O happens. After that the caller drives it
//! through [`FrequencyCounter`], passing the configuration strings already
//! parsed into [`ConfigMap`]s.
//!
//! # Trigger re-application
//!
//! Both instruments reset their trigger levels whenever a measurement
//! function is selected (`CONFIGURE:...`). Drivers therefore receive the
//! last trigger configuration applied through [`FrequencyCounter::trig_level`]
//! as an explicit argument and write it again right after selecting the
//! function. The cache itself lives in
//! [`InstrumentSession`](crate::session::InstrumentSession).

use super::cfg_string::ConfigMap;
use super::registry::CounterModel;
use crate::data::MeasurementBuffer;
use crate::error::{CounterError, CounterResult};
use crate::shutdown::StopSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Physical link used to reach the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    /// USB Test & Measurement Class device.
    Usb,
    /// USB CDC-ACM virtual serial port.
    UsbAcm,
    /// VXI-11 / LAN instrument.
    Vxi11,
}

impl Interface {
    /// Lowercase name used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Interface::Usb => "usb",
            Interface::UsbAcm => "usb_acm",
            Interface::Vxi11 => "vxi11",
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interface {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usb" | "usbtmc" => Ok(Interface::Usb),
            "usb_acm" | "acm" => Ok(Interface::UsbAcm),
            "vxi11" | "lan" => Ok(Interface::Vxi11),
            _ => Err(CounterError::config(format!(
                "unknown interface '{s}', expected usb, usb_acm or vxi11"
            ))),
        }
    }
}

/// Where and how to reach an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Link kind.
    pub interface: Interface,
    /// Interface specific address: usbtmc index or device path, host[:port].
    pub address: String,
}

impl ConnectionDescriptor {
    /// Build a descriptor.
    pub fn new(interface: Interface, address: impl Into<String>) -> Self {
        Self {
            interface,
            address: address.into(),
        }
    }

    /// Fail with [`CounterError::UnsupportedInterface`] unless the
    /// descriptor uses one of `supported`.
    pub fn require_interface(
        &self,
        driver: &'static str,
        supported: &[Interface],
    ) -> CounterResult<()> {
        if supported.contains(&self.interface) {
            Ok(())
        } else {
            tracing::error!(driver, interface = %self.interface, "unsupported interface");
            Err(CounterError::UnsupportedInterface {
                driver,
                interface: self.interface.to_string(),
            })
        }
    }
}

/// Tunables applied when a driver is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Give up connecting to a network instrument after this long.
    pub connect_timeout: Duration,
    /// Pause between `INIT` and `READ?` for single-shot freq/period reads.
    pub settle_delay: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// One reading per measured channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    /// Input channel.
    pub channel: u8,
    /// Measured value.
    pub value: f64,
}

/// How the acquisition loop reacts to a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed `add`.
    pub attempts: u32,
    /// Pause before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Destination of a time-interval run.
#[derive(Debug, Clone, Copy)]
pub struct SampleSink<'a> {
    /// Buffer receiving one record per sample.
    pub buffer: &'a MeasurementBuffer,
    /// Checked between samples and while waiting for the instrument.
    pub stop: &'a StopSignal,
    /// Reaction to a full buffer.
    pub retry: RetryPolicy,
}

impl<'a> SampleSink<'a> {
    /// Sink with the default retry policy.
    pub fn new(buffer: &'a MeasurementBuffer, stop: &'a StopSignal) -> Self {
        Self {
            buffer,
            stop,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Operations every frequency counter/timer driver provides.
#[async_trait]
pub trait FrequencyCounter: Send + Sync {
    /// Which instrument family this driver talks to.
    fn model(&self) -> CounterModel;

    /// Ask the instrument who it is.
    ///
    /// Returns `"<manufacturer> <model> (s/n: <serial>)"`.
    async fn open(&mut self) -> CounterResult<String>;

    /// Restore the instrument defaults (`*RST`).
    async fn reset_device(&mut self) -> CounterResult<()>;

    /// Apply the `trig<N>` tokens of `cfg`.
    async fn trig_level(&mut self, cfg: &ConfigMap) -> CounterResult<()>;

    /// Single-shot frequency of every `ch<N>` channel in `cfg`.
    async fn freq(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
    ) -> CounterResult<Vec<ChannelReading>>;

    /// Single-shot period of every `ch<N>` channel in `cfg`.
    async fn period(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
    ) -> CounterResult<Vec<ChannelReading>>;

    /// Configure a time-interval measurement and stream samples into `sink`.
    ///
    /// Returns the number of samples pushed.
    async fn time_interval(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
        sink: &SampleSink<'_>,
    ) -> CounterResult<u64>;

    /// Peak-to-peak amplitude of the input signal.
    async fn pk_to_pk(&mut self, _cfg: &ConfigMap) -> CounterResult<Vec<ChannelReading>> {
        Err(CounterError::NotImplemented {
            driver: self.model().name(),
            operation: "pk_to_pk",
        })
    }

    /// Trigger system settings (count, delay, slope, source).
    async fn configure_trigger(&mut self, _cfg: &ConfigMap) -> CounterResult<()> {
        Err(CounterError::NotImplemented {
            driver: self.model().name(),
            operation: "configure_trigger",
        })
    }

    /// Close the link to the instrument.
    async fn close(&mut self) -> CounterResult<()>;
}
