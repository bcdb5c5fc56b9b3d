//! Tektronix FCA3103 timer/counter/analyzer driver.
//!
//! Reference: FCA3000/3100 Series Programmer Manual
//!
//! Protocol Overview:
//! - Link: USB-TMC only (`/dev/usbtmc<N>`)
//! - Dialect: SCPI, LF terminated
//! - Time interval: `CONFIGURE:TINTERVAL (@start),(@stop)`, one `READ?` per sample
//! - Timestamps: `FORMAT:TINF ON` appends the instrument time of each sample
//!
//! # Important Notes
//!
//! - `CONFIGURE:...` resets the trigger levels; the driver writes the last
//!   trigger configuration again right after it.
//! - Auto trigger level is only switched on. The instrument picks its own
//!   percentage; the requested one is logged and otherwise ignored.
//! - Continuous initiation must be off before arming, or `READ?` returns
//!   stale results.
//!
//! # Example Usage
//!
//! ```no_run
//! use counter_daq::instrument::{
//!     ConfigMap, ConnectionDescriptor, DriverOptions, Fca3103, FrequencyCounter, Interface,
//! };
//!
//! #[tokio::main]
//! async fn main() -> counter_daq::error::CounterResult<()> {
//!     let descriptor = ConnectionDescriptor::new(Interface::Usb, "0");
//!     let mut counter = Fca3103::connect(&descriptor, DriverOptions::default()).await?;
//!
//!     println!("{}", counter.open().await?);
//!     counter.trig_level(&"trig1:0.5 trig2:0.5".parse::<ConfigMap>()?).await?;
//!     Ok(())
//! }
//! ```

use super::cfg_string::ConfigMap;
use super::channel_config::TimeIntervalConfig;
use super::counter::{
    ChannelReading, ConnectionDescriptor, DriverOptions, FrequencyCounter, Interface, SampleSink,
};
use super::registry::CounterModel;
use super::scpi_common::{self, AutoLevelSupport, MeasureFunction, IDN, INIT, RST};
use super::transport::{ScpiTransport, UsbTmcTransport};
use crate::error::CounterResult;
use async_trait::async_trait;
use std::time::Duration;

/// Interfaces the FCA3103 can be reached through.
pub const SUPPORTED_INTERFACES: [Interface; 1] = [Interface::Usb];

const AUTO_LEVEL: AutoLevelSupport = AutoLevelSupport::EnableOnly;

/// Driver for the Tektronix FCA3103.
pub struct Fca3103 {
    transport: Box<dyn ScpiTransport>,
    settle_delay: Duration,
}

impl Fca3103 {
    /// Open the USB-TMC device named by `descriptor`.
    ///
    /// # Errors
    /// [`CounterError::UnsupportedInterface`](crate::error::CounterError::UnsupportedInterface)
    /// for anything but [`Interface::Usb`], before touching the device.
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        options: DriverOptions,
    ) -> CounterResult<Self> {
        descriptor.require_interface(CounterModel::Fca3103.name(), &SUPPORTED_INTERFACES)?;
        let transport = UsbTmcTransport::open(&descriptor.address).await?;
        tracing::info!(device = %transport.describe(), "FCA3103 connected");
        Ok(Self::with_transport(Box::new(transport), options))
    }

    /// Wrap an already open transport.
    pub fn with_transport(transport: Box<dyn ScpiTransport>, options: DriverOptions) -> Self {
        Self {
            transport,
            settle_delay: options.settle_delay,
        }
    }

    async fn measure(
        &mut self,
        function: MeasureFunction,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
    ) -> CounterResult<Vec<ChannelReading>> {
        scpi_common::measure_channels(
            self.transport.as_mut(),
            function,
            cfg,
            last_trigger,
            AUTO_LEVEL,
            self.settle_delay,
        )
        .await
    }
}

#[async_trait]
impl FrequencyCounter for Fca3103 {
    fn model(&self) -> CounterModel {
        CounterModel::Fca3103
    }

    async fn open(&mut self) -> CounterResult<String> {
        let reply = self.transport.query(IDN).await?;
        scpi_common::format_identity(&reply)
    }

    async fn reset_device(&mut self) -> CounterResult<()> {
        self.transport.write(RST).await
    }

    async fn trig_level(&mut self, cfg: &ConfigMap) -> CounterResult<()> {
        scpi_common::apply_trigger_levels(self.transport.as_mut(), cfg, AUTO_LEVEL).await
    }

    async fn freq(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
    ) -> CounterResult<Vec<ChannelReading>> {
        self.measure(MeasureFunction::Frequency, cfg, last_trigger).await
    }

    async fn period(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
    ) -> CounterResult<Vec<ChannelReading>> {
        self.measure(MeasureFunction::Period, cfg, last_trigger).await
    }

    async fn time_interval(
        &mut self,
        cfg: &ConfigMap,
        last_trigger: Option<&ConfigMap>,
        sink: &SampleSink<'_>,
    ) -> CounterResult<u64> {
        let ti = TimeIntervalConfig::from_map(cfg)?;
        let triggers = scpi_common::resolve_triggers(cfg, last_trigger)?;
        let (r, o) = (ti.reference, ti.other);
        let transport = self.transport.as_mut();

        transport.write("INIT:CONT OFF").await?;
        transport
            .write(&format!("CONFIGURE:TINTERVAL (@{r}),(@{o})"))
            .await?;
        scpi_common::reapply_trigger(transport, triggers.as_deref(), AUTO_LEVEL).await?;
        scpi_common::configure_inputs(transport, &[r, o], ti.input).await?;
        transport.write("TRIG:COUNT 1;:ARM:COUNT 1").await?;
        let tinf = if ti.timestamps { "ON" } else { "OFF" };
        transport
            .write(&format!("FORMAT ASCII;:FORMAT:TINF {tinf}"))
            .await?;
        transport.write(INIT).await?;

        tracing::info!(
            reference = r,
            other = o,
            samples = ?ti.samples,
            timestamps = ti.timestamps,
            impedance = %ti.input.impedance,
            "FCA3103 time interval armed"
        );

        scpi_common::acquire_samples(transport, ti.samples, ti.timestamps, sink).await
    }

    async fn close(&mut self) -> CounterResult<()> {
        self.transport.close().await
    }
}
