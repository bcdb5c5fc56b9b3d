//! Keysight 53230A universal frequency counter/timer driver.
//!
//! Reference: Keysight 53210A/53220A/53230A Programming Guide
//!
//! Protocol Overview:
//! - Link: LAN (VXI-11 instruments also serve SCPI on TCP port 5025)
//! - Dialect: SCPI, LF terminated
//! - Time interval: `CONFIGURE:TINTERVAL (@start),(@stop)`, one `READ?` per sample
//! - Auto trigger level takes a relative percentage (`LEVEL:RELATIVE`)

use super::cfg_string::ConfigMap;
use super::channel_config::TimeIntervalConfig;
use super::counter::{
    ChannelReading, ConnectionDescriptor, DriverOptions, FrequencyCounter, Interface, SampleSink,
};
use super::registry::CounterModel;
use super::scpi_common::{self, AutoLevelSupport, MeasureFunction, IDN, INIT, RST};
use super::transport::{LanTransport, ScpiTransport};
use crate::error::{CounterError, CounterResult};
use async_trait::async_trait;
use std::time::Duration;

/// Interfaces the 53230A can be reached through.
pub const SUPPORTED_INTERFACES: [Interface; 1] = [Interface::Vxi11];

/// Accepted range of `TRIGGER:COUNT`.
pub const TRIGGER_COUNT_RANGE: std::ops::RangeInclusive<u32> = 1..=1_000_000;
/// Longest `TRIGGER:DELAY`, in seconds.
pub const MAX_TRIGGER_DELAY_S: f64 = 3600.0;

const AUTO_LEVEL: AutoLevelSupport = AutoLevelSupport::Relative;

/// Driver for the Keysight 53230A.
pub struct Ks53230 {
    transport: Box<dyn ScpiTransport>,
    settle_delay: Duration,
}

impl Ks53230 {
    /// Connect to the instrument named by `descriptor`.
    ///
    /// Only [`Interface::Vxi11`] is accepted; the check runs before any
    /// network traffic.
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        options: DriverOptions,
    ) -> CounterResult<Self> {
        descriptor.require_interface(CounterModel::Ks53230.name(), &SUPPORTED_INTERFACES)?;
        let transport = LanTransport::connect(&descriptor.address, options.connect_timeout).await?;
        tracing::info!(peer = %transport.describe(), "53230A connected");
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

/// Translate `cnt`/`del`/`sou`/`slo` tokens into trigger-system commands.
///
/// Everything is validated before the first command is returned.
fn trigger_system_commands(cfg: &ConfigMap) -> CounterResult<Vec<String>> {
    let mut commands = Vec::new();

    if let Some(count) = cfg.get("cnt") {
        let n = count
            .parse::<u32>()
            .ok()
            .filter(|n| TRIGGER_COUNT_RANGE.contains(n))
            .ok_or_else(|| {
                CounterError::config(format!(
                    "cnt '{count}' must be an integer within {}..{}",
                    TRIGGER_COUNT_RANGE.start(),
                    TRIGGER_COUNT_RANGE.end()
                ))
            })?;
        commands.push(format!("TRIGGER:COUNT {n}"));
    }

    if let Some(delay) = cfg.get("del") {
        let seconds = delay
            .parse::<f64>()
            .ok()
            .filter(|s| (0.0..=MAX_TRIGGER_DELAY_S).contains(s))
            .ok_or_else(|| {
                CounterError::config(format!(
                    "del '{delay}' must be within 0..{MAX_TRIGGER_DELAY_S} s"
                ))
            })?;
        commands.push(format!("TRIGGER:DELAY {seconds:.6}"));
    }

    if let Some(source) = cfg.get("sou") {
        let source = match source.to_ascii_lowercase().as_str() {
            "imm" => "IMM",
            "bus" => "BUS",
            "ext" => "EXT",
            _ => {
                return Err(CounterError::config(format!(
                    "sou '{source}' is not one of imm, bus, ext"
                )))
            }
        };
        commands.push(format!("TRIGGER:SOURCE {source}"));
    }

    if let Some(slope) = cfg.get("slo") {
        let slope = match slope.to_ascii_lowercase().as_str() {
            "pos" => "POS",
            "neg" => "NEG",
            _ => {
                return Err(CounterError::config(format!(
                    "slo '{slope}' is not one of pos, neg"
                )))
            }
        };
        commands.push(format!("TRIGGER:SLOPE {slope}"));
    }

    if commands.is_empty() {
        return Err(CounterError::config(
            "no cnt, del, sou or slo parameters passed to configure_trigger",
        ));
    }
    Ok(commands)
}

#[async_trait]
impl FrequencyCounter for Ks53230 {
    fn model(&self) -> CounterModel {
        CounterModel::Ks53230
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

        transport
            .write(&format!("CONFIGURE:TINTERVAL (@{r}),(@{o})"))
            .await?;
        scpi_common::reapply_trigger(transport, triggers.as_deref(), AUTO_LEVEL).await?;
        scpi_common::configure_inputs(transport, &[r, o], ti.input).await?;
        transport.write("TRIG:COUNT 1").await?;
        let tinf = if ti.timestamps { "ON" } else { "OFF" };
        transport.write(&format!("FORMAT:TINF {tinf}")).await?;
        transport.write(INIT).await?;

        tracing::info!(
            reference = r,
            other = o,
            samples = ?ti.samples,
            timestamps = ti.timestamps,
            "53230A time interval armed"
        );

        scpi_common::acquire_samples(transport, ti.samples, ti.timestamps, sink).await
    }

    async fn configure_trigger(&mut self, cfg: &ConfigMap) -> CounterResult<()> {
        for command in trigger_system_commands(cfg)? {
            self.transport.write(&command).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> CounterResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MeasurementBuffer, MeasurementRecord};
    use crate::instrument::transport::MockTransport;
    use crate::shutdown::StopSignal;

    fn driver(mock: &MockTransport) -> Ks53230 {
        Ks53230::with_transport(
            Box::new(mock.clone()),
            DriverOptions {
                settle_delay: Duration::ZERO,
                ..DriverOptions::default()
            },
        )
    }

    fn map(s: &str) -> ConfigMap {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn rejects_usb_before_any_io() {
        let descriptor = ConnectionDescriptor::new(Interface::Usb, "0");
        let err = Ks53230::connect(&descriptor, DriverOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CounterError::UnsupportedInterface { driver: "53230A", .. }
        ));
    }

    #[tokio::test]
    async fn identity_is_formatted() {
        let mock = MockTransport::new()
            .with_reply("*IDN?", "Keysight Technologies,53230A,MY50001234,02.05-1519.666");
        let mut counter = driver(&mock);
        assert_eq!(
            counter.open().await.unwrap(),
            "Keysight Technologies 53230A (s/n: MY50001234)"
        );
    }

    #[tokio::test]
    async fn auto_trigger_sets_relative_level() {
        let mock = MockTransport::new();
        let mut counter = driver(&mock);
        counter.trig_level(&map("trig1:a50")).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec!["INPUT1:LEVEL:AUTO ON", "INPUT1:LEVEL:RELATIVE 50"]
        );
    }

    #[tokio::test]
    async fn time_interval_command_order_without_timestamps() {
        let mock = MockTransport::new().with_reply("READ?", "4.2e-9");
        let mut counter = driver(&mock);
        let buffer = MeasurementBuffer::new(0);
        let stop = StopSignal::never();

        counter
            .time_interval(
                &map("ref:A sampl:1 coup:dc imp:max trig1:-0.25"),
                None,
                &SampleSink::new(&buffer, &stop),
            )
            .await
            .unwrap();

        assert_eq!(
            mock.commands(),
            vec![
                "CONFIGURE:TINTERVAL (@1),(@2)",
                "INPUT1:LEVEL:AUTO OFF",
                "INPUT1:LEVEL -0.250",
                "INPUT1:COUPLING DC",
                "INPUT2:COUPLING DC",
                "INPUT1:IMPEDANCE MAX",
                "INPUT2:IMPEDANCE MAX",
                "TRIG:COUNT 1",
                "FORMAT:TINF OFF",
                "INIT",
                "READ?",
            ]
        );
        assert_eq!(buffer.take(1).unwrap(), vec![MeasurementRecord::new(4.2e-9)]);
    }

    #[tokio::test]
    async fn configure_trigger_writes_validated_settings() {
        let mock = MockTransport::new();
        let mut counter = driver(&mock);
        counter
            .configure_trigger(&map("cnt:10 del:0.5 sou:ext slo:neg"))
            .await
            .unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "TRIGGER:COUNT 10",
                "TRIGGER:DELAY 0.500000",
                "TRIGGER:SOURCE EXT",
                "TRIGGER:SLOPE NEG",
            ]
        );
    }

    #[tokio::test]
    async fn configure_trigger_rejects_out_of_range() {
        let mock = MockTransport::new();
        let mut counter = driver(&mock);
        for cfg in ["cnt:0", "cnt:1000001", "del:-1", "del:3601", "sou:int", "slo:up", "x:1"] {
            assert!(
                matches!(
                    counter.configure_trigger(&map(cfg)).await,
                    Err(CounterError::Configuration(_))
                ),
                "{cfg}"
            );
        }
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn period_reapplies_cached_trigger() {
        let mock = MockTransport::new().with_reply("READ?", "1e-6");
        let mut counter = driver(&mock);
        let last = map("trig1:a30");

        let readings = counter.period(&map("ch1:1"), Some(&last)).await.unwrap();
        assert_eq!(readings, vec![ChannelReading { channel: 1, value: 1e-6 }]);
        assert_eq!(
            mock.commands(),
            vec![
                "CONFIGURE:PER DEF,DEF,(@1)",
                "INPUT1:LEVEL:AUTO ON",
                "INPUT1:LEVEL:RELATIVE 30",
                "INPUT1:COUPLING DC",
                "INIT",
                "READ?",
            ]
        );
    }

    #[tokio::test]
    async fn pk_to_pk_not_implemented() {
        let mut counter = driver(&MockTransport::new());
        assert!(matches!(
            counter.pk_to_pk(&map("ch1:1")).await,
            Err(CounterError::NotImplemented { driver: "53230A", .. })
        ));
    }
}
