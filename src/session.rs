//! Instrument session: one open counter plus the state that outlives a
//! single command.
//!
//! The session owns the driver and the last trigger configuration applied
//! through [`InstrumentSession::trig_level`]. Every measurement that selects
//! a function (and thereby wipes the instrument trigger levels) receives
//! that cached configuration, so callers never have to repeat `trig<N>`
//! tokens.
//!
//! ## Lifecycle
//!
//! - **`open`**: constructs the driver through the [`CounterRegistry`],
//!   queries `*IDN?` and caches the identity string.
//! - **operations**: take raw configuration strings, parse them into a
//!   [`ConfigMap`] and forward to the driver.
//! - **`close`**: consumes the session; no operation can follow it.

use crate::error::CounterResult;
use crate::instrument::{
    ChannelReading, ConfigMap, ConnectionDescriptor, CounterModel, CounterRegistry, DriverOptions,
    FrequencyCounter, SampleSink,
};

/// An open connection to one frequency counter.
pub struct InstrumentSession {
    counter: Box<dyn FrequencyCounter>,
    info: String,
    trigger: Option<ConfigMap>,
}

impl InstrumentSession {
    /// Connect to `model` at `descriptor` and identify it.
    pub async fn open(
        registry: &CounterRegistry,
        model: CounterModel,
        descriptor: ConnectionDescriptor,
        options: DriverOptions,
    ) -> CounterResult<Self> {
        let counter = registry.open(model, descriptor, options).await?;
        Self::from_counter(counter).await
    }

    /// Wrap an already constructed driver and identify it.
    pub async fn from_counter(mut counter: Box<dyn FrequencyCounter>) -> CounterResult<Self> {
        let info = counter.open().await?;
        tracing::info!(model = %counter.model(), info = %info, "instrument session opened");
        Ok(Self {
            counter,
            info,
            trigger: None,
        })
    }

    /// Identity string returned by the instrument when the session opened.
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Instrument family of the open driver.
    pub fn model(&self) -> CounterModel {
        self.counter.model()
    }

    /// Ask the instrument for its identity again.
    pub async fn identify(&mut self) -> CounterResult<String> {
        self.counter.open().await
    }

    /// Trigger configuration re-applied after every function change.
    pub fn last_trigger(&self) -> Option<&ConfigMap> {
        self.trigger.as_ref()
    }

    /// `*RST`. The cached trigger configuration is kept and will be
    /// written again by the next measurement.
    pub async fn reset_device(&mut self) -> CounterResult<()> {
        self.counter.reset_device().await
    }

    /// Apply trigger levels and remember them for later measurements.
    pub async fn trig_level(&mut self, cfg: &str) -> CounterResult<()> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter.trig_level(&map).await?;
        self.trigger = Some(map);
        Ok(())
    }

    /// Trigger system settings (53230A only).
    pub async fn configure_trigger(&mut self, cfg: &str) -> CounterResult<()> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter.configure_trigger(&map).await
    }

    /// Single-shot frequency of the `ch<N>` channels in `cfg`.
    pub async fn freq(&mut self, cfg: &str) -> CounterResult<Vec<ChannelReading>> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter.freq(&map, self.trigger.as_ref()).await
    }

    /// Single-shot period of the `ch<N>` channels in `cfg`.
    pub async fn period(&mut self, cfg: &str) -> CounterResult<Vec<ChannelReading>> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter.period(&map, self.trigger.as_ref()).await
    }

    /// Time-interval run streaming into `sink`; returns the sample count.
    pub async fn time_interval(&mut self, cfg: &str, sink: &SampleSink<'_>) -> CounterResult<u64> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter
            .time_interval(&map, self.trigger.as_ref(), sink)
            .await
    }

    /// Peak-to-peak amplitude.
    pub async fn pk_to_pk(&mut self, cfg: &str) -> CounterResult<Vec<ChannelReading>> {
        let map = ConfigMap::parse(Some(cfg))?;
        self.counter.pk_to_pk(&map).await
    }

    /// Close the transport and end the session.
    pub async fn close(mut self) -> CounterResult<()> {
        tracing::info!(model = %self.counter.model(), "instrument session closed");
        self.counter.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CounterError;
    use crate::instrument::{Fca3103, Ks53230, MockTransport};
    use std::time::Duration;

    fn options() -> DriverOptions {
        DriverOptions {
            settle_delay: Duration::ZERO,
            ..DriverOptions::default()
        }
    }

    async fn ks_session(mock: &MockTransport) -> InstrumentSession {
        mock.push_reply("*IDN?", "Keysight Technologies,53230A,MY1,1.0");
        InstrumentSession::from_counter(Box::new(Ks53230::with_transport(
            Box::new(mock.clone()),
            options(),
        )))
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn open_caches_identity() {
        let mock = MockTransport::new();
        let session = ks_session(&mock).await;
        assert_eq!(session.info(), "Keysight Technologies 53230A (s/n: MY1)");
        assert_eq!(session.model(), CounterModel::Ks53230);
        assert!(session.last_trigger().is_none());
    }

    #[tokio::test]
    async fn trigger_cache_follows_successful_trig_level() {
        let mock = MockTransport::new();
        let mut session = ks_session(&mock).await;

        session.trig_level("trig1:0.1").await.unwrap();
        assert_eq!(session.last_trigger().unwrap().get("trig1"), Some("0.1"));

        // A failed call leaves the previous configuration in place.
        assert!(session.trig_level("ref:A").await.is_err());
        assert_eq!(session.last_trigger().unwrap().get("trig1"), Some("0.1"));

        mock.clear_commands();
        mock.push_reply("READ?", "100.0");
        session.freq("ch1:1").await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "CONFIGURE:FREQ DEF,DEF,(@1)",
                "INPUT1:LEVEL:AUTO OFF",
                "INPUT1:LEVEL 0.100",
                "INPUT1:COUPLING DC",
                "INIT",
                "READ?",
            ]
        );
    }

    #[tokio::test]
    async fn malformed_config_string_rejected() {
        let mock = MockTransport::new();
        let mut session = ks_session(&mock).await;
        assert!(matches!(
            session.period("ch1").await,
            Err(CounterError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn close_releases_transport() {
        let mock = MockTransport::new().with_reply("*IDN?", "TEKTRONIX,FCA3103,B1,1.0");
        let session = InstrumentSession::from_counter(Box::new(Fca3103::with_transport(
            Box::new(mock.clone()),
            options(),
        )))
        .await
        .unwrap();
        session.close().await.unwrap();
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn configure_trigger_unsupported_on_fca() {
        let mock = MockTransport::new().with_reply("*IDN?", "TEKTRONIX,FCA3103,B1,1.0");
        let mut session = InstrumentSession::from_counter(Box::new(Fca3103::with_transport(
            Box::new(mock),
            options(),
        )))
        .await
        .unwrap();
        assert!(matches!(
            session.configure_trigger("cnt:5").await,
            Err(CounterError::NotImplemented { .. })
        ));
    }
}
