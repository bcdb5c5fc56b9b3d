//! Common SCPI sequencing shared by the counter drivers.
//!
//! Both supported counters speak the same dialect for trigger levels,
//! input coupling, single-shot reads and the `READ?` acquisition loop. The
//! drivers decide the *order* of these steps; the steps themselves live
//! here so that the two command sequences stay comparable line by line.

use super::cfg_string::ConfigMap;
use super::channel_config::{
    trigger_levels, ChannelMeasureConfig, ChannelTrigger, Coupling, SampleCount, TriggerMode,
};
use super::counter::{ChannelReading, SampleSink};
use super::transport::ScpiTransport;
use crate::data::MeasurementRecord;
use crate::error::{CounterError, CounterResult};
use std::time::Duration;

/// Blocking read of one measurement result.
pub const READ: &str = "READ?";
/// Arm the instrument.
pub const INIT: &str = "INIT";
/// Identity query.
pub const IDN: &str = "*IDN?";
/// Reset to defaults.
pub const RST: &str = "*RST";
/// Abort the measurement in progress.
pub const ABORT: &str = "ABORT";

/// Silence on the link after which an abandoned read counts as settled.
pub const ABANDONED_READ_QUIET: Duration = Duration::from_millis(500);

/// What a driver writes for an auto-level trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoLevelSupport {
    /// Only `LEVEL:AUTO ON`; the requested percentage is not sent.
    EnableOnly,
    /// `LEVEL:AUTO ON` followed by `LEVEL:RELATIVE <pct>`.
    Relative,
}

/// Single-shot measurement functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureFunction {
    /// Frequency in Hz.
    Frequency,
    /// Period in seconds.
    Period,
}

impl MeasureFunction {
    /// `CONFIGURE` command selecting this function on `channel`.
    pub fn configure_command(self, channel: u8) -> String {
        match self {
            MeasureFunction::Frequency => format!("CONFIGURE:FREQ DEF,DEF,(@{channel})"),
            MeasureFunction::Period => format!("CONFIGURE:PER DEF,DEF,(@{channel})"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            MeasureFunction::Frequency => "frequency",
            MeasureFunction::Period => "period",
        }
    }
}

/// Parse a numeric reply.
pub fn parse_f64_response(response: &str) -> CounterResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| CounterError::protocol(format!("expected a number, got '{response}'")))
}

/// Format an `*IDN?` reply as `"<manufacturer> <model> (s/n: <serial>)"`.
pub fn format_identity(response: &str) -> CounterResult<String> {
    let mut fields = response.trim().split(',').map(str::trim);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(manufacturer), Some(model), Some(serial)) if !manufacturer.is_empty() => {
            Ok(format!("{manufacturer} {model} (s/n: {serial})"))
        }
        _ => Err(CounterError::protocol(format!(
            "malformed identity reply '{response}'"
        ))),
    }
}

/// Parse one `READ?` reply of a time-interval run.
///
/// With timestamps the reply must be exactly `value,timestamp`; without,
/// a single number.
pub fn parse_sample(reply: &str, timestamps: bool) -> CounterResult<MeasurementRecord> {
    if !timestamps {
        return parse_f64_response(reply).map(MeasurementRecord::new);
    }

    let fields: Vec<&str> = reply.trim().split(',').collect();
    match fields.as_slice() {
        [value, timestamp] => Ok(MeasurementRecord::with_timestamp(
            parse_f64_response(value)?,
            parse_f64_response(timestamp)?,
        )),
        _ => Err(CounterError::protocol(format!(
            "expected 'value,timestamp', got {} field(s) in '{reply}'",
            fields.len()
        ))),
    }
}

/// Write the trigger commands for every `trig<N>` token of `cfg`.
///
/// All tokens are validated before the first command goes out.
pub async fn apply_trigger_levels(
    transport: &mut dyn ScpiTransport,
    cfg: &ConfigMap,
    auto: AutoLevelSupport,
) -> CounterResult<()> {
    write_trigger_levels(transport, &trigger_levels(cfg)?, auto).await
}

async fn write_trigger_levels(
    transport: &mut dyn ScpiTransport,
    triggers: &[ChannelTrigger],
    auto: AutoLevelSupport,
) -> CounterResult<()> {
    for trigger in triggers {
        let ch = trigger.channel;
        match trigger.mode {
            TriggerMode::Manual { volts } => {
                transport.write(&format!("INPUT{ch}:LEVEL:AUTO OFF")).await?;
                transport.write(&format!("INPUT{ch}:LEVEL {volts:.3}")).await?;
                tracing::debug!(channel = ch, volts, "manual trigger level set");
            }
            TriggerMode::Auto { percent } => {
                transport.write(&format!("INPUT{ch}:LEVEL:AUTO ON")).await?;
                match auto {
                    AutoLevelSupport::Relative => {
                        transport
                            .write(&format!("INPUT{ch}:LEVEL:RELATIVE {percent}"))
                            .await?;
                        tracing::debug!(channel = ch, percent, "auto trigger level set");
                    }
                    AutoLevelSupport::EnableOnly => {
                        tracing::debug!(
                            channel = ch,
                            percent,
                            "auto trigger enabled, percentage left to the instrument"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Pick the trigger levels a measurement has to re-apply.
///
/// Trigger tokens in the operation's own `cfg` win over the session's last
/// applied configuration. `None` when there is neither.
pub fn resolve_triggers(
    cfg: &ConfigMap,
    last_trigger: Option<&ConfigMap>,
) -> CounterResult<Option<Vec<ChannelTrigger>>> {
    if !cfg.trigger_tokens()?.is_empty() {
        return trigger_levels(cfg).map(Some);
    }
    last_trigger.map(trigger_levels).transpose()
}

/// Write trigger levels again after a `CONFIGURE` command wiped them.
///
/// With nothing to re-apply the instrument keeps its defaults.
pub async fn reapply_trigger(
    transport: &mut dyn ScpiTransport,
    triggers: Option<&[ChannelTrigger]>,
    auto: AutoLevelSupport,
) -> CounterResult<()> {
    match triggers {
        Some(triggers) => write_trigger_levels(transport, triggers, auto).await,
        None => {
            tracing::warn!("no trigger configuration to re-apply, instrument defaults in effect");
            Ok(())
        }
    }
}

/// Set coupling and termination of `channels`.
pub async fn configure_inputs(
    transport: &mut dyn ScpiTransport,
    channels: &[u8],
    input: ChannelMeasureConfig,
) -> CounterResult<()> {
    for ch in channels {
        transport
            .write(&format!("INPUT{ch}:COUPLING {}", input.coupling.as_scpi()))
            .await?;
    }
    for ch in channels {
        transport
            .write(&format!("INPUT{ch}:IMPEDANCE {}", input.impedance.as_scpi()))
            .await?;
    }
    Ok(())
}

/// Single-shot read of `function` on every `ch<N>` channel of `cfg`.
pub async fn measure_channels(
    transport: &mut dyn ScpiTransport,
    function: MeasureFunction,
    cfg: &ConfigMap,
    last_trigger: Option<&ConfigMap>,
    auto: AutoLevelSupport,
    settle_delay: Duration,
) -> CounterResult<Vec<ChannelReading>> {
    let channels = cfg.channel_selectors()?;
    if channels.is_empty() {
        return Err(CounterError::config(format!(
            "no ch<N> parameters passed to {}",
            function.name()
        )));
    }
    let coupling = match cfg.get("coup") {
        Some(value) => value.parse()?,
        None => Coupling::Dc,
    };
    let triggers = resolve_triggers(cfg, last_trigger)?;

    let mut readings = Vec::with_capacity(channels.len());
    for (channel, _) in channels {
        transport.write(&function.configure_command(channel)).await?;
        reapply_trigger(transport, triggers.as_deref(), auto).await?;
        transport
            .write(&format!("INPUT{channel}:COUPLING {}", coupling.as_scpi()))
            .await?;
        transport.write(INIT).await?;
        tokio::time::sleep(settle_delay).await;
        let value = parse_f64_response(&transport.query(READ).await?)?;
        tracing::info!(channel, value, function = function.name(), "single-shot reading");
        readings.push(ChannelReading { channel, value });
    }
    Ok(readings)
}

/// Issue one `READ?` per sample and push the results into `sink`.
///
/// Stops early, without error, when the stop signal fires. A read still
/// waiting for its trigger is abandoned: the measurement is aborted and any
/// late reply is dropped, so the next query on the link gets its own answer.
pub async fn acquire_samples(
    transport: &mut dyn ScpiTransport,
    samples: SampleCount,
    timestamps: bool,
    sink: &SampleSink<'_>,
) -> CounterResult<u64> {
    let mut stop = sink.stop.clone();
    let mut taken = 0u64;
    let mut abandoned = false;

    while !samples.is_done(taken) {
        if stop.is_stopped() {
            tracing::info!(taken, "stop requested between samples");
            break;
        }

        // No timeout: the instrument answers when the next reference edge arrives.
        let reply = tokio::select! {
            reply = transport.query(READ) => reply?,
            _ = stop.stopped() => {
                tracing::info!(taken, "stop requested while waiting for a trigger");
                abandoned = true;
                break;
            }
        };

        let record = parse_sample(&reply, timestamps)?;
        push_with_backoff(sink, record).await?;
        taken += 1;
        tracing::trace!(taken, value = record.value, "sample stored");
    }

    if abandoned {
        transport.write(ABORT).await?;
        let dropped = transport.discard_replies(ABANDONED_READ_QUIET).await?;
        tracing::debug!(dropped, "link settled after abandoned read");
    }

    Ok(taken)
}

/// Add `record` to the buffer, retrying on [`CounterError::BufferFull`].
///
/// The same record is retried; it is never dropped silently.
pub async fn push_with_backoff(sink: &SampleSink<'_>, record: MeasurementRecord) -> CounterResult<()> {
    let mut attempt = 0u32;
    loop {
        match sink.buffer.add(record).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < sink.retry.attempts => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_attempts = sink.retry.attempts,
                    backoff_ms = sink.retry.backoff.as_millis() as u64,
                    "measurement buffer full, retrying"
                );
                tokio::time::sleep(sink.retry.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
