//! Time-interval run orchestration.
//!
//! ```text
//! caller task                               spawned task
//! ───────────                               ────────────
//! session.time_interval ──add()──▶ MeasurementBuffer ◀──drain── FileWriter::run
//!        │                                                          ▲
//!        └── done / stopped / failed ──▶ writer stop ──final flush──┘
//! ```
//!
//! The acquisition loop runs on the caller's task so the session stays
//! owned by the caller; persistence runs on its own task. The external stop
//! signal only reaches the acquisition loop. The writer is stopped once the
//! loop has returned, so its final flush sees every accepted sample.

use crate::config::AppConfig;
use crate::data::{FileWriter, MeasurementBuffer};
use crate::error::{CounterError, CounterResult};
use crate::instrument::{ConfigMap, RetryPolicy, SampleSink, TimeIntervalConfig};
use crate::session::InstrumentSession;
use crate::shutdown::{stop_channel, StopSignal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Samples accepted into the buffer.
    pub samples: u64,
    /// Lines appended to the output file.
    pub lines_written: u64,
    /// File that received the samples.
    pub output_path: PathBuf,
    /// Whether the run ended because of the stop signal.
    pub stopped: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// A time-interval acquisition with buffered persistence.
#[derive(Debug, Clone)]
pub struct TimeIntervalRun {
    cfg: String,
    output_path: PathBuf,
    buffer_capacity: usize,
    buffer_wait: Duration,
    initial_delay: Duration,
    flush_interval: Duration,
    retry: RetryPolicy,
}

impl TimeIntervalRun {
    /// Run `cfg` (a `time_interval` configuration string) into `output_path`.
    pub fn new(cfg: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            cfg: cfg.into(),
            output_path: output_path.into(),
            buffer_capacity: 0,
            buffer_wait: MeasurementBuffer::DEFAULT_WAIT,
            initial_delay: Duration::ZERO,
            flush_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Build a run from the `buffer`, `persistence` and `acquisition`
    /// sections.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.acquisition.time_interval.clone(), config.output_path())
            .with_buffer(
                config.buffer.capacity,
                Duration::from_millis(config.buffer.wait_ms),
            )
            .with_initial_delay(Duration::from_millis(config.persistence.initial_delay_ms))
            .with_flush_interval(Duration::from_millis(config.persistence.flush_interval_ms))
            .with_retry(config.retry_policy())
    }

    /// Buffer capacity (0 = unbounded) and producer wait period.
    pub fn with_buffer(mut self, capacity: usize, wait: Duration) -> Self {
        self.buffer_capacity = capacity;
        self.buffer_wait = wait;
        self
    }

    /// Delay before the first flush.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Time between flushes.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Write to `path` instead.
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Reaction to a full buffer.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Output file.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Acquire until the sample count is exhausted or `stop` fires.
    ///
    /// The configuration string is validated before the output file or the
    /// persistence task are created. When acquisition fails, everything
    /// accepted so far is still flushed before the error is returned.
    pub async fn execute(
        &self,
        session: &mut InstrumentSession,
        stop: StopSignal,
    ) -> CounterResult<RunSummary> {
        let request = TimeIntervalConfig::from_map(&ConfigMap::parse(Some(&self.cfg))?)?;

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let buffer = Arc::new(MeasurementBuffer::with_wait(
            self.buffer_capacity,
            self.buffer_wait,
        ));
        let writer = FileWriter::new(&self.output_path, buffer.clone())
            .with_initial_delay(self.initial_delay)
            .with_flush_interval(self.flush_interval);
        let (writer_stop, writer_signal) = stop_channel();
        let persistence = tokio::spawn(async move { writer.run(writer_signal).await });

        tracing::info!(
            model = %session.model(),
            samples = ?request.samples,
            output = %self.output_path.display(),
            "time interval run started"
        );
        let started = Instant::now();

        let sink = SampleSink::new(&buffer, &stop).with_retry(self.retry);
        let acquired = session.time_interval(&self.cfg, &sink).await;

        writer_stop.stop();
        let persisted = persistence
            .await
            .map_err(|e| CounterError::Io(std::io::Error::other(e)))?;

        let samples = acquired.inspect_err(|err| {
            tracing::error!(error = %err, "time interval acquisition failed");
        })?;
        let lines_written = persisted?;

        let summary = RunSummary {
            samples,
            lines_written,
            output_path: self.output_path.clone(),
            stopped: stop.is_stopped(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            samples = summary.samples,
            lines = summary.lines_written,
            stopped = summary.stopped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "time interval run finished"
        );
        Ok(summary)
    }
}
