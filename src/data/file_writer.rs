//! Background writer that persists the measurement buffer to a text file.
//!
//! ```text
//! Acquisition task (1 sample per trigger) → MeasurementBuffer
//!                                               ↓
//!                              FileWriter (every flush_interval)
//!                                               ↓
//!                                      ti_20240101_120000.dat
//! ```
//!
//! The file is opened in append mode on every flush so an interrupted run
//! keeps everything written so far. Draining and writing happen on the
//! blocking pool; records only leave the buffer once the write succeeded.

use super::measurement_buffer::MeasurementBuffer;
use crate::error::{CounterError, CounterResult};
use crate::shutdown::StopSignal;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Periodic buffer-to-file persistence task.
///
/// # Example
///
/// ```no_run
/// use counter_daq::data::{FileWriter, MeasurementBuffer};
/// use counter_daq::shutdown::stop_channel;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> counter_daq::error::CounterResult<()> {
///     let buffer = Arc::new(MeasurementBuffer::new(0));
///     let writer = FileWriter::new("ti.dat", buffer.clone());
///     let (stop, signal) = stop_channel();
///
///     let task = tokio::spawn(async move { writer.run(signal).await });
///     // ... acquisition pushes into `buffer` ...
///     stop.stop();
///     let lines = task.await.expect("writer task")?;
///     println!("{lines} lines written");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileWriter {
    output_path: PathBuf,
    buffer: Arc<MeasurementBuffer>,
    initial_delay: Duration,
    flush_interval: Duration,
    lines_written: AtomicU64,
}

impl FileWriter {
    /// Create a writer appending to `output_path`.
    pub fn new(output_path: impl Into<PathBuf>, buffer: Arc<MeasurementBuffer>) -> Self {
        Self {
            output_path: output_path.into(),
            buffer,
            initial_delay: Duration::ZERO,
            flush_interval: Duration::from_secs(10),
            lines_written: AtomicU64::new(0),
        }
    }

    /// Wait this long before the first flush.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Time between flushes.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Output file.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Time between flushes.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Total lines appended so far.
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Acquire)
    }

    /// Default file name for a run started now: `ti_<UTC timestamp>.dat`.
    pub fn default_file_name() -> String {
        format!("ti_{}.dat", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Drain the buffer into the output file once.
    ///
    /// Returns the number of lines appended; fails with
    /// [`CounterError::AlreadyDrained`] when the buffer was empty.
    pub async fn flush(&self) -> CounterResult<usize> {
        let path = self.output_path.clone();
        let buffer = self.buffer.clone();
        let written = tokio::task::spawn_blocking(move || -> CounterResult<usize> {
            if buffer.is_empty() {
                return Err(CounterError::AlreadyDrained);
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            buffer.drain_to_sink(&mut file)
        })
        .await
        .map_err(|e| CounterError::Io(std::io::Error::other(e)))?;

        let counted = match &written {
            Ok(n) | Err(CounterError::DrainInterrupted { written: n, .. }) => *n,
            Err(_) => 0,
        };
        self.lines_written
            .fetch_add(counted as u64, Ordering::AcqRel);
        written
    }

    /// Flush on every tick until `stop` fires, then flush one last time.
    ///
    /// Flush failures other than an empty buffer are logged and the loop
    /// keeps going. Returns the total number of lines written.
    pub async fn run(&self, mut stop: StopSignal) -> CounterResult<u64> {
        tracing::info!(
            path = %self.output_path.display(),
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "persistence task started"
        );

        let stopped_early = tokio::select! {
            _ = tokio::time::sleep(self.initial_delay) => false,
            _ = stop.stopped() => true,
        };

        if !stopped_early {
            let mut ticker = interval(self.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.flush_logged().await,
                    _ = stop.stopped() => break,
                }
            }
        }

        // Final flush: whatever the acquisition pushed before stopping.
        match self.flush().await {
            Ok(_) | Err(CounterError::AlreadyDrained) => {}
            Err(err) => return Err(err),
        }

        let total = self.lines_written();
        tracing::info!(lines = total, path = %self.output_path.display(), "persistence task finished");
        Ok(total)
    }

    async fn flush_logged(&self) {
        match self.flush().await {
            Ok(lines) => tracing::debug!(lines, "buffer flushed"),
            Err(CounterError::AlreadyDrained) => tracing::trace!("nothing new to persist"),
            Err(err) => tracing::error!(error = %err, "buffer flush failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MeasurementRecord;
    use crate::shutdown::stop_channel;
    use tempfile::tempdir;

    #[tokio::test]
    async fn flush_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let buffer = Arc::new(MeasurementBuffer::new(0));
        let writer = FileWriter::new(&path, buffer.clone());

        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        assert_eq!(writer.flush().await.unwrap(), 1);
        buffer
            .add(MeasurementRecord::with_timestamp(2.0, 5.5))
            .await
            .unwrap();
        assert_eq!(writer.flush().await.unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1.0\n2.0, 5.5\n");
        assert_eq!(writer.lines_written(), 2);
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_does_not_touch_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let writer = FileWriter::new(&path, Arc::new(MeasurementBuffer::new(0)));

        assert!(matches!(
            writer.flush().await,
            Err(CounterError::AlreadyDrained)
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn run_flushes_periodically_and_on_stop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let buffer = Arc::new(MeasurementBuffer::new(0));
        let writer = Arc::new(
            FileWriter::new(&path, buffer.clone())
                .with_flush_interval(Duration::from_millis(10)),
        );
        let (stop, signal) = stop_channel();

        let task = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.run(signal).await })
        };

        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(buffer.is_empty());

        buffer.add(MeasurementRecord::new(2.0)).await.unwrap();
        stop.stop();
        let total = task.await.unwrap().unwrap();

        assert_eq!(total, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1.0\n2.0\n");
    }

    #[test]
    fn default_file_name_has_prefix_and_extension() {
        let name = FileWriter::default_file_name();
        assert!(name.starts_with("ti_"));
        assert!(name.ends_with(".dat"));
    }
}
