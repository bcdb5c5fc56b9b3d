//! Thread-safe FIFO handing samples from the acquisition task to persistence.
//!
//! ```text
//! acquisition task ──add()──▶ MeasurementBuffer ──drain_to_sink()──▶ file
//!                  (waits while full)          (periodic, persistence task)
//! ```
//!
//! The queue is a `Mutex<VecDeque>`; producers that find it at capacity
//! park on a `Notify` that consumers fire whenever they remove records, so
//! `add` waits for space for at most the configured wait period instead of
//! spinning.

use crate::error::{CounterError, CounterResult};
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One sample taken from the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    /// Measured value (seconds for time interval, Hz for frequency, ...).
    pub value: f64,
    /// Instrument-reported timestamp in seconds, when requested.
    pub timestamp: Option<f64>,
}

impl MeasurementRecord {
    /// Record without a timestamp.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }

    /// Record carrying an instrument timestamp.
    pub fn with_timestamp(value: f64, timestamp: f64) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }
}

/// Line format of the output file: `value` or `value, timestamp`.
///
/// Floats use `{:?}` so integral values keep their decimal point (`1.0`)
/// and tiny intervals stay in exponent form (`1e-9`).
impl fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{:?}, {:?}", self.value, ts),
            None => write!(f, "{:?}", self.value),
        }
    }
}

/// Bounded (or unbounded, capacity 0) FIFO of [`MeasurementRecord`]s.
#[derive(Debug)]
pub struct MeasurementBuffer {
    queue: Mutex<VecDeque<MeasurementRecord>>,
    space_freed: Notify,
    capacity: usize,
    wait: Duration,
}

impl MeasurementBuffer {
    /// Wait period used by [`MeasurementBuffer::new`].
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

    /// Create a buffer holding at most `capacity` records (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self::with_wait(capacity, Self::DEFAULT_WAIT)
    }

    /// Create a buffer with a custom wait period for blocked producers.
    pub fn with_wait(capacity: usize, wait: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            space_freed: Notify::new(),
            capacity,
            wait,
        }
    }

    /// Configured capacity (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append a record, waiting up to the wait period for free space.
    pub async fn add(&self, record: MeasurementRecord) -> CounterResult<()> {
        let deadline = Instant::now() + self.wait;
        loop {
            // Registered before the capacity check so a take() racing with
            // us cannot slip its notification in between.
            let space_freed = self.space_freed.notified();
            {
                let mut queue = self.lock();
                if self.capacity == 0 || queue.len() < self.capacity {
                    queue.push_back(record);
                    return Ok(());
                }
            }

            if let Err(source) = tokio::time::timeout_at(deadline, space_freed).await {
                return Err(CounterError::BufferFull {
                    capacity: self.capacity,
                    source,
                });
            }
        }
    }

    /// Remove and return exactly `count` records in FIFO order.
    ///
    /// Asking for more than is available fails and leaves the buffer as it
    /// was; there is no partial take.
    pub fn take(&self, count: usize) -> CounterResult<Vec<MeasurementRecord>> {
        let taken: Vec<_> = {
            let mut queue = self.lock();
            if count > queue.len() {
                return Err(CounterError::BufferEmpty {
                    available: queue.len(),
                    requested: count,
                });
            }
            queue.drain(..count).collect()
        };

        if !taken.is_empty() {
            self.space_freed.notify_waiters();
        }
        Ok(taken)
    }

    /// Move every available record into `sink`, one line per record.
    ///
    /// Returns the number of lines written. Fails with
    /// [`CounterError::AlreadyDrained`] when there is nothing to write.
    ///
    /// A record leaves the buffer only once its whole line was accepted. If
    /// the sink fails, the records not yet written go back to the front of
    /// the queue and [`CounterError::DrainInterrupted`] reports how many made
    /// it. The put-back tail may leave the queue above capacity for a while
    /// when the producer refilled it meanwhile; `add` keeps waiting until it
    /// drops below again.
    pub fn drain_to_sink<W: Write>(&self, sink: &mut W) -> CounterResult<usize> {
        let records = {
            let mut queue = self.lock();
            if queue.is_empty() {
                return Err(CounterError::AlreadyDrained);
            }
            let available = queue.len();
            queue.drain(..available).collect::<Vec<_>>()
        };
        self.space_freed.notify_waiters();

        let mut written = 0;
        for record in &records {
            if let Err(source) = writeln!(sink, "{record}") {
                let mut queue = self.lock();
                for record in records[written..].iter().rev() {
                    queue.push_front(*record);
                }
                return Err(CounterError::DrainInterrupted { written, source });
            }
            written += 1;
        }

        sink.flush()
            .map_err(|source| CounterError::DrainInterrupted { written, source })?;
        Ok(written)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MeasurementRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    fn short_wait(capacity: usize) -> MeasurementBuffer {
        MeasurementBuffer::with_wait(capacity, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn full_buffer_rejects_then_accepts_after_take() {
        let buffer = short_wait(2);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        buffer.add(MeasurementRecord::new(2.0)).await.unwrap();

        match buffer.add(MeasurementRecord::new(3.0)).await {
            Err(CounterError::BufferFull { capacity, .. }) => assert_eq!(capacity, 2),
            other => panic!("expected BufferFull, got {:?}", other),
        }

        let first = buffer.take(1).unwrap();
        assert_eq!(first, vec![MeasurementRecord::new(1.0)]);
        buffer.add(MeasurementRecord::new(3.0)).await.unwrap();

        let rest = buffer.take(2).unwrap();
        assert_eq!(
            rest,
            vec![MeasurementRecord::new(2.0), MeasurementRecord::new(3.0)]
        );
    }

    #[tokio::test]
    async fn blocked_add_completes_when_space_frees() {
        let buffer = Arc::new(MeasurementBuffer::with_wait(1, Duration::from_secs(2)));
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.add(MeasurementRecord::new(2.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        buffer.take(1).unwrap();
        producer.await.unwrap().unwrap();
        assert_eq!(buffer.take(1).unwrap(), vec![MeasurementRecord::new(2.0)]);
    }

    #[tokio::test]
    async fn take_more_than_available_leaves_buffer_untouched() {
        let buffer = short_wait(0);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        buffer.add(MeasurementRecord::new(2.0)).await.unwrap();

        match buffer.take(3) {
            Err(CounterError::BufferEmpty {
                available,
                requested,
            }) => {
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("expected BufferEmpty, got {:?}", other),
        }
        assert_eq!(buffer.len(), 2);
        assert!(buffer.take(0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbounded_buffer_never_fills() {
        let buffer = short_wait(0);
        for i in 0..1000 {
            buffer.add(MeasurementRecord::new(i as f64)).await.unwrap();
        }
        assert_eq!(buffer.len(), 1000);
        let all = buffer.take(1000).unwrap();
        assert!(all.iter().enumerate().all(|(i, r)| r.value == i as f64));
    }

    #[test]
    fn drain_empty_buffer_reports_already_drained() {
        let buffer = short_wait(0);
        let mut sink = Vec::new();
        assert!(matches!(
            buffer.drain_to_sink(&mut sink),
            Err(CounterError::AlreadyDrained)
        ));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn drain_writes_one_line_per_record() {
        let buffer = short_wait(0);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        buffer
            .add(MeasurementRecord::with_timestamp(2.0, 5.5))
            .await
            .unwrap();

        let mut sink = Vec::new();
        assert_eq!(buffer.drain_to_sink(&mut sink).unwrap(), 2);
        assert_eq!(String::from_utf8(sink).unwrap(), "1.0\n2.0, 5.5\n");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn failed_sink_restores_records() {
        struct BrokenSink;
        impl Write for BrokenSink {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buffer = short_wait(0);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        buffer.add(MeasurementRecord::new(2.0)).await.unwrap();

        assert!(matches!(
            buffer.drain_to_sink(&mut BrokenSink),
            Err(CounterError::DrainInterrupted { written: 0, .. })
        ));
        assert_eq!(
            buffer.take(2).unwrap(),
            vec![MeasurementRecord::new(1.0), MeasurementRecord::new(2.0)]
        );
    }

    /// Accepts `budget` bytes, then fails every write.
    struct ShortSink {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn interrupted_drain_requeues_only_unwritten_records() {
        let buffer = short_wait(0);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        buffer.add(MeasurementRecord::new(2.0)).await.unwrap();

        let mut sink = ShortSink {
            data: Vec::new(),
            budget: 4,
        };
        assert!(matches!(
            buffer.drain_to_sink(&mut sink),
            Err(CounterError::DrainInterrupted { written: 1, .. })
        ));
        assert_eq!(buffer.len(), 1);

        sink.budget = usize::MAX;
        assert_eq!(buffer.drain_to_sink(&mut sink).unwrap(), 1);
        assert_eq!(String::from_utf8(sink.data).unwrap(), "1.0\n2.0\n");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn requeued_tail_keeps_producer_waiting_until_below_capacity() {
        /// Refills the buffer while the drain is in progress, then fails.
        struct RefillingSink<'a>(&'a MeasurementBuffer);
        impl Write for RefillingSink<'_> {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                futures::executor::block_on(self.0.add(MeasurementRecord::new(2.0)))
                    .map_err(io::Error::other)?;
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buffer = short_wait(1);
        buffer.add(MeasurementRecord::new(1.0)).await.unwrap();
        assert!(buffer.drain_to_sink(&mut RefillingSink(&buffer)).is_err());
        assert_eq!(buffer.len(), 2);

        assert!(buffer.add(MeasurementRecord::new(3.0)).await.is_err());
        assert_eq!(buffer.take(1).unwrap(), vec![MeasurementRecord::new(1.0)]);
        assert!(buffer.add(MeasurementRecord::new(3.0)).await.is_err());
        assert_eq!(buffer.take(1).unwrap(), vec![MeasurementRecord::new(2.0)]);
        buffer.add(MeasurementRecord::new(3.0)).await.unwrap();
    }

    #[test]
    fn record_display_matches_file_format() {
        assert_eq!(MeasurementRecord::new(1e-9).to_string(), "1e-9");
        assert_eq!(
            MeasurementRecord::with_timestamp(3.5e-10, 12.0).to_string(),
            "3.5e-10, 12.0"
        );
    }
}
