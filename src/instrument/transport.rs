//! SCPI transports.
//!
//! A transport only knows how to push a command line to the instrument and
//! how to read one reply back. Everything above it (command ordering,
//! parsing of replies) lives in the drivers.
//!
//! - [`UsbTmcTransport`]: USB-TMC character device (`/dev/usbtmc<N>`), used
//!   by the Tektronix FCA3103.
//! - [`LanTransport`]: TCP socket speaking newline terminated SCPI, used by
//!   the Keysight 53230A.
//! - [`MockTransport`]: scripted replies and a command log, for tests and
//!   dry runs.

use crate::error::{CounterError, CounterResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Default port of the SCPI socket server on LXI instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Command terminator understood by both supported instruments.
const TERMINATOR: &str = "\n";

/// Read size for a single USB-TMC reply.
const USBTMC_READ_LEN: usize = 4096;

/// Trait for SCPI communication transports.
///
/// Methods take `&mut self`: a transport belongs to exactly one driver and
/// is never shared between tasks.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&mut self, command: &str) -> CounterResult<()>;

    /// Send a query command and return the response, trimmed.
    async fn query(&mut self, command: &str) -> CounterResult<String>;

    /// Read and drop replies until the link stays quiet for `quiet`.
    ///
    /// Called after a query was abandoned so that its late reply cannot
    /// answer the next one. Returns the number of replies dropped.
    async fn discard_replies(&mut self, quiet: Duration) -> CounterResult<usize> {
        let _ = quiet;
        Ok(0)
    }

    /// Release the underlying link.
    async fn close(&mut self) -> CounterResult<()> {
        Ok(())
    }

    /// Short description for log messages.
    fn describe(&self) -> String;
}

// =============================================================================
// USB-TMC
// =============================================================================

/// USB-TMC transport backed by the kernel `usbtmc` driver.
pub struct UsbTmcTransport {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl UsbTmcTransport {
    /// Resolve the device node for `address`.
    ///
    /// A bare number `N` maps to `/dev/usbtmc<N>`; anything else is taken as
    /// a path.
    pub fn device_path(address: &str) -> PathBuf {
        if !address.is_empty() && address.chars().all(|c| c.is_ascii_digit()) {
            PathBuf::from(format!("/dev/usbtmc{address}"))
        } else {
            PathBuf::from(address)
        }
    }

    /// Open the device node for reading and writing.
    pub async fn open(address: &str) -> CounterResult<Self> {
        let path = Self::device_path(address);
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                CounterError::Transport(format!("failed to open {}: {e}", path.display()))
            })?;
        tracing::debug!(path = %path.display(), "USB-TMC device opened");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    fn file(&mut self) -> CounterResult<&mut tokio::fs::File> {
        self.file.as_mut().ok_or(CounterError::NotConnected)
    }
}

#[async_trait]
impl ScpiTransport for UsbTmcTransport {
    async fn write(&mut self, command: &str) -> CounterResult<()> {
        tracing::trace!(command, "usbtmc write");
        let file = self.file()?;
        file.write_all(format!("{command}{TERMINATOR}").as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> CounterResult<String> {
        self.write(command).await?;
        let file = self.file()?;
        let mut buf = vec![0u8; USBTMC_READ_LEN];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(CounterError::Transport(format!(
                "empty reply to '{command}'"
            )));
        }
        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        tracing::trace!(command, reply = %reply, "usbtmc read");
        Ok(reply)
    }

    async fn discard_replies(&mut self, quiet: Duration) -> CounterResult<usize> {
        // An abandoned read still runs in the background; its result is the
        // first one collected here.
        let file = self.file()?;
        let mut buf = vec![0u8; USBTMC_READ_LEN];
        let mut discarded = 0;
        loop {
            match tokio::time::timeout(quiet, file.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    let reply = String::from_utf8_lossy(&buf[..n]);
                    tracing::debug!(reply = %reply.trim(), "stale reply dropped");
                    discarded += 1;
                }
                Ok(Err(err)) => {
                    tracing::debug!(error = %err, "usbtmc drain ended");
                    break;
                }
            }
        }
        Ok(discarded)
    }

    async fn close(&mut self) -> CounterResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("usbtmc:{}", self.path.display())
    }
}

// =============================================================================
// LAN socket
// =============================================================================

/// TCP transport for instruments exposing a SCPI socket.
pub struct LanTransport {
    peer: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    /// Bytes of the reply line being read; kept across cancelled reads.
    pending: Vec<u8>,
}

impl LanTransport {
    /// Resolve `host` or `host:port` into a socket address string.
    pub fn socket_address(address: &str) -> String {
        if address.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            address.to_string()
        } else {
            format!("{address}:{DEFAULT_SCPI_PORT}")
        }
    }

    /// Connect to the instrument, giving up after `connect_timeout`.
    pub async fn connect(address: &str, connect_timeout: Duration) -> CounterResult<Self> {
        let peer = Self::socket_address(address);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| CounterError::Transport(format!("timed out connecting to {peer}")))?
            .map_err(|e| CounterError::Transport(format!("failed to connect to {peer}: {e}")))?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        tracing::debug!(peer = %peer, "SCPI socket connected");
        Ok(Self {
            peer,
            reader: Some(BufReader::new(read)),
            writer: Some(write),
            pending: Vec::new(),
        })
    }

    /// Read one reply line.
    ///
    /// `read_until` appends to `pending`, so a read dropped half way resumes
    /// where it stopped instead of losing the bytes already received.
    async fn read_reply(&mut self) -> CounterResult<String> {
        let reader = self.reader.as_mut().ok_or(CounterError::NotConnected)?;
        let n = reader.read_until(b'\n', &mut self.pending).await?;
        if n == 0 {
            self.pending.clear();
            return Err(CounterError::Transport(format!(
                "{} closed the connection",
                self.peer
            )));
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        Ok(line)
    }
}

#[async_trait]
impl ScpiTransport for LanTransport {
    async fn write(&mut self, command: &str) -> CounterResult<()> {
        tracing::trace!(command, "socket write");
        let writer = self.writer.as_mut().ok_or(CounterError::NotConnected)?;
        writer
            .write_all(format!("{command}{TERMINATOR}").as_bytes())
            .await?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> CounterResult<String> {
        self.write(command).await?;
        let reply = self.read_reply().await?;
        tracing::trace!(command, reply = %reply, "socket read");
        Ok(reply)
    }

    async fn discard_replies(&mut self, quiet: Duration) -> CounterResult<usize> {
        let mut discarded = 0;
        while let Ok(reply) = tokio::time::timeout(quiet, self.read_reply()).await {
            let reply = reply?;
            tracing::debug!(reply = %reply, "stale reply dropped");
            discarded += 1;
        }
        self.pending.clear();
        Ok(discarded)
    }

    async fn close(&mut self) -> CounterResult<()> {
        self.pending.clear();
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.peer)
    }
}

// =============================================================================
// Mock
// =============================================================================

#[derive(Default)]
struct MockState {
    replies: HashMap<String, VecDeque<String>>,
    log: Vec<String>,
    closed: bool,
}

/// Scripted transport for tests.
///
/// Clones share state, so a test can keep one handle to inspect the command
/// log after moving the other into a driver.
///
/// # Example
///
/// ```
/// use counter_daq::instrument::{MockTransport, ScpiTransport};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mock = MockTransport::new().with_reply("*IDN?", "TEKTRONIX,FCA3103,B010101,1.0");
/// let mut transport = mock.clone();
/// transport.write("*RST").await.unwrap();
/// assert_eq!(transport.query("*IDN?").await.unwrap(), "TEKTRONIX,FCA3103,B010101,1.0");
/// assert_eq!(mock.commands(), vec!["*RST", "*IDN?"]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    reply_ready: Arc<Notify>,
    block_when_empty: bool,
}

impl MockTransport {
    /// Create a mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next `command` query.
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        self.push_reply(command, reply);
        self
    }

    /// Queries with no scripted reply wait for one instead of failing.
    ///
    /// Models an instrument whose `READ?` blocks until the next trigger.
    pub fn blocking_when_empty(mut self) -> Self {
        self.block_when_empty = true;
        self
    }

    /// Queue a reply; wakes a query waiting in blocking mode.
    pub fn push_reply(&self, command: &str, reply: &str) {
        self.lock()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self.reply_ready.notify_waiters();
    }

    /// Every command and query issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: &str) -> CounterResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(CounterError::NotConnected);
        }
        state.log.push(command.to_string());
        Ok(())
    }

    fn next_reply(&self, command: &str) -> Option<String> {
        self.lock()
            .replies
            .get_mut(command)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ScpiTransport for MockTransport {
    async fn write(&mut self, command: &str) -> CounterResult<()> {
        self.record(command)
    }

    async fn query(&mut self, command: &str) -> CounterResult<String> {
        self.record(command)?;
        loop {
            let notified = self.reply_ready.notified();
            if let Some(reply) = self.next_reply(command) {
                return Ok(reply);
            }
            if !self.block_when_empty {
                return Err(CounterError::Transport(format!(
                    "no scripted reply for '{command}'"
                )));
            }
            notified.await;
        }
    }

    /// Drops every queued reply, like an instrument whose output queue is
    /// cleared.
    async fn discard_replies(&mut self, _quiet: Duration) -> CounterResult<usize> {
        let mut state = self.lock();
        let discarded = state.replies.values().map(VecDeque::len).sum();
        state.replies.clear();
        Ok(discarded)
    }

    async fn close(&mut self) -> CounterResult<()> {
        self.lock().closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
