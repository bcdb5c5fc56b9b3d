//! Custom error types for the crate.
//!
//! `CounterError` is the single error type returned by the configuration
//! parser, the counter drivers, the transports and the measurement buffer.
//! Using `thiserror`, each variant carries the context a caller needs to
//! decide what to do next:
//!
//! - **`Configuration`**: a missing or malformed configuration token, a bad
//!   channel index, or a value outside its allowed set (coupling, impedance,
//!   trigger source, ...). Raised before any command reaches the device.
//! - **`UnsupportedInterface`**: a driver was asked to talk over an interface
//!   it does not support. Fatal, raised at construction.
//! - **`BufferFull`** / **`BufferEmpty`** / **`AlreadyDrained`**: the three
//!   failure modes of the [`MeasurementBuffer`](crate::data::MeasurementBuffer).
//! - **`DrainInterrupted`**: the output sink failed mid-drain; carries how
//!   many records did reach it.
//! - **`Protocol`**: the instrument answered with text that does not have
//!   the expected shape (wrong field count, non-numeric value).
//! - **`Transport`** / **`Io`**: the link to the instrument failed.
//!
//! By using `#[from]`, I/O and settings errors convert with `?`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type CounterResult<T> = std::result::Result<T, CounterError>;

/// Error type for every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum CounterError {
    /// Missing/invalid configuration token or value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The driver cannot use the requested interface.
    #[error("{driver} does not support the {interface} interface")]
    UnsupportedInterface {
        /// Driver that rejected the descriptor.
        driver: &'static str,
        /// Interface kind that was requested.
        interface: String,
    },

    /// The buffer stayed at capacity for the whole wait period.
    #[error("Measurement buffer full (capacity {capacity})")]
    BufferFull {
        /// Configured capacity of the buffer.
        capacity: usize,
        /// The elapsed wait that caused the failure.
        #[source]
        source: tokio::time::error::Elapsed,
    },

    /// More records were requested than are available.
    #[error("Measurement buffer holds {available} records, {requested} requested")]
    BufferEmpty {
        /// Records currently in the buffer.
        available: usize,
        /// Records the caller asked for.
        requested: usize,
    },

    /// A drain was requested while the buffer was empty.
    #[error("Measurement buffer is already saved")]
    AlreadyDrained,

    /// The sink failed part way through a drain.
    #[error("Drain interrupted after {written} records")]
    DrainInterrupted {
        /// Records whose lines reached the sink before the failure.
        written: usize,
        /// The write error.
        #[source]
        source: std::io::Error,
    },

    /// Operation declared by the driver contract but not provided by this model.
    #[error("{operation} is not implemented for {driver}")]
    NotImplemented {
        /// Driver lacking the operation.
        driver: &'static str,
        /// Name of the operation.
        operation: &'static str,
    },

    /// The instrument reply could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport level failure (connect, timeout, closed link).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session has been closed.
    #[error("Instrument session is closed")]
    NotConnected,

    /// Loading application settings failed.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// I/O error from files or sockets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CounterError {
    /// Shorthand for a [`CounterError::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        CounterError::Configuration(msg.into())
    }

    /// Shorthand for a [`CounterError::Protocol`] error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        CounterError::Protocol(msg.into())
    }

    /// Whether the caller may retry the same operation after a pause.
    ///
    /// Only a full buffer qualifies: the persistence task will free space.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CounterError::BufferFull { .. })
    }
}

impl From<figment::Error> for CounterError {
    fn from(value: figment::Error) -> Self {
        CounterError::Settings(Box::new(value))
    }
}
