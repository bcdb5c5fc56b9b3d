//! # counter_daq
//!
//! Control of laboratory frequency counter/timers (Tektronix FCA3103,
//! Keysight 53230A) and buffered persistence of their measurements.
//!
//! ## Crate Structure
//!
//! - **`instrument`**: the configuration micro-language (`ConfigMap`), typed
//!   channel settings, SCPI transports, the `FrequencyCounter` driver
//!   contract and its two implementations, and the model registry.
//! - **`session`**: `InstrumentSession`, one open counter plus the trigger
//!   configuration re-applied after every function change.
//! - **`data`**: the thread-safe `MeasurementBuffer` and the `FileWriter`
//!   persistence task.
//! - **`acquisition`**: orchestrates a time-interval run across the
//!   acquisition loop and the persistence task.
//! - **`shutdown`**: the stop signal observed by both tasks.
//! - **`config`**: Figment-based configuration (TOML file + environment).
//! - **`tracing_setup`**: `tracing-subscriber` initialization.
//! - **`error`**: the crate-wide `CounterError`.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod session;
pub mod shutdown;
pub mod tracing_setup;

pub use error::{CounterError, CounterResult};
