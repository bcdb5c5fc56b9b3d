//! Application configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/counter_daq.toml` (or an explicit path)
//! 2. Environment variables prefixed with `COUNTER_DAQ_`; nested keys are
//!    separated by a double underscore, so `log_level` keeps its own.
//!
//! ```text
//! COUNTER_DAQ_APPLICATION__LOG_LEVEL=debug
//! COUNTER_DAQ_INSTRUMENT__ADDRESS=192.168.0.6
//! ```
//!
//! # Example
//! ```no_run
//! use counter_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("{} at {}", config.instrument.model, config.instrument.address);
//! # Ok::<(), counter_daq::error::CounterError>(())
//! ```

use crate::data::FileWriter;
use crate::error::{CounterError, CounterResult};
use crate::instrument::{
    ConfigMap, ConnectionDescriptor, CounterModel, DriverOptions, Interface, RetryPolicy,
    TimeIntervalConfig,
};
use crate::tracing_setup::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/counter_daq.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "COUNTER_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Which counter to open and how
    pub instrument: InstrumentConfig,
    /// Measurement buffer sizing
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Output file and flush cadence
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Time-interval run settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Instrument connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Counter family
    pub model: CounterModel,
    /// Link kind
    pub interface: Interface,
    /// usbtmc index/path or host[:port]
    pub address: String,
    /// Network connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Pause between INIT and READ? for single-shot reads, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Trigger levels applied once the session is open (`trig1:0.5 ...`)
    #[serde(default)]
    pub trigger: Option<String>,
    /// Trigger system settings (`cnt:1 sou:ext ...`), 53230A only
    #[serde(default)]
    pub trigger_system: Option<String>,
}

/// Measurement buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum records held (0 = unbounded)
    #[serde(default)]
    pub capacity: usize,
    /// How long a full buffer blocks the producer, in milliseconds
    #[serde(default = "default_buffer_wait_ms")]
    pub wait_ms: u64,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory receiving data files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name; `ti_<UTC timestamp>.dat` when unset
    #[serde(default)]
    pub file_name: Option<String>,
    /// Delay before the first flush, in milliseconds
    #[serde(default)]
    pub initial_delay_ms: u64,
    /// Flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Time-interval acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Configuration string handed to `time_interval`
    #[serde(default = "default_time_interval")]
    pub time_interval: String,
    /// Retries of a record rejected by a full buffer
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Pause before each retry, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    3000
}

fn default_buffer_wait_ms() -> u64 {
    5000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_time_interval() -> String {
    "ref:A sampl:-1 tstamp:Y coup:dc imp:1000000".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            model: CounterModel::Fca3103,
            interface: Interface::Usb,
            address: "0".to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            trigger: None,
            trigger_system: None,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            wait_ms: default_buffer_wait_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_name: None,
            initial_delay_ms: 0,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            time_interval: default_time_interval(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> CounterResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// Values missing from both fall back to the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> CounterResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> CounterResult<()> {
        crate::tracing_setup::parse_log_level(&self.application.log_level)?;

        if self.instrument.address.trim().is_empty() {
            return Err(CounterError::config("instrument.address must not be empty"));
        }

        if self.persistence.flush_interval_ms == 0 {
            return Err(CounterError::config(
                "persistence.flush_interval_ms must be greater than 0",
            ));
        }

        if let Some(trigger) = &self.instrument.trigger {
            crate::instrument::channel_config::trigger_levels(&ConfigMap::parse(Some(trigger))?)?;
        }
        if let Some(system) = &self.instrument.trigger_system {
            ConfigMap::parse(Some(system))?;
        }

        TimeIntervalConfig::from_map(&ConfigMap::parse(Some(&self.acquisition.time_interval))?)?;
        Ok(())
    }

    /// Connection descriptor of the configured instrument.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.instrument.interface, self.instrument.address.clone())
    }

    /// Driver tunables.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            connect_timeout: Duration::from_millis(self.instrument.connect_timeout_ms),
            settle_delay: Duration::from_millis(self.instrument.settle_delay_ms),
        }
    }

    /// Reaction of the acquisition loop to a full buffer.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.acquisition.retry_attempts,
            backoff: Duration::from_millis(self.acquisition.retry_backoff_ms),
        }
    }

    /// Output file of a run started now.
    pub fn output_path(&self) -> PathBuf {
        let name = self
            .persistence
            .file_name
            .clone()
            .unwrap_or_else(FileWriter::default_file_name);
        self.persistence.output_dir.join(name)
    }
}
