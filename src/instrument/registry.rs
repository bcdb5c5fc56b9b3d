//! Counter model registry.
//!
//! Maps a [`CounterModel`] to the constructor that opens it, so the session
//! and the CLI never name a concrete driver type.
//!
//! ```text
//! config: model = "fca3103" ──▶ CounterRegistry::open ──▶ Box<dyn FrequencyCounter>
//! ```

use super::counter::{ConnectionDescriptor, DriverOptions, FrequencyCounter};
use super::fca3103::Fca3103;
use super::ks53230::Ks53230;
use crate::error::{CounterError, CounterResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported instrument families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterModel {
    /// Tektronix FCA3103 timer/counter/analyzer.
    Fca3103,
    /// Keysight 53230A universal counter.
    #[serde(alias = "53230a")]
    Ks53230,
}

impl CounterModel {
    /// Every supported model.
    pub const ALL: [CounterModel; 2] = [CounterModel::Fca3103, CounterModel::Ks53230];

    /// Instrument model name as printed on the front panel.
    pub fn name(self) -> &'static str {
        match self {
            CounterModel::Fca3103 => "FCA3103",
            CounterModel::Ks53230 => "53230A",
        }
    }
}

impl fmt::Display for CounterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CounterModel {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fca3103" => Ok(CounterModel::Fca3103),
            "ks53230" | "53230a" => Ok(CounterModel::Ks53230),
            _ => Err(CounterError::config(format!(
                "unknown counter model '{s}', expected fca3103 or ks53230"
            ))),
        }
    }
}

/// Async constructor producing a connected driver.
pub type CounterFactory = Box<
    dyn Fn(
            ConnectionDescriptor,
            DriverOptions,
        ) -> BoxFuture<'static, CounterResult<Box<dyn FrequencyCounter>>>
        + Send
        + Sync,
>;

/// A registry of driver constructors keyed by model.
pub struct CounterRegistry {
    factories: HashMap<CounterModel, CounterFactory>,
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl CounterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the hardware drivers shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CounterModel::Fca3103, |descriptor, options| {
            Box::pin(async move {
                let counter = Fca3103::connect(&descriptor, options).await?;
                Ok::<Box<dyn FrequencyCounter>, CounterError>(Box::new(counter))
            })
        });
        registry.register(CounterModel::Ks53230, |descriptor, options| {
            Box::pin(async move {
                let counter = Ks53230::connect(&descriptor, options).await?;
                Ok::<Box<dyn FrequencyCounter>, CounterError>(Box::new(counter))
            })
        });
        registry
    }

    /// Register (or replace) the constructor for `model`.
    pub fn register<F>(&mut self, model: CounterModel, factory: F)
    where
        F: Fn(
                ConnectionDescriptor,
                DriverOptions,
            ) -> BoxFuture<'static, CounterResult<Box<dyn FrequencyCounter>>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(model, Box::new(factory));
    }

    /// Whether a constructor is registered for `model`.
    pub fn contains(&self, model: CounterModel) -> bool {
        self.factories.contains_key(&model)
    }

    /// Construct and connect a driver.
    pub async fn open(
        &self,
        model: CounterModel,
        descriptor: ConnectionDescriptor,
        options: DriverOptions,
    ) -> CounterResult<Box<dyn FrequencyCounter>> {
        let factory = self.factories.get(&model).ok_or_else(|| {
            CounterError::config(format!("no driver registered for {model}"))
        })?;
        tracing::debug!(%model, interface = %descriptor.interface, address = %descriptor.address, "opening counter");
        factory(descriptor, options).await
    }
}
