//! Frequency counter drivers, their transports and the configuration
//! strings that drive them.
pub mod cfg_string;
pub mod channel_config;
pub mod counter;
pub mod fca3103;
pub mod ks53230;
pub mod registry;
pub mod scpi_common;
pub mod transport;

pub use cfg_string::ConfigMap;
pub use channel_config::{
    ChannelMeasureConfig, ChannelTrigger, Coupling, Impedance, SampleCount, TimeIntervalConfig,
    TriggerMode,
};
pub use counter::{
    ChannelReading, ConnectionDescriptor, DriverOptions, FrequencyCounter, Interface, RetryPolicy,
    SampleSink,
};
pub use fca3103::Fca3103;
pub use ks53230::Ks53230;
pub use registry::{CounterModel, CounterRegistry};
pub use transport::{LanTransport, MockTransport, ScpiTransport, UsbTmcTransport};
