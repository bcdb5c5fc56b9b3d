//! Measurement hand-off and persistence.
pub mod file_writer;
pub mod measurement_buffer;

pub use file_writer::FileWriter;
pub use measurement_buffer::{MeasurementBuffer, MeasurementRecord};
