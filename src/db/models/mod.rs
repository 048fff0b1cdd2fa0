pub mod calibration;
pub mod reading;

pub use calibration::Calibration;
pub use reading::{NewReading, Reading, ReadingCounts};
