//! Pressure transducer abstraction

pub mod wnk80ma;

pub use wnk80ma::Wnk80ma;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: bus transaction failed during {operation}")]
    Bus {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: read timed out")]
    Timeout { sensor: &'static str },
    #[error("{sensor}: malformed response")]
    Malformed { sensor: &'static str },
    #[error("{sensor}: reinitialization failed: {details}")]
    Reinitialization {
        sensor: &'static str,
        details: &'static str,
    },
}

/// A transducer that yields one raw reading per call.
pub trait PressureSensor {
    /// Read one raw value from the device.
    fn read_raw(&mut self) -> impl Future<Output = Result<u32, SensorError>>;

    /// Tear down and reinitialize the device and its bus.
    fn reinitialize(&mut self) -> impl Future<Output = Result<(), SensorError>>;
}
