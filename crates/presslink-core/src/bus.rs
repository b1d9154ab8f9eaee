//! Shared async I2C bus
//!
//! The pressure transducer may share its bus with other peripherals. Each
//! user gets its own [`AsyncI2cDevice`] handle; every transaction locks the
//! bus mutex for its duration, and bus recovery runs under the same lock so
//! no other user can observe a half-reinitialized bus.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

/// Bus teardown and reinitialization after repeated transaction failures.
///
/// Implemented by the concrete bus (peripheral driver or simulator).
pub trait BusRecovery {
    type Error: core::fmt::Debug;

    /// Reset the peripheral and bring the bus back to an idle state.
    fn recover(&mut self) -> Result<(), Self::Error>;
}

/// Async I2C bus sharing device using Embassy's async Mutex.
///
/// ```rust,ignore
/// static I2C_BUS: StaticCell<Mutex<CriticalSectionRawMutex, Bus>> = StaticCell::new();
///
/// let i2c_bus = I2C_BUS.init(Mutex::new(bus));
/// let transducer = AsyncI2cDevice::new(i2c_bus);
/// let other_device = AsyncI2cDevice::new(i2c_bus);
/// ```
pub struct AsyncI2cDevice<'a, T> {
    bus: &'a Mutex<CriticalSectionRawMutex, T>,
}

impl<'a, T> AsyncI2cDevice<'a, T> {
    #[inline]
    pub const fn new(bus: &'a Mutex<CriticalSectionRawMutex, T>) -> Self {
        Self { bus }
    }
}

impl<T> AsyncI2cDevice<'_, T>
where
    T: BusRecovery,
{
    /// Recover the shared bus while holding its lock.
    pub async fn recover(&mut self) -> Result<(), T::Error> {
        let mut bus = self.bus.lock().await;
        bus.recover()
    }
}

impl<T> ErrorType for AsyncI2cDevice<'_, T>
where
    T: ErrorType,
{
    type Error = T::Error;
}

impl<T> I2c for AsyncI2cDevice<'_, T>
where
    T: I2c,
{
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.read(address, read).await
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.write(address, write).await
    }

    /// Write the command and read the response without releasing the bus.
    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.write_read(address, write, read).await
    }

    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.transaction(address, operations).await
    }
}
