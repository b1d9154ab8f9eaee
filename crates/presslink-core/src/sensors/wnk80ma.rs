use embedded_hal_async::i2c::I2c;
use log::{debug, error, info};

use super::{PressureSensor, SensorError};
use crate::bus::{AsyncI2cDevice, BusRecovery};

const SENSOR_NAME: &str = "WNK80MA";

/// Default 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x6D;

/// Command that latches and returns the current 24-bit reading.
pub const READ_COMMAND: u8 = 0x06;

/// 24-bit I2C pressure transducer.
///
/// A read is a single write-read transaction: the read command followed by
/// three bytes of big-endian data.
pub struct Wnk80ma<'a, B> {
    device: AsyncI2cDevice<'a, B>,
    address: u8,
    command: u8,
}

impl<'a, B> Wnk80ma<'a, B> {
    pub const fn new(device: AsyncI2cDevice<'a, B>, address: u8, command: u8) -> Self {
        Self {
            device,
            address,
            command,
        }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }
}

/// Decode a big-endian 24-bit response. An all-ones frame means the device
/// did not drive the bus.
fn decode(frame: [u8; 3]) -> Result<u32, SensorError> {
    if frame == [0xFF; 3] {
        return Err(SensorError::Malformed {
            sensor: SENSOR_NAME,
        });
    }
    Ok(u32::from_be_bytes([0, frame[0], frame[1], frame[2]]))
}

impl<B> PressureSensor for Wnk80ma<'_, B>
where
    B: I2c + BusRecovery,
{
    async fn read_raw(&mut self) -> Result<u32, SensorError> {
        let mut frame = [0u8; 3];
        self.device
            .write_read(self.address, &[self.command], &mut frame)
            .await
            .map_err(|e| {
                debug!("WNK80MA read failed: {:?}", e);
                SensorError::Bus {
                    sensor: SENSOR_NAME,
                    operation: "write-read measurement",
                }
            })?;
        decode(frame)
    }

    async fn reinitialize(&mut self) -> Result<(), SensorError> {
        self.device.recover().await.map_err(|e| {
            error!("WNK80MA bus recovery failed: {:?}", e);
            SensorError::Reinitialization {
                sensor: SENSOR_NAME,
                details: "bus recovery failed",
            }
        })?;
        info!("WNK80MA: bus reinitialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::mutex::Mutex;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, Operation};

    struct MockBus {
        response: [u8; 3],
        fail: bool,
        recoveries: u32,
        last_write: Option<(u8, u8)>,
    }

    impl MockBus {
        fn new(response: [u8; 3]) -> Self {
            Self {
                response,
                fail: false,
                recoveries: 0,
                last_write: None,
            }
        }
    }

    impl ErrorType for MockBus {
        type Error = ErrorKind;
    }

    impl I2c for MockBus {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::Bus);
            }
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => self.last_write = Some((address, bytes[0])),
                    Operation::Read(buf) => buf.copy_from_slice(&self.response),
                }
            }
            Ok(())
        }
    }

    impl BusRecovery for MockBus {
        type Error = ();

        fn recover(&mut self) -> Result<(), ()> {
            self.recoveries += 1;
            self.fail = false;
            Ok(())
        }
    }

    #[test]
    fn test_reads_big_endian_24_bit_value() {
        let bus = Mutex::<CriticalSectionRawMutex, _>::new(MockBus::new([0x4C, 0x4B, 0x40]));
        let mut sensor = Wnk80ma::new(AsyncI2cDevice::new(&bus), DEFAULT_ADDRESS, READ_COMMAND);

        assert_eq!(block_on(sensor.read_raw()), Ok(5_000_000));
        let last = block_on(bus.lock()).last_write;
        assert_eq!(last, Some((0x6D, 0x06)));
    }

    #[test]
    fn test_all_ones_frame_is_malformed() {
        let bus = Mutex::<CriticalSectionRawMutex, _>::new(MockBus::new([0xFF; 3]));
        let mut sensor = Wnk80ma::new(AsyncI2cDevice::new(&bus), DEFAULT_ADDRESS, READ_COMMAND);

        assert_eq!(
            block_on(sensor.read_raw()),
            Err(SensorError::Malformed {
                sensor: SENSOR_NAME
            })
        );
    }

    #[test]
    fn test_bus_error_then_recovery() {
        let mut mock = MockBus::new([0x00, 0x10, 0x00]);
        mock.fail = true;
        let bus = Mutex::<CriticalSectionRawMutex, _>::new(mock);
        let mut sensor = Wnk80ma::new(AsyncI2cDevice::new(&bus), DEFAULT_ADDRESS, READ_COMMAND);

        assert!(matches!(
            block_on(sensor.read_raw()),
            Err(SensorError::Bus { .. })
        ));
        assert_eq!(block_on(sensor.reinitialize()), Ok(()));
        assert_eq!(block_on(bus.lock()).recoveries, 1);
        assert_eq!(block_on(sensor.read_raw()), Ok(0x1000));
    }
}
