//! Synthetic I2C bus with a WNK80MA-style transducer behind it.
//!
//! Readings follow a deterministic waveform: a noisy baseline with a
//! pressure pulse (ramp up, hold, ramp down) once per cycle. An optional
//! fault burst makes the bus fail long enough to force a recovery.

use embedded_hal_async::i2c::{
    Error, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress,
};
use log::{debug, info};
use presslink_core::bus::BusRecovery;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const BASELINE: i64 = 3_450_000;
const NOISE_AMPLITUDE: i64 = 1_500;

/// Reads per waveform cycle (20 s at 100 Hz).
const CYCLE_READS: u64 = 2_000;
const PULSE_START: u64 = 1_000;
const RAMP_READS: u64 = 150;
const HOLD_READS: u64 = 200;
/// Raw counts added per read while ramping (200,000 counts/s at 100 Hz).
const RAMP_STEP: i64 = 2_000;

/// Consecutive failing reads in one fault burst.
const FAULT_BURST_READS: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBusError {
    NoAcknowledge,
    Stuck,
    UnsupportedTransfer,
}

impl Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAcknowledge => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::Stuck => ErrorKind::Bus,
            Self::UnsupportedTransfer => ErrorKind::Other,
        }
    }
}

pub struct SimulatedBus {
    address: u8,
    read_command: u8,
    reads: u64,
    rng: ChaCha8Rng,
    /// Start a fault burst every this many reads; 0 disables faults.
    fault_every: u64,
    faulted_until: Option<u64>,
    recoveries: u32,
}

impl SimulatedBus {
    /// A transducer answering at `address` to `read_command`. The same
    /// `seed` always produces the same waveform.
    pub fn new(address: u8, read_command: u8, fault_every: u64, seed: u64) -> Self {
        Self {
            address,
            read_command,
            reads: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            fault_every,
            faulted_until: None,
            recoveries: 0,
        }
    }

    fn noise(&mut self) -> i64 {
        self.rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE)
    }

    fn pulse_offset(read: u64) -> i64 {
        let phase = read % CYCLE_READS;
        if phase < PULSE_START {
            return 0;
        }
        let t = phase - PULSE_START;
        let peak = RAMP_STEP * RAMP_READS as i64;
        if t < RAMP_READS {
            RAMP_STEP * t as i64
        } else if t < RAMP_READS + HOLD_READS {
            peak
        } else if t < 2 * RAMP_READS + HOLD_READS {
            peak - RAMP_STEP * (t - RAMP_READS - HOLD_READS) as i64
        } else {
            0
        }
    }

    fn in_fault(&mut self, read: u64) -> bool {
        if self.fault_every > 0 && read > 0 && read % self.fault_every == 0 {
            debug!("Simulated bus fault burst at read {}", read);
            self.faulted_until = Some(read + FAULT_BURST_READS);
        }
        match self.faulted_until {
            Some(until) if read < until => true,
            Some(_) => {
                self.faulted_until = None;
                false
            }
            None => false,
        }
    }

    fn next_frame(&mut self, read: u64) -> [u8; 3] {
        let value = BASELINE + Self::pulse_offset(read) + self.noise();
        let value = value.clamp(0, 0x00FF_FFFE) as u32;
        let bytes = value.to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }
}

impl ErrorType for SimulatedBus {
    type Error = SimBusError;
}

impl I2c<SevenBitAddress> for SimulatedBus {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(SimBusError::NoAcknowledge);
        }

        let read = self.reads;
        self.reads += 1;
        if self.in_fault(read) {
            return Err(SimBusError::Stuck);
        }

        let mut commanded = false;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => commanded = bytes.first() == Some(&self.read_command),
                Operation::Read(buf) if commanded && buf.len() == 3 => {
                    let frame = self.next_frame(read);
                    buf.copy_from_slice(&frame);
                }
                Operation::Read(_) => return Err(SimBusError::UnsupportedTransfer),
            }
        }
        Ok(())
    }
}

impl BusRecovery for SimulatedBus {
    type Error = SimBusError;

    fn recover(&mut self) -> Result<(), Self::Error> {
        self.faulted_until = None;
        self.recoveries += 1;
        info!("Simulated bus recovered ({} total)", self.recoveries);
        Ok(())
    }
}
