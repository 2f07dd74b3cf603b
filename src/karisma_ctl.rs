use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;
use log::error;
use log::info;

use crate::error::KarismaError;
use crate::i2c::I2cBus;
use crate::i2c::I2cTransport;
use crate::karisma_types::device_unique_id;
use crate::karisma_types::status_byte;
use crate::karisma_types::Pin;
use crate::karisma_types::DEFAULT_STATUS;
use crate::karisma_types::STATUS_REGISTER;

/// Driver for one Karisma board.
///
/// The device is alive exactly while it holds an open bus handle.
pub struct RelayDevice {
    address: u8,
    bus_number: u8,
    transport: Arc<dyn I2cTransport>,
    bus: Mutex<Option<Box<dyn I2cBus>>>,
}

impl RelayDevice {
    pub fn new(address: u8, bus_number: u8, transport: Arc<dyn I2cTransport>) -> RelayDevice {
        RelayDevice {
            address,
            bus_number,
            transport,
            bus: Mutex::new(None),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn unique_id(&self) -> String {
        device_unique_id(self.address)
    }

    pub fn is_alive(&self) -> bool {
        self.lock_bus().is_some()
    }

    /// Opens the bus, reads a byte from the board and writes the default status byte.
    ///
    /// Any handle held before is dropped first, so a failed start always
    /// leaves the device stopped.
    pub fn start(&self) -> Result<(), KarismaError> {
        let mut guard = self.lock_bus();
        guard.take();
        let bus = self.open_and_detect().map_err(|e| {
            error!("Unable to access {} ({})", self.unique_id(), e);
            KarismaError::bus_unavailable(self.unique_id(), e)
        })?;
        *guard = Some(bus);
        info!("Started {} on i2c bus {}", self.unique_id(), self.bus_number);
        Ok(())
    }

    pub fn stop(&self) {
        if self.lock_bus().take().is_some() {
            info!("Stopped {}", self.unique_id());
        }
    }

    /// Writes the status byte for `pin`. Does nothing but log while stopped.
    pub fn set_pin_value(&self, pin: Pin, on: bool) -> Result<(), KarismaError> {
        let mut guard = self.lock_bus();
        let bus = match guard.as_mut() {
            Some(bus) => bus,
            None => {
                error!("Bus of {} is closed, pin {} not written", self.unique_id(), pin);
                return Ok(());
            }
        };
        let data = status_byte(pin, on);
        debug!("Writing {} to {} (pin {})", data, self.unique_id(), pin);
        bus.write_byte_data(self.address, STATUS_REGISTER, data)
            .map_err(|source| KarismaError::WriteFailed {
                unique_id: self.unique_id(),
                pin: pin.number(),
                source,
            })
    }

    fn open_and_detect(&self) -> std::io::Result<Box<dyn I2cBus>> {
        let mut bus = self.transport.open(self.bus_number)?;
        bus.read_byte(self.address)?;
        bus.write_byte_data(self.address, STATUS_REGISTER, DEFAULT_STATUS)?;
        Ok(bus)
    }

    fn lock_bus(&self) -> MutexGuard<'_, Option<Box<dyn I2cBus>>> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for RelayDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RelayDevice")
            .field("address", &format_args!("0x{:02x}", self.address()))
            .field("bus_number", &self.bus_number)
            .field("alive", &self.is_alive())
            .finish()
    }
}
