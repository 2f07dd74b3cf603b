//! One shared [`RelayDevice`] per I2C address.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;
use log::info;

use crate::error::KarismaError;
use crate::i2c::I2cTransport;
use crate::karisma_ctl::RelayDevice;
use crate::karisma_types::device_name;
use crate::karisma_types::validate_address;
use crate::karisma_types::DOMAIN;
use crate::karisma_types::MANUFACTURER;

pub struct AddressRegistry {
    bus_number: u8,
    transport: Arc<dyn I2cTransport>,
    devices: Mutex<HashMap<u8, Arc<RelayDevice>>>,
}

impl AddressRegistry {
    pub fn new(bus_number: u8, transport: Arc<dyn I2cTransport>) -> AddressRegistry {
        AddressRegistry {
            bus_number,
            transport,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the device at `address`, creating and starting it first if needed.
    ///
    /// The lock is held across `start`, so a second caller for the same
    /// address waits and then receives the instance created by the first.
    pub fn get_or_create(&self, address: u8) -> Result<Arc<RelayDevice>, KarismaError> {
        let address = validate_address(address)?;
        let mut devices = self.lock();
        if let Some(device) = devices.get(&address) {
            return Ok(Arc::clone(device));
        }

        let device = RelayDevice::new(address, self.bus_number, Arc::clone(&self.transport));
        device.start()?;

        let device = Arc::new(device);
        devices.insert(address, Arc::clone(&device));
        info!("Registered {}", device.unique_id());
        Ok(device)
    }

    #[cfg(test)]
    pub fn get(&self, address: u8) -> Option<Arc<RelayDevice>> {
        self.lock().get(&address).cloned()
    }

    pub fn remove(&self, address: u8) {
        if let Some(device) = self.lock().remove(&address) {
            device.stop();
            info!("Removed {}", device.unique_id());
        } else {
            debug!("No device registered at 0x{:02x}", address);
        }
    }

    pub fn devices(&self) -> Vec<Arc<RelayDevice>> {
        self.lock().values().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u8, Arc<RelayDevice>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Display metadata grouping the switches of one board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: (String, u8),
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

impl DeviceInfo {
    pub fn for_address(address: u8) -> DeviceInfo {
        DeviceInfo {
            identifier: (String::from(DOMAIN), address),
            manufacturer: String::from(MANUFACTURER),
            model: String::from(DOMAIN),
            name: device_name(address),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<(String, u8), DeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    pub fn get_or_create(&mut self, identifier: (String, u8), info: DeviceInfo) -> &DeviceInfo {
        self.devices.entry(identifier).or_insert(info)
    }

    pub fn get(&self, identifier: &(String, u8)) -> Option<&DeviceInfo> {
        self.devices.get(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::mock::MockTransport;
    use std::thread;

    fn registry(transport: &MockTransport) -> Arc<AddressRegistry> {
        Arc::new(AddressRegistry::new(1, Arc::new(transport.clone())))
    }

    #[test]
    fn concurrent_get_or_create_builds_one_device() {
        let transport = MockTransport::new();
        let registry = registry(&transport);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create(108).unwrap())
            })
            .collect();
        let devices: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for device in &devices[1..] {
            assert!(Arc::ptr_eq(&devices[0], device));
        }
        assert_eq!(transport.opens(), 1);
        assert_eq!(transport.writes(), vec![(108, 0, 200)]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unreachable_board_is_not_stored() {
        let transport = MockTransport::with_absent(&[70]);
        let registry = registry(&transport);

        let err = registry.get_or_create(70).unwrap_err();

        assert!(err.is_bus_unavailable());
        assert!(registry.get(70).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_address_is_rejected() {
        let registry = registry(&MockTransport::new());
        assert!(matches!(
            registry.get_or_create(200),
            Err(KarismaError::InvalidAddress(200))
        ));
    }

    #[test]
    fn remove_stops_and_forgets_device() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let device = registry.get_or_create(60).unwrap();

        registry.remove(60);

        assert!(!device.is_alive());
        assert!(registry.get(60).is_none());
    }

    #[test]
    fn remove_of_unknown_address_is_noop() {
        let registry = registry(&MockTransport::new());
        registry.remove(99);
        assert!(registry.is_empty());
    }

    #[test]
    fn device_registry_keeps_first_metadata() {
        let mut devices = DeviceRegistry::new();
        let id = (String::from(DOMAIN), 108);

        let name = devices
            .get_or_create(id.clone(), DeviceInfo::for_address(108))
            .name
            .clone();
        let mut other = DeviceInfo::for_address(108);
        other.name = String::from("renamed");
        devices.get_or_create(id.clone(), other);

        assert_eq!(name, "karisma@0x6c");
        assert_eq!(devices.get(&id).unwrap().name, "karisma@0x6c");
    }
}
