//! Access to the I2C bus.
//!
//! Only the three SMBus transfers the relay board needs are exposed: open a
//! bus, read one byte from an address, write one byte to a register.

use std::io;

pub trait I2cBus: Send {
    fn read_byte(&mut self, address: u8) -> io::Result<u8>;

    fn write_byte_data(&mut self, address: u8, register: u8, value: u8) -> io::Result<()>;
}

pub trait I2cTransport: Send + Sync {
    fn open(&self, bus: u8) -> io::Result<Box<dyn I2cBus>>;
}

/// Transport over the kernel's `/dev/i2c-N` character devices.
#[derive(Clone, Debug, Default)]
pub struct LinuxI2cTransport;

impl LinuxI2cTransport {
    pub fn new() -> LinuxI2cTransport {
        LinuxI2cTransport
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux {
    use std::collections::hash_map::Entry;
    use std::collections::HashMap;
    use std::io;
    use std::path::PathBuf;

    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use i2cdev::linux::LinuxI2CError;
    use log::debug;

    use super::I2cBus;
    use super::I2cTransport;
    use super::LinuxI2cTransport;

    pub struct LinuxI2cBus {
        path: PathBuf,
        // the kernel binds a file descriptor to one slave address
        devices: HashMap<u8, LinuxI2CDevice>,
    }

    impl LinuxI2cBus {
        fn device(&mut self, address: u8) -> io::Result<&mut LinuxI2CDevice> {
            match self.devices.entry(address) {
                Entry::Occupied(e) => Ok(e.into_mut()),
                Entry::Vacant(e) => {
                    debug!("Binding {} to address 0x{:02x}", self.path.display(), address);
                    let device =
                        LinuxI2CDevice::new(&self.path, u16::from(address)).map_err(to_io)?;
                    Ok(e.insert(device))
                }
            }
        }
    }

    impl I2cBus for LinuxI2cBus {
        fn read_byte(&mut self, address: u8) -> io::Result<u8> {
            self.device(address)?.smbus_read_byte().map_err(to_io)
        }

        fn write_byte_data(&mut self, address: u8, register: u8, value: u8) -> io::Result<()> {
            self.device(address)?
                .smbus_write_byte_data(register, value)
                .map_err(to_io)
        }
    }

    impl I2cTransport for LinuxI2cTransport {
        fn open(&self, bus: u8) -> io::Result<Box<dyn I2cBus>> {
            let path = PathBuf::from(format!("/dev/i2c-{}", bus));
            if !path.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No such file or directory: '{}'", path.display()),
                ));
            }
            Ok(Box::new(LinuxI2cBus {
                path,
                devices: HashMap::new(),
            }))
        }
    }

    fn to_io(e: LinuxI2CError) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl I2cTransport for LinuxI2cTransport {
    fn open(&self, bus: u8) -> io::Result<Box<dyn I2cBus>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("i2c bus {} requires the Linux i2c-dev interface", bus),
        ))
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashSet;
    use std::io;
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::I2cBus;
    use super::I2cTransport;

    #[derive(Debug, Default)]
    pub struct MockState {
        pub opens: usize,
        pub reads: Vec<u8>,
        pub writes: Vec<(u8, u8, u8)>,
        pub absent: HashSet<u8>,
        pub missing_bus: bool,
        pub failing_writes: bool,
    }

    /// Records every transfer; clones share the same state.
    #[derive(Clone, Debug, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        pub fn with_absent(addresses: &[u8]) -> MockTransport {
            let transport = MockTransport::new();
            transport.state().absent.extend(addresses.iter().copied());
            transport
        }

        pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        pub fn writes(&self) -> Vec<(u8, u8, u8)> {
            self.state().writes.clone()
        }

        pub fn opens(&self) -> usize {
            self.state().opens
        }
    }

    struct MockBus {
        state: Arc<Mutex<MockState>>,
    }

    impl I2cBus for MockBus {
        fn read_byte(&mut self, address: u8) -> io::Result<u8> {
            let mut state = self.state.lock().unwrap();
            if state.absent.contains(&address) {
                return Err(io::Error::new(io::ErrorKind::Other, "Remote I/O error"));
            }
            state.reads.push(address);
            Ok(0)
        }

        fn write_byte_data(&mut self, address: u8, register: u8, value: u8) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.failing_writes || state.absent.contains(&address) {
                return Err(io::Error::new(io::ErrorKind::Other, "Remote I/O error"));
            }
            state.writes.push((address, register, value));
            Ok(())
        }
    }

    impl I2cTransport for MockTransport {
        fn open(&self, _bus: u8) -> io::Result<Box<dyn I2cBus>> {
            let mut state = self.state.lock().unwrap();
            if state.missing_bus {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such bus"));
            }
            state.opens += 1;
            Ok(Box::new(MockBus {
                state: Arc::clone(&self.state),
            }))
        }
    }
}
