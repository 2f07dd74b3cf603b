use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::error::KarismaError;

pub const DOMAIN: &str = "karisma";
pub const MANUFACTURER: &str = "Karisma";

pub const PIN_COUNT: u8 = 16;

/// Register every status byte is written to.
pub const STATUS_REGISTER: u8 = 0;
/// Status byte written once after the board answered a read.
pub const DEFAULT_STATUS: u8 = 200;
pub const ON_OFFSET: u8 = 100;

pub const BASE_ADDRESS: u8 = 60;
pub const DEFAULT_I2C_ADDRESS: u8 = 65;
pub const MAX_I2C_ADDRESS: u8 = 0x7f;

pub const DEFAULT_BUS: u8 = 1;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pin(u8);

impl Pin {
    pub fn number(&self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Pin> {
        (0..PIN_COUNT).map(Pin)
    }
}

impl TryFrom<u8> for Pin {
    type Error = KarismaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value < PIN_COUNT {
            true => Ok(Pin(value)),
            false => Err(KarismaError::InvalidPin(value)),
        }
    }
}

impl Display for Pin {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn is_on(&self) -> bool {
        matches!(self, SwitchState::On)
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        match on {
            true => SwitchState::On,
            false => SwitchState::Off,
        }
    }
}

/// Identifies one switch: the board address and the pin on it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwitchKey {
    pub address: u8,
    pub pin: Pin,
}

impl SwitchKey {
    pub fn new(address: u8, pin: Pin) -> SwitchKey {
        SwitchKey { address, pin }
    }
}

/// The byte that drives `pin` to the given state.
pub fn status_byte(pin: Pin, on: bool) -> u8 {
    match on {
        true => ON_OFFSET + pin.number(),
        false => pin.number(),
    }
}

pub fn validate_address(address: u8) -> Result<u8, KarismaError> {
    match address <= MAX_I2C_ADDRESS {
        true => Ok(address),
        false => Err(KarismaError::InvalidAddress(address)),
    }
}

pub fn device_unique_id(address: u8) -> String {
    format!("{}-0x{:02x}", DOMAIN, address)
}

pub fn device_name(address: u8) -> String {
    format!("{}@0x{:02x}", DOMAIN, address)
}
