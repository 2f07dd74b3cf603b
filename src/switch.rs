use std::sync::Arc;

use log::info;

use crate::entries::ConfigEntry;
use crate::error::KarismaError;
use crate::io_worker::IoWorker;
use crate::karisma_ctl::RelayDevice;
use crate::karisma_types::Pin;
use crate::karisma_types::SwitchKey;
use crate::karisma_types::SwitchState;
use crate::registry::DeviceInfo;

pub const MODEL: &str = "Relay";

/// One relay output exposed as an on/off switch.
///
/// The state is optimistic: it mirrors the last command, never the board.
pub struct KarismaSwitch {
    name: String,
    key: SwitchKey,
    device: Arc<RelayDevice>,
    state: SwitchState,
}

impl KarismaSwitch {
    pub fn new(entry: &ConfigEntry, device: Arc<RelayDevice>) -> Result<KarismaSwitch, KarismaError> {
        let pin = Pin::try_from(entry.data.pin_number)?;
        let switch = KarismaSwitch {
            name: entry.data.pin_name.clone(),
            key: SwitchKey::new(entry.data.i2c_address, pin),
            device,
            state: SwitchState::Off,
        };
        info!("KarismaSwitch(pin {}:'{}') created", pin, switch.name);
        Ok(switch)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.device.unique_id(), self.key.pin)
    }

    pub fn key(&self) -> SwitchKey {
        self.key
    }

    pub fn pin(&self) -> Pin {
        self.key.pin
    }

    pub fn address(&self) -> u8 {
        self.key.address
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on()
    }

    #[cfg(test)]
    pub fn device(&self) -> &Arc<RelayDevice> {
        &self.device
    }

    pub fn rename<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    pub fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::for_address(self.key.address);
        info.model = String::from(MODEL);
        info
    }

    pub fn turn_on(&mut self, io: &IoWorker) -> Result<(), KarismaError> {
        self.set(io, SwitchState::On)
    }

    pub fn turn_off(&mut self, io: &IoWorker) -> Result<(), KarismaError> {
        self.set(io, SwitchState::Off)
    }

    pub fn set(&mut self, io: &IoWorker, state: SwitchState) -> Result<(), KarismaError> {
        self.write(io, state)?;
        self.state = state;
        Ok(())
    }

    /// Writes the current state again, e.g. after the entry was updated.
    pub fn config_update(&mut self, io: &IoWorker) -> Result<(), KarismaError> {
        self.write(io, self.state)
    }

    fn write(&self, io: &IoWorker, state: SwitchState) -> Result<(), KarismaError> {
        let device = Arc::clone(&self.device);
        let pin = self.key.pin;
        io.submit(move || device.set_pin_value(pin, state.is_on()))
            .wait()?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::SwitchEntry;
    use crate::i2c::mock::MockTransport;

    fn switch(transport: &MockTransport, pin: u8) -> KarismaSwitch {
        let device = Arc::new(RelayDevice::new(108, 1, Arc::new(transport.clone())));
        device.start().unwrap();
        let entry = ConfigEntry::from_data(SwitchEntry::new(108, pin, "sw_AB_4 Lamp"));
        KarismaSwitch::new(&entry, device).unwrap()
    }

    #[test]
    fn identifiers() {
        let switch = switch(&MockTransport::new(), 3);
        assert_eq!(switch.unique_id(), "karisma-0x6c-3");
        assert_eq!(switch.name(), "sw_AB_4 Lamp");
        assert_eq!(switch.device_info().model, "Relay");
        assert_eq!(switch.device_info().manufacturer, "Karisma");
    }

    #[test]
    fn turn_on_and_off_write_through_worker() {
        let transport = MockTransport::new();
        let io = IoWorker::spawn("test-switch").unwrap();
        let mut switch = switch(&transport, 3);

        switch.turn_on(&io).unwrap();
        assert!(switch.is_on());
        switch.turn_off(&io).unwrap();
        assert!(!switch.is_on());

        assert_eq!(
            transport.writes(),
            vec![(108, 0, 200), (108, 0, 103), (108, 0, 3)]
        );
    }

    #[test]
    fn state_is_optimistic_when_device_stopped() {
        let transport = MockTransport::new();
        let io = IoWorker::spawn("test-switch").unwrap();
        let mut switch = switch(&transport, 5);
        switch.device().stop();

        switch.turn_on(&io).unwrap();

        assert!(switch.is_on());
        assert_eq!(transport.writes(), vec![(108, 0, 200)]);
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let transport = MockTransport::new();
        let io = IoWorker::spawn("test-switch").unwrap();
        let mut switch = switch(&transport, 5);
        transport.state().failing_writes = true;

        assert!(switch.turn_on(&io).is_err());
        assert!(!switch.is_on());
    }

    #[test]
    fn rename_keeps_identity() {
        let mut switch = switch(&MockTransport::new(), 2);
        switch.rename("Heater");
        assert_eq!(switch.name(), "Heater");
        assert_eq!(switch.unique_id(), "karisma-0x6c-2");
    }

    #[test]
    fn config_update_rewrites_current_state() {
        let transport = MockTransport::new();
        let io = IoWorker::spawn("test-switch").unwrap();
        let mut switch = switch(&transport, 1);
        switch.turn_on(&io).unwrap();

        switch.config_update(&io).unwrap();

        assert_eq!(transport.writes().last(), Some(&(108, 0, 101)));
    }
}
