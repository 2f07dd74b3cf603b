//! Lifecycle of the configured switches.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::entries::ConfigEntry;
use crate::entries::EntryStore;
use crate::error::KarismaError;
use crate::io_worker::IoWorker;
use crate::karisma_types::device_unique_id;
use crate::karisma_types::SwitchKey;
use crate::karisma_types::SwitchState;
use crate::karisma_types::DOMAIN;
use crate::registry::AddressRegistry;
use crate::registry::DeviceInfo;
use crate::registry::DeviceRegistry;
use crate::switch::KarismaSwitch;

/// User visible message about a failed setup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
}

pub struct Component {
    registry: Arc<AddressRegistry>,
    devices: DeviceRegistry,
    io: IoWorker,
    entries: BTreeMap<String, ConfigEntry>,
    switches: BTreeMap<String, KarismaSwitch>,
    notifications: Vec<Notification>,
    running: bool,
}

impl Component {
    pub fn setup(registry: Arc<AddressRegistry>, io: IoWorker) -> Component {
        Component {
            registry,
            devices: DeviceRegistry::new(),
            io,
            entries: BTreeMap::new(),
            switches: BTreeMap::new(),
            notifications: Vec::new(),
            running: false,
        }
    }

    /// Starts every registered board that is not alive.
    pub fn on_start(&mut self) {
        self.running = true;
        for device in self.registry.devices() {
            if device.is_alive() {
                continue;
            }
            if let Err(e) = device.start() {
                warn!("{}", e);
            }
        }
    }

    pub fn on_stop(&mut self) {
        self.running = false;
        for device in self.registry.devices() {
            if device.is_alive() {
                device.stop();
            }
        }
    }

    /// Activates the switch of `entry`.
    ///
    /// If the board cannot be reached the entry is removed from `store` and
    /// a notification is raised; `false` is returned in that case.
    pub fn setup_entry(&mut self, store: &mut EntryStore, entry: &ConfigEntry) -> bool {
        let address = entry.data.i2c_address;
        let device = match self.registry.get_or_create(address) {
            Ok(device) => device,
            Err(e) => {
                error!("Setup of {} failed: {}", entry.unique_id, e);
                store.remove(&entry.unique_id);
                self.notify(address, &e);
                return false;
            }
        };
        if !device.is_alive() && self.running {
            if let Err(e) = device.start() {
                warn!("{}", e);
            }
        }
        self.devices.get_or_create(
            (String::from(DOMAIN), address),
            DeviceInfo::for_address(address),
        );

        match KarismaSwitch::new(entry, device) {
            Ok(switch) => {
                self.switches.insert(entry.unique_id.clone(), switch);
                self.entries.insert(entry.unique_id.clone(), entry.clone());
                true
            }
            Err(e) => {
                error!("Setup of {} failed: {}", entry.unique_id, e);
                false
            }
        }
    }

    /// Drops the switch of `entry`.
    ///
    /// The board at its address is released once no loaded switch uses it.
    pub fn unload_entry(&mut self, entry: &ConfigEntry) -> bool {
        self.switches.remove(&entry.unique_id);
        self.entries.remove(&entry.unique_id);
        let address = entry.data.i2c_address;
        if self.switches.values().all(|s| s.address() != address) {
            self.registry.remove(address);
        }
        info!("Unloaded {}", entry.unique_id);
        true
    }

    /// Takes over a changed entry and writes the switch state again.
    pub fn update_entry(&mut self, entry: &ConfigEntry) -> Result<(), KarismaError> {
        let switch = match self.switches.get_mut(&entry.unique_id) {
            Some(switch) => switch,
            None => return Ok(()),
        };
        self.entries.insert(entry.unique_id.clone(), entry.clone());
        switch.rename(&entry.data.pin_name);
        switch.config_update(&self.io)
    }

    /// Brings the loaded switches in line with `store`.
    ///
    /// Entries gone from the store are unloaded, new ones set up and changed
    /// ones updated. Returns how many entries were dropped from `store`
    /// because their board could not be reached.
    pub fn sync_entries(&mut self, store: &mut EntryStore) -> usize {
        let gone: Vec<ConfigEntry> = self
            .entries
            .values()
            .filter(|e| !store.contains(&e.unique_id))
            .cloned()
            .collect();
        for entry in &gone {
            self.unload_entry(entry);
        }

        let mut dropped = 0;
        for entry in store.entries().to_vec() {
            let changed = self.entries.get(&entry.unique_id).map(|loaded| *loaded != entry);
            match changed {
                None => {
                    if !self.setup_entry(store, &entry) && !store.contains(&entry.unique_id) {
                        dropped += 1;
                    }
                }
                Some(true) => {
                    if let Err(e) = self.update_entry(&entry) {
                        error!("Update of {} failed: {}", entry.unique_id, e);
                    }
                }
                Some(false) => {}
            }
        }
        dropped
    }

    /// Sets every loaded switch matching `key`; returns how many matched.
    pub fn set_switch(&mut self, key: SwitchKey, state: SwitchState) -> Result<usize, KarismaError> {
        let mut matched = 0;
        for switch in self.switches.values_mut().filter(|s| s.key() == key) {
            match state {
                SwitchState::On => switch.turn_on(&self.io)?,
                SwitchState::Off => switch.turn_off(&self.io)?,
            }
            debug!(
                "{} is {}",
                switch.unique_id(),
                if switch.is_on() { "on" } else { "off" }
            );
            matched += 1;
        }
        Ok(matched)
    }

    /// Applies one batch of commands; a failing switch does not stop the rest.
    ///
    /// Returns how many switches were written.
    pub fn apply_switch_states(
        &mut self,
        switch_states: &HashMap<SwitchKey, SwitchState>,
    ) -> usize {
        let mut written = 0;
        for (key, state) in switch_states {
            match self.set_switch(*key, *state) {
                Ok(0) => warn!(
                    "No switch configured for pin {} of 0x{:02x}",
                    key.pin, key.address
                ),
                Ok(matched) => written += matched,
                Err(e) => error!("{}", e),
            }
        }
        written
    }

    pub fn switches(&self) -> impl Iterator<Item = &KarismaSwitch> {
        self.switches.values()
    }

    pub fn device_info(&self, address: u8) -> Option<&DeviceInfo> {
        self.devices.get(&(String::from(DOMAIN), address))
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    fn notify(&mut self, address: u8, e: &KarismaError) {
        let cause = match e {
            KarismaError::BusUnavailable { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        let notification = Notification {
            id: format!("{} notification", DOMAIN),
            title: format!("{} Configuration", DOMAIN),
            message: format!(
                "Error: Unable to access {} ({})",
                device_unique_id(address),
                cause
            ),
        };
        self.notifications.push(notification);
    }
}

#[cfg(test)]
impl Component {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn switch(&self, unique_id: &str) -> Option<&KarismaSwitch> {
        self.switches.get(unique_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::SwitchEntry;
    use crate::i2c::mock::MockTransport;
    use crate::karisma_types::Pin;

    fn component(transport: &MockTransport) -> Component {
        let registry = Arc::new(AddressRegistry::new(1, Arc::new(transport.clone())));
        Component::setup(registry, IoWorker::spawn("test-component").unwrap())
    }

    fn entry(address: u8, pin: u8) -> ConfigEntry {
        ConfigEntry::from_data(SwitchEntry::new(address, pin, format!("pin {}", pin)))
    }

    #[test]
    fn entries_on_one_address_share_a_board() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();

        assert!(component.setup_entry(&mut store, &entry(108, 0)));
        assert!(component.setup_entry(&mut store, &entry(108, 1)));

        assert_eq!(transport.opens(), 1);
        let a = component.switch("karisma.108.0").unwrap();
        let b = component.switch("karisma.108.1").unwrap();
        assert!(Arc::ptr_eq(a.device(), b.device()));
        assert_eq!(component.device_info(108).unwrap().name, "karisma@0x6c");
    }

    #[test]
    fn unreachable_board_removes_entry_and_notifies() {
        let transport = MockTransport::with_absent(&[61]);
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        let entry = entry(61, 0);
        store.add(entry.clone());

        assert!(!component.setup_entry(&mut store, &entry));

        assert!(store.entries().is_empty());
        assert!(component.switch(&entry.unique_id).is_none());
        let notification = &component.notifications()[0];
        assert_eq!(notification.title, "karisma Configuration");
        assert!(notification
            .message
            .starts_with("Error: Unable to access karisma-0x3d ("));
    }

    #[test]
    fn set_switch_writes_matching_pin() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        component.setup_entry(&mut store, &entry(60, 2));

        let key = SwitchKey::new(60, Pin::try_from(2).unwrap());
        assert_eq!(component.set_switch(key, SwitchState::On).unwrap(), 1);
        let other = SwitchKey::new(60, Pin::try_from(3).unwrap());
        assert_eq!(component.set_switch(other, SwitchState::On).unwrap(), 0);

        assert_eq!(transport.writes(), vec![(60, 0, 200), (60, 0, 102)]);
        assert!(component.switch("karisma.60.2").unwrap().is_on());
    }

    #[test]
    fn stop_and_start_hooks_toggle_liveness() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        component.setup_entry(&mut store, &entry(60, 0));
        let device = Arc::clone(component.switch("karisma.60.0").unwrap().device());

        component.on_start();
        assert!(component.is_running());
        assert_eq!(transport.opens(), 1);

        component.on_stop();
        assert!(!device.is_alive());

        component.on_start();
        assert!(device.is_alive());
        assert_eq!(transport.opens(), 2);
    }

    #[test]
    fn unload_releases_board() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        let entry = entry(60, 0);
        component.setup_entry(&mut store, &entry);
        let device = Arc::clone(component.switch(&entry.unique_id).unwrap().device());

        assert!(component.unload_entry(&entry));
        assert!(component.unload_entry(&entry));

        assert!(!device.is_alive());
        assert!(component.switch(&entry.unique_id).is_none());
    }

    #[test]
    fn update_entry_reasserts_state() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        let entry = entry(60, 4);
        component.setup_entry(&mut store, &entry);

        component.update_entry(&entry).unwrap();

        assert_eq!(transport.writes().last(), Some(&(60, 0, 4)));
    }

    #[test]
    fn failing_switch_does_not_block_later_commands() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        component.setup_entry(&mut store, &entry(60, 2));
        component.setup_entry(&mut store, &entry(60, 3));
        transport.state().failing_writes = true;

        let mut batch = HashMap::new();
        batch.insert(SwitchKey::new(60, Pin::try_from(2).unwrap()), SwitchState::On);
        assert_eq!(component.apply_switch_states(&batch), 0);
        assert!(!component.switch("karisma.60.2").unwrap().is_on());

        transport.state().failing_writes = false;
        let mut batch = HashMap::new();
        batch.insert(SwitchKey::new(60, Pin::try_from(3).unwrap()), SwitchState::On);
        batch.insert(SwitchKey::new(60, Pin::try_from(9).unwrap()), SwitchState::On);
        assert_eq!(component.apply_switch_states(&batch), 1);

        assert!(component.switch("karisma.60.3").unwrap().is_on());
        assert_eq!(transport.writes().last(), Some(&(60, 0, 103)));
    }

    #[test]
    fn board_stays_up_while_a_sibling_is_loaded() {
        let transport = MockTransport::new();
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        let first = entry(60, 0);
        let second = entry(60, 1);
        component.setup_entry(&mut store, &first);
        component.setup_entry(&mut store, &second);
        let device = Arc::clone(component.switch(&second.unique_id).unwrap().device());

        component.unload_entry(&first);
        assert!(device.is_alive());

        component.unload_entry(&second);
        assert!(!device.is_alive());
    }

    #[test]
    fn sync_follows_the_store() {
        let transport = MockTransport::with_absent(&[61]);
        let mut component = component(&transport);
        let mut store = EntryStore::in_memory();
        store.add(entry(60, 0));
        store.add(entry(60, 1));
        store.add(entry(61, 0));

        assert_eq!(component.sync_entries(&mut store), 1);
        assert_eq!(component.switches().count(), 2);
        assert!(!store.contains("karisma.61.0"));
        assert_eq!(component.notifications().len(), 1);

        store.remove("karisma.60.0");
        let mut renamed = entry(60, 1);
        renamed.data.pin_name = String::from("Pump");
        renamed.title = String::from("Pump");
        store.remove("karisma.60.1");
        store.add(renamed);

        assert_eq!(component.sync_entries(&mut store), 0);
        assert!(component.switch("karisma.60.0").is_none());
        assert_eq!(component.switch("karisma.60.1").unwrap().name(), "Pump");
        assert_eq!(transport.writes().last(), Some(&(60, 0, 1)));
    }
}
