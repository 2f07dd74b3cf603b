//! Configuration wizard: turns address jumpers and pin names into entries.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::str::FromStr;

use log::info;
use log::warn;

use crate::entries::ConfigEntry;
use crate::entries::EntryStore;
use crate::entries::SwitchEntry;
use crate::error::KarismaError;
use crate::karisma_types::validate_address;
use crate::karisma_types::Pin;
use crate::karisma_types::BASE_ADDRESS;
use crate::karisma_types::DEFAULT_I2C_ADDRESS;
use crate::karisma_types::PIN_COUNT;

pub const RELAY_TYPES: [&str; 1] = ["16 ports"];

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Jumper {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Jumper {
    pub const ALL: [Jumper; 6] = [Jumper::A, Jumper::B, Jumper::C, Jumper::D, Jumper::E, Jumper::F];

    fn offset(&self) -> u8 {
        match self {
            Jumper::A => 32,
            Jumper::B => 16,
            Jumper::C => 8,
            Jumper::D => 4,
            Jumper::E => 2,
            Jumper::F => 1,
        }
    }

    fn letter(&self) -> char {
        match self {
            Jumper::A => 'A',
            Jumper::B => 'B',
            Jumper::C => 'C',
            Jumper::D => 'D',
            Jumper::E => 'E',
            Jumper::F => 'F',
        }
    }
}

/// Address jumpers closed on the board.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JumperSet(BTreeSet<Jumper>);

impl JumperSet {
    pub fn address(&self) -> u8 {
        BASE_ADDRESS + self.0.iter().map(Jumper::offset).sum::<u8>()
    }

    /// Letters of the closed jumpers in A..F order, or `N` for none.
    pub fn title(&self) -> String {
        match self.0.is_empty() {
            true => String::from("N"),
            false => self.0.iter().map(Jumper::letter).collect(),
        }
    }
}

impl FromStr for JumperSet {
    type Err = String;

    /// Parses `AB`, `a,c,f`, or `N`/empty for no jumpers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("n") {
            return Ok(JumperSet::default());
        }
        let mut jumpers = BTreeSet::new();
        for c in s.chars().filter(|c| !matches!(c, ',' | ' ')) {
            let jumper = Jumper::ALL
                .iter()
                .find(|j| j.letter() == c.to_ascii_uppercase())
                .ok_or_else(|| format!("Invalid address jumper '{}', expected A to F", c))?;
            jumpers.insert(*jumper);
        }
        Ok(JumperSet(jumpers))
    }
}

impl Display for JumperSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.title())
    }
}

/// What the user filled into the wizard form.
#[derive(Clone, Debug, Default)]
pub struct UserInput {
    pub jumpers: JumperSet,
    pub relay_type: String,
    pub pin_names: BTreeMap<u8, String>,
}

impl UserInput {
    pub fn new(jumpers: JumperSet) -> UserInput {
        UserInput {
            jumpers,
            relay_type: String::from(RELAY_TYPES[0]),
            pin_names: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_pin_name<S: Into<String>>(mut self, pin: u8, name: S) -> UserInput {
        self.pin_names.insert(pin, name.into());
        self
    }

    fn pin_name(&self, pin: Pin) -> &str {
        self.pin_names
            .get(&pin.number())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Platform style import: explicit address and a map of pin names.
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub i2c_address: u8,
    pub pins: BTreeMap<u8, String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            i2c_address: DEFAULT_I2C_ADDRESS,
            pins: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowResult {
    Created(ConfigEntry),
    Aborted(AbortReason),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyConfigured,
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AbortReason::AlreadyConfigured => write!(f, "already_configured"),
        }
    }
}

pub struct ConfigFlow<'a> {
    store: &'a mut EntryStore,
}

impl<'a> ConfigFlow<'a> {
    pub fn new(store: &'a mut EntryStore) -> ConfigFlow<'a> {
        ConfigFlow { store }
    }

    /// Creates one entry per pin of the board selected by the jumpers.
    ///
    /// All pins but the last go through the import step and replace older
    /// entries; the last pin aborts the flow if it is already configured.
    pub fn step_user(&mut self, input: &UserInput) -> Result<Vec<FlowResult>, KarismaError> {
        if !RELAY_TYPES.contains(&input.relay_type.as_str()) {
            warn!("Unknown relay type '{}', assuming 16 ports", input.relay_type);
        }
        let mut results = Vec::with_capacity(usize::from(PIN_COUNT));
        let last = Pin::try_from(PIN_COUNT - 1)?;
        for pin in Pin::all().filter(|p| *p != last) {
            results.push(self.step_import(map_switch_entry(input, pin))?);
        }

        let data = map_switch_entry(input, last);
        if self.store.contains(&data.unique_id()) {
            info!("{} is already configured", data.unique_id());
            results.push(FlowResult::Aborted(AbortReason::AlreadyConfigured));
        } else {
            results.push(self.create_entry(data));
        }
        Ok(results)
    }

    /// Creates an entry, replacing any stored entry with the same unique id.
    pub fn step_import(&mut self, data: SwitchEntry) -> Result<FlowResult, KarismaError> {
        validate_address(data.i2c_address)?;
        Pin::try_from(data.pin_number)?;
        if self.store.remove(&data.unique_id()).is_some() {
            info!("Replacing entry {}", data.unique_id());
        }
        Ok(self.create_entry(data))
    }

    pub fn import_platform(
        &mut self,
        config: &PlatformConfig,
    ) -> Result<Vec<FlowResult>, KarismaError> {
        config
            .pins
            .iter()
            .map(|(pin, name)| {
                self.step_import(SwitchEntry::new(config.i2c_address, *pin, name.as_str()))
            })
            .collect()
    }

    fn create_entry(&mut self, data: SwitchEntry) -> FlowResult {
        let entry = ConfigEntry::from_data(data);
        info!("Created entry {} '{}'", entry.unique_id, entry.title);
        self.store.add(entry.clone());
        FlowResult::Created(entry)
    }
}

pub fn map_switch_entry(input: &UserInput, pin: Pin) -> SwitchEntry {
    SwitchEntry::new(
        input.jumpers.address(),
        pin.number(),
        map_switch_name(&input.jumpers, pin, input.pin_name(pin)),
    )
}

pub fn map_switch_name(jumpers: &JumperSet, pin: Pin, user_name: &str) -> String {
    let entity_id = format!("sw_{}_{}", jumpers.title(), pin.number() + 1);
    match user_name.is_empty() {
        true => entity_id,
        false => format!("{} {}", entity_id, user_name),
    }
}
