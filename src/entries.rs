//! Persisted switch configuration entries.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::karisma_types::DOMAIN;

pub const PLATFORM_SWITCH: &str = "switch";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchEntry {
    pub platform: String,
    pub pin_number: u8,
    pub pin_name: String,
    pub i2c_address: u8,
}

impl SwitchEntry {
    pub fn new<S: Into<String>>(i2c_address: u8, pin_number: u8, pin_name: S) -> SwitchEntry {
        SwitchEntry {
            platform: String::from(PLATFORM_SWITCH),
            pin_number,
            pin_name: pin_name.into(),
            i2c_address,
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}.{}.{}", DOMAIN, self.i2c_address, self.pin_number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub unique_id: String,
    pub title: String,
    pub data: SwitchEntry,
}

impl ConfigEntry {
    pub fn from_data(data: SwitchEntry) -> ConfigEntry {
        ConfigEntry {
            unique_id: data.unique_id(),
            title: data.pin_name.clone(),
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access entry store '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid entry store '{path}': {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Entries kept in memory and optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct EntryStore {
    path: Option<PathBuf>,
    entries: Vec<ConfigEntry>,
}

impl EntryStore {
    #[cfg(test)]
    pub fn in_memory() -> EntryStore {
        EntryStore::default()
    }

    /// Loads the store at `path`; a missing file yields an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<EntryStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| StoreError::Format {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Entry store '{}' does not exist yet", path.display());
                Vec::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(EntryStore {
            path: Some(path),
            entries,
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let content =
            serde_json::to_string_pretty(&self.entries).map_err(|source| StoreError::Format {
                path: path.clone(),
                source,
            })?;
        fs::write(path, content).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Saved {} entries to '{}'", self.entries.len(), path.display());
        Ok(())
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, unique_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.unique_id == unique_id)
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.get(unique_id).is_some()
    }

    pub fn add(&mut self, entry: ConfigEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, unique_id: &str) -> Option<ConfigEntry> {
        let idx = self.entries.iter().position(|e| e.unique_id == unique_id)?;
        Some(self.entries.remove(idx))
    }
}
