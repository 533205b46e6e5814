//! Saved device list
//!
//! A JSON object mapping each known serial to its password and an optional
//! display name. Loaded at start, saved after a login learns a new
//! password and at shutdown.

use crate::error::Result;
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Saved credentials and settings for one charger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Serial → record store backed by a JSON file
pub struct EvseStore {
    file_path: PathBuf,
    records: BTreeMap<String, EvseRecord>,
    logger: crate::logging::StructuredLogger,
}

impl EvseStore {
    /// Create an empty store for `file_path`; nothing is read yet
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            records: BTreeMap::new(),
            logger: get_logger("store"),
        }
    }

    /// Read the store; a missing file leaves it empty
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            self.logger.info(&format!(
                "No device list at {}, starting empty",
                self.file_path.display()
            ));
            return Ok(());
        }

        let contents = std::fs::read_to_string(&self.file_path)?;
        let records: BTreeMap<String, EvseRecord> = serde_json::from_str(&contents)?;
        self.records = records
            .into_iter()
            .map(|(serial, record)| (serial.to_ascii_lowercase(), record))
            .collect();
        self.logger.info(&format!(
            "Loaded {} device(s) from {}",
            self.records.len(),
            self.file_path.display()
        ));
        Ok(())
    }

    /// Write the store pretty-printed
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug(&format!(
            "Saved {} device(s) to {}",
            self.records.len(),
            self.file_path.display()
        ));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn get(&self, serial: &str) -> Option<&EvseRecord> {
        self.records.get(serial)
    }

    pub fn records(&self) -> &BTreeMap<String, EvseRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store a password; returns whether it differs from the saved one
    pub fn set_password(&mut self, serial: &str, password: &str) -> bool {
        let record = self.records.entry(serial.to_string()).or_default();
        if record.password.as_deref() == Some(password) {
            return false;
        }
        record.password = Some(password.to_string());
        true
    }

    pub fn set_name(&mut self, serial: &str, name: Option<String>) {
        self.records.entry(serial.to_string()).or_default().name = name;
    }

    /// Replace the whole content
    pub fn replace(&mut self, records: BTreeMap<String, EvseRecord>) {
        self.records = records;
    }
}
