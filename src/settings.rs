use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::weighbridge::{SamplerConfig, SerialParams};
use crate::workflow::FormDefaults;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StationSettings {
    pub site_names: Vec<String>,
    pub agency_names: Vec<String>,
    #[serde(flatten)]
    pub form: FormDefaults,
}

impl Default for StationSettings {
    fn default() -> Self {
        let form = FormDefaults::default();
        Self {
            site_names: vec![form.site_name.clone()],
            agency_names: Vec::new(),
            form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub data_file: String,
    pub images_folder: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: "tharuni_data.csv".into(),
            images_folder: "images".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserSettings {
    weighbridge: SerialParams,
    sampler: SamplerConfig,
    station: StationSettings,
    storage: StorageSettings,
}

/// Station settings persisted as `settings.json` in the data directory.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!(
                        "Ignoring unparsable settings in {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, apply: impl FnOnce(&mut UserSettings)) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut guard);
        self.persist(&guard)
    }

    pub fn weighbridge(&self) -> SerialParams {
        self.read().weighbridge.clone()
    }

    pub fn sampler(&self) -> SamplerConfig {
        self.read().sampler.clone()
    }

    pub fn station(&self) -> StationSettings {
        self.read().station.clone()
    }

    pub fn storage(&self) -> StorageSettings {
        self.read().storage.clone()
    }

    pub fn update_weighbridge(&self, params: SerialParams) -> Result<()> {
        self.update(|data| data.weighbridge = params)
    }

    /// Adds an agency to the known list if it is not there yet.
    pub fn remember_agency(&self, agency: &str) -> Result<bool> {
        let agency = agency.trim();
        if agency.is_empty()
            || self
                .read()
                .station
                .agency_names
                .iter()
                .any(|known| known.eq_ignore_ascii_case(agency))
        {
            return Ok(false);
        }
        self.update(|data| data.station.agency_names.push(agency.to_string()))?;
        Ok(true)
    }

    /// Writes the current settings out, creating the file on first run.
    pub fn save(&self) -> Result<()> {
        self.persist(&self.read())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
