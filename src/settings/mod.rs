use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Context, Result};

pub mod credentials;

pub use credentials::{ConfiguredCredentials, CredentialSource};

/// Durable home of the historical sliding window.
pub trait SettingsStore: Send + Sync {
    fn load_historical_window(&self) -> Result<Vec<i64>>;
    fn save_historical_window(&self, window: &[i64]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    historical_window: Vec<i64>,
    /// Keys owned by other parts of the application, written back untouched.
    #[serde(flatten)]
    other: Map<String, Value>,
}

/// JSON settings file. Writes go through a sibling temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file {:?}", self.path))?;
        let parsed = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse settings file {:?}", self.path))?;
        Ok(parsed)
    }

    fn write(&self, settings: &SettingsFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(settings)
            .context("Failed to serialize settings")?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create settings file {:?}", tmp_path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write settings file {:?}", tmp_path))?;
        file.sync_all()
            .with_context(|| format!("Failed to flush settings file {:?}", tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("Failed to move settings into place at {:?}", self.path)
        })?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_historical_window(&self) -> Result<Vec<i64>> {
        Ok(self.read()?.historical_window)
    }

    fn save_historical_window(&self, window: &[i64]) -> Result<()> {
        let mut settings = self.read()?;
        settings.historical_window = window.to_vec();
        self.write(&settings)
    }
}

/// In-process store, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    window: Mutex<Vec<i64>>,
}

impl MemorySettingsStore {
    pub fn with_window(window: Vec<i64>) -> Self {
        Self {
            window: Mutex::new(window),
        }
    }

    pub fn window(&self) -> Vec<i64> {
        self.window
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_historical_window(&self) -> Result<Vec<i64>> {
        Ok(self.window())
    }

    fn save_historical_window(&self, window: &[i64]) -> Result<()> {
        let mut guard = self
            .window
            .lock()
            .map_err(|_| AppError::message("Failed to lock in-memory settings"))?;
        *guard = window.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));
        assert!(store.load_historical_window().unwrap().is_empty());
    }

    #[test]
    fn window_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonSettingsStore::new(dir.path().join("nested").join("settings.json"));
        store
            .save_historical_window(&[1_700_000_000, 0, 1_700_050_000])
            .expect("save");

        let reopened = JsonSettingsStore::new(store.path());
        assert_eq!(
            reopened.load_historical_window().unwrap(),
            vec![1_700_000_000, 0, 1_700_050_000]
        );
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn preserves_foreign_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"theme": "dark", "historical_window": [5]}"#).unwrap();

        let store = JsonSettingsStore::new(&path);
        assert_eq!(store.load_historical_window().unwrap(), vec![5]);
        store.save_historical_window(&[9, 8]).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["historical_window"], serde_json::json!([9, 8]));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonSettingsStore::new(&path).load_historical_window().is_err());
    }

    #[test]
    fn memory_store_keeps_last_save() {
        let store = MemorySettingsStore::default();
        store.save_historical_window(&[3, 4]).unwrap();
        assert_eq!(store.load_historical_window().unwrap(), vec![3, 4]);
    }
}
