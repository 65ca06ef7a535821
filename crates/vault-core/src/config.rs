//! Non-secret sync configuration, spec §4.H `setConfig` / §6.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncConfig {
    pub base_url: String,
    pub username: String,
    pub device_name: String,
}

impl SyncConfig {
    pub fn default_path() -> PathBuf {
        let dir = dirs::config_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("CardVault");
        std::fs::create_dir_all(&dir).ok();
        dir.join("sync_config.json")
    }

    pub fn load(path: &Path) -> Result<Option<SyncConfig>, VaultError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), VaultError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_config.json");
        assert_eq!(SyncConfig::load(&path).unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_config.json");
        let cfg = SyncConfig {
            base_url: "https://sync.example.com".into(),
            username: "alice".into(),
            device_name: "laptop".into(),
        };
        cfg.save(&path).unwrap();
        assert_eq!(SyncConfig::load(&path).unwrap(), Some(cfg));
    }
}
