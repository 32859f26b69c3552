//! Compile-time defaults and persisted user settings.

use std::fs;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use crate::paths::{PathConfig, config_file, data_file, ensure_dirs};

/// Edge of layer thumbnails, in pixels.
pub const THUMB_SIZE: u32 = 24;
pub const MAX_UNDO_HISTORY_LEN: usize = 100;

/// Placeholder thumbnail of a pass-through group.
pub const PASS_THROUGH_THUMB_COLOR: [u8; 3] = [0, 138, 0];
/// Placeholder thumbnail of an isolated group whose image isn't cached yet.
pub const ISOLATED_THUMB_COLOR: [u8; 3] = [0, 0, 203];

pub const SETTINGS_FILE: &str = "strata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_undo: usize,
    /// 0 runs reload jobs on the calling thread.
    pub worker_threads: usize,
    /// Reload changed linked files without asking.
    pub auto_reload: bool,
    pub thumb_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_undo: MAX_UNDO_HISTORY_LEN,
            worker_threads: (num_cpus::get() * 3 / 4).max(1),
            auto_reload: true,
            thumb_size: THUMB_SIZE,
        }
    }
}

impl Settings {
    /// Read settings; a missing or unreadable file gives defaults.
    pub fn load(paths: &PathConfig) -> Self {
        let path = config_file(SETTINGS_FILE, paths);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                info!("No settings at {} ({}), using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Corrupt settings file {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &PathConfig) -> anyhow::Result<()> {
        use anyhow::Context;
        ensure_dirs(paths)?;
        let path = config_file(SETTINGS_FILE, paths);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_paths() -> (PathConfig, PathBuf) {
        let dir = std::env::temp_dir().join(format!("strata-config-{}", uuid::Uuid::new_v4()));
        (PathConfig { config_dir: Some(dir.clone()) }, dir)
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_undo, MAX_UNDO_HISTORY_LEN);
        assert!(s.worker_threads >= 1);
        assert_eq!(s.thumb_size, THUMB_SIZE);
    }

    #[test]
    fn test_save_and_load() {
        let (paths, dir) = temp_paths();
        let s = Settings { max_undo: 7, worker_threads: 2, auto_reload: false, thumb_size: 32 };
        s.save(&paths).unwrap();
        assert_eq!(Settings::load(&paths), s);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_and_corrupt_files() {
        let (paths, dir) = temp_paths();
        assert_eq!(Settings::load(&paths), Settings::default());

        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SETTINGS_FILE), r#"{ "max_undo": 3 }"#).unwrap();
        let s = Settings::load(&paths);
        assert_eq!(s.max_undo, 3);
        assert_eq!(s.thumb_size, THUMB_SIZE);

        fs::write(dir.join(SETTINGS_FILE), "not json").unwrap();
        assert_eq!(Settings::load(&paths), Settings::default());
        let _ = fs::remove_dir_all(&dir);
    }
}
