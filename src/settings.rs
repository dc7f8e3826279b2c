//! Persisted user settings: the last visited app and the build-trigger token.

use color_eyre::eyre::{eyre, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub trait Settings: Send + Sync {
    fn last_app_visited(&self) -> Option<String>;
    fn set_last_app_visited(&self, app: &str) -> Result<()>;
    fn api_token(&self) -> Option<String>;
    fn set_api_token(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SettingsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_app_visited: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_token: Option<String>,
}

/// JSON file store, rewritten in full on every change.
pub struct FileSettings {
    path: PathBuf,
    data: Mutex<SettingsData>,
}

impl FileSettings {
    /// A missing file is an empty store; a corrupt one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| eyre!("Failed to parse settings {path:?}: {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsData::default(),
            Err(e) => return Err(eyre!("Failed to read settings {path:?}: {e}")),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut SettingsData)) -> Result<()> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        change(&mut next);
        if next == *data {
            return Ok(());
        }
        write_atomically(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

fn write_atomically(path: &Path, data: &SettingsData) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| eyre!("Failed to create settings directory {dir:?}: {e}"))?;
    }
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| eyre!("Failed to write settings {tmp:?}: {e}"))?;
    std::fs::rename(&tmp, path).map_err(|e| eyre!("Failed to replace settings {path:?}: {e}"))?;
    tracing::debug!(path = ?path, "settings saved");
    Ok(())
}

impl Settings for FileSettings {
    fn last_app_visited(&self) -> Option<String> {
        self.data.lock().last_app_visited.clone()
    }

    fn set_last_app_visited(&self, app: &str) -> Result<()> {
        self.update(|d| d.last_app_visited = Some(app.to_string()))
    }

    fn api_token(&self) -> Option<String> {
        self.data.lock().api_token.clone()
    }

    fn set_api_token(&self, token: &str) -> Result<()> {
        self.update(|d| d.api_token = Some(token.to_string()))
    }
}

/// In-process store used by tests.
#[derive(Default)]
pub struct MemorySettings {
    data: Mutex<SettingsData>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Settings for MemorySettings {
    fn last_app_visited(&self) -> Option<String> {
        self.data.lock().last_app_visited.clone()
    }

    fn set_last_app_visited(&self, app: &str) -> Result<()> {
        self.data.lock().last_app_visited = Some(app.to_string());
        Ok(())
    }

    fn api_token(&self) -> Option<String> {
        self.data.lock().api_token.clone()
    }

    fn set_api_token(&self, token: &str) -> Result<()> {
        self.data.lock().api_token = Some(token.to_string());
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/brw/settings.json`, falling back to `~/.config/brw`.
pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn config_dir() -> PathBuf {
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(config).join("brw")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config").join("brw")
    } else {
        PathBuf::from("/tmp/brw")
    }
}
