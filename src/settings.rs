use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The fixed set of persisted preference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Tempo,
    MuteSound,
    BlinkOnTick,
    ShowIndicator,
    DarkMode,
    CustomBackgroundColor,
}

impl SettingKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tempo => "tempo",
            Self::MuteSound => "mute-sound",
            Self::BlinkOnTick => "blink-on-tick",
            Self::ShowIndicator => "show-indicator",
            Self::DarkMode => "dark-mode",
            Self::CustomBackgroundColor => "custom-background-color",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
}

impl SettingValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(value),
            Self::Bool(_) => None,
        }
    }
}

/// Key-value persistence capability. Writes are fire-and-forget: a store
/// that fails to persist logs the failure and keeps the in-memory value.
pub trait SettingsStore {
    fn get(&self, key: SettingKey) -> Option<SettingValue>;
    fn set(&mut self, key: SettingKey, value: SettingValue);
}

/// Settings backed by a JSON object on disk. With no path (no config
/// directory on this platform) the store still works, it just forgets
/// everything on exit.
#[derive(Debug)]
pub struct JsonFileStore {
    path: Option<PathBuf>,
    values: BTreeMap<String, SettingValue>,
}

impl JsonFileStore {
    pub fn open(path: Option<PathBuf>) -> Self {
        let values = match &path {
            Some(path) => match fs::read(path) {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                    warn!(path = %path.display(), %err, "ignoring unreadable settings file");
                    BTreeMap::new()
                }),
                Err(err) => {
                    debug!(path = %path.display(), %err, "no settings file, starting fresh");
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };

        Self { path, values }
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), %err, "could not create settings directory");
                return;
            }
        }

        match serde_json::to_string_pretty(&self.values) {
            Ok(json) => {
                if let Err(err) = fs::write(path, json) {
                    warn!(path = %path.display(), %err, "could not write settings file");
                }
            }
            Err(err) => warn!(%err, "could not serialize settings"),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: SettingKey) -> Option<SettingValue> {
        self.values.get(key.as_str()).copied()
    }

    fn set(&mut self, key: SettingKey, value: SettingValue) {
        self.values.insert(key.as_str().to_owned(), value);
        self.persist();
    }
}

// The event loop is single-threaded; the mutex only exists so the
// coordinator and the sidebar can hold the same store.
impl<S: SettingsStore> SettingsStore for Arc<Mutex<S>> {
    fn get(&self, key: SettingKey) -> Option<SettingValue> {
        self.lock().unwrap().get(key)
    }

    fn set(&mut self, key: SettingKey, value: SettingValue) {
        self.lock().unwrap().set(key, value);
    }
}

pub type SharedStore = Arc<Mutex<JsonFileStore>>;

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tempotap").join("settings.json"))
}

/// The decoded preferences as they stood at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsSnapshot {
    pub tempo: Option<f64>,
    pub mute_sound: bool,
    pub blink_on_tick: bool,
    pub show_indicator: bool,
    pub dark_mode: bool,
    pub custom_background_color: bool,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            tempo: None,
            mute_sound: false,
            blink_on_tick: true,
            show_indicator: true,
            dark_mode: true,
            custom_background_color: false,
        }
    }
}

impl SettingsSnapshot {
    pub fn load<S: SettingsStore>(store: &S) -> Self {
        let defaults = Self::default();

        let bool_or = |key: SettingKey, fallback: bool| {
            store.get(key).and_then(SettingValue::as_bool).unwrap_or(fallback)
        };

        Self {
            tempo: store.get(SettingKey::Tempo).and_then(SettingValue::as_number),
            mute_sound: bool_or(SettingKey::MuteSound, defaults.mute_sound),
            blink_on_tick: bool_or(SettingKey::BlinkOnTick, defaults.blink_on_tick),
            show_indicator: bool_or(SettingKey::ShowIndicator, defaults.show_indicator),
            dark_mode: bool_or(SettingKey::DarkMode, defaults.dark_mode),
            custom_background_color: bool_or(
                SettingKey::CustomBackgroundColor,
                defaults.custom_background_color,
            ),
        }
    }
}
