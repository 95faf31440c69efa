//! Settings service: typed values the stage watches.
//!
//! Watchers fire once with the current value when they subscribe and again
//! on every change, so a subscriber never has to read the value separately.

use crate::history::{DEFAULT_HISTORY_SIZE, HistoryConfig};
use pg_core::error::StageError;
use pg_core::settings::{StageSettingKey, StageSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted settings the editor consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(flatten)]
    pub stage: StageSettings,
    pub history_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stage: StageSettings::default(),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

type Watcher = Box<dyn FnMut(bool)>;

#[derive(Default)]
pub struct SettingsService {
    values: Settings,
    watchers: HashMap<StageSettingKey, Vec<Watcher>>,
}

impl SettingsService {
    pub fn new(values: Settings) -> Self {
        Self {
            values,
            watchers: HashMap::new(),
        }
    }

    /// Load from JSON. Missing keys take their defaults.
    pub fn from_json(text: &str) -> Result<Self, StageError> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    pub fn to_json(&self) -> Result<String, StageError> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    pub fn values(&self) -> Settings {
        self.values
    }

    pub fn get(&self, key: StageSettingKey) -> bool {
        self.values.stage.get(key)
    }

    /// Update a toggle and notify its watchers if the value changed.
    pub fn set(&mut self, key: StageSettingKey, value: bool) {
        if self.get(key) == value {
            return;
        }
        self.values.stage.set(key, value);
        log::debug!("setting {key:?} = {value}");
        if let Some(watchers) = self.watchers.get_mut(&key) {
            for watcher in watchers {
                watcher(value);
            }
        }
    }

    /// Subscribe to a toggle. `callback` runs immediately with the current
    /// value, then on every change.
    pub fn watch(&mut self, key: StageSettingKey, mut callback: impl FnMut(bool) + 'static) {
        callback(self.get(key));
        self.watchers.entry(key).or_default().push(Box::new(callback));
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            max_depth: self.values.history_size,
        }
    }
}

impl std::fmt::Debug for SettingsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsService")
            .field("values", &self.values)
            .field("watchers", &self.watchers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
