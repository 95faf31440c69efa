//! Stage behavior toggles supplied by the host's settings service.

use serde::{Deserialize, Serialize};

/// Keys of the boolean settings the stage listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageSettingKey {
    IsEnableEntityCollision,
    AllowAddCycleEdge,
}

/// Snapshot of the settings the stage consults while mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageSettings {
    /// Entities push each other apart when overlapping. Consumed by the
    /// physics collaborator; the stage only carries it.
    pub is_enable_entity_collision: bool,

    /// Allow an association whose source and target are the same entity.
    pub allow_add_cycle_edge: bool,
}

impl StageSettings {
    pub fn set(&mut self, key: StageSettingKey, value: bool) {
        match key {
            StageSettingKey::IsEnableEntityCollision => self.is_enable_entity_collision = value,
            StageSettingKey::AllowAddCycleEdge => self.allow_add_cycle_edge = value,
        }
    }

    pub fn get(&self, key: StageSettingKey) -> bool {
        match key {
            StageSettingKey::IsEnableEntityCollision => self.is_enable_entity_collision,
            StageSettingKey::AllowAddCycleEdge => self.allow_add_cycle_edge,
        }
    }
}
