//! Undo/redo over stage snapshots.
//!
//! Each committed step stores the full `StageContent` it replaced. Content
//! clones share every entity and association until one is written, so a
//! step costs one slot table, not a deep copy of the graph.
//!
//! Gestures that mutate many times (drags, bulk edits) are grouped with
//! `begin_batch` / `end_batch` into a single step.

use pg_core::stage::{HistoryRecorder, StageContent};
use serde::{Deserialize, Serialize};

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Maximum undo depth.
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_HISTORY_SIZE,
        }
    }
}

/// A replaced state and the step that replaced it.
#[derive(Debug, Clone)]
struct Snapshot {
    content: StageContent,
    description: String,
}

/// Snapshot-based undo/redo stacks with batch grouping.
#[derive(Debug)]
pub struct StageHistory {
    undo_stack: Vec<Snapshot>,
    redo_stack: Vec<Snapshot>,
    /// The most recently committed state.
    current: StageContent,
    max_depth: usize,
    /// Batch nesting depth (0 = not batching).
    batch_depth: usize,
    /// Whether any step was recorded during the current batch.
    batch_dirty: bool,
}

impl StageHistory {
    pub fn new(config: HistoryConfig, initial: &StageContent) -> Self {
        Self {
            undo_stack: Vec::with_capacity(config.max_depth),
            redo_stack: Vec::new(),
            current: initial.clone(),
            max_depth: config.max_depth.max(1),
            batch_depth: 0,
            batch_dirty: false,
        }
    }

    /// Forget all steps and take `content` as the new baseline.
    pub fn reset(&mut self, content: &StageContent) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current = content.clone();
        self.batch_depth = 0;
        self.batch_dirty = false;
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth.max(1);
        self.trim();
    }

    fn trim(&mut self) {
        if self.undo_stack.len() > self.max_depth {
            let excess = self.undo_stack.len() - self.max_depth;
            self.undo_stack.drain(..excess);
        }
    }

    /// Commit `content` as a new step. Unchanged content records nothing.
    /// Inside a batch the step is deferred to `end_batch`.
    pub fn record(&mut self, content: &StageContent, description: &str) -> bool {
        if self.batch_depth > 0 {
            self.batch_dirty = true;
            return false;
        }
        if *content == self.current {
            return false;
        }
        let previous = std::mem::replace(&mut self.current, content.clone());
        self.undo_stack.push(Snapshot {
            content: previous,
            description: description.to_string(),
        });
        self.trim();
        // New step invalidates the redo chain.
        self.redo_stack.clear();
        log::debug!("history step: {description} ({} undoable)", self.undo_stack.len());
        true
    }

    /// Start a batch group. Steps recorded until the matching `end_batch`
    /// become one.
    pub fn begin_batch(&mut self) {
        if self.batch_depth == 0 {
            self.batch_dirty = false;
        }
        self.batch_depth += 1;
    }

    /// End a batch group. When the outermost batch closes and anything was
    /// recorded inside it, commit one step.
    pub fn end_batch(&mut self, content: &StageContent, description: &str) -> bool {
        if self.batch_depth == 0 {
            return false;
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return false;
        }
        let dirty = std::mem::take(&mut self.batch_dirty);
        dirty && self.record(content, description)
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Restore the state before the last step. Returns its description.
    pub fn undo(&mut self, content: &mut StageContent) -> Option<String> {
        let Snapshot {
            content: before,
            description,
        } = self.undo_stack.pop()?;
        let after = std::mem::replace(&mut self.current, before);
        self.redo_stack.push(Snapshot {
            content: after,
            description: description.clone(),
        });
        *content = self.current.clone();
        Some(description)
    }

    /// Re-apply the last undone step. Returns its description.
    pub fn redo(&mut self, content: &mut StageContent) -> Option<String> {
        let Snapshot {
            content: after,
            description,
        } = self.redo_stack.pop()?;
        let before = std::mem::replace(&mut self.current, after);
        self.undo_stack.push(Snapshot {
            content: before,
            description: description.clone(),
        });
        *content = self.current.clone();
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }
}

impl HistoryRecorder for StageHistory {
    fn record_step(&mut self, content: &StageContent, description: &str) {
        self.record(content, description);
    }
}
