//! Stage controller: the single entry point UI code calls to change the
//! stage.
//!
//! Every mutation runs the same way: sync the watched settings into the
//! stage, apply, run the resolution pass, then commit exactly one history
//! step. Bulk operations are one `StageMutation`, so they also produce one
//! resolution pass and one step.

use crate::history::StageHistory;
use crate::settings::SettingsService;
use pg_core::document::Document;
use pg_core::error::StageError;
use pg_core::geometry::{Point, Vec2};
use pg_core::id::StageId;
use pg_core::model::{AssociationKind, Direction};
use pg_core::resolve::ResolveReport;
use pg_core::settings::{StageSettingKey, StageSettings};
use pg_core::stage::Stage;
use std::cell::Cell;
use std::rc::Rc;

/// Externally callable stage mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum StageMutation {
    AddTextNode { location: Point, sections: Vec<StageId> },
    AddConnectPoint { location: Point, sections: Vec<StageId> },
    AddSection { location: Point, title: String },
    AddPortalNode { portal_path: String, location: Point },
    Connect { from: StageId, to: StageId },
    ConnectByCrEdge { from: StageId, to: StageId },
    ReverseEdges { ids: Vec<StageId> },
    ReverseSelectedEdges,
    ReverseSelectedNodeEdges,
    SwitchLineEdgeToCrEdge,
    DeleteEntities { ids: Vec<StageId> },
    DeleteEdge { id: StageId },
    DeleteSelected,
    /// Pack into a new section inside the entities' shared parent.
    PackEntityToSection { ids: Vec<StageId> },
    /// Pack into a new section under an explicit parent.
    PackEntityToSectionIn { ids: Vec<StageId>, parent: Option<StageId> },
    UnpackSection { id: StageId },
    GoInSection { ids: Vec<StageId>, section: StageId },
    GoOutSection { ids: Vec<StageId>, section: StageId },
    SwitchCollapse { ids: Vec<StageId> },
    CollapseSelectedSections,
    ExpandSelectedSections,
    TextNodeToSection { id: StageId },
    /// Indented outline to a node tree; a tab is `indention` spaces.
    GenerateNodeByText { text: String, indention: usize, location: Point },
    GenerateNodeByMarkdown { text: String, location: Point },
    /// Grow a linked text node out of the first selected one.
    AddTextNodeFromSelected { direction: Direction, select_current: bool },
    AddTag { id: StageId },
    /// Toggle the tag on every selected object.
    AddTagBySelected,
    RemoveTag { id: StageId },
    MoveTagUp { id: StageId },
    MoveTagDown { id: StageId },
    MoveAllEntityToIntegerLocation,
    AddSerializedData { document: Box<Document>, offset: Vec2 },
    SelectAll,
    ClearSelectAll,
}

impl StageMutation {
    pub fn description(&self) -> &'static str {
        match self {
            StageMutation::AddTextNode { .. } => "add text node",
            StageMutation::AddConnectPoint { .. } => "add connect point",
            StageMutation::AddSection { .. } => "add section",
            StageMutation::AddPortalNode { .. } => "add portal",
            StageMutation::Connect { .. } | StageMutation::ConnectByCrEdge { .. } => "connect",
            StageMutation::ReverseEdges { .. }
            | StageMutation::ReverseSelectedEdges
            | StageMutation::ReverseSelectedNodeEdges => "reverse edges",
            StageMutation::SwitchLineEdgeToCrEdge => "switch edge kind",
            StageMutation::DeleteEntities { .. } | StageMutation::DeleteSelected => "delete",
            StageMutation::DeleteEdge { .. } => "delete edge",
            StageMutation::PackEntityToSection { .. } | StageMutation::PackEntityToSectionIn { .. } => {
                "pack into section"
            }
            StageMutation::UnpackSection { .. } => "unpack section",
            StageMutation::GoInSection { .. } => "move into section",
            StageMutation::GoOutSection { .. } => "move out of section",
            StageMutation::SwitchCollapse { .. }
            | StageMutation::CollapseSelectedSections
            | StageMutation::ExpandSelectedSections => "toggle collapse",
            StageMutation::TextNodeToSection { .. } => "text node to section",
            StageMutation::GenerateNodeByText { .. } | StageMutation::GenerateNodeByMarkdown { .. } => {
                "generate nodes"
            }
            StageMutation::AddTextNodeFromSelected { .. } => "grow node",
            StageMutation::AddTag { .. }
            | StageMutation::AddTagBySelected
            | StageMutation::RemoveTag { .. }
            | StageMutation::MoveTagUp { .. }
            | StageMutation::MoveTagDown { .. } => "edit tags",
            StageMutation::MoveAllEntityToIntegerLocation => "snap to integer",
            StageMutation::AddSerializedData { .. } => "paste",
            StageMutation::SelectAll | StageMutation::ClearSelectAll => "select",
        }
    }

    /// Selection changes are not undo steps.
    pub fn records_history(&self) -> bool {
        !matches!(self, StageMutation::SelectAll | StageMutation::ClearSelectAll)
    }
}

/// What a mutation did.
#[derive(Debug)]
pub enum MutationOutcome {
    /// A new object was created.
    Created(StageId),
    /// Objects were created by a bulk operation (unpack returns the freed
    /// children here).
    CreatedMany(Vec<StageId>),
    /// Number of objects affected.
    Changed(usize),
    /// Whether the operation applied.
    Applied(bool),
    /// A paste, with its resolution report.
    Merged(ResolveReport),
    /// The operation was refused; nothing changed.
    Refused(StageError),
}

impl MutationOutcome {
    pub fn is_refused(&self) -> bool {
        match self {
            MutationOutcome::Refused(_) => true,
            MutationOutcome::Applied(applied) => !applied,
            _ => false,
        }
    }

    pub fn created(&self) -> Option<StageId> {
        match self {
            MutationOutcome::Created(id) => Some(*id),
            _ => None,
        }
    }
}

impl<T: Into<MutationOutcome>> From<Result<T, StageError>> for MutationOutcome {
    fn from(result: Result<T, StageError>) -> Self {
        result.map_or_else(MutationOutcome::Refused, Into::into)
    }
}

impl From<StageId> for MutationOutcome {
    fn from(id: StageId) -> Self {
        MutationOutcome::Created(id)
    }
}

impl From<Vec<StageId>> for MutationOutcome {
    fn from(ids: Vec<StageId>) -> Self {
        MutationOutcome::CreatedMany(ids)
    }
}

impl From<()> for MutationOutcome {
    fn from(_: ()) -> Self {
        MutationOutcome::Applied(true)
    }
}

impl From<ResolveReport> for MutationOutcome {
    fn from(report: ResolveReport) -> Self {
        MutationOutcome::Merged(report)
    }
}

/// Owns the live stage and its history.
#[derive(Debug)]
pub struct StageManager {
    pub stage: Stage,
    history: StageHistory,
    /// Latest toggles pushed by the settings service.
    toggles: Rc<Cell<StageSettings>>,
    /// Path of the child stage being edited, if any.
    child_path: Option<String>,
}

impl StageManager {
    /// Build a manager and subscribe it to the stage toggles.
    pub fn init(settings: &mut SettingsService) -> Self {
        let toggles = Rc::new(Cell::new(StageSettings::default()));
        for key in [
            StageSettingKey::IsEnableEntityCollision,
            StageSettingKey::AllowAddCycleEdge,
        ] {
            let toggles = Rc::clone(&toggles);
            settings.watch(key, move |value| {
                let mut current = toggles.get();
                current.set(key, value);
                toggles.set(current);
            });
        }
        let stage = Stage::with_settings(toggles.get());
        let history = StageHistory::new(settings.history_config(), &stage.content);
        Self {
            stage,
            history,
            toggles,
            child_path: None,
        }
    }

    pub fn history(&self) -> &StageHistory {
        &self.history
    }

    /// Apply one mutation: settings sync, apply, resolve, one history step.
    pub fn execute(&mut self, mutation: StageMutation) -> MutationOutcome {
        self.stage.settings = self.toggles.get();
        let description = mutation.description();
        let records = mutation.records_history();

        let outcome = self.apply(mutation);
        let report = if records {
            self.stage.commit(&mut self.history, description)
        } else {
            self.stage.content.resolve_references()
        };
        if !report.dangling.is_empty() {
            log::debug!("{} dangling association(s) after {description}", report.dangling.len());
        }
        log::debug!("{description}: {outcome:?}");
        outcome
    }

    fn apply(&mut self, mutation: StageMutation) -> MutationOutcome {
        let stage = &mut self.stage;
        match mutation {
            StageMutation::AddTextNode { location, sections } => {
                stage.add_text_node(location, &sections).into()
            }
            StageMutation::AddConnectPoint { location, sections } => {
                stage.add_connect_point(location, &sections).into()
            }
            StageMutation::AddSection { location, title } => stage.add_section(location, &title).into(),
            StageMutation::AddPortalNode {
                portal_path,
                location,
            } => stage.add_portal_node(&portal_path, location).into(),
            StageMutation::Connect { from, to } => {
                stage.try_connect(from, to, AssociationKind::line()).into()
            }
            StageMutation::ConnectByCrEdge { from, to } => {
                stage.try_connect(from, to, AssociationKind::cr_spline()).into()
            }
            StageMutation::ReverseEdges { ids } => MutationOutcome::Changed(stage.reverse_edges(&ids)),
            StageMutation::ReverseSelectedEdges => MutationOutcome::Changed(stage.reverse_selected_edges()),
            StageMutation::ReverseSelectedNodeEdges => {
                MutationOutcome::Changed(stage.reverse_selected_node_edges())
            }
            StageMutation::SwitchLineEdgeToCrEdge => {
                MutationOutcome::Changed(stage.switch_line_edge_to_cr_edge())
            }
            StageMutation::DeleteEntities { ids } => MutationOutcome::Changed(stage.delete_entities(&ids)),
            StageMutation::DeleteEdge { id } => MutationOutcome::Applied(stage.delete_edge(id)),
            StageMutation::DeleteSelected => MutationOutcome::Changed(stage.delete_selected_stage_objects()),
            StageMutation::PackEntityToSection { ids } => stage.pack_entity_to_section(&ids).into(),
            StageMutation::PackEntityToSectionIn { ids, parent } => {
                stage.pack_entity_to_section_in(&ids, parent).into()
            }
            StageMutation::UnpackSection { id } => stage.unpack_section(id).into(),
            StageMutation::GoInSection { ids, section } => {
                MutationOutcome::Applied(stage.go_in_section(&ids, section))
            }
            StageMutation::GoOutSection { ids, section } => {
                MutationOutcome::Applied(stage.go_out_section(&ids, section))
            }
            StageMutation::SwitchCollapse { ids } => MutationOutcome::Changed(stage.switch_collapse(&ids)),
            StageMutation::CollapseSelectedSections => {
                MutationOutcome::Changed(stage.collapse_selected_sections())
            }
            StageMutation::ExpandSelectedSections => {
                MutationOutcome::Changed(stage.expand_selected_sections())
            }
            StageMutation::TextNodeToSection { id } => stage.text_node_to_section(id).into(),
            StageMutation::GenerateNodeByText {
                text,
                indention,
                location,
            } => stage.generate_node_by_text(&text, indention, location).into(),
            StageMutation::GenerateNodeByMarkdown { text, location } => {
                stage.generate_node_by_markdown(&text, location).into()
            }
            StageMutation::AddTextNodeFromSelected {
                direction,
                select_current,
            } => stage
                .add_text_node_from_current_selected_node(direction, select_current)
                .into(),
            StageMutation::AddTag { id } => MutationOutcome::Applied(stage.content.add_tag(id)),
            StageMutation::AddTagBySelected => MutationOutcome::Changed(stage.add_tag_by_selected()),
            StageMutation::RemoveTag { id } => MutationOutcome::Applied(stage.content.remove_tag(id)),
            StageMutation::MoveTagUp { id } => MutationOutcome::Applied(stage.content.move_tag_up(id)),
            StageMutation::MoveTagDown { id } => MutationOutcome::Applied(stage.content.move_tag_down(id)),
            StageMutation::MoveAllEntityToIntegerLocation => {
                stage.move_all_entity_to_integer_location();
                MutationOutcome::Applied(true)
            }
            StageMutation::AddSerializedData { document, offset } => {
                stage.add_serialized_data(&document, offset).into()
            }
            StageMutation::SelectAll => {
                stage.select_all();
                MutationOutcome::Applied(true)
            }
            StageMutation::ClearSelectAll => {
                stage.clear_select_all();
                MutationOutcome::Applied(true)
            }
        }
    }

    // ─── Convenience ─────────────────────────────────────────────────────

    pub fn add_text_node(&mut self, location: Point, sections: &[StageId]) -> Option<StageId> {
        self.execute(StageMutation::AddTextNode {
            location,
            sections: sections.to_vec(),
        })
        .created()
    }

    /// `None` when refused (self loop with cycle edges off, bad endpoint).
    pub fn connect_entity(&mut self, from: StageId, to: StageId) -> Option<StageId> {
        self.execute(StageMutation::Connect { from, to }).created()
    }

    pub fn connect_entity_by_cr_edge(&mut self, from: StageId, to: StageId) -> Option<StageId> {
        self.execute(StageMutation::ConnectByCrEdge { from, to }).created()
    }

    pub fn delete_entities(&mut self, ids: &[StageId]) -> usize {
        match self.execute(StageMutation::DeleteEntities { ids: ids.to_vec() }) {
            MutationOutcome::Changed(n) => n,
            _ => 0,
        }
    }

    pub fn delete_edge(&mut self, id: StageId) -> bool {
        !self.execute(StageMutation::DeleteEdge { id }).is_refused()
    }

    pub fn reverse_selected_edges(&mut self) {
        self.execute(StageMutation::ReverseSelectedEdges);
    }

    pub fn pack_entity_to_section(&mut self, ids: &[StageId]) -> Result<StageId, StageError> {
        match self.execute(StageMutation::PackEntityToSection { ids: ids.to_vec() }) {
            MutationOutcome::Created(id) => Ok(id),
            MutationOutcome::Refused(e) => Err(e),
            _ => Err(StageError::EmptySelection),
        }
    }

    pub fn go_in_section(&mut self, ids: &[StageId], section: StageId) -> bool {
        !self
            .execute(StageMutation::GoInSection {
                ids: ids.to_vec(),
                section,
            })
            .is_refused()
    }

    pub fn go_out_section(&mut self, ids: &[StageId], section: StageId) -> bool {
        !self
            .execute(StageMutation::GoOutSection {
                ids: ids.to_vec(),
                section,
            })
            .is_refused()
    }

    pub fn switch_collapse(&mut self, ids: &[StageId]) {
        self.execute(StageMutation::SwitchCollapse { ids: ids.to_vec() });
    }

    /// Nodes created from an indented outline, in line order.
    pub fn generate_node_by_text(&mut self, text: &str, indention: usize, location: Point) -> Vec<StageId> {
        match self.execute(StageMutation::GenerateNodeByText {
            text: text.to_string(),
            indention,
            location,
        }) {
            MutationOutcome::CreatedMany(ids) => ids,
            _ => Vec::new(),
        }
    }

    pub fn generate_node_by_markdown(&mut self, text: &str, location: Point) -> Vec<StageId> {
        match self.execute(StageMutation::GenerateNodeByMarkdown {
            text: text.to_string(),
            location,
        }) {
            MutationOutcome::CreatedMany(ids) => ids,
            _ => Vec::new(),
        }
    }

    /// `None` when nothing connectable is selected.
    pub fn add_text_node_from_current_selected_node(
        &mut self,
        direction: Direction,
        select_current: bool,
    ) -> Option<StageId> {
        self.execute(StageMutation::AddTextNodeFromSelected {
            direction,
            select_current,
        })
        .created()
    }

    pub fn add_tag_by_selected(&mut self) -> usize {
        match self.execute(StageMutation::AddTagBySelected) {
            MutationOutcome::Changed(n) => n,
            _ => 0,
        }
    }

    pub fn add_tag(&mut self, id: StageId) -> bool {
        !self.execute(StageMutation::AddTag { id }).is_refused()
    }

    pub fn remove_tag(&mut self, id: StageId) -> bool {
        !self.execute(StageMutation::RemoveTag { id }).is_refused()
    }

    pub fn move_tag_up(&mut self, id: StageId) -> bool {
        !self.execute(StageMutation::MoveTagUp { id }).is_refused()
    }

    pub fn move_tag_down(&mut self, id: StageId) -> bool {
        !self.execute(StageMutation::MoveTagDown { id }).is_refused()
    }

    pub fn move_all_entity_to_integer_location(&mut self) {
        self.execute(StageMutation::MoveAllEntityToIntegerLocation);
    }

    pub fn add_serialized_data(&mut self, document: &Document, offset: Vec2) -> Result<ResolveReport, StageError> {
        match self.execute(StageMutation::AddSerializedData {
            document: Box::new(document.clone()),
            offset,
        }) {
            MutationOutcome::Merged(report) => Ok(report),
            MutationOutcome::Refused(e) => Err(e),
            _ => Ok(ResolveReport::default()),
        }
    }

    // ─── Documents & child stages ────────────────────────────────────────

    /// Replace the stage with `document` and start a fresh history.
    pub fn load_document(&mut self, document: &Document) -> Result<ResolveReport, StageError> {
        let report = self.stage.load_document(document)?;
        self.history.reset(&self.stage.content);
        Ok(report)
    }

    /// Store an externally loaded document as child stage `path`.
    pub fn load_child_stage(&mut self, path: &str, document: &Document) -> Result<ResolveReport, StageError> {
        let mut content = document.to_content()?;
        let report = content.resolve_references();
        self.stage.insert_child_stage(path, content);
        Ok(report)
    }

    /// Park the main stage and start editing child stage `path`.
    /// Returns `false` if no such child stage is stored or one is already
    /// open.
    pub fn enter_child_stage(&mut self, path: &str) -> bool {
        if self.child_path.is_some() || !self.stage.has_child_stage(path) {
            return false;
        }
        self.stage.store_main_stage();
        if !self.stage.store_child_stage_to_main_stage(path) {
            return false;
        }
        self.child_path = Some(path.to_string());
        self.history.reset(&self.stage.content);
        log::debug!("entered child stage {path}");
        true
    }

    /// Save the child stage being edited and return to the main stage.
    pub fn leave_child_stage(&mut self) -> bool {
        let Some(path) = self.child_path.take() else {
            return false;
        };
        self.stage.store_main_stage_to_child_stage(&path);
        let restored = self.stage.restore_main_stage();
        self.history.reset(&self.stage.content);
        log::debug!("left child stage {path}");
        restored
    }

    pub fn child_path(&self) -> Option<&str> {
        self.child_path.as_deref()
    }

    // ─── History ─────────────────────────────────────────────────────────

    pub fn undo(&mut self) -> Option<String> {
        self.history.undo(&mut self.stage.content)
    }

    pub fn redo(&mut self) -> Option<String> {
        self.history.redo(&mut self.stage.content)
    }

    pub fn begin_batch(&mut self) {
        self.history.begin_batch();
    }

    pub fn end_batch(&mut self, description: &str) -> bool {
        self.history.end_batch(&self.stage.content, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reach_the_stage() {
        let mut settings = SettingsService::default();
        let mut manager = StageManager::init(&mut settings);
        let a = manager.add_text_node(Point::ZERO, &[]).unwrap();
        assert_eq!(manager.connect_entity(a, a), None);

        settings.set(StageSettingKey::AllowAddCycleEdge, true);
        assert!(manager.connect_entity(a, a).is_some());
    }

    #[test]
    fn refused_mutation_records_nothing() {
        let mut settings = SettingsService::default();
        let mut manager = StageManager::init(&mut settings);
        let a = manager.add_text_node(Point::ZERO, &[]).unwrap();
        let depth = manager.history().undo_depth();
        assert!(manager.connect_entity(a, StageId::intern("mgr_missing")).is_none());
        assert_eq!(manager.history().undo_depth(), depth);
    }
}
