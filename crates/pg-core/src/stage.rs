//! Stage content and child-stage management.
//!
//! `StageContent` is the authoritative graph: entities, associations, and
//! the ordered tag list. A `Stage` owns the content currently being edited
//! plus a dictionary of stored contents keyed by absolute file path, used
//! to render and enter portals. Nothing here is global; any number of
//! stages can coexist.

use crate::error::StageError;
use crate::id::StageId;
use crate::model::*;
use crate::resolve::ResolveReport;
use crate::settings::StageSettings;
use crate::store::{Handle, IdentityStore};
use std::collections::HashMap;

/// Key under which the main stage is parked while a child stage is active.
pub const MAIN_STAGE_KEY: &str = "main";

// ─── Content ─────────────────────────────────────────────────────────────

/// The full (entities, associations, tags) triple.
///
/// Cloning is a structural copy; values are shared until written, so a
/// clone is a safe snapshot for history and child stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageContent {
    pub entities: IdentityStore<Entity>,
    pub associations: IdentityStore<Association>,
    pub tags: Vec<StageId>,
}

/// Either kind of stage object.
#[derive(Debug, Clone, Copy)]
pub enum StageObject<'a> {
    Entity(&'a Entity),
    Association(&'a Association),
}

impl StageObject<'_> {
    pub fn id(&self) -> StageId {
        match self {
            StageObject::Entity(e) => e.id,
            StageObject::Association(a) => a.id,
        }
    }

    pub fn is_selected(&self) -> bool {
        match self {
            StageObject::Entity(e) => e.selected,
            StageObject::Association(a) => a.selected,
        }
    }
}

impl StageContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop everything.
    pub fn destroy(&mut self) {
        self.entities.clear();
        self.associations.clear();
        self.tags.clear();
    }

    // ─── Insertion ───────────────────────────────────────────────────────

    pub fn add_entity(&mut self, entity: Entity) -> Result<Handle, StageError> {
        self.entities.insert(entity).inspect_err(|e| log::warn!("{e}"))
    }

    pub fn add_association(&mut self, association: Association) -> Result<Handle, StageError> {
        self.associations
            .insert(association)
            .inspect_err(|e| log::warn!("{e}"))
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    pub fn entity(&self, id: StageId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: StageId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn association(&self, id: StageId) -> Option<&Association> {
        self.associations.get(id)
    }

    pub fn association_mut(&mut self, id: StageId) -> Option<&mut Association> {
        self.associations.get_mut(id)
    }

    pub fn is_entity_exists(&self, id: StageId) -> bool {
        self.entities.contains(id)
    }

    /// Entity or association with this identifier.
    pub fn stage_object(&self, id: StageId) -> Option<StageObject<'_>> {
        self.entities
            .get(id)
            .map(StageObject::Entity)
            .or_else(|| self.associations.get(id).map(StageObject::Association))
    }

    /// Entities for the given identifiers, silently skipping unknown ones.
    pub fn entities_by_ids(&self, ids: &[StageId]) -> Vec<&Entity> {
        ids.iter().filter_map(|id| self.entities.get(*id)).collect()
    }

    pub fn connectable_entity(&self, id: StageId) -> Option<&Entity> {
        self.entities.get(id).filter(|e| e.is_connectable())
    }

    pub fn section(&self, id: StageId) -> Option<&SectionData> {
        self.entities.get(id).and_then(Entity::as_section)
    }

    pub fn is_section(&self, id: StageId) -> bool {
        self.section(id).is_some()
    }

    // ─── Filtered views ──────────────────────────────────────────────────

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.values()
    }

    pub fn entities_of(&self, tag: EntityTag) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.kind.tag() == tag)
    }

    pub fn connectable_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.is_connectable())
    }

    pub fn text_nodes(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::Text)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::Section)
    }

    pub fn image_nodes(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::Image)
    }

    pub fn connect_points(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::ConnectPoint)
    }

    pub fn url_nodes(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::Url)
    }

    pub fn portal_nodes(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::Portal)
    }

    pub fn pen_strokes(&self) -> impl Iterator<Item = &Entity> {
        self.entities_of(EntityTag::PenStroke)
    }

    pub fn line_edges(&self) -> impl Iterator<Item = &Association> {
        self.associations.values().filter(|a| a.is_line())
    }

    pub fn cr_edges(&self) -> impl Iterator<Item = &Association> {
        self.associations.values().filter(|a| !a.is_line())
    }

    // ─── Tags ────────────────────────────────────────────────────────────

    pub fn tags(&self) -> &[StageId] {
        &self.tags
    }

    pub fn reset_tags(&mut self, ids: &[StageId]) {
        self.tags = ids.to_vec();
    }

    /// Append a tag. Returns `false` if it was already tagged.
    pub fn add_tag(&mut self, id: StageId) -> bool {
        if self.has_tag(id) {
            return false;
        }
        self.tags.push(id);
        true
    }

    pub fn remove_tag(&mut self, id: StageId) -> bool {
        match self.tags.iter().position(|t| *t == id) {
            Some(i) => {
                self.tags.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn has_tag(&self, id: StageId) -> bool {
        self.tags.contains(&id)
    }

    /// Drop tags naming neither an entity nor an association.
    /// Returns the pruned identifiers.
    pub fn update_tags(&mut self) -> Vec<StageId> {
        let mut pruned = Vec::new();
        let entities = &self.entities;
        let associations = &self.associations;
        self.tags.retain(|id| {
            let live = entities.contains(*id) || associations.contains(*id);
            if !live {
                pruned.push(*id);
            }
            live
        });
        pruned
    }

    pub fn move_tag_up(&mut self, id: StageId) -> bool {
        match self.tags.iter().position(|t| *t == id) {
            Some(i) if i > 0 => {
                self.tags.swap(i - 1, i);
                true
            }
            _ => false,
        }
    }

    pub fn move_tag_down(&mut self, id: StageId) -> bool {
        match self.tags.iter().position(|t| *t == id) {
            Some(i) if i + 1 < self.tags.len() => {
                self.tags.swap(i, i + 1);
                true
            }
            _ => false,
        }
    }
}

// ─── History seam ────────────────────────────────────────────────────────

/// Receives a snapshot request after every committed logical mutation.
pub trait HistoryRecorder {
    fn record_step(&mut self, content: &StageContent, description: &str);
}

/// Recorder that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl HistoryRecorder for NoHistory {
    fn record_step(&mut self, _content: &StageContent, _description: &str) {}
}

// ─── Stage ───────────────────────────────────────────────────────────────

/// The live stage: current content, behavior toggles, and stored child
/// stages with their camera bookmarks.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    pub content: StageContent,
    pub settings: StageSettings,

    /// Stored contents keyed by absolute path; `MAIN_STAGE_KEY` holds the
    /// parked main stage.
    child_stages: HashMap<String, StageContent>,

    child_cameras: HashMap<String, ChildCameraData>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: StageSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Drop the current content. Stored child stages survive.
    pub fn destroy(&mut self) {
        self.content.destroy();
    }

    /// Close a logical mutation: run the resolution pass, then hand the
    /// settled content to `recorder` as one step.
    pub fn commit(&mut self, recorder: &mut impl HistoryRecorder, description: &str) -> ResolveReport {
        let report = self.content.resolve_references();
        recorder.record_step(&self.content, description);
        report
    }

    // ─── Child stages ────────────────────────────────────────────────────

    /// Park the current content under `MAIN_STAGE_KEY`.
    pub fn store_main_stage(&mut self) {
        self.child_stages
            .insert(MAIN_STAGE_KEY.to_string(), self.content.clone());
    }

    /// Bring the parked main stage back. Returns `false` if none was parked.
    pub fn restore_main_stage(&mut self) -> bool {
        self.store_child_stage_to_main_stage(MAIN_STAGE_KEY)
    }

    /// Store a copy of the current content as child stage `path`.
    pub fn store_main_stage_to_child_stage(&mut self, path: &str) {
        self.child_stages
            .insert(path.to_string(), self.content.clone());
    }

    /// Replace the current content with a copy of child stage `path`.
    /// Returns `false` (and leaves the content alone) for an unknown path.
    pub fn store_child_stage_to_main_stage(&mut self, path: &str) -> bool {
        match self.child_stages.get(path) {
            Some(content) => {
                self.content = content.clone();
                true
            }
            None => {
                log::warn!("no child stage stored under {path:?}");
                false
            }
        }
    }

    /// Store externally loaded content as child stage `path`.
    pub fn insert_child_stage(&mut self, path: &str, content: StageContent) {
        self.child_stages.insert(path.to_string(), content);
    }

    pub fn has_child_stage(&self, path: &str) -> bool {
        self.child_stages.contains_key(path)
    }

    pub fn child_stage(&self, path: &str) -> Option<&StageContent> {
        self.child_stages.get(path)
    }

    /// Keys of all stored child stages, excluding the parked main stage.
    /// Sorted for deterministic iteration.
    pub fn child_stage_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .child_stages
            .keys()
            .filter(|k| k.as_str() != MAIN_STAGE_KEY)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Empty every child stage except the parked main stage.
    pub fn clear_all_child_stages(&mut self) {
        for (key, content) in &mut self.child_stages {
            if key != MAIN_STAGE_KEY {
                content.destroy();
            }
        }
    }

    pub fn update_child_stage_camera(&mut self, path: &str, data: ChildCameraData) {
        self.child_cameras.insert(path.to_string(), data);
    }

    pub fn child_stage_camera(&self, path: &str) -> Option<&ChildCameraData> {
        self.child_cameras.get(path)
    }

    /// Child stage key and camera for every portal on the current content.
    ///
    /// Portal paths are relative to the directory of `current_file`. Call
    /// this while the main stage is the current content.
    pub fn child_stage_keys_and_cameras(&self, current_file: &str) -> Vec<(String, ChildCameraData)> {
        let base = dir_path(current_file);
        self.content
            .portal_nodes()
            .filter_map(|entity| match &entity.kind {
                EntityKind::Portal {
                    portal_path,
                    camera_scale,
                    target_location,
                    ..
                } => Some((
                    relative_to_absolute(base, portal_path),
                    ChildCameraData {
                        location: entity.location(),
                        zoom: *camera_scale,
                        size: entity.rect.size(),
                        target_location: *target_location,
                    },
                )),
                _ => None,
            })
            .collect()
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────

/// Directory part of a `/`- or `\`-separated path.
fn dir_path(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Join `relative` onto `base_dir`, collapsing `.` and `..` segments.
/// Output always uses `/`.
fn relative_to_absolute(base_dir: &str, relative: &str) -> String {
    let absolute_input = relative.starts_with('/');
    let mut segments: Vec<&str> = if absolute_input || base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split(['/', '\\']).collect()
    };
    for seg in relative.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                // Never pop the leading empty segment of an absolute path.
                if segments.len() > 1 || segments.first().is_some_and(|s| !s.is_empty()) {
                    segments.pop();
                }
            }
            s => segments.push(s),
        }
    }
    let joined = segments.join("/");
    if absolute_input {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Rect, Size};

    fn text(name: &str) -> Entity {
        Entity::text(StageId::intern(name), name, Point::ZERO)
    }

    #[test]
    fn tags_prune_and_reorder() {
        let mut content = StageContent::new();
        content.add_entity(text("tag_a")).unwrap();
        content.add_entity(text("tag_b")).unwrap();
        let (a, b, ghost) = (
            StageId::intern("tag_a"),
            StageId::intern("tag_b"),
            StageId::intern("tag_ghost"),
        );
        content.reset_tags(&[a, ghost, b]);
        assert!(!content.add_tag(a));

        assert_eq!(content.update_tags(), vec![ghost]);
        assert_eq!(content.tags(), &[a, b]);

        assert!(content.move_tag_down(a));
        assert_eq!(content.tags(), &[b, a]);
        assert!(!content.move_tag_down(a));
        assert!(content.move_tag_up(a));
        assert!(!content.move_tag_up(a));
        assert!(content.remove_tag(b));
        assert_eq!(content.tags(), &[a]);
    }

    #[test]
    fn child_stage_swap_does_not_alias() {
        let mut stage = Stage::new();
        stage.content.add_entity(text("main_only")).unwrap();
        stage.store_main_stage();

        stage.content.destroy();
        stage.content.add_entity(text("child_only")).unwrap();
        stage.store_main_stage_to_child_stage("/docs/child.json");

        // Mutating the live content must not leak into the stored copy.
        stage.content.add_entity(text("later")).unwrap();
        assert_eq!(stage.child_stage("/docs/child.json").unwrap().entities.len(), 1);

        assert!(stage.restore_main_stage());
        assert!(stage.content.is_entity_exists(StageId::intern("main_only")));
        assert!(!stage.content.is_entity_exists(StageId::intern("child_only")));

        assert!(stage.store_child_stage_to_main_stage("/docs/child.json"));
        assert!(stage.content.is_entity_exists(StageId::intern("child_only")));
        assert!(!stage.store_child_stage_to_main_stage("/nope.json"));

        assert_eq!(stage.child_stage_keys(), vec!["/docs/child.json".to_string()]);
        stage.clear_all_child_stages();
        assert!(stage.child_stage("/docs/child.json").unwrap().is_empty());
        assert!(!stage.child_stage(MAIN_STAGE_KEY).unwrap().is_empty());
    }

    #[test]
    fn portal_keys_resolve_relative_paths() {
        let mut stage = Stage::new();
        let portal = Entity::new(
            StageId::intern("portal"),
            EntityKind::Portal {
                title: "other".into(),
                portal_path: "../shared/other.json".into(),
                camera_scale: 2.0,
                target_location: Point::new(5.0, 6.0),
            },
            Rect::from_origin_size(Point::new(10.0, 20.0), Size::new(300.0, 200.0)),
        );
        stage.content.add_entity(portal).unwrap();

        let keys = stage.child_stage_keys_and_cameras("/home/me/notes/main.json");
        assert_eq!(keys.len(), 1);
        let (key, camera) = &keys[0];
        assert_eq!(key, "/home/me/shared/other.json");
        assert_eq!(camera.zoom, 2.0);
        assert_eq!(camera.location, Point::new(10.0, 20.0));
        assert_eq!(camera.size, Size::new(300.0, 200.0));
    }

    #[test]
    fn relative_path_normalization() {
        assert_eq!(relative_to_absolute("a/b", "./c.json"), "a/b/c.json");
        assert_eq!(relative_to_absolute("C:\\x\\y", "..\\z.json"), "C:/x/z.json");
        assert_eq!(relative_to_absolute("/a", "../../b.json"), "/b.json");
        assert_eq!(dir_path("file.json"), "");
    }

    #[test]
    fn stage_object_lookup_covers_both_stores() {
        let mut content = StageContent::new();
        content.add_entity(text("obj_a")).unwrap();
        let a = StageId::intern("obj_a");
        content
            .add_association(Association::new(
                StageId::intern("obj_edge"),
                AssociationKind::line(),
                Endpoint::ByIdentifier(a),
                Endpoint::ByIdentifier(a),
            ))
            .unwrap();
        assert!(matches!(content.stage_object(a), Some(StageObject::Entity(_))));
        assert!(matches!(
            content.stage_object(StageId::intern("obj_edge")),
            Some(StageObject::Association(_))
        ));
        assert!(content.stage_object(StageId::intern("obj_none")).is_none());
    }

    #[derive(Default)]
    struct Steps(Vec<(usize, String)>);

    impl HistoryRecorder for Steps {
        fn record_step(&mut self, content: &StageContent, description: &str) {
            self.0.push((content.entities.len(), description.to_string()));
        }
    }

    #[test]
    fn commit_resolves_before_recording() {
        let mut stage = Stage::new();
        stage.content.add_entity(text("commit_a")).unwrap();
        let a = StageId::intern("commit_a");
        stage
            .content
            .add_association(Association::new(
                StageId::intern("commit_edge"),
                AssociationKind::line(),
                Endpoint::ByIdentifier(a),
                Endpoint::ByIdentifier(StageId::intern("commit_ghost")),
            ))
            .unwrap();
        stage.content.reset_tags(&[StageId::intern("commit_gone")]);

        let mut steps = Steps::default();
        let report = stage.commit(&mut steps, "load");
        assert_eq!(report.dangling, vec![StageId::intern("commit_edge")]);
        assert!(stage.content.tags().is_empty());
        assert_eq!(steps.0, vec![(1, "load".to_string())]);

        let again = stage.commit(&mut NoHistory, "noop");
        assert_eq!(again.resolved, 0);
    }
}
