//! Graph mutations on a `Stage`.
//!
//! Each operation validates before it touches anything, so a refused
//! operation leaves the content exactly as it was. Operations keep section
//! geometry and shifting flags current themselves; the full resolution
//! pass and history recording are the caller's job (see
//! `pg_editor::StageManager`).

use crate::error::StageError;
use crate::geometry::{Point, Rect, Size, Vec2, bounding_rect, round_point};
use crate::id::StageId;
use crate::model::*;
use crate::resolve::section_rect;
use crate::stage::Stage;
use std::collections::HashSet;

impl Stage {
    // ─── Creation ────────────────────────────────────────────────────────

    /// Insert a freshly generated entity and list it under `sections`.
    fn add_fresh(&mut self, entity: Entity, sections: &[StageId]) -> StageId {
        let id = entity.id;
        if self.content.add_entity(entity).is_err() {
            return id;
        }
        let mut placed = false;
        for &section in sections {
            if let Some(data) = self.content.entity_mut(section).and_then(Entity::as_section_mut) {
                placed |= data.add_child(id);
            }
        }
        if placed {
            self.content.refresh_sections();
        }
        log::debug!("added {id}");
        id
    }

    /// Add an empty text node centered on `location`.
    pub fn add_text_node(&mut self, location: Point, sections: &[StageId]) -> StageId {
        let half = Vec2::new(TEXT_NODE_SIZE.width, TEXT_NODE_SIZE.height) / 2.0;
        self.add_fresh(Entity::text(StageId::fresh(), "", location - half), sections)
    }

    /// Add a connect point centered on `location`.
    pub fn add_connect_point(&mut self, location: Point, sections: &[StageId]) -> StageId {
        self.add_fresh(Entity::connect_point(StageId::fresh(), location), sections)
    }

    /// Add an empty section with its top-left corner at `location`.
    pub fn add_section(&mut self, location: Point, title: &str) -> StageId {
        let rect = Rect::from_origin_size(location, EMPTY_SECTION_SIZE);
        self.add_fresh(Entity::section(StageId::fresh(), title, rect), &[])
    }

    /// Add a portal onto the document at `portal_path` (relative to the
    /// current file).
    pub fn add_portal_node(&mut self, portal_path: &str, location: Point) -> StageId {
        let entity = Entity::new(
            StageId::fresh(),
            EntityKind::Portal {
                title: portal_path.to_string(),
                portal_path: portal_path.to_string(),
                camera_scale: 1.0,
                target_location: Point::ZERO,
            },
            Rect::from_origin_size(location, PORTAL_SIZE),
        );
        self.add_fresh(entity, &[])
    }

    // ─── Connections ─────────────────────────────────────────────────────

    fn check_connect(&self, from: StageId, to: StageId) -> Result<(), StageError> {
        for id in [from, to] {
            match self.content.entity(id) {
                None => return Err(StageError::NotFound(id)),
                Some(e) if !e.is_connectable() => return Err(StageError::NotConnectable(id)),
                Some(_) => {}
            }
        }
        if from == to && !self.settings.allow_add_cycle_edge {
            return Err(StageError::SelfLoop(from));
        }
        Ok(())
    }

    /// Create an association `from → to` of the given kind.
    ///
    /// # Errors
    /// `NotFound` / `NotConnectable` for a bad endpoint, `SelfLoop` when
    /// `from == to` and cycle edges are disabled. Parallel duplicates are
    /// allowed.
    pub fn try_connect(&mut self, from: StageId, to: StageId, kind: AssociationKind) -> Result<StageId, StageError> {
        self.check_connect(from, to)?;
        let endpoint = |id| {
            self.content
                .entities
                .handle_of(id)
                .map_or(Endpoint::ByIdentifier(id), Endpoint::Resolved)
        };
        let association = Association::new(StageId::fresh(), kind, endpoint(from), endpoint(to));
        let handle = self.content.add_association(association)?;
        self.content.refresh_shifting();
        log::debug!("connected {from} -> {to}");
        Ok(handle.id())
    }

    /// Connect with a straight edge. `None` when refused.
    pub fn connect_entity(&mut self, from: StageId, to: StageId) -> Option<StageId> {
        self.try_connect(from, to, AssociationKind::line())
            .inspect_err(|e| log::warn!("connect refused: {e}"))
            .ok()
    }

    /// Connect with a Catmull–Rom spline edge. `None` when refused.
    pub fn connect_entity_by_cr_edge(&mut self, from: StageId, to: StageId) -> Option<StageId> {
        self.try_connect(from, to, AssociationKind::cr_spline())
            .inspect_err(|e| log::warn!("connect refused: {e}"))
            .ok()
    }

    /// Swap source and target of each listed association. Returns how
    /// many were reversed.
    pub fn reverse_edges(&mut self, ids: &[StageId]) -> usize {
        let mut count = 0;
        for &id in ids {
            if let Some(assoc) = self.content.association_mut(id) {
                assoc.reverse();
                count += 1;
            }
        }
        if count > 0 {
            self.content.refresh_shifting();
        }
        count
    }

    pub fn reverse_selected_edges(&mut self) -> usize {
        let ids: Vec<StageId> = self.content.selected_associations().iter().map(|a| a.id).collect();
        self.reverse_edges(&ids)
    }

    /// Reverse every association touching `id`.
    pub fn reverse_node_edges(&mut self, id: StageId) -> usize {
        let ids: Vec<StageId> = self.content.edges_of(id).iter().map(|a| a.id).collect();
        self.reverse_edges(&ids)
    }

    /// Reverse every association touching a selected entity. An edge
    /// between two selected entities is reversed once.
    pub fn reverse_selected_node_edges(&mut self) -> usize {
        let selected: HashSet<StageId> = self
            .content
            .selected_entities()
            .iter()
            .filter(|e| e.is_connectable())
            .map(|e| e.id)
            .collect();
        let ids: Vec<StageId> = self
            .content
            .associations()
            .filter(|a| selected.contains(&a.source.id()) || selected.contains(&a.target.id()))
            .map(|a| a.id)
            .collect();
        self.reverse_edges(&ids)
    }

    /// Turn every selected straight edge into a spline edge, keeping its
    /// identifier, endpoints and label.
    pub fn switch_line_edge_to_cr_edge(&mut self) -> usize {
        let ids: Vec<StageId> = self
            .content
            .line_edges()
            .filter(|a| a.selected)
            .map(|a| a.id)
            .collect();
        for &id in &ids {
            if let Some(assoc) = self.content.association_mut(id) {
                let text = assoc.kind.text().to_string();
                assoc.kind = AssociationKind::CrSpline { text, tension: 0.5 };
            }
        }
        ids.len()
    }

    // ─── Deletion ────────────────────────────────────────────────────────

    /// Delete entities, every association touching them, and their
    /// membership in any section. Children of a deleted section move up
    /// to the nearest surviving ancestor (or the top level). Returns how
    /// many entities were removed.
    pub fn delete_entities(&mut self, ids: &[StageId]) -> usize {
        let doomed: HashSet<StageId> = ids
            .iter()
            .copied()
            .filter(|id| self.content.is_entity_exists(*id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        // Promotions are planned against the untouched tree.
        let mut promotions: Vec<(StageId, Option<StageId>)> = Vec::new();
        for &id in &doomed {
            let Some(data) = self.content.section(id) else { continue };
            let mut target = self.content.parent_of(id);
            let mut seen = HashSet::new();
            while let Some(t) = target.filter(|t| doomed.contains(t)) {
                if !seen.insert(t) {
                    target = None;
                    break;
                }
                target = self.content.parent_of(t);
            }
            promotions.extend(
                data.child_ids
                    .iter()
                    .filter(|c| !doomed.contains(*c) && self.content.is_entity_exists(**c))
                    .map(|&c| (c, target)),
            );
        }

        let section_ids: Vec<StageId> = self.content.sections().map(|s| s.id).collect();
        for section in section_ids {
            if doomed.contains(&section) {
                continue;
            }
            let lists_doomed = self
                .content
                .section(section)
                .is_some_and(|d| d.child_ids.iter().any(|c| doomed.contains(c)));
            if lists_doomed {
                if let Some(data) = self.content.entity_mut(section).and_then(Entity::as_section_mut) {
                    data.child_ids.retain(|c| !doomed.contains(&*c));
                    data.children.retain(|c| !doomed.contains(&*c));
                }
            }
        }
        for (child, target) in promotions {
            if let Some(data) = target
                .and_then(|t| self.content.entity_mut(t))
                .and_then(Entity::as_section_mut)
            {
                data.add_child(child);
            }
        }

        let mut removed = 0;
        for &id in ids {
            if self.content.entities.remove(id).is_some() {
                removed += 1;
            }
        }
        let incident: Vec<StageId> = self
            .content
            .associations()
            .filter(|a| doomed.contains(&a.source.id()) || doomed.contains(&a.target.id()))
            .map(|a| a.id)
            .collect();
        for id in incident {
            self.content.associations.remove(id);
        }

        self.content.refresh_sections();
        self.content.refresh_shifting();
        self.content.update_tags();
        log::debug!("deleted {removed} entities");
        removed
    }

    /// Delete one association. Returns whether it was present.
    pub fn delete_edge(&mut self, id: StageId) -> bool {
        if self.content.associations.remove(id).is_none() {
            return false;
        }
        self.content.refresh_shifting();
        self.content.update_tags();
        true
    }

    /// Delete selected entities (cascading) and selected associations.
    pub fn delete_selected_stage_objects(&mut self) -> usize {
        let entities: Vec<StageId> = self.content.selected_entities().iter().map(|e| e.id).collect();
        let mut removed = self.delete_entities(&entities);
        let edges: Vec<StageId> = self.content.selected_associations().iter().map(|a| a.id).collect();
        for id in edges {
            removed += usize::from(self.delete_edge(id));
        }
        removed
    }

    // ─── Sections ────────────────────────────────────────────────────────

    /// Pack entities that share a parent section into a new section placed
    /// in that same parent.
    pub fn pack_entity_to_section(&mut self, ids: &[StageId]) -> Result<StageId, StageError> {
        let parent = ids.iter().find_map(|id| self.content.entity(*id)).and_then(|e| e.parent);
        self.pack_entity_to_section_in(ids, parent)
    }

    /// Pack entities into a new section that becomes a child of `parent`
    /// (or top level).
    ///
    /// # Errors
    /// `EmptySelection` when no listed entity exists, `MixedParents` when
    /// the entities do not all sit in the same section, `NotASection` for a
    /// bad parent, `ContainmentCycle` when `parent` is one of the packed
    /// entities or nested inside one. The stage is untouched on error.
    pub fn pack_entity_to_section_in(
        &mut self,
        ids: &[StageId],
        parent: Option<StageId>,
    ) -> Result<StageId, StageError> {
        let mut members: Vec<StageId> = Vec::new();
        for &id in ids {
            if self.content.is_entity_exists(id) && !members.contains(&id) {
                members.push(id);
            }
        }
        let Some(&first) = members.first() else {
            return Err(StageError::EmptySelection);
        };
        let shared = self.content.parent_of(first);
        if let Some(&other) = members.iter().find(|&&m| self.content.parent_of(m) != shared) {
            return Err(StageError::MixedParents { first, other });
        }
        if let Some(p) = parent {
            if !self.content.is_section(p) {
                return Err(StageError::NotASection(p));
            }
            if let Some(&entity) = members
                .iter()
                .find(|&&m| m == p || self.content.is_ancestor_of(m, p))
            {
                return Err(StageError::ContainmentCycle { section: p, entity });
            }
        }

        let union = self.content.bounding_rect(&members);
        let rect = section_rect(union, false).unwrap_or(Rect::ZERO);
        let id = StageId::fresh();
        self.content.add_entity(Entity::section(id, "section", rect))?;

        self.detach_from_sections(&members);
        if let Some(data) = self.content.entity_mut(id).and_then(Entity::as_section_mut) {
            for &m in &members {
                data.add_child(m);
            }
        }
        if let Some(data) = parent
            .and_then(|p| self.content.entity_mut(p))
            .and_then(Entity::as_section_mut)
        {
            data.add_child(id);
        }
        self.content.refresh_sections();
        log::debug!("packed {} entities into {id}", members.len());
        Ok(id)
    }

    /// Dissolve a section, returning its children to the section's parent.
    pub fn unpack_section(&mut self, id: StageId) -> Result<Vec<StageId>, StageError> {
        let data = match self.content.entity(id) {
            None => return Err(StageError::NotFound(id)),
            Some(e) => e.as_section().ok_or(StageError::NotASection(id))?,
        };
        let children = data.children.to_vec();
        self.delete_entities(&[id]);
        Ok(children)
    }

    /// Remove `ids` from every section's child lists.
    fn detach_from_sections(&mut self, ids: &[StageId]) {
        let listing: Vec<StageId> = self
            .content
            .sections()
            .filter(|s| s.as_section().is_some_and(|d| ids.iter().any(|i| d.has_child(*i))))
            .map(|s| s.id)
            .collect();
        for section in listing {
            if let Some(data) = self.content.entity_mut(section).and_then(Entity::as_section_mut) {
                for &i in ids {
                    data.remove_child(i);
                }
            }
        }
    }

    /// Move entities into `section`. Refused (returns `false`, nothing
    /// changes) if `section` is not a section or if any entity is the
    /// section itself or one of its ancestors.
    pub fn go_in_section(&mut self, ids: &[StageId], section: StageId) -> bool {
        if !self.content.is_section(section) {
            return false;
        }
        let members: Vec<StageId> = ids
            .iter()
            .copied()
            .filter(|id| self.content.is_entity_exists(*id))
            .collect();
        if members.is_empty() {
            return false;
        }
        if let Some(bad) = members
            .iter()
            .find(|&&m| m == section || self.content.is_ancestor_of(m, section))
        {
            log::warn!("{section} cannot contain its ancestor {bad}");
            return false;
        }
        self.detach_from_sections(&members);
        if let Some(data) = self.content.entity_mut(section).and_then(Entity::as_section_mut) {
            for &m in &members {
                data.add_child(m);
            }
        }
        self.content.refresh_sections();
        true
    }

    /// Move children of `section` out to the section's own parent (or top
    /// level). Returns `false` if none of `ids` were its children.
    pub fn go_out_section(&mut self, ids: &[StageId], section: StageId) -> bool {
        let Some(data) = self.content.section(section) else {
            return false;
        };
        let members: Vec<StageId> = ids.iter().copied().filter(|id| data.has_child(*id)).collect();
        if members.is_empty() {
            return false;
        }
        let outer = self.content.parent_of(section);
        if let Some(data) = self.content.entity_mut(section).and_then(Entity::as_section_mut) {
            for &m in &members {
                data.remove_child(m);
            }
        }
        if let Some(data) = outer
            .and_then(|o| self.content.entity_mut(o))
            .and_then(Entity::as_section_mut)
        {
            for &m in &members {
                data.add_child(m);
            }
        }
        self.content.refresh_sections();
        true
    }

    fn set_collapsed(&mut self, ids: &[StageId], value: impl Fn(bool) -> bool) -> usize {
        let mut count = 0;
        for &id in ids {
            let Some(current) = self.content.section(id).map(|d| d.collapsed) else {
                continue;
            };
            let next = value(current);
            if next != current {
                if let Some(data) = self.content.entity_mut(id).and_then(Entity::as_section_mut) {
                    data.collapsed = next;
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.content.refresh_sections();
        }
        count
    }

    fn selected_section_ids(&self) -> Vec<StageId> {
        self.content
            .sections()
            .filter(|s| s.selected)
            .map(|s| s.id)
            .collect()
    }

    /// Flip the collapsed flag of each listed section. Descendants become
    /// hidden (or visible) without losing their geometry.
    pub fn switch_collapse(&mut self, ids: &[StageId]) -> usize {
        self.set_collapsed(ids, |c| !c)
    }

    pub fn collapse_selected_sections(&mut self) -> usize {
        let ids = self.selected_section_ids();
        self.set_collapsed(&ids, |_| true)
    }

    pub fn expand_selected_sections(&mut self) -> usize {
        let ids = self.selected_section_ids();
        self.set_collapsed(&ids, |_| false)
    }

    pub fn switch_selected_collapse(&mut self) -> usize {
        let ids = self.selected_section_ids();
        self.switch_collapse(&ids)
    }

    /// Turn a text node into an empty section with the same identifier,
    /// title, and rectangle. Incident associations stay attached.
    pub fn text_node_to_section(&mut self, id: StageId) -> Result<(), StageError> {
        let entity = self.content.entity_mut(id).ok_or(StageError::NotFound(id))?;
        let EntityKind::Text { text, .. } = &entity.kind else {
            return Err(StageError::NotATextNode(id));
        };
        let title = text.clone();
        entity.kind = EntityKind::Section(SectionData::new(title));
        entity.rect = Rect::from_origin_size(
            entity.location(),
            Size::new(entity.rect.width(), entity.rect.height().max(SECTION_TITLE_HEIGHT)),
        );
        self.content.refresh_sections();
        Ok(())
    }

    pub fn text_selected_nodes_to_sections(&mut self) -> usize {
        let ids: Vec<StageId> = self
            .content
            .text_nodes()
            .filter(|e| e.selected)
            .map(|e| e.id)
            .collect();
        ids.into_iter()
            .filter(|id| self.text_node_to_section(*id).is_ok())
            .count()
    }

    // ─── Generation ──────────────────────────────────────────────────────

    /// Build a tree of text nodes from an indented outline, one node per
    /// non-blank line. A tab counts as `indention` spaces and every
    /// `indention` leading spaces is one level. Each node is linked from
    /// the nearest shallower line above it. Returns the nodes in line order.
    pub fn generate_node_by_text(&mut self, text: &str, indention: usize, location: Point) -> Vec<StageId> {
        let unit = indention.max(1);
        let items = text
            .lines()
            .filter_map(|line| {
                let body = line.trim_start();
                if body.is_empty() {
                    return None;
                }
                let lead = &line[..line.len() - body.len()];
                let width: usize = lead.chars().map(|c| if c == '\t' { unit } else { 1 }).sum();
                Some(OutlineItem {
                    level: width / unit,
                    text: body.trim_end().to_string(),
                    details: String::new(),
                })
            })
            .collect();
        self.grow_outline(items, location)
    }

    /// Build a tree of text nodes from markdown headings. `#` is level 0,
    /// `##` level 1, and so on; body lines become the details of the
    /// heading above them. Text before the first heading becomes one
    /// top-level node.
    pub fn generate_node_by_markdown(&mut self, text: &str, location: Point) -> Vec<StageId> {
        let mut items: Vec<OutlineItem> = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some((level, title)) = markdown_heading(trimmed) {
                items.push(OutlineItem {
                    level,
                    text: title.to_string(),
                    details: String::new(),
                });
                continue;
            }
            match items.last_mut() {
                Some(item) => {
                    if !item.details.is_empty() {
                        item.details.push('\n');
                    }
                    item.details.push_str(trimmed);
                }
                None => items.push(OutlineItem {
                    level: 0,
                    text: trimmed.to_string(),
                    details: String::new(),
                }),
            }
        }
        self.grow_outline(items, location)
    }

    fn grow_outline(&mut self, items: Vec<OutlineItem>, location: Point) -> Vec<StageId> {
        let mut created = Vec::with_capacity(items.len());
        let mut open: Vec<(usize, StageId)> = Vec::new();
        for (row, item) in items.into_iter().enumerate() {
            while open.last().is_some_and(|&(level, _)| level >= item.level) {
                open.pop();
            }
            let origin = location + Vec2::new(item.level as f64 * OUTLINE_INDENT_STEP, row as f64 * OUTLINE_ROW_STEP);
            let id = StageId::fresh();
            let kind = EntityKind::Text {
                text: item.text,
                details: item.details,
            };
            if let Err(e) = self.content.add_entity(Entity::new(id, kind, Rect::from_origin_size(origin, TEXT_NODE_SIZE))) {
                log::warn!("outline node skipped: {e}");
                continue;
            }
            if let Some(&(_, parent)) = open.last() {
                if let Err(e) = self.try_connect(parent, id, AssociationKind::line()) {
                    log::warn!("outline edge skipped: {e}");
                }
            }
            open.push((item.level, id));
            created.push(id);
        }
        log::debug!("generated {} node(s)", created.len());
        created
    }

    /// Grow a new text node out of the first selected connectable entity,
    /// one gap away on the `direction` side, in the same section, linked
    /// from it. With `select_current` the selection moves to the new node.
    ///
    /// # Errors
    /// `EmptySelection` when nothing connectable is selected.
    pub fn add_text_node_from_current_selected_node(
        &mut self,
        direction: Direction,
        select_current: bool,
    ) -> Result<StageId, StageError> {
        let source = self
            .content
            .entities()
            .find(|e| e.selected && e.is_connectable())
            .ok_or(StageError::EmptySelection)?;
        let (source_id, rect, parent) = (source.id, source.rect, source.parent);

        let reach_x = rect.width() / 2.0 + NODE_GAP + TEXT_NODE_SIZE.width / 2.0;
        let reach_y = rect.height() / 2.0 + NODE_GAP + TEXT_NODE_SIZE.height / 2.0;
        let offset = match direction {
            Direction::Up => Vec2::new(0.0, -reach_y),
            Direction::Down => Vec2::new(0.0, reach_y),
            Direction::Left => Vec2::new(-reach_x, 0.0),
            Direction::Right => Vec2::new(reach_x, 0.0),
        };
        let sections: Vec<StageId> = parent.into_iter().collect();
        let id = self.add_text_node(rect.center() + offset, &sections);
        self.try_connect(source_id, id, AssociationKind::line())?;

        if select_current {
            if let Some(e) = self.content.entity_mut(source_id) {
                e.selected = false;
            }
            if let Some(e) = self.content.entity_mut(id) {
                e.selected = true;
            }
        }
        Ok(id)
    }

    /// Toggle the tag on every selected entity and association. Returns
    /// how many were toggled.
    pub fn add_tag_by_selected(&mut self) -> usize {
        let ids: Vec<StageId> = self
            .content
            .selected_entities()
            .iter()
            .map(|e| e.id)
            .chain(self.content.selected_associations().iter().map(|a| a.id))
            .collect();
        for &id in &ids {
            if !self.content.remove_tag(id) {
                self.content.add_tag(id);
            }
        }
        ids.len()
    }

    // ─── Selection & layout ──────────────────────────────────────────────

    pub fn select_all(&mut self) {
        let ids: Vec<StageId> = self
            .content
            .entities()
            .filter(|e| !e.selected)
            .map(|e| e.id)
            .collect();
        for id in ids {
            if let Some(e) = self.content.entity_mut(id) {
                e.selected = true;
            }
        }
    }

    pub fn clear_select_all(&mut self) {
        let entities: Vec<StageId> = self.content.selected_entities().iter().map(|e| e.id).collect();
        for id in entities {
            if let Some(e) = self.content.entity_mut(id) {
                e.selected = false;
            }
        }
        let associations: Vec<StageId> = self.content.selected_associations().iter().map(|a| a.id).collect();
        for id in associations {
            if let Some(a) = self.content.association_mut(id) {
                a.selected = false;
            }
        }
    }

    /// Snap every entity's top-left corner to integer coordinates.
    /// Sections follow their children.
    pub fn move_all_entity_to_integer_location(&mut self) {
        let moves: Vec<(StageId, Point)> = self
            .content
            .entities()
            .filter(|e| !e.is_section() || e.as_section().is_some_and(|d| d.children.is_empty()))
            .filter_map(|e| {
                let snapped = round_point(e.location());
                (snapped != e.location()).then_some((e.id, snapped))
            })
            .collect();
        for (id, location) in moves {
            if let Some(e) = self.content.entity_mut(id) {
                e.move_to(location);
            }
        }
        self.content.refresh_sections();
    }

    /// Union of the selected entities' rectangles.
    pub fn selection_bounds(&self) -> Option<Rect> {
        bounding_rect(self.content.selected_entities().iter().map(|e| e.rect))
    }
}

struct OutlineItem {
    level: usize,
    text: String,
    details: String,
}

/// `## Title` → `(1, "Title")`. Up to six hashes, followed by a space or
/// nothing.
fn markdown_heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    let rest = &line[hashes..];
    if !(1..=6).contains(&hashes) || !(rest.is_empty() || rest.starts_with(' ')) {
        return None;
    }
    Some((hashes - 1, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StageSettings;
    use pretty_assertions::assert_eq;

    fn node(stage: &mut Stage, name: &str, x: f64, y: f64) -> StageId {
        let id = StageId::intern(name);
        stage
            .content
            .add_entity(Entity::text(id, name, Point::new(x, y)))
            .unwrap();
        id
    }

    #[test]
    fn self_loop_follows_setting() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_loop_a", 0.0, 0.0);
        assert_eq!(stage.connect_entity(a, a), None);
        assert!(stage.content.associations.is_empty());

        stage.settings = StageSettings {
            allow_add_cycle_edge: true,
            ..StageSettings::default()
        };
        assert!(stage.connect_entity(a, a).is_some());
    }

    #[test]
    fn connect_refuses_missing_and_unconnectable() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_bad_a", 0.0, 0.0);
        let stroke = StageId::intern("mu_bad_stroke");
        stage
            .content
            .add_entity(Entity::new(
                stroke,
                EntityKind::PenStroke {
                    points: vec![],
                    width: 1.0,
                },
                Rect::ZERO,
            ))
            .unwrap();
        assert!(matches!(
            stage.try_connect(a, stroke, AssociationKind::line()),
            Err(StageError::NotConnectable(_))
        ));
        assert!(matches!(
            stage.try_connect(a, StageId::intern("mu_bad_none"), AssociationKind::line()),
            Err(StageError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_edges_are_allowed() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_dup_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_dup_b", 200.0, 0.0);
        let e1 = stage.connect_entity(a, b).unwrap();
        let e2 = stage.connect_entity(a, b).unwrap();
        assert_ne!(e1, e2);
        assert_eq!(stage.content.successors(a), vec![b, b]);
    }

    #[test]
    fn reverse_refreshes_shifting() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_rev_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_rev_b", 200.0, 0.0);
        let e1 = stage.connect_entity(a, b).unwrap();
        let e2 = stage.connect_entity(a, b).unwrap();
        assert!(!stage.content.association(e1).unwrap().shifting);

        assert_eq!(stage.reverse_edges(&[e2]), 1);
        assert!(stage.content.association(e1).unwrap().shifting);
        assert!(stage.content.association(e2).unwrap().shifting);
        assert_eq!(stage.content.association(e2).unwrap().source.id(), b);
    }

    #[test]
    fn selected_node_edges_reverse_once() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_rsn_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_rsn_b", 200.0, 0.0);
        let e = stage.connect_entity(a, b).unwrap();
        stage.select_all();
        assert_eq!(stage.reverse_selected_node_edges(), 1);
        assert_eq!(stage.content.association(e).unwrap().source.id(), b);
    }

    #[test]
    fn delete_cascades_to_edges_and_tags() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_del_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_del_b", 200.0, 0.0);
        let c = node(&mut stage, "mu_del_c", 400.0, 0.0);
        let ab = stage.connect_entity(a, b).unwrap();
        let bc = stage.connect_entity(b, c).unwrap();
        stage.content.reset_tags(&[b, ab, c]);

        assert_eq!(stage.delete_entities(&[b, StageId::intern("mu_del_none")]), 1);
        assert!(stage.content.association(ab).is_none());
        assert!(stage.content.association(bc).is_none());
        assert!(stage.content.associations().all(|x| !x.touches(b)));
        assert_eq!(stage.content.tags(), &[c]);
        assert!(!stage.delete_edge(ab));
    }

    #[test]
    fn deleting_section_promotes_children() {
        let mut stage = Stage::new();
        let leaf = node(&mut stage, "mu_prom_leaf", 0.0, 0.0);
        let inner = stage.pack_entity_to_section(&[leaf]).unwrap();
        let outer = stage.pack_entity_to_section(&[inner]).unwrap();

        stage.delete_entities(&[inner]);
        assert_eq!(stage.content.parent_of(leaf), Some(outer));
        assert_eq!(stage.content.section(outer).unwrap().children.as_slice(), &[leaf]);
    }

    #[test]
    fn pack_into_own_descendant_is_refused() {
        let mut stage = Stage::new();
        let leaf = node(&mut stage, "mu_cyc_leaf", 0.0, 0.0);
        let s = stage.pack_entity_to_section(&[leaf]).unwrap();
        let before = stage.content.clone();

        let err = stage.pack_entity_to_section_in(&[s], Some(s)).unwrap_err();
        assert!(matches!(err, StageError::ContainmentCycle { .. }));
        let inner = stage.pack_entity_to_section(&[leaf]).unwrap();
        let err = stage.pack_entity_to_section_in(&[s], Some(inner)).unwrap_err();
        assert!(matches!(err, StageError::ContainmentCycle { .. }));
        stage.unpack_section(inner).unwrap();
        assert_eq!(stage.content.entities.ids(), before.entities.ids());
        assert!(matches!(
            stage.pack_entity_to_section(&[]),
            Err(StageError::EmptySelection)
        ));
    }

    #[test]
    fn go_in_and_out_update_both_sections() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_io_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_io_b", 300.0, 0.0);
        let outer = stage.pack_entity_to_section(&[a]).unwrap();
        let target = stage.add_section(Point::new(300.0, 300.0), "target");

        assert!(stage.go_in_section(&[b], target));
        assert!(stage.go_in_section(&[target], outer));
        assert!(!stage.go_in_section(&[outer], target), "outer contains target");
        assert_eq!(stage.content.parent_of(b), Some(target));
        assert!(stage.content.is_ancestor_of(outer, b));

        assert!(stage.go_out_section(&[b], target));
        assert_eq!(stage.content.parent_of(b), Some(outer));
        assert!(!stage.content.section(target).unwrap().has_child(b));
        assert!(!stage.go_out_section(&[b], target));

        let outer_rect = stage.content.entity(outer).unwrap().rect;
        let b_rect = stage.content.entity(b).unwrap().rect;
        assert_eq!(outer_rect.union(b_rect), outer_rect);
    }

    #[test]
    fn text_node_becomes_section_in_place() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_t2s_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_t2s_b", 200.0, 0.0);
        let e = stage.connect_entity(a, b).unwrap();
        stage.text_node_to_section(a).unwrap();

        let section = stage.content.section(a).unwrap();
        assert_eq!(section.title, "mu_t2s_a");
        let assoc = stage.content.association(e).unwrap();
        assert_eq!(stage.content.source_of(assoc).map(|x| x.id), Some(a));
        assert!(matches!(
            stage.text_node_to_section(a),
            Err(StageError::NotATextNode(_))
        ));
    }

    #[test]
    fn integer_snap_and_edge_kind_switch() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_snap_a", 0.4, 10.6);
        let b = node(&mut stage, "mu_snap_b", 200.0, 0.0);
        let e = stage.connect_entity(a, b).unwrap();
        stage.move_all_entity_to_integer_location();
        assert_eq!(stage.content.entity(a).unwrap().location(), Point::new(0.0, 11.0));

        stage.content.association_mut(e).unwrap().selected = true;
        assert_eq!(stage.switch_line_edge_to_cr_edge(), 1);
        assert!(!stage.content.association(e).unwrap().is_line());

        stage.clear_select_all();
        assert!(stage.content.selected_associations().is_empty());
    }

    // ─── Generation ──────────────────────────────────────────────────────

    fn text_of(stage: &Stage, id: StageId) -> (String, String) {
        match &stage.content.entity(id).unwrap().kind {
            EntityKind::Text { text, details } => (text.clone(), details.clone()),
            other => panic!("not a text node: {other:?}"),
        }
    }

    #[test]
    fn indented_outline_becomes_a_tree() {
        let mut stage = Stage::new();
        let outline = "root\n    child one\n\tchild two\n        grandchild\n\nsecond root\n";
        let ids = stage.generate_node_by_text(outline, 4, Point::new(10.0, 20.0));
        assert_eq!(ids.len(), 5);

        let names: Vec<String> = ids.iter().map(|id| text_of(&stage, *id).0).collect();
        assert_eq!(names[0], "root");
        assert_eq!(names[4], "second root");

        let content = &stage.content;
        assert_eq!(content.successors(ids[0]), vec![ids[1], ids[2]]);
        assert_eq!(content.successors(ids[2]), vec![ids[3]]);
        assert!(content.predecessors(ids[4]).is_empty());
        assert_eq!(content.associations.len(), 3);

        assert_eq!(content.entity(ids[0]).unwrap().location(), Point::new(10.0, 20.0));
        assert_eq!(
            content.entity(ids[3]).unwrap().location(),
            Point::new(10.0 + 2.0 * OUTLINE_INDENT_STEP, 20.0 + 3.0 * OUTLINE_ROW_STEP)
        );
    }

    #[test]
    fn zero_indention_counts_each_space() {
        let mut stage = Stage::new();
        let ids = stage.generate_node_by_text("a\n b\n  c", 0, Point::ZERO);
        assert_eq!(stage.content.successors(ids[1]), vec![ids[2]]);
        assert!(stage.generate_node_by_text("\n   \n", 4, Point::ZERO).is_empty());
    }

    #[test]
    fn markdown_headings_nest_and_collect_details() {
        let mut stage = Stage::new();
        let md = "intro line\n# Title\nbody one\nbody two\n## Part\n###not a heading\n# Next\n";
        let ids = stage.generate_node_by_markdown(md, Point::ZERO);
        assert_eq!(ids.len(), 4);

        assert_eq!(text_of(&stage, ids[0]), ("intro line".to_string(), String::new()));
        assert_eq!(text_of(&stage, ids[1]), ("Title".to_string(), "body one\nbody two".to_string()));
        assert_eq!(text_of(&stage, ids[2]), ("Part".to_string(), "###not a heading".to_string()));
        assert_eq!(stage.content.successors(ids[1]), vec![ids[2]]);
        assert!(stage.content.predecessors(ids[3]).is_empty());
    }

    #[test]
    fn grow_from_selection_links_and_moves_selection() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_grow_a", 0.0, 0.0);
        assert!(matches!(
            stage.add_text_node_from_current_selected_node(Direction::Right, false),
            Err(StageError::EmptySelection)
        ));

        let s = stage.pack_entity_to_section(&[a]).unwrap();
        stage.content.entity_mut(a).unwrap().selected = true;
        let right = stage.add_text_node_from_current_selected_node(Direction::Right, false).unwrap();
        let new_rect = stage.content.entity(right).unwrap().rect;
        assert_eq!(new_rect.x0, 100.0 + NODE_GAP);
        assert_eq!(new_rect.y0, 0.0);
        assert_eq!(stage.content.parent_of(right), Some(s));
        assert_eq!(stage.content.successors(a), vec![right]);
        assert!(stage.content.entity(a).unwrap().selected);

        let below = stage.add_text_node_from_current_selected_node(Direction::Down, true).unwrap();
        assert_eq!(stage.content.entity(below).unwrap().rect.y0, 40.0 + NODE_GAP);
        assert!(!stage.content.entity(a).unwrap().selected);
        assert!(stage.content.entity(below).unwrap().selected);
    }

    #[test]
    fn tag_by_selection_toggles() {
        let mut stage = Stage::new();
        let a = node(&mut stage, "mu_tag_a", 0.0, 0.0);
        let b = node(&mut stage, "mu_tag_b", 200.0, 0.0);
        let e = stage.connect_entity(a, b).unwrap();
        stage.content.add_tag(a);
        stage.content.entity_mut(a).unwrap().selected = true;
        stage.content.association_mut(e).unwrap().selected = true;

        assert_eq!(stage.add_tag_by_selected(), 2);
        assert_eq!(stage.content.tags(), &[e]);
        assert_eq!(stage.add_tag_by_selected(), 2);
        assert_eq!(stage.content.tags(), &[a]);
    }
}
