//! Reference resolution: the normalization pass run after loads, pastes,
//! and structural edits.
//!
//! 1. Bare-identifier endpoints naming a live connectable entity become
//!    handles; stale handles fall back to identifiers.
//! 2. Section membership, parent pointers, section geometry, and
//!    collapse-hidden flags are rebuilt from the child identifier lists.
//! 3. Shifting flags are recomputed from an endpoint-pair index.
//! 4. Tags naming nothing are pruned.
//!
//! Every step writes only fields whose value changes, so running the pass
//! on already-resolved content touches nothing and shares every value with
//! the previous snapshot.

use crate::geometry::{Rect, bounding_rect};
use crate::id::StageId;
use crate::model::*;
use crate::stage::StageContent;
use std::collections::{HashMap, HashSet};

/// What a resolution pass found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    /// Endpoints turned from identifiers into handles by this pass.
    pub resolved: usize,
    /// Identifiers of associations left with at least one absent endpoint.
    pub dangling: Vec<StageId>,
    /// Tags dropped because they name nothing.
    pub pruned_tags: Vec<StageId>,
}

impl ResolveReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.pruned_tags.is_empty()
    }
}

impl StageContent {
    /// Run the full resolution pass. Idempotent.
    pub fn resolve_references(&mut self) -> ResolveReport {
        let (resolved, dangling) = self.resolve_endpoints();
        self.refresh_sections();
        self.refresh_shifting();
        let pruned_tags = self.update_tags();

        for id in &dangling {
            log::warn!("association {id} has a dangling endpoint");
        }
        if !pruned_tags.is_empty() {
            log::debug!("pruned {} stale tag(s)", pruned_tags.len());
        }
        ResolveReport {
            resolved,
            dangling,
            pruned_tags,
        }
    }

    fn resolve_endpoint(&self, endpoint: Endpoint) -> Endpoint {
        if let Endpoint::Resolved(handle) = endpoint {
            if self
                .entities
                .get_by_handle(handle)
                .is_some_and(Entity::is_connectable)
            {
                return endpoint;
            }
        }
        let id = endpoint.id();
        match self.entities.handle_of(id) {
            Some(handle) if self.connectable_entity(id).is_some() => Endpoint::Resolved(handle),
            _ => Endpoint::ByIdentifier(id),
        }
    }

    /// Step 1. Returns the number of newly resolved endpoints and the
    /// associations still dangling.
    fn resolve_endpoints(&mut self) -> (usize, Vec<StageId>) {
        let mut updates = Vec::new();
        let mut resolved = 0;
        let mut dangling = Vec::new();

        for assoc in self.associations() {
            let source = self.resolve_endpoint(assoc.source);
            let target = self.resolve_endpoint(assoc.target);
            resolved += [(assoc.source, source), (assoc.target, target)]
                .iter()
                .filter(|(old, new)| old.is_unknown() && !new.is_unknown())
                .count();
            if source.is_unknown() || target.is_unknown() {
                dangling.push(assoc.id);
            }
            if source != assoc.source || target != assoc.target {
                log::trace!("endpoint update on {}", assoc.id);
                updates.push((assoc.id, source, target));
            }
        }

        for (id, source, target) in updates {
            if let Some(assoc) = self.associations.get_mut(id) {
                assoc.source = source;
                assoc.target = target;
            }
        }
        (resolved, dangling)
    }

    /// Step 2: rebuild membership, geometry and visibility from the
    /// sections' child identifier lists.
    pub fn refresh_sections(&mut self) {
        let parents = self.claim_children();

        // Derived child lists and parent pointers.
        let mut children_updates = Vec::new();
        for entity in self.sections() {
            let Some(data) = entity.as_section() else { continue };
            let live: smallvec::SmallVec<[StageId; 4]> = data
                .child_ids
                .iter()
                .copied()
                .filter(|c| parents.get(c) == Some(&entity.id))
                .collect();
            if live != data.children {
                children_updates.push((entity.id, live));
            }
        }
        for (id, live) in children_updates {
            if let Some(data) = self.entities.get_mut(id).and_then(Entity::as_section_mut) {
                data.children = live;
            }
        }

        let parent_updates: Vec<(StageId, Option<StageId>)> = self
            .entities()
            .filter_map(|e| {
                let parent = parents.get(&e.id).copied();
                (parent != e.parent).then_some((e.id, parent))
            })
            .collect();
        for (id, parent) in parent_updates {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.parent = parent;
            }
        }

        // Innermost first: deepest sections, then lowest on the canvas.
        let mut order: Vec<(StageId, usize, f64)> = self
            .sections()
            .map(|s| (s.id, self.depth_of(s.id), s.rect.y0))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.total_cmp(&a.2)));
        for (id, _, _) in order {
            self.refresh_section_rect(id);
        }

        self.refresh_hidden_flags();
    }

    /// Assign each entity to at most one containing section. The first
    /// section in store order to list a child claims it; claims that
    /// would close a containment cycle are refused.
    fn claim_children(&self) -> HashMap<StageId, StageId> {
        let mut parents: HashMap<StageId, StageId> = HashMap::new();
        for section in self.sections() {
            let Some(data) = section.as_section() else { continue };
            for &child in &data.child_ids {
                if !self.is_entity_exists(child) {
                    continue;
                }
                if let Some(owner) = parents.get(&child) {
                    if *owner != section.id {
                        log::warn!("{child} is listed by {owner} and {}; keeping {owner}", section.id);
                    }
                    continue;
                }
                if child == section.id || claims_ancestor(&parents, section.id, child) {
                    log::warn!("{} cannot contain its ancestor {child}", section.id);
                    continue;
                }
                parents.insert(child, section.id);
            }
        }
        parents
    }

    /// Recompute one section's rectangle from its live children.
    /// An empty section keeps its rectangle.
    pub fn refresh_section_rect(&mut self, id: StageId) {
        let Some(entity) = self.entity(id) else { return };
        let Some(data) = entity.as_section() else { return };
        let Some(rect) = section_rect(
            bounding_rect(self.entities_by_ids(&data.children).into_iter().map(|c| c.rect)),
            data.collapsed,
        ) else {
            return;
        };
        if rect != entity.rect {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.rect = rect;
            }
        }
    }

    fn refresh_hidden_flags(&mut self) {
        let updates: Vec<(StageId, bool)> = self
            .entities()
            .filter_map(|e| {
                let hidden = self.is_hidden_by_ancestor(e.id);
                (hidden != e.hidden_by_collapse).then_some((e.id, hidden))
            })
            .collect();
        for (id, hidden) in updates {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.hidden_by_collapse = hidden;
            }
        }
    }

    fn is_hidden_by_ancestor(&self, id: StageId) -> bool {
        let mut seen = HashSet::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(parent) {
                return false;
            }
            if self.section(parent).is_some_and(|s| s.collapsed) {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Step 3: an association shifts when another live association runs
    /// the opposite way between the same two entities. A self loop is its
    /// own opposite.
    pub fn refresh_shifting(&mut self) {
        let live_pair = |a: &Association| -> Option<(StageId, StageId)> {
            let source = self.source_of(a)?;
            let target = self.target_of(a)?;
            Some((source.id, target.id))
        };
        let pairs: HashSet<(StageId, StageId)> = self.associations().filter_map(live_pair).collect();
        let updates: Vec<(StageId, bool)> = self
            .associations()
            .filter_map(|a| {
                let shifting = live_pair(a).is_some_and(|(s, t)| pairs.contains(&(t, s)));
                (shifting != a.shifting).then_some((a.id, shifting))
            })
            .collect();
        for (id, shifting) in updates {
            if let Some(assoc) = self.associations.get_mut(id) {
                assoc.shifting = shifting;
            }
        }
    }
}

fn claims_ancestor(parents: &HashMap<StageId, StageId>, section: StageId, candidate: StageId) -> bool {
    let mut current = section;
    let mut steps = 0;
    while let Some(&parent) = parents.get(&current) {
        if parent == candidate {
            return true;
        }
        steps += 1;
        if steps > parents.len() {
            break;
        }
        current = parent;
    }
    false
}

/// Section geometry from the union of its children: padded on every side
/// with a title band on top. Collapsed sections keep only the band.
pub fn section_rect(children: Option<Rect>, collapsed: bool) -> Option<Rect> {
    let union = children?;
    let x0 = union.x0 - SECTION_PADDING;
    let y0 = union.y0 - SECTION_PADDING - SECTION_TITLE_HEIGHT;
    let x1 = union.x1 + SECTION_PADDING;
    let y1 = if collapsed {
        y0 + SECTION_TITLE_HEIGHT
    } else {
        union.y1 + SECTION_PADDING
    };
    Some(Rect::new(x0, y0, x1, y1))
}
