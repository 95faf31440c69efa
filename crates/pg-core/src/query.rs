//! Read-only queries over stage content: hit testing, selection,
//! connectivity, and bounding boxes.
//!
//! Hit tests walk the store in insertion order and return the first match.
//! Overlapping shapes therefore resolve to the *earliest inserted* object,
//! not the visually topmost one; callers that need z-order must sort
//! candidates themselves.

use crate::geometry::{Line, Point, Rect, Size, bounding_rect, line_contains_point};
use crate::id::StageId;
use crate::model::*;
use crate::stage::{StageContent, StageObject};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet, VecDeque};

/// Directed multigraph over entities, one edge per live association.
/// Built on demand; the stage never stores incidence.
pub struct ConnectivityIndex {
    pub graph: DiGraph<StageId, StageId>,
    pub nodes: HashMap<StageId, NodeIndex>,
}

impl ConnectivityIndex {
    pub fn build(content: &StageContent) -> Self {
        let mut graph = DiGraph::with_capacity(content.entities.len(), content.associations.len());
        let mut nodes = HashMap::with_capacity(content.entities.len());
        for entity in content.connectable_entities() {
            nodes.insert(entity.id, graph.add_node(entity.id));
        }
        for assoc in content.associations() {
            let (Some(&s), Some(&t)) = (
                nodes.get(&assoc.source.id()),
                nodes.get(&assoc.target.id()),
            ) else {
                continue;
            };
            graph.add_edge(s, t, assoc.id);
        }
        Self { graph, nodes }
    }

    /// Directed reachability from `from` to `to`.
    pub fn is_connected(&self, from: StageId, to: StageId) -> bool {
        let (Some(&start), Some(&goal)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return false;
        };
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(nx) = bfs.next(&self.graph) {
            if nx == goal {
                return true;
            }
        }
        false
    }

    /// Whether everything reachable from `root` forms a tree: every node
    /// reached exactly once. Parallel edges and cycles both fail.
    pub fn is_tree(&self, root: StageId) -> bool {
        let Some(&start) = self.nodes.get(&root) else {
            return false;
        };
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for edge in self.graph.edges(node) {
                let next = edge.target();
                if !visited.insert(next) {
                    return false;
                }
                queue.push_back(next);
            }
        }
        true
    }
}

impl StageContent {
    // ─── Endpoints ───────────────────────────────────────────────────────

    /// The live connectable entity an endpoint refers to, or `None` when
    /// dangling.
    pub fn endpoint_entity(&self, endpoint: &Endpoint) -> Option<&Entity> {
        let entity = match endpoint {
            Endpoint::Resolved(handle) => self
                .entities
                .get_by_handle(*handle)
                .or_else(|| self.entities.get(handle.id())),
            Endpoint::ByIdentifier(id) => self.entities.get(*id),
        };
        entity.filter(|e| e.is_connectable())
    }

    pub fn source_of(&self, association: &Association) -> Option<&Entity> {
        self.endpoint_entity(&association.source)
    }

    pub fn target_of(&self, association: &Association) -> Option<&Entity> {
        self.endpoint_entity(&association.target)
    }

    /// Center line of an association, when both endpoints are live.
    pub fn association_line(&self, association: &Association) -> Option<Line> {
        let source = self.source_of(association)?;
        let target = self.target_of(association)?;
        Some(Line::new(source.center(), target.center()))
    }

    // ─── Hit testing ─────────────────────────────────────────────────────

    fn first_visible_at(&self, location: Point, filter: impl Fn(&Entity) -> bool) -> Option<&Entity> {
        let hit = self
            .entities()
            .filter(|e| !e.hidden_by_collapse && filter(*e))
            .find(|e| e.contains_point(location));
        log::trace!("hit test at {location:?} -> {:?}", hit.map(|e| e.id));
        hit
    }

    pub fn find_entity_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, |_| true)
    }

    pub fn find_connectable_entity_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, Entity::is_connectable)
    }

    pub fn find_text_node_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, |e| e.kind.tag() == EntityTag::Text)
    }

    pub fn find_section_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, Entity::is_section)
    }

    pub fn find_image_node_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, |e| e.kind.tag() == EntityTag::Image)
    }

    pub fn find_connect_point_by_location(&self, location: Point) -> Option<&Entity> {
        self.first_visible_at(location, |e| e.kind.tag() == EntityTag::ConnectPoint)
    }

    pub fn is_entity_on_location(&self, location: Point) -> bool {
        self.find_entity_by_location(location).is_some()
    }

    /// An association is hidden only when both of its endpoints are.
    fn association_hidden(&self, association: &Association) -> bool {
        let hidden = |e: Option<&Entity>| e.is_some_and(|e| e.hidden_by_collapse);
        hidden(self.source_of(association)) && hidden(self.target_of(association))
    }

    pub fn find_edge_by_location(&self, location: Point) -> Option<&Association> {
        self.associations().find(|a| {
            !self.association_hidden(a)
                && self
                    .association_line(a)
                    .is_some_and(|line| line_contains_point(&line, location, EDGE_HIT_TOLERANCE))
        })
    }

    pub fn is_association_on_location(&self, location: Point) -> bool {
        self.find_edge_by_location(location).is_some()
    }

    // ─── Selection ───────────────────────────────────────────────────────

    pub fn selected_entities(&self) -> Vec<&Entity> {
        self.entities().filter(|e| e.selected).collect()
    }

    pub fn selected_associations(&self) -> Vec<&Association> {
        self.associations().filter(|a| a.selected).collect()
    }

    pub fn selected_stage_objects(&self) -> Vec<StageObject<'_>> {
        self.entities()
            .filter(|e| e.selected)
            .map(StageObject::Entity)
            .chain(
                self.associations()
                    .filter(|a| a.selected)
                    .map(StageObject::Association),
            )
            .collect()
    }

    pub fn is_have_entity_selected(&self) -> bool {
        self.entities().any(|e| e.selected)
    }

    // ─── Connectivity ────────────────────────────────────────────────────

    /// Directed reachability: true iff a chain of associations leads from
    /// `from` to `to` following source → target. Every entity reaches
    /// itself.
    pub fn is_connected(&self, from: StageId, to: StageId) -> bool {
        if from == to {
            return self.connectable_entity(from).is_some();
        }
        ConnectivityIndex::build(self).is_connected(from, to)
    }

    /// Whether the subgraph reachable from `root` along outgoing
    /// associations is a tree.
    pub fn is_tree(&self, root: StageId) -> bool {
        ConnectivityIndex::build(self).is_tree(root)
    }

    /// Associations with `id` as source or target.
    pub fn edges_of(&self, id: StageId) -> Vec<&Association> {
        self.associations().filter(|a| a.touches(id)).collect()
    }

    /// Direct targets of associations leaving `id`, in store order.
    pub fn successors(&self, id: StageId) -> Vec<StageId> {
        self.associations()
            .filter(|a| a.source.id() == id)
            .map(|a| a.target.id())
            .collect()
    }

    /// Direct sources of associations entering `id`, in store order.
    pub fn predecessors(&self, id: StageId) -> Vec<StageId> {
        self.associations()
            .filter(|a| a.target.id() == id)
            .map(|a| a.source.id())
            .collect()
    }

    // ─── Bounds ──────────────────────────────────────────────────────────

    /// Union of the given entities' rectangles; `None` if none are live.
    pub fn bounding_rect(&self, ids: &[StageId]) -> Option<Rect> {
        bounding_rect(self.entities_by_ids(ids).into_iter().map(|e| e.rect))
    }

    /// Center of everything on the stage; the origin for an empty stage.
    pub fn center(&self) -> Point {
        bounding_rect(self.entities().map(|e| e.rect))
            .map(|r| r.center())
            .unwrap_or(Point::ZERO)
    }

    /// Size of everything on the stage, or `fallback` (typically the
    /// viewport) for an empty stage.
    pub fn size(&self, fallback: Size) -> Size {
        bounding_rect(self.entities().map(|e| e.rect))
            .map(|r| r.size())
            .unwrap_or(fallback)
    }

    // ─── Containment ─────────────────────────────────────────────────────

    pub fn parent_of(&self, id: StageId) -> Option<StageId> {
        self.entity(id).and_then(|e| e.parent)
    }

    /// Whether `ancestor` is a parent, grandparent, etc. of `descendant`.
    /// An entity is not its own ancestor.
    pub fn is_ancestor_of(&self, ancestor: StageId, descendant: StageId) -> bool {
        if ancestor == descendant {
            return false;
        }
        let mut seen = HashSet::new();
        let mut current = descendant;
        while let Some(parent) = self.parent_of(current) {
            if parent == ancestor {
                return true;
            }
            if !seen.insert(parent) {
                break;
            }
            current = parent;
        }
        false
    }

    /// Every entity nested (at any depth) inside section `id`, pre-order.
    pub fn descendants(&self, id: StageId) -> Vec<StageId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        self.collect_descendants(id, &mut seen, &mut out);
        out
    }

    fn collect_descendants(&self, id: StageId, seen: &mut HashSet<StageId>, out: &mut Vec<StageId>) {
        let Some(section) = self.section(id) else {
            return;
        };
        for &child in &section.child_ids {
            if self.is_entity_exists(child) && seen.insert(child) {
                out.push(child);
                self.collect_descendants(child, seen, out);
            }
        }
    }

    /// Nesting depth: 0 for top-level entities.
    pub fn depth_of(&self, id: StageId) -> usize {
        let mut depth = 0;
        let mut seen = HashSet::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(parent) {
                break;
            }
            depth += 1;
            current = parent;
        }
        depth
    }
}
