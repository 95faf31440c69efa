//! Stage data model: entities, sections, associations.
//!
//! Entities are a closed set of kinds behind capability predicates
//! (`is_connectable`, `as_section`). Associations never own their
//! endpoints: they hold an `Endpoint` that is either a bare identifier
//! (freshly loaded, not yet resolved) or a `Handle` into the entity
//! store. Sections own identifiers of their children, never the children
//! themselves; incidence and membership are derived on demand.

use crate::geometry::{Point, Rect, Size, Vec2, rect_contains};
use crate::id::StageId;
use crate::store::{Handle, Identified};
use smallvec::SmallVec;

// ─── Layout constants ────────────────────────────────────────────────────

/// Gap between a section's border and its children.
pub const SECTION_PADDING: f64 = 20.0;

/// Height of the title band at the top of a section. A collapsed section
/// shrinks to just this band.
pub const SECTION_TITLE_HEIGHT: f64 = 40.0;

/// Default size of a section created with no children.
pub const EMPTY_SECTION_SIZE: Size = Size::new(200.0, 120.0);

/// Default size of a freshly placed text node.
pub const TEXT_NODE_SIZE: Size = Size::new(100.0, 40.0);

/// Default size of a connect point.
pub const CONNECT_POINT_SIZE: Size = Size::new(10.0, 10.0);

/// Default size of a freshly placed portal.
pub const PORTAL_SIZE: Size = Size::new(500.0, 500.0);

/// Hit distance around an edge's center line.
pub const EDGE_HIT_TOLERANCE: f64 = 8.0;

/// Width of the clickable frame along an expanded section's sides and
/// bottom.
pub const SECTION_BORDER_HIT: f64 = 8.0;

/// Gap between a node and one grown out of it.
pub const NODE_GAP: f64 = 100.0;

/// Horizontal step per outline level when generating nodes from text.
pub const OUTLINE_INDENT_STEP: f64 = 150.0;

/// Vertical step per outline row when generating nodes from text.
pub const OUTLINE_ROW_STEP: f64 = 60.0;

// ─── Entities ────────────────────────────────────────────────────────────

/// Container payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionData {
    pub title: String,

    /// Ordered child identifiers. Authoritative; may name entities that
    /// have since been deleted until the next resolution pass.
    pub child_ids: SmallVec<[StageId; 4]>,

    /// Live children, rebuilt from `child_ids` by the resolution pass.
    pub children: SmallVec<[StageId; 4]>,

    pub collapsed: bool,
}

impl SectionData {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn has_child(&self, id: StageId) -> bool {
        self.child_ids.contains(&id)
    }

    /// Append `id` unless already listed. Returns whether it was added.
    pub fn add_child(&mut self, id: StageId) -> bool {
        if self.has_child(id) {
            return false;
        }
        self.child_ids.push(id);
        self.children.push(id);
        true
    }

    /// Remove `id` from both lists. Returns whether it was listed.
    pub fn remove_child(&mut self, id: StageId) -> bool {
        let before = self.child_ids.len();
        self.child_ids.retain(|c| *c != id);
        self.children.retain(|c| *c != id);
        before != self.child_ids.len()
    }
}

/// The entity kinds on the stage.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// Text node with optional long-form details.
    Text { text: String, details: String },

    /// Raster image referenced by path.
    Image { path: String },

    /// Collapsible container.
    Section(SectionData),

    /// Window into another document (a child stage).
    Portal {
        title: String,
        /// Path of the other document, relative to the current file.
        portal_path: String,
        camera_scale: f64,
        target_location: Point,
    },

    /// Freehand stroke. Decoration only, never an edge endpoint.
    PenStroke { points: Vec<Point>, width: f64 },

    /// Small routing dot used to bend edges.
    ConnectPoint,

    /// Hyperlink card.
    Url { title: String, url: String },
}

/// Discriminant of `EntityKind`, used by filtered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityTag {
    Text,
    Image,
    Section,
    Portal,
    PenStroke,
    ConnectPoint,
    Url,
}

impl EntityKind {
    pub fn tag(&self) -> EntityTag {
        match self {
            EntityKind::Text { .. } => EntityTag::Text,
            EntityKind::Image { .. } => EntityTag::Image,
            EntityKind::Section(_) => EntityTag::Section,
            EntityKind::Portal { .. } => EntityTag::Portal,
            EntityKind::PenStroke { .. } => EntityTag::PenStroke,
            EntityKind::ConnectPoint => EntityTag::ConnectPoint,
            EntityKind::Url { .. } => EntityTag::Url,
        }
    }
}

/// A placeable object on the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: StageId,
    pub kind: EntityKind,

    /// Collision rectangle in world coordinates.
    pub rect: Rect,

    pub selected: bool,

    /// Section that directly contains this entity, if any.
    /// Rebuilt by the resolution pass from the sections' child lists.
    pub parent: Option<StageId>,

    /// Set when any ancestor section is collapsed. Hidden entities keep
    /// their geometry but are skipped by hit testing.
    pub hidden_by_collapse: bool,
}

impl Entity {
    pub fn new(id: StageId, kind: EntityKind, rect: Rect) -> Self {
        Self {
            id,
            kind,
            rect,
            selected: false,
            parent: None,
            hidden_by_collapse: false,
        }
    }

    pub fn text(id: StageId, text: impl Into<String>, location: Point) -> Self {
        Self::new(
            id,
            EntityKind::Text {
                text: text.into(),
                details: String::new(),
            },
            Rect::from_origin_size(location, TEXT_NODE_SIZE),
        )
    }

    pub fn section(id: StageId, title: impl Into<String>, rect: Rect) -> Self {
        Self::new(id, EntityKind::Section(SectionData::new(title)), rect)
    }

    pub fn connect_point(id: StageId, center: Point) -> Self {
        let half = Vec2::new(CONNECT_POINT_SIZE.width, CONNECT_POINT_SIZE.height) / 2.0;
        Self::new(
            id,
            EntityKind::ConnectPoint,
            Rect::from_origin_size(center - half, CONNECT_POINT_SIZE),
        )
    }

    /// Whether this entity may be the source or target of an association.
    pub fn is_connectable(&self) -> bool {
        !matches!(self.kind, EntityKind::PenStroke { .. })
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, EntityKind::Section(_))
    }

    pub fn as_section(&self) -> Option<&SectionData> {
        match &self.kind {
            EntityKind::Section(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_section_mut(&mut self) -> Option<&mut SectionData> {
        match &mut self.kind {
            EntityKind::Section(data) => Some(data),
            _ => None,
        }
    }

    pub fn location(&self) -> Point {
        self.rect.origin()
    }

    /// Whether `p` hits this entity's collision shape.
    ///
    /// Most entities are solid rectangles. An expanded section is a frame:
    /// its title band plus a thin border, so the children drawn inside it
    /// stay reachable. A collapsed section is just its band and is solid.
    pub fn contains_point(&self, p: Point) -> bool {
        if !rect_contains(&self.rect, p) {
            return false;
        }
        match &self.kind {
            EntityKind::Section(data) if !data.collapsed => {
                let r = self.rect;
                p.y - r.y0 <= SECTION_TITLE_HEIGHT
                    || p.x - r.x0 <= SECTION_BORDER_HIT
                    || r.x1 - p.x <= SECTION_BORDER_HIT
                    || r.y1 - p.y <= SECTION_BORDER_HIT
            }
            _ => true,
        }
    }

    pub fn center(&self) -> Point {
        self.rect.center()
    }

    pub fn move_by(&mut self, delta: Vec2) {
        self.rect = self.rect + delta;
        if let EntityKind::PenStroke { points, .. } = &mut self.kind {
            for p in points {
                *p += delta;
            }
        }
    }

    pub fn move_to(&mut self, location: Point) {
        let delta = location - self.rect.origin();
        self.move_by(delta);
    }
}

impl Identified for Entity {
    fn id(&self) -> StageId {
        self.id
    }
}

/// Side of a node to grow a new one from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

// ─── Associations ────────────────────────────────────────────────────────

/// One end of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Only the identifier is known (freshly loaded or pasted, or the
    /// entity no longer exists).
    ByIdentifier(StageId),
    /// Resolved to a live slot in the entity store.
    Resolved(Handle),
}

impl Endpoint {
    pub fn id(&self) -> StageId {
        match self {
            Endpoint::ByIdentifier(id) => *id,
            Endpoint::Resolved(handle) => handle.id(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Endpoint::ByIdentifier(_))
    }
}

/// How an association is drawn.
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationKind {
    /// Straight edge with an optional label.
    Line { text: String },
    /// Cubic Catmull–Rom spline edge.
    CrSpline { text: String, tension: f64 },
}

impl AssociationKind {
    pub fn line() -> Self {
        AssociationKind::Line {
            text: String::new(),
        }
    }

    pub fn cr_spline() -> Self {
        AssociationKind::CrSpline {
            text: String::new(),
            tension: 0.5,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            AssociationKind::Line { text } | AssociationKind::CrSpline { text, .. } => text,
        }
    }
}

/// A directed relation between two connectable entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub id: StageId,
    pub kind: AssociationKind,
    pub source: Endpoint,
    pub target: Endpoint,
    pub selected: bool,

    /// An opposite-direction association between the same endpoints
    /// exists; the renderer offsets both so they don't overlap.
    pub shifting: bool,
}

impl Association {
    pub fn new(id: StageId, kind: AssociationKind, source: Endpoint, target: Endpoint) -> Self {
        Self {
            id,
            kind,
            source,
            target,
            selected: false,
            shifting: false,
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self.kind, AssociationKind::Line { .. })
    }

    /// Whether either endpoint names `id`.
    pub fn touches(&self, id: StageId) -> bool {
        self.source.id() == id || self.target.id() == id
    }

    pub fn reverse(&mut self) {
        std::mem::swap(&mut self.source, &mut self.target);
    }
}

impl Identified for Association {
    fn id(&self) -> StageId {
        self.id
    }
}

// ─── Child stage camera ──────────────────────────────────────────────────

/// Camera bookmark for rendering a child stage through a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildCameraData {
    /// Top-left corner of the portal.
    pub location: Point,
    pub zoom: f64,
    /// Portal size.
    pub size: Size,
    /// Where the child camera is looking.
    pub target_location: Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pen_strokes_are_not_connectable() {
        let stroke = Entity::new(
            StageId::intern("stroke"),
            EntityKind::PenStroke {
                points: vec![Point::ZERO, Point::new(10.0, 10.0)],
                width: 2.0,
            },
            Rect::new(0.0, 0.0, 10.0, 10.0),
        );
        assert!(!stroke.is_connectable());
        assert!(Entity::text(StageId::intern("t"), "t", Point::ZERO).is_connectable());
    }

    #[test]
    fn move_by_shifts_stroke_points() {
        let mut stroke = Entity::new(
            StageId::intern("stroke2"),
            EntityKind::PenStroke {
                points: vec![Point::new(1.0, 1.0)],
                width: 1.0,
            },
            Rect::new(0.0, 0.0, 2.0, 2.0),
        );
        stroke.move_by(Vec2::new(5.0, 5.0));
        assert_eq!(stroke.rect, Rect::new(5.0, 5.0, 7.0, 7.0));
        match &stroke.kind {
            EntityKind::PenStroke { points, .. } => assert_eq!(points[0], Point::new(6.0, 6.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn expanded_section_is_hit_on_its_frame_only() {
        let mut section = Entity::section(StageId::intern("frame"), "s", Rect::new(0.0, 0.0, 200.0, 200.0));
        assert!(section.contains_point(Point::new(100.0, 20.0)), "title band");
        assert!(section.contains_point(Point::new(3.0, 100.0)), "left border");
        assert!(section.contains_point(Point::new(100.0, 196.0)), "bottom border");
        assert!(!section.contains_point(Point::new(100.0, 100.0)), "interior");
        assert!(!section.contains_point(Point::new(300.0, 20.0)));

        if let Some(data) = section.as_section_mut() {
            data.collapsed = true;
        }
        assert!(section.contains_point(Point::new(100.0, 100.0)));
    }

    #[test]
    fn section_child_list_has_no_duplicates() {
        let mut data = SectionData::new("s");
        let c = StageId::intern("child");
        assert!(data.add_child(c));
        assert!(!data.add_child(c));
        assert_eq!(data.child_ids.len(), 1);
        assert!(data.remove_child(c));
        assert!(!data.remove_child(c));
    }

    #[test]
    fn reverse_swaps_endpoints() {
        let a = StageId::intern("ra");
        let b = StageId::intern("rb");
        let mut edge = Association::new(
            StageId::intern("re"),
            AssociationKind::line(),
            Endpoint::ByIdentifier(a),
            Endpoint::ByIdentifier(b),
        );
        edge.reverse();
        assert_eq!(edge.source.id(), b);
        assert_eq!(edge.target.id(), a);
    }
}
