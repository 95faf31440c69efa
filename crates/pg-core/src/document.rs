//! Persisted document schema and the load / paste entry points.
//!
//! Entities and associations are tagged by `"type"`; every record carries
//! its `uuid` and entities a `shape = { type, location, size }`. JSON is
//! the editing format, MessagePack the compact one.

use crate::error::StageError;
use crate::geometry::{Point, Rect, Size, Vec2};
use crate::id::StageId;
use crate::model::*;
use crate::resolve::ResolveReport;
use crate::stage::{Stage, StageContent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

fn default_tension() -> f64 {
    0.5
}

fn default_camera_scale() -> f64 {
    1.0
}

// ─── Schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
    #[serde(default)]
    pub tags: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(rename = "type", default = "Shape::rectangle_kind")]
    pub kind: String,
    pub location: [f64; 2],
    pub size: [f64; 2],
}

impl Shape {
    fn rectangle_kind() -> String {
        "Rectangle".to_string()
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self {
            kind: Self::rectangle_kind(),
            location: [rect.x0, rect.y0],
            size: [rect.width(), rect.height()],
        }
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_origin_size(
            Point::new(self.location[0], self.location[1]),
            Size::new(self.size[0], self.size[1]),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EntityRecord {
    #[serde(rename = "core:text_node")]
    TextNode {
        uuid: StageId,
        text: String,
        #[serde(default)]
        details: String,
        shape: Shape,
    },
    #[serde(rename = "core:image_node")]
    ImageNode { uuid: StageId, path: String, shape: Shape },
    #[serde(rename = "core:section")]
    Section {
        uuid: StageId,
        text: String,
        #[serde(default)]
        children: Vec<StageId>,
        #[serde(default)]
        is_collapsed: bool,
        shape: Shape,
    },
    #[serde(rename = "core:portal_node")]
    PortalNode {
        uuid: StageId,
        #[serde(default)]
        title: String,
        portal_file_path: String,
        #[serde(default = "default_camera_scale")]
        camera_scale: f64,
        #[serde(default)]
        target_location: [f64; 2],
        shape: Shape,
    },
    #[serde(rename = "core:pen_stroke")]
    PenStroke {
        uuid: StageId,
        points: Vec<[f64; 2]>,
        stroke_width: f64,
    },
    #[serde(rename = "core:connect_point")]
    ConnectPoint { uuid: StageId, shape: Shape },
    #[serde(rename = "core:url_node")]
    UrlNode {
        uuid: StageId,
        title: String,
        url: String,
        shape: Shape,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum AssociationRecord {
    #[serde(rename = "core:line_edge")]
    LineEdge {
        uuid: StageId,
        source: StageId,
        target: StageId,
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "core:cublic_catmull_rom_spline_edge")]
    CrEdge {
        uuid: StageId,
        source: StageId,
        target: StageId,
        #[serde(default)]
        text: String,
        #[serde(default = "default_tension")]
        tension: f64,
    },
}

// ─── Codecs ──────────────────────────────────────────────────────────────

impl Document {
    pub fn from_json(text: &str) -> Result<Self, StageError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, StageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, StageError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Structs are written as maps; the `type` tag needs field names.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, StageError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Build unresolved content: endpoints stay bare identifiers.
    ///
    /// # Errors
    /// `DuplicateId` if two records share an identifier.
    pub fn to_content(&self) -> Result<StageContent, StageError> {
        let mut content = StageContent::new();
        for record in &self.entities {
            content.add_entity(record.to_entity())?;
        }
        for record in &self.associations {
            content.add_association(record.to_association())?;
        }
        content.reset_tags(&self.tags);
        Ok(content)
    }

    /// Replace every identifier with a fresh one, consistently across
    /// children, endpoints, and tags. References to identifiers outside
    /// the document are kept for endpoints and dropped for children and
    /// tags.
    pub fn refresh_ids(&mut self) {
        let mut map: HashMap<StageId, StageId> = HashMap::new();
        for id in self
            .entities
            .iter()
            .map(EntityRecord::uuid)
            .chain(self.associations.iter().map(AssociationRecord::uuid))
        {
            map.entry(id).or_insert_with(StageId::fresh);
        }
        let remap = |id: &mut StageId| {
            if let Some(new) = map.get(id) {
                *id = *new;
            }
        };
        for record in &mut self.entities {
            match record {
                EntityRecord::Section { uuid, children, .. } => {
                    remap(uuid);
                    children.retain(|c| map.contains_key(c));
                    children.iter_mut().for_each(remap);
                }
                EntityRecord::TextNode { uuid, .. }
                | EntityRecord::ImageNode { uuid, .. }
                | EntityRecord::PortalNode { uuid, .. }
                | EntityRecord::PenStroke { uuid, .. }
                | EntityRecord::ConnectPoint { uuid, .. }
                | EntityRecord::UrlNode { uuid, .. } => remap(uuid),
            }
        }
        for record in &mut self.associations {
            let (AssociationRecord::LineEdge { uuid, source, target, .. }
            | AssociationRecord::CrEdge { uuid, source, target, .. }) = record;
            remap(uuid);
            remap(source);
            remap(target);
        }
        self.tags.retain(|t| map.contains_key(t));
        self.tags.iter_mut().for_each(remap);
    }
}

impl EntityRecord {
    pub fn uuid(&self) -> StageId {
        match self {
            EntityRecord::TextNode { uuid, .. }
            | EntityRecord::ImageNode { uuid, .. }
            | EntityRecord::Section { uuid, .. }
            | EntityRecord::PortalNode { uuid, .. }
            | EntityRecord::PenStroke { uuid, .. }
            | EntityRecord::ConnectPoint { uuid, .. }
            | EntityRecord::UrlNode { uuid, .. } => *uuid,
        }
    }

    pub fn to_entity(&self) -> Entity {
        match self {
            EntityRecord::TextNode {
                uuid,
                text,
                details,
                shape,
            } => Entity::new(
                *uuid,
                EntityKind::Text {
                    text: text.clone(),
                    details: details.clone(),
                },
                shape.to_rect(),
            ),
            EntityRecord::ImageNode { uuid, path, shape } => {
                Entity::new(*uuid, EntityKind::Image { path: path.clone() }, shape.to_rect())
            }
            EntityRecord::Section {
                uuid,
                text,
                children,
                is_collapsed,
                shape,
            } => {
                let mut data = SectionData::new(text.clone());
                data.child_ids.extend(children.iter().copied());
                data.collapsed = *is_collapsed;
                Entity::new(*uuid, EntityKind::Section(data), shape.to_rect())
            }
            EntityRecord::PortalNode {
                uuid,
                title,
                portal_file_path,
                camera_scale,
                target_location,
                shape,
            } => Entity::new(
                *uuid,
                EntityKind::Portal {
                    title: title.clone(),
                    portal_path: portal_file_path.clone(),
                    camera_scale: *camera_scale,
                    target_location: Point::new(target_location[0], target_location[1]),
                },
                shape.to_rect(),
            ),
            EntityRecord::PenStroke {
                uuid,
                points,
                stroke_width,
            } => {
                let points: Vec<Point> = points.iter().map(|p| Point::new(p[0], p[1])).collect();
                let rect = crate::geometry::bounding_rect(
                    points.iter().map(|p| Rect::from_points(*p, *p)),
                )
                .unwrap_or(Rect::ZERO)
                .inflate(stroke_width / 2.0, stroke_width / 2.0);
                Entity::new(
                    *uuid,
                    EntityKind::PenStroke {
                        points,
                        width: *stroke_width,
                    },
                    rect,
                )
            }
            EntityRecord::ConnectPoint { uuid, shape } => {
                Entity::new(*uuid, EntityKind::ConnectPoint, shape.to_rect())
            }
            EntityRecord::UrlNode {
                uuid,
                title,
                url,
                shape,
            } => Entity::new(
                *uuid,
                EntityKind::Url {
                    title: title.clone(),
                    url: url.clone(),
                },
                shape.to_rect(),
            ),
        }
    }

    pub fn from_entity(entity: &Entity) -> Self {
        let uuid = entity.id;
        let shape = Shape::from_rect(entity.rect);
        match &entity.kind {
            EntityKind::Text { text, details } => EntityRecord::TextNode {
                uuid,
                text: text.clone(),
                details: details.clone(),
                shape,
            },
            EntityKind::Image { path } => EntityRecord::ImageNode {
                uuid,
                path: path.clone(),
                shape,
            },
            EntityKind::Section(data) => EntityRecord::Section {
                uuid,
                text: data.title.clone(),
                children: data.child_ids.to_vec(),
                is_collapsed: data.collapsed,
                shape,
            },
            EntityKind::Portal {
                title,
                portal_path,
                camera_scale,
                target_location,
            } => EntityRecord::PortalNode {
                uuid,
                title: title.clone(),
                portal_file_path: portal_path.clone(),
                camera_scale: *camera_scale,
                target_location: [target_location.x, target_location.y],
                shape,
            },
            EntityKind::PenStroke { points, width } => EntityRecord::PenStroke {
                uuid,
                points: points.iter().map(|p| [p.x, p.y]).collect(),
                stroke_width: *width,
            },
            EntityKind::ConnectPoint => EntityRecord::ConnectPoint { uuid, shape },
            EntityKind::Url { title, url } => EntityRecord::UrlNode {
                uuid,
                title: title.clone(),
                url: url.clone(),
                shape,
            },
        }
    }
}

impl AssociationRecord {
    pub fn uuid(&self) -> StageId {
        match self {
            AssociationRecord::LineEdge { uuid, .. } | AssociationRecord::CrEdge { uuid, .. } => *uuid,
        }
    }

    pub fn to_association(&self) -> Association {
        match self {
            AssociationRecord::LineEdge {
                uuid,
                source,
                target,
                text,
            } => Association::new(
                *uuid,
                AssociationKind::Line { text: text.clone() },
                Endpoint::ByIdentifier(*source),
                Endpoint::ByIdentifier(*target),
            ),
            AssociationRecord::CrEdge {
                uuid,
                source,
                target,
                text,
                tension,
            } => Association::new(
                *uuid,
                AssociationKind::CrSpline {
                    text: text.clone(),
                    tension: *tension,
                },
                Endpoint::ByIdentifier(*source),
                Endpoint::ByIdentifier(*target),
            ),
        }
    }

    pub fn from_association(association: &Association) -> Self {
        let uuid = association.id;
        let source = association.source.id();
        let target = association.target.id();
        match &association.kind {
            AssociationKind::Line { text } => AssociationRecord::LineEdge {
                uuid,
                source,
                target,
                text: text.clone(),
            },
            AssociationKind::CrSpline { text, tension } => AssociationRecord::CrEdge {
                uuid,
                source,
                target,
                text: text.clone(),
                tension: *tension,
            },
        }
    }
}

// ─── Stage entry points ──────────────────────────────────────────────────

impl StageContent {
    pub fn to_document(&self) -> Document {
        Document {
            version: DOCUMENT_VERSION,
            entities: self.entities().map(EntityRecord::from_entity).collect(),
            associations: self
                .associations()
                .map(AssociationRecord::from_association)
                .collect(),
            tags: self.tags.clone(),
        }
    }
}

impl Stage {
    /// Replace the current content with a resolved copy of `document`.
    /// On error the current content is untouched.
    pub fn load_document(&mut self, document: &Document) -> Result<ResolveReport, StageError> {
        let mut content = document.to_content()?;
        let report = content.resolve_references();
        self.content = content;
        log::debug!(
            "loaded {} entities, {} associations",
            self.content.entities.len(),
            self.content.associations.len()
        );
        Ok(report)
    }

    /// Merge a copy of `document` into the current content. Every pasted
    /// object gets a fresh identifier and is moved by `offset`; the merged
    /// content is then resolved.
    pub fn add_serialized_data(&mut self, document: &Document, offset: Vec2) -> Result<ResolveReport, StageError> {
        let mut document = document.clone();
        document.refresh_ids();
        let pasted = document.to_content()?;

        for entity in pasted.entities() {
            let mut entity = entity.clone();
            entity.move_by(offset);
            self.content.add_entity(entity)?;
        }
        for association in pasted.associations() {
            self.content.add_association(association.clone())?;
        }
        for &tag in pasted.tags() {
            self.content.add_tag(tag);
        }
        log::debug!("pasted {} entities", pasted.entities.len());
        Ok(self.content.resolve_references())
    }
}
