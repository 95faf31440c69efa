//! Failure taxonomy for stage operations.
//!
//! Dangling references and empty lookups are not errors: they read as
//! `None` / empty. Everything here is surfaced to the caller as an
//! operation failure, never a panic.

use crate::id::StageId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// An identifier is already present in the store.
    #[error("identifier {0} is already on the stage")]
    DuplicateId(StageId),

    /// Connecting an entity to itself while cycle edges are disabled.
    #[error("self-loop on {0} is not allowed")]
    SelfLoop(StageId),

    /// Reparenting would put a section inside itself or a descendant.
    #[error("section {section} cannot contain its ancestor {entity}")]
    ContainmentCycle { section: StageId, entity: StageId },

    #[error("{0} is not on the stage")]
    NotFound(StageId),

    /// Packing entities that live in different sections.
    #[error("{first} and {other} do not share a parent section")]
    MixedParents { first: StageId, other: StageId },

    #[error("{0} cannot be an edge endpoint")]
    NotConnectable(StageId),

    #[error("{0} is not a section")]
    NotASection(StageId),

    #[error("{0} is not a text node")]
    NotATextNode(StageId),

    #[error("nothing to operate on")]
    EmptySelection,

    /// The persisted document could not be decoded or encoded.
    #[error("document error: {0}")]
    Document(String),
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        StageError::Document(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StageError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StageError::Document(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StageError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StageError::Document(e.to_string())
    }
}
