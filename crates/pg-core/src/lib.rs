pub mod document;
pub mod error;
pub mod geometry;
pub mod id;
pub mod model;
pub mod mutate;
pub mod query;
pub mod resolve;
pub mod settings;
pub mod stage;
pub mod store;

pub use document::Document;
pub use error::StageError;
pub use id::StageId;
pub use model::*;
pub use query::ConnectivityIndex;
pub use resolve::ResolveReport;
pub use settings::{StageSettingKey, StageSettings};
pub use stage::{HistoryRecorder, MAIN_STAGE_KEY, NoHistory, Stage, StageContent, StageObject};
pub use store::{Handle, IdentityStore};

// Re-export kurbo types so downstream crates don't need a direct dependency
pub use geometry::{Point, Rect, Size, Vec2};
