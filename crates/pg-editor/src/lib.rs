pub mod history;
pub mod manager;
pub mod settings;

pub use history::{HistoryConfig, StageHistory};
pub use manager::{MutationOutcome, StageManager, StageMutation};
pub use settings::{Settings, SettingsService};
