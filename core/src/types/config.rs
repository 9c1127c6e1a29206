mod paths;
mod settings;

pub use paths::Config;
pub use settings::{LiveSettings, Settings, SettingsError, SummarySettings};
