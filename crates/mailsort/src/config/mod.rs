pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str};
pub use schema::{
    default_settings_path, ActionSettings, ClassifierSettings, ClientSettings, OAuthSettings,
    RetrySettings, SchedulerSettings, Settings, SyncSettings, VaultSettings,
};
