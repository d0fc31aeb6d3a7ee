pub mod loader;
pub mod schema;

pub use loader::{load_for_base, load_from_path, load_from_str, ConfigError, CONFIG_FILE_NAME};
pub use schema::{ApplySettings, ConfigIssue, InvalidConfig, PatcherConfig, TagSettings};
