//! KDL settings parsing for the Kiln build server.
//!
//! This crate handles parsing of:
//! - Server settings (kiln.kdl)
//! - Variable interpolation in build commands

pub mod error;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    BuildSettings, GitHubSettings, ServerSettings, Settings, StorageBackend, StorageSettings,
    load_settings, parse_settings,
};
pub use variables::VariableContext;
