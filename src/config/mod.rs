//! Persisted configuration
//!
//! - **settings**: the versioned root document
//! - **prefix**: per-prefix configuration and its field-level setters
//! - **migration**: the schema migration graph
//! - **store**: loading, saving and write-through updates

pub mod migration;
pub mod prefix;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use migration::{MigrationEdge, MigrationFn, MigrationRegistry};
pub use prefix::{PrefixConfiguration, player_prefix_model, studio_prefix_model};
pub use settings::SettingsDocument;
pub use store::SettingsStore;
