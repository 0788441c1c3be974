//! Public configuration API.

pub mod loader;
pub mod types;

pub use loader::{cache_db_path, data_dir, default_config_path, load, load_or_default, quarantine_dir};
pub use types::{ConfigError, MasterConfig};
