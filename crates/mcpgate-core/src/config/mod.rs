//! Configuration document loading.
//!
//! The document is a JSON file with a top-level `mcpServers` map from server
//! id to spec. Loading is deliberately forgiving: unknown fields are ignored
//! and unrecognizable entries are skipped with a warning. Only duplicate ids
//! reject the whole document.

mod document;
mod loader;

pub use document::RawServerEntry;
pub use loader::{ConfigDigest, ConfigError, load_config, parse_config};
