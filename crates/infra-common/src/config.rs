//! TOML configuration loading
//!
//! Device settings are kept in one TOML file with a table per concern
//! (`[sip]`, `[session]`, `[logging]`). Each crate owns the serde struct for
//! its table; this module only reads and deserializes.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{Error, Result};

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded configuration from {}", path.display());
    parse_toml(&text, &path.display().to_string())
}

/// Deserialize TOML text; `origin` names the source in errors
pub fn parse_toml<T: DeserializeOwned>(text: &str, origin: &str) -> Result<T> {
    toml::from_str(text).map_err(|source| Error::Toml {
        origin: origin.to_string(),
        source,
    })
}
