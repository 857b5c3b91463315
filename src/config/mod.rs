//! Configuration management
//!
//! Loads lanstub.toml and turns it into the runtime records the stack and
//! the DNS stub are built from.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    from_str(&content)
}

/// Parse configuration from TOML text
pub fn from_str(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}
