//! Driver configuration
//!
//! Runtime options consumed by the streaming core: error-pause policy,
//! user macros, and the watch directory for `watchdir:load`. Loadable from
//! JSON or TOML files; defaults are safe for an unconfigured machine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A user macro: a named block of G-code addressable by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDef {
    /// Stable identifier used by `macro:run` / `macro:load`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// G-code body
    pub content: String,
}

/// Exception-handling options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionConfig {
    /// Keep streaming after a machine-reported `error:` line instead of
    /// pausing the workflow
    #[serde(default)]
    pub ignore_errors: bool,
}

/// Top-level driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    /// Exception-handling options
    #[serde(default)]
    pub exception: ExceptionConfig,
    /// User macros
    #[serde(default)]
    pub macros: Vec<MacroDef>,
    /// Directory `watchdir:load` resolves file names against
    #[serde(default)]
    pub watch_directory: Option<PathBuf>,
}

impl DriverConfig {
    /// Load configuration from a JSON or TOML file, chosen by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                toml::from_str(&text).map_err(|e| Error::other(format!("{}: {}", path.display(), e)))
            }
            _ => serde_json::from_str(&text)
                .map_err(|e| Error::other(format!("{}: {}", path.display(), e))),
        }
    }

    /// Look up a macro by id
    pub fn macro_by_id(&self, id: &str) -> Option<&MacroDef> {
        self.macros.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let config = DriverConfig::default();
        assert!(!config.exception.ignore_errors);
        assert!(config.macros.is_empty());
        assert!(config.watch_directory.is_none());
    }

    #[test]
    fn macro_lookup() {
        let config = DriverConfig {
            macros: vec![MacroDef {
                id: "m1".to_string(),
                name: "Probe Z".to_string(),
                content: "G38.2 Z-10 F50".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(config.macro_by_id("m1").map(|m| m.name.as_str()), Some("Probe Z"));
        assert!(config.macro_by_id("nope").is_none());
    }

    #[test]
    fn json_round_trip() {
        let text = r#"{ "exception": { "ignoreErrors": true }, "macros": [] }"#;
        let config: DriverConfig = serde_json::from_str(text).unwrap();
        assert!(config.exception.ignore_errors);
    }
}
