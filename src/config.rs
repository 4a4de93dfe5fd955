//! Runtime configuration, loadable from TOML.
//!
//! ```toml
//! trace_rules = true
//! log_filter = "ofml_core=debug"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Emit a trace event for every executed rule.
    #[serde(default)]
    pub trace_rules: bool,
    /// Check property values against their definitions on write.
    #[serde(default = "default_true")]
    pub validate_properties: bool,
    /// Memoise method lookups per `(type, name)`.
    #[serde(default = "default_true")]
    pub dispatch_cache: bool,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_true() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trace_rules: false,
            validate_properties: default_true(),
            dispatch_cache: default_true(),
            log_filter: default_log_filter(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ofml.toml");
        std::fs::write(&path, "trace_rules = true\n").unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert!(config.trace_rules);
        assert!(config.validate_properties);
        assert!(config.dispatch_cache);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn rendered_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ofml.toml");
        let config = RuntimeConfig {
            dispatch_cache: false,
            log_filter: "ofml_core=trace".into(),
            ..Default::default()
        };
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn read_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            RuntimeConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "trace_rules = \"yes\"\n").unwrap();
        assert!(matches!(
            RuntimeConfig::load(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }
}
