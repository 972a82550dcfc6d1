//! Worker settings
//!
//! Loaded from a YAML file (`featureforge.yaml` by default). A missing file
//! is not an error; every setting has a default.
//!
//! ```yaml
//! log:
//!   level: "info"     # EnvFilter directive, RUST_LOG overrides it
//!   format: "json"    # "json" or "pretty"
//! ```

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

/// Reads settings from `path`, falling back to defaults when it is absent
///
/// Returns whether the file was found so the caller can log it once tracing
/// is up.
pub fn load(path: &Path) -> anyhow::Result<(Settings, bool)> {
    if !path.exists() {
        return Ok((Settings::default(), false));
    }

    let contents = std::fs::read_to_string(path)?;
    let settings: Settings = serde_yaml::from_str(&contents)?;
    Ok((settings, true))
}
