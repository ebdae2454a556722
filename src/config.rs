use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::actions::counter::{
    DEFAULT_COOLDOWN, DEFAULT_DELAY, DEFAULT_EACH, DEFAULT_INITIAL, DEFAULT_MESSAGE, DEFAULT_STEP,
    Policy,
};

pub const DEFAULT_OWNER: &str = "owner";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Nickname used when `CreateListener` is given none.
    pub owner: String,
    /// Channels that receive notifications.
    pub channels: Vec<String>,
    /// Replay journal; `None` keeps state in memory only.
    pub journal: Option<PathBuf>,
    /// Policy applied to `Create` flags left unspecified.
    pub defaults: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            channels: Vec::new(),
            journal: None,
            defaults: Policy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    owner: Option<String>,
    channels: Vec<String>,
    journal: Option<PathBuf>,
    defaults: Map<String, Value>,
}

impl Config {
    /// Load from a JSON file. A missing file yields the built-in configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawConfig = serde_json::from_str(text)?;
        Ok(Self {
            owner: raw
                .owner
                .filter(|o| !o.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            channels: raw.channels,
            journal: raw.journal,
            defaults: parse_policy(&raw.defaults),
        })
    }
}

// ── Policy defaults ─────────────────────────────────────────────────────────

/// Numbers may be given as JSON numbers or numeric strings; anything else
/// falls back to the built-in default.
fn parse_policy(v: &Map<String, Value>) -> Policy {
    Policy {
        initial: lenient_number(v, "initial").unwrap_or(DEFAULT_INITIAL),
        step: lenient_number(v, "step").unwrap_or(DEFAULT_STEP),
        cooldown: lenient_number(v, "cooldown").unwrap_or(DEFAULT_COOLDOWN),
        delay: lenient_number(v, "delay").unwrap_or(DEFAULT_DELAY),
        each: lenient_number(v, "each").unwrap_or(DEFAULT_EACH),
        message: v
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_MESSAGE)
            .to_string(),
    }
}

/// `30`, `"30"` and `" 30 "` all read as 30. Out of range values are `None`.
fn lenient_number<T: FromStr>(v: &Map<String, Value>, key: &str) -> Option<T> {
    match v.get(key)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_policy_defaults() {
        let cfg = Config::from_json(
            r##"{
                "owner": "bob",
                "channels": ["#speedrun"],
                "journal": "counters.journal",
                "defaults": { "step": "2", "cooldown": 30, "delay": -4, "message": "" }
            }"##,
        )
        .unwrap();

        assert_eq!(cfg.owner, "bob");
        assert_eq!(cfg.channels, vec!["#speedrun"]);
        assert_eq!(cfg.journal, Some(PathBuf::from("counters.journal")));
        assert_eq!(
            cfg.defaults,
            Policy {
                step: 2,
                cooldown: 30,
                ..Policy::default()
            }
        );
    }

    #[test]
    fn numbers_must_fit_their_field() {
        let defaults: Map<String, Value> = serde_json::from_str(
            r#"{ "initial": -3, "each": 2.5, "cooldown": " 12 ", "delay": true }"#,
        )
        .unwrap();
        assert_eq!(lenient_number::<i64>(&defaults, "initial"), Some(-3));
        assert_eq!(lenient_number::<u64>(&defaults, "initial"), None);
        assert_eq!(lenient_number::<u64>(&defaults, "each"), None);
        assert_eq!(lenient_number::<u64>(&defaults, "cooldown"), Some(12));
        assert_eq!(lenient_number::<u64>(&defaults, "delay"), None);
        assert_eq!(lenient_number::<u64>(&defaults, "step"), None);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
