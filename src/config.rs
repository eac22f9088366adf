//! Config Loader (spec §4.I): parses `poltergeist.config.json`.
//!
//! JSON instead of the teacher's TOML (`pitchfork_toml.rs`), since spec §6
//! fixes the config document format. `deny_unknown_fields` everywhere
//! enforces "unknown keys are errors" (spec §4.I).

use crate::error::{ConfigError, Error, Result};
use crate::target::Target;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUPPORTED_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatchmanTuning {
    #[serde(default = "default_true")]
    pub use_default_exclusions: bool,
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub max_file_events: Option<u32>,
    #[serde(default)]
    pub recrawl_threshold: Option<u32>,
    #[serde(default)]
    pub settling_delay: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for WatchmanTuning {
    fn default() -> Self {
        Self {
            use_default_exclusions: true,
            exclude_dirs: Vec::new(),
            max_file_events: None,
            recrawl_threshold: None,
            settling_delay: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Prioritization {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_focus_window")]
    pub focus_detection_window: u64,
    #[serde(default = "default_decay_time")]
    pub priority_decay_time: u64,
    #[serde(default = "default_timeout_multiplier")]
    pub build_timeout_multiplier: f64,
}

fn default_focus_window() -> u64 {
    30_000
}

fn default_decay_time() -> u64 {
    60_000
}

fn default_timeout_multiplier() -> f64 {
    1.0
}

impl Default for Prioritization {
    fn default() -> Self {
        Self {
            enabled: false,
            focus_detection_window: default_focus_window(),
            priority_decay_time: default_decay_time(),
            build_timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildScheduling {
    #[serde(default = "default_parallelization")]
    pub parallelization: usize,
    #[serde(default)]
    pub prioritization: Option<Prioritization>,
}

fn default_parallelization() -> usize {
    1
}

impl Default for BuildScheduling {
    fn default() -> Self {
        Self {
            parallelization: default_parallelization(),
            prioritization: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Notifications {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub success_sound: Option<String>,
    #[serde(default)]
    pub failure_sound: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Logging {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectType {
    Cmake,
    Xcode,
    Npm,
    Cargo,
    Make,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub project_type: Option<ProjectType>,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub watchman: Option<WatchmanTuning>,
    #[serde(default)]
    pub build_scheduling: Option<BuildScheduling>,
    #[serde(default)]
    pub notifications: Option<Notifications>,
    #[serde(default)]
    pub logging: Option<Logging>,
    /// Populated on load with the path the config was read from; not part
    /// of the on-disk document.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Config {
    /// Walks up from `start_dir` looking for `poltergeist.config.json`,
    /// following the discovery rule shared by the CLI and `polter`
    /// (spec §4.J.1), grounded on `pitchfork_toml.rs`'s `find_up_all`.
    pub fn find_up(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = Some(start_dir.to_path_buf());
        while let Some(d) = dir {
            let candidate = d.join("poltergeist.config.json");
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = d.parent().map(|p| p.to_path_buf());
        }
        None
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(ConfigError::NotFound {
                path: path.to_path_buf(),
            }));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|source| {
            Error::Config(ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })
        })?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(Error::Config(ConfigError::UnsupportedVersion {
                found: self.version.clone(),
            }));
        }
        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.name.clone()) {
                return Err(Error::Config(ConfigError::DuplicateTarget {
                    name: target.name.clone(),
                }));
            }
        }
        Ok(())
    }

    pub fn find_target(&self, name: &str) -> Result<&Target> {
        self.targets.iter().find(|t| t.name == name).ok_or_else(|| {
            let suggestion =
                crate::error::find_similar_name(name, self.targets.iter().map(|t| t.name.as_str()));
            Error::Config(ConfigError::TargetNotFound {
                name: name.to_string(),
                suggestion,
            })
        })
    }

    pub fn enabled_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.enabled)
    }

    pub fn build_scheduling(&self) -> BuildScheduling {
        self.build_scheduling.clone().unwrap_or_default()
    }

    /// Order-preserving index of targets by name, mirroring the teacher's
    /// use of `IndexMap` for `daemons` in `pitchfork_toml.rs`.
    pub fn targets_by_name(&self) -> IndexMap<String, Target> {
        self.targets.iter().map(|t| (t.name.clone(), t.clone())).collect()
    }
}
