//! The configured `Target` type (spec §3) and its closed set of kinds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TargetKind {
    Executable,
    AppBundle,
    Library,
    Framework,
    Test,
    ContainerImage,
    Custom,
}

impl TargetKind {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "executable" => Some(Self::Executable),
            "app-bundle" => Some(Self::AppBundle),
            "library" => Some(Self::Library),
            "framework" => Some(Self::Framework),
            "test" => Some(Self::Test),
            "container-image" => Some(Self::ContainerImage),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A user-declared build unit, immutable within a running daemon except
/// via config reload (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub build_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub watch_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_settling_delay_ms")]
    pub settling_delay_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    /// Kind-specific metadata, e.g. `bundleId` for app-bundle targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    /// Target-level build timeout; `None` means no timeout (spec §4.E default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_settling_delay_ms() -> u64 {
    500
}

impl Target {
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if !crate::paths::is_valid_target_name(&self.name) {
            return Err(crate::error::ConfigError::InvalidTargetName {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_roundtrip() {
        let json = serde_json::to_string(&TargetKind::AppBundle).unwrap();
        assert_eq!(json, "\"app-bundle\"");
        let kind: TargetKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, TargetKind::AppBundle);
    }

    #[test]
    fn test_target_defaults() {
        let json = r#"{"name":"app","kind":"executable","buildCommand":"make"}"#;
        let t: Target = serde_json::from_str(json).unwrap();
        assert!(t.enabled);
        assert_eq!(t.settling_delay_ms, 500);
        assert!(t.watch_paths.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"name":"app","kind":"executable","buildCommand":"make","watchPath":"src/**"}"#;
        assert!(serde_json::from_str::<Target>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let t = Target {
            name: "-bad".to_string(),
            kind: TargetKind::Executable,
            enabled: true,
            build_command: "true".to_string(),
            output_path: None,
            watch_paths: vec![],
            exclude_paths: vec![],
            settling_delay_ms: 500,
            max_retries: 0,
            environment: IndexMap::new(),
            bundle_id: None,
            timeout_ms: None,
        };
        assert!(t.validate().is_err());
    }
}
