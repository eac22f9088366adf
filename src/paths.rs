//! Paths & Hashing (spec §4.A): deterministic file naming for
//! state/lock/daemon-info records, keyed by (project root, target).

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Matches spec §3's target-name invariant.
pub fn is_valid_target_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Sanitizes a project directory name to `[A-Za-z0-9_-]`, used as the
/// human-readable component of persisted file names.
pub fn sanitize_project_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "project".to_string()
    } else {
        sanitized
    }
}

/// First 8 hex chars of SHA-256 of the canonicalized project root.
pub fn project_hash(canonical_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Resolves the project's canonical root and derived naming components.
#[derive(Debug, Clone)]
pub struct ProjectIdentity {
    pub canonical_root: PathBuf,
    pub project_name: String,
    pub project_hash: String,
}

impl ProjectIdentity {
    pub fn new(project_root: &Path) -> std::io::Result<Self> {
        let canonical_root = project_root.canonicalize()?;
        let raw_name = canonical_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        Ok(Self {
            project_name: sanitize_project_name(&raw_name),
            project_hash: project_hash(&canonical_root),
            canonical_root,
        })
    }

    fn prefix(&self) -> String {
        format!("{}-{}", self.project_name, self.project_hash)
    }

    pub fn state_file_path(&self, state_dir: &Path, target: &str) -> PathBuf {
        state_dir.join(format!("{}-{target}.state", self.prefix()))
    }

    pub fn lock_file_path(&self, state_dir: &Path, target: &str) -> PathBuf {
        state_dir.join(format!("{}-{target}.lock", self.prefix()))
    }

    pub fn daemon_info_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}-daemon.json", self.prefix()))
    }

    pub fn daemon_log_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}-daemon.log", self.prefix()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_target_name() {
        assert!(is_valid_target_name("app"));
        assert!(is_valid_target_name("my-app_2"));
        assert!(!is_valid_target_name(""));
        assert!(!is_valid_target_name("-app"));
        assert!(!is_valid_target_name("my app"));
        assert!(!is_valid_target_name("my/app"));
    }

    #[test]
    fn test_sanitize_project_name() {
        assert_eq!(sanitize_project_name("my project!"), "my_project_");
        assert_eq!(sanitize_project_name(""), "project");
    }

    #[test]
    fn test_project_hash_deterministic() {
        let p = PathBuf::from("/tmp/some/project");
        assert_eq!(project_hash(&p), project_hash(&p));
        assert_eq!(project_hash(&p).len(), 8);
    }

    #[test]
    fn test_project_hash_differs_by_path() {
        let a = project_hash(&PathBuf::from("/tmp/a"));
        let b = project_hash(&PathBuf::from("/tmp/b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_names() {
        let identity = ProjectIdentity {
            canonical_root: PathBuf::from("/tmp/myproj"),
            project_name: "myproj".to_string(),
            project_hash: "deadbeef".to_string(),
        };
        let dir = PathBuf::from("/state");
        assert_eq!(
            identity.state_file_path(&dir, "app"),
            PathBuf::from("/state/myproj-deadbeef-app.state")
        );
        assert_eq!(
            identity.lock_file_path(&dir, "app"),
            PathBuf::from("/state/myproj-deadbeef-app.lock")
        );
        assert_eq!(
            identity.daemon_info_path(&dir),
            PathBuf::from("/state/myproj-deadbeef-daemon.json")
        );
        assert_eq!(
            identity.daemon_log_path(&dir),
            PathBuf::from("/state/myproj-deadbeef-daemon.log")
        );
    }
}
