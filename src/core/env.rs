//! Orchestrator environment snapshot recorded alongside each run session.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

/// Environment information for benchmark reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ram_bytes: Option<u64>,

    pub os: String,

    pub arch: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub go_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        EnvironmentInfo {
            cpu_model: None,
            cpu_cores: None,
            total_ram_bytes: None,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: None,
            git_sha: None,
            git_dirty: None,
            go_version: None,
            python_version: None,
        }
    }
}

impl EnvironmentInfo {
    /// Snapshot the host plus the versions of the given go/python executables.
    pub fn detect(go: &Path, python: &Path) -> Self {
        use sysinfo::System;

        let mut sys = System::new_all();
        sys.refresh_all();

        EnvironmentInfo {
            cpu_model: sys.cpus().first().map(|c| c.brand().trim().to_string()),
            cpu_cores: sys.physical_core_count().map(|c| c as u32),
            total_ram_bytes: Some(sys.total_memory()),
            os: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            hostname: System::host_name(),
            git_sha: first_line(Path::new("git"), &["rev-parse", "HEAD"]),
            git_dirty: git_dirty(),
            go_version: first_line(go, &["version"]),
            python_version: first_line(python, &["--version"]),
        }
    }
}

fn git_dirty() -> Option<bool> {
    let out = Command::new("git").args(["status", "--porcelain"]).output().ok()?;
    out.status.success().then(|| !out.stdout.is_empty())
}

/// First non-empty output line of a successful `program args` run.
///
/// Some interpreters print their version on stderr, so stderr is the fallback.
fn first_line(program: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new(program).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    [&out.stdout, &out.stderr].into_iter().find_map(|bytes| {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_describes_build_target() {
        let env = EnvironmentInfo::default();
        assert_eq!(env.arch, std::env::consts::ARCH);
        assert!(env.cpu_model.is_none());
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.get("go_version").is_none());
    }

    #[test]
    fn test_missing_tool_has_no_version() {
        let env = EnvironmentInfo::detect(
            Path::new("/nonexistent/go-xyz"),
            Path::new("/nonexistent/python-xyz"),
        );
        assert!(env.go_version.is_none());
        assert!(env.python_version.is_none());
        assert!(!env.os.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_version_falls_back_to_stderr() {
        let v = first_line(Path::new("sh"), &["-c", "echo; echo 'Python 3.12.1' >&2"]);
        assert_eq!(v.as_deref(), Some("Python 3.12.1"));
    }
}
