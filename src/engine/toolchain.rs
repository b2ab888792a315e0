//! Companion tool discovery for the external test programs.
//!
//! Go and Python executables are taken as given. Maven is located lazily,
//! only when a Java-hosted stage actually needs it, and a missing Maven is a
//! fatal error for that stage.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::{BenchError, BenchResult};

/// Executables used to build stage commands.
#[derive(Debug)]
pub struct ToolPaths {
    go: PathBuf,
    python: PathBuf,
    maven: Option<PathBuf>,
    maven_cache: OnceLock<Option<PathBuf>>,
}

impl Clone for ToolPaths {
    fn clone(&self) -> Self {
        ToolPaths {
            go: self.go.clone(),
            python: self.python.clone(),
            maven: self.maven.clone(),
            maven_cache: OnceLock::new(),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolPaths {
    /// Use `go` and `python3` from PATH and look Maven up on demand.
    pub fn new() -> Self {
        ToolPaths {
            go: PathBuf::from("go"),
            python: PathBuf::from(default_python()),
            maven: None,
            maven_cache: OnceLock::new(),
        }
    }

    pub fn with_go(mut self, go: impl Into<PathBuf>) -> Self {
        self.go = go.into();
        self
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    /// Skip probing and use this Maven executable.
    pub fn with_maven(mut self, maven: impl Into<PathBuf>) -> Self {
        self.maven = Some(maven.into());
        self
    }

    pub fn go(&self) -> &Path {
        &self.go
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    /// The configured Maven, or the first of `mvn` / `mvn.cmd` that answers `--version`.
    pub fn maven(&self) -> BenchResult<PathBuf> {
        if let Some(m) = &self.maven {
            return Ok(m.clone());
        }
        self.maven_cache
            .get_or_init(locate_maven)
            .clone()
            .ok_or_else(|| BenchError::Runner("Maven not found (mvn/mvn.cmd)".into()))
    }

    /// `JEP_HOME` if set to an existing directory, else the `jep` package
    /// location reported by the configured Python.
    pub fn jep_home(&self) -> Option<PathBuf> {
        locate_jep_home(&self.python)
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) { "python" } else { "python3" }
}

fn locate_maven() -> Option<PathBuf> {
    ["mvn", "mvn.cmd"]
        .into_iter()
        .find(|name| {
            Command::new(name)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok()
        })
        .map(PathBuf::from)
}

const JEP_QUERY: &str = "import importlib.util; s=importlib.util.find_spec('jep'); \
print(s.submodule_search_locations[0] if s and s.submodule_search_locations else '')";

fn locate_jep_home(python: &Path) -> Option<PathBuf> {
    if let Some(env_val) = std::env::var_os("JEP_HOME") {
        let p = PathBuf::from(env_val);
        if p.is_dir() {
            return Some(p);
        }
    }

    Command::new(python)
        .args(["-c", JEP_QUERY])
        .stderr(Stdio::null())
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| PathBuf::from(s.trim()))
        .filter(|p| !p.as_os_str().is_empty() && p.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let tools = ToolPaths::new()
            .with_go("/opt/go/bin/go")
            .with_python("/usr/bin/python3.12")
            .with_maven("/opt/maven/bin/mvn");
        assert_eq!(tools.go(), Path::new("/opt/go/bin/go"));
        assert_eq!(tools.python(), Path::new("/usr/bin/python3.12"));
        assert_eq!(tools.maven().unwrap(), PathBuf::from("/opt/maven/bin/mvn"));
    }

    #[test]
    fn test_jep_home_absent_with_missing_python() {
        // only meaningful when JEP_HOME is not exported in the test environment
        if std::env::var_os("JEP_HOME").is_none() {
            assert!(locate_jep_home(Path::new("/nonexistent/python-xyz")).is_none());
        }
    }
}
