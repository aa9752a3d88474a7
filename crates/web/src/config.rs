//! Runner configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use specdeck_common::discovery::DEFAULT_SCAN_LINES;
use specdeck_common::{normalize_base_domain, Error, Result, DEFAULT_BASE_DOMAIN};

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// HTTP listen address
    pub listen: String,

    /// Directory the child runs in; spec ids are relative to it
    pub project_root: PathBuf,

    /// Spec directory, relative to `project_root`
    pub tests_dir: PathBuf,

    /// Target host used when a trigger names none
    pub default_base_domain: String,

    /// Spec shown in the `/status` usage hints
    pub example_spec: String,

    /// Leading lines of a spec scanned for annotations
    pub annotation_scan_lines: usize,

    /// Child test-runner invocation
    pub command: CommandConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5050".to_string(),
            project_root: PathBuf::from("."),
            tests_dir: PathBuf::from("tests"),
            default_base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            example_spec: "tests/2. Regression/10-navigation.spec.js".to_string(),
            annotation_scan_lines: DEFAULT_SCAN_LINES,
            command: CommandConfig::default(),
        }
    }
}

/// How the child test runner is launched:
/// `program args... [specs...] extra_args...`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Appended after the spec filters
    pub extra_args: Vec<String>,
    /// Extra environment for the child
    pub env: BTreeMap<String, String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["playwright".to_string(), "test".to_string()],
            extra_args: vec!["--headed".to_string(), "--reporter=line".to_string()],
            env: BTreeMap::new(),
        }
    }
}

impl CommandConfig {
    /// Full argument list for a run over `specs` (empty means all)
    pub fn args_for(&self, specs: &[String]) -> Vec<String> {
        self.args
            .iter()
            .chain(specs)
            .chain(&self.extra_args)
            .cloned()
            .collect()
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when it is
    /// missing.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.program.trim().is_empty() {
            return Err(Error::Config("command.program must not be empty".to_string()));
        }
        if self.annotation_scan_lines == 0 {
            return Err(Error::Config(
                "annotation_scan_lines must be at least 1".to_string(),
            ));
        }
        let normalized = normalize_base_domain(
            Some(&self.default_base_domain),
            DEFAULT_BASE_DOMAIN,
        )
        .map_err(|e| Error::Config(format!("default_base_domain: {e}")))?;
        if normalized != self.default_base_domain.trim() {
            return Err(Error::Config(format!(
                "default_base_domain must be a bare host, got {:?}",
                self.default_base_domain
            )));
        }
        Ok(())
    }

    /// Absolute-or-relative path of the spec directory
    pub fn tests_root(&self) -> PathBuf {
        self.project_root.join(&self.tests_dir)
    }
}
