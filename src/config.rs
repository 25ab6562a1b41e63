//! Configuration for issueflow.
//!
//! Settings are layered: `.issueflow/config.toml` → environment → CLI.
//! Every field has a default, so a project without a config file works
//! out of the box.
//!
//! # Configuration File Format
//!
//! ```toml
//! parameter_root = "/family-tree"
//! web_port_base = 3000
//! api_port_base = 4000
//! database_prefix = "family_tree_"
//! database_container = "family-tree-postgres"
//! trunk_branch = "main"
//! editor = "cursor"
//! migrate_command = ["pnpm", "--filter", "api", "db:migrate"]
//! copy_files = [".claude/settings.local.json", ".env.local"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, WorkflowError};
use crate::git;
use crate::runner::CommandRunner;

/// Directory (relative to the repository root) holding issueflow files.
pub const CONFIG_DIR: &str = ".issueflow";
pub const CONFIG_FILE: &str = "config.toml";

/// Tunable settings for both pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Root of the parameter store namespace, e.g. `/issueflow`.
    pub parameter_root: String,
    pub web_port_base: u16,
    pub api_port_base: u16,
    pub database_prefix: String,
    pub database_host: String,
    pub database_port: u16,
    /// Name of the running database service container.
    pub database_container: String,
    /// Database the admin connects to for CREATE/DROP.
    pub admin_database: String,
    /// Prefix for per-issue application/container names.
    pub app_prefix: String,
    pub profile_prefix: String,
    /// Cloud profile whose `role_arn` new profiles assume.
    pub reference_profile: String,
    pub source_profile: String,
    pub trunk_branch: String,
    pub remote: String,
    /// Worktree parent directory, relative to the repository root.
    pub worktree_dir: String,
    /// Files copied from the repository root into every new worktree.
    pub copy_files: Vec<String>,
    pub prompt_template: String,
    pub prompt_output: String,
    pub editor: String,
    pub migrate_command: Vec<String>,
    /// Value registered as the per-issue `log-level` parameter.
    pub log_level: String,
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    pub command_timeout_secs: u64,
    /// Overrides the translation endpoint derived from the API key.
    pub translation_endpoint: Option<String>,
    /// Label used for the branch prefix when an issue has no usable label.
    pub default_label: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            parameter_root: "/issueflow".to_string(),
            web_port_base: 3000,
            api_port_base: 4000,
            database_prefix: "wt_".to_string(),
            database_host: "localhost".to_string(),
            database_port: 5432,
            database_container: "postgres".to_string(),
            admin_database: "postgres".to_string(),
            app_prefix: "issueflow".to_string(),
            profile_prefix: "issueflow".to_string(),
            reference_profile: "issueflow-base".to_string(),
            source_profile: "default".to_string(),
            trunk_branch: "main".to_string(),
            remote: "origin".to_string(),
            worktree_dir: ".worktrees".to_string(),
            copy_files: vec![".claude/settings.local.json".to_string()],
            prompt_template: format!("{CONFIG_DIR}/prompt-template.md"),
            prompt_output: "PROMPT.md".to_string(),
            editor: "code".to_string(),
            migrate_command: vec!["npm".to_string(), "run".to_string(), "db:migrate".to_string()],
            log_level: "debug".to_string(),
            readiness_attempts: 30,
            readiness_interval_ms: 1000,
            command_timeout_secs: 600,
            translation_endpoint: None,
            default_label: "feature".to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Load `.issueflow/config.toml` from `project_dir`, falling back to
    /// defaults when the file does not exist, then apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::path(project_dir);
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| WorkflowError::io(&path, e))?;
            Self::parse(&content, &path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate(&path)?;
        Ok(config)
    }

    /// Load the configuration of the repository containing `project_dir`.
    ///
    /// The file is read from the main worktree, where the prompt template and
    /// local files also live, so a run from a subdirectory or a linked
    /// worktree sees the same settings. Outside a repository the project
    /// directory itself is used.
    pub async fn load_for_repository(runner: &dyn CommandRunner, project_dir: &Path) -> Result<Self> {
        let root = match git::repository_root(runner, project_dir).await {
            Ok(root) => root,
            Err(e) => {
                debug!(error = %e, "no repository root, reading configuration from the project directory");
                project_dir.to_path_buf()
            }
        };
        Self::load(&root)
    }

    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| WorkflowError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("ISSUEFLOW_PARAMETER_ROOT").filter(|v| !v.is_empty()) {
            self.parameter_root = root;
        }
        if let Some(editor) = lookup("ISSUEFLOW_EDITOR").filter(|v| !v.is_empty()) {
            self.editor = editor;
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: &str| WorkflowError::Config {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if !self.parameter_root.starts_with('/') {
            return Err(invalid("parameter_root must start with '/'"));
        }
        if self.migrate_command.is_empty() {
            return Err(invalid("migrate_command must not be empty"));
        }
        if self.readiness_attempts == 0 {
            return Err(invalid("readiness_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

/// Process environment every pipeline requires before touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub region: String,
}

impl RuntimeEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `AWS_VAULT` only has to be present (it marks an aws-vault session);
    /// `AWS_REGION` must carry a value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if lookup("AWS_VAULT").is_none() {
            return Err(WorkflowError::MissingEnv {
                name: "AWS_VAULT",
                hint: "run inside an aws-vault session (aws-vault exec <profile> -- ...)",
            });
        }
        let region = lookup("AWS_REGION")
            .filter(|v| !v.trim().is_empty())
            .ok_or(WorkflowError::MissingEnv {
                name: "AWS_REGION",
                hint: "set the region that hosts the parameter store",
            })?;
        Ok(Self { region })
    }
}
