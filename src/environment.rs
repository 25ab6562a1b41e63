//! Deterministic sandbox identifiers.
//!
//! Everything here is a pure function of `(issue number, slug, credentials,
//! config)`. The teardown pipeline recomputes the same names the start
//! pipeline used, so neither needs to store them.

use std::path::{Path, PathBuf};

use crate::config::{CONFIG_DIR, CONFIG_FILE, WorkflowConfig};
use crate::errors::{Result, WorkflowError};
use crate::store::ParameterMap;

/// Longest slug used in database names.
pub const MAX_SLUG_LEN: usize = 50;

/// Database login pairs read from the shared configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub admin_user: String,
    pub admin_password: String,
    pub user: String,
    pub password: String,
}

/// Derived per-issue environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentParameters {
    pub issue_number: u64,
    pub web_port: u16,
    pub api_port: u16,
    pub database_name: String,
    pub app_name: String,
    pub profile_name: String,
    pub database_url: String,
    pub database_admin_url: String,
    pub log_level: String,
    pub credentials: DatabaseCredentials,
}

/// Cut a slug to at most [`MAX_SLUG_LEN`] characters.
///
/// The cut happens at the last hyphen at or before position 50 so words stay
/// whole; a slug with no such hyphen is hard-cut at 50.
pub fn truncate_slug(slug: &str) -> &str {
    let byte_offset = |chars: usize| slug.char_indices().nth(chars).map_or(slug.len(), |(i, _)| i);
    if slug.chars().count() <= MAX_SLUG_LEN {
        return slug;
    }
    let window = &slug[..byte_offset(MAX_SLUG_LEN + 1)];
    match window.rfind('-') {
        Some(pos) if pos > 0 => &slug[..pos],
        _ => &slug[..byte_offset(MAX_SLUG_LEN)],
    }
}

/// `base + issue_number`, refused when it does not fit a TCP port.
fn offset_port(field: &str, base: u16, issue_number: u64) -> Result<u16> {
    u16::try_from(issue_number)
        .ok()
        .and_then(|n| base.checked_add(n))
        .ok_or_else(|| WorkflowError::Config {
            path: Path::new(CONFIG_DIR).join(CONFIG_FILE),
            message: format!(
                "issue #{issue_number} does not fit a port above {field} {base} (max {})",
                u16::MAX
            ),
        })
}

pub fn web_port(config: &WorkflowConfig, issue_number: u64) -> Result<u16> {
    offset_port("web_port_base", config.web_port_base, issue_number)
}

pub fn api_port(config: &WorkflowConfig, issue_number: u64) -> Result<u16> {
    offset_port("api_port_base", config.api_port_base, issue_number)
}

/// `{prefix}{truncated slug with '-' → '_'}`.
pub fn database_name(config: &WorkflowConfig, slug: &str) -> String {
    format!(
        "{}{}",
        config.database_prefix,
        truncate_slug(slug).replace('-', "_")
    )
}

/// `{label}/{issue_number}-{slug}`.
pub fn branch_name(label: &str, issue_number: u64, slug: &str) -> String {
    format!("{label}/{issue_number}-{slug}")
}

pub fn app_name(config: &WorkflowConfig, issue_number: u64) -> String {
    format!("{}-{}", config.app_prefix, issue_number)
}

pub fn profile_name(config: &WorkflowConfig, issue_number: u64) -> String {
    format!("{}-{}", config.profile_prefix, issue_number)
}

/// `{repo_root}/{worktree_dir}/{issue_number}-{slug}`.
pub fn worktree_path(
    config: &WorkflowConfig,
    repo_root: &Path,
    issue_number: u64,
    slug: &str,
) -> PathBuf {
    repo_root
        .join(&config.worktree_dir)
        .join(format!("{issue_number}-{slug}"))
}

fn connection_url(config: &WorkflowConfig, user: &str, password: &str, database: &str) -> String {
    format!(
        "postgresql://{}:{}@{}:{}/{}",
        urlencoding::encode(user),
        urlencoding::encode(password),
        config.database_host,
        config.database_port,
        database
    )
}

impl EnvironmentParameters {
    pub fn compute(
        config: &WorkflowConfig,
        issue_number: u64,
        slug: &str,
        credentials: DatabaseCredentials,
    ) -> Result<Self> {
        let database_name = database_name(config, slug);
        let database_url =
            connection_url(config, &credentials.user, &credentials.password, &database_name);
        let database_admin_url = connection_url(
            config,
            &credentials.admin_user,
            &credentials.admin_password,
            &database_name,
        );
        Ok(Self {
            issue_number,
            web_port: web_port(config, issue_number)?,
            api_port: api_port(config, issue_number)?,
            app_name: app_name(config, issue_number),
            profile_name: profile_name(config, issue_number),
            log_level: config.log_level.clone(),
            database_name,
            database_url,
            database_admin_url,
            credentials,
        })
    }

    /// Per-issue parameters to register, keyed in upper-snake-case.
    pub fn to_parameter_map(&self, branch_name: &str) -> ParameterMap {
        let pairs = [
            ("BRANCH_NAME", branch_name.to_string()),
            ("WEB_PORT", self.web_port.to_string()),
            ("API_PORT", self.api_port.to_string()),
            ("DATABASE_NAME", self.database_name.clone()),
            ("APP_NAME", self.app_name.clone()),
            ("DATABASE_URL", self.database_url.clone()),
            ("DATABASE_ADMIN_URL", self.database_admin_url.clone()),
            ("LOG_LEVEL", self.log_level.clone()),
            ("DATABASE_ADMIN_USER", self.credentials.admin_user.clone()),
            ("DATABASE_ADMIN_PASSWORD", self.credentials.admin_password.clone()),
            ("DATABASE_USER", self.credentials.user.clone()),
            ("DATABASE_PASSWORD", self.credentials.password.clone()),
            ("AWS_PROFILE", self.profile_name.clone()),
        ];
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
