//! Per-issue AWS CLI profiles.
//!
//! Each issue gets a `[profile {prefix}-{n}]` block in the shared AWS config
//! file that assumes the same role as a reference profile. The file is edited
//! as text so comments and unrelated profiles survive untouched.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::{Result, WorkflowError};

/// `$AWS_CONFIG_FILE`, else `~/.aws/config`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AWS_CONFIG_FILE")
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".aws").join("config"))
        .ok_or_else(|| WorkflowError::AwsProfileConfig("cannot determine home directory".into()))
}

fn is_header_for(line: &str, profile: &str) -> bool {
    let line = line.trim();
    line == format!("[profile {profile}]") || (profile == "default" && line == "[default]")
}

fn is_any_header(line: &str) -> bool {
    line.trim_start().starts_with('[')
}

pub fn has_profile(content: &str, profile: &str) -> bool {
    content.lines().any(|l| is_header_for(l, profile))
}

/// Value of `key` inside the named profile block.
pub fn read_profile_value(content: &str, profile: &str, key: &str) -> Option<String> {
    content
        .lines()
        .skip_while(|l| !is_header_for(l, profile))
        .skip(1)
        .take_while(|l| !is_any_header(l))
        .filter_map(|l| l.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Drop the named profile block (header through the line before the next
/// header). Returns `None` when the profile is absent.
pub fn remove_profile(content: &str, profile: &str) -> Option<String> {
    if !has_profile(content, profile) {
        return None;
    }
    let mut kept = Vec::new();
    let mut skipping = false;
    for line in content.lines() {
        if is_header_for(line, profile) {
            skipping = true;
            continue;
        }
        if skipping && is_any_header(line) {
            skipping = false;
        }
        if !skipping {
            kept.push(line);
        }
    }
    let body = kept.join("\n");
    let body = body.trim_end();
    Some(if body.is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    })
}

pub fn render_profile_block(profile: &str, role_arn: &str, source_profile: &str, region: &str) -> String {
    format!(
        "[profile {profile}]\nrole_arn = {role_arn}\nsource_profile = {source_profile}\nregion = {region}\n"
    )
}

pub struct CloudProfileManager {
    config_path: PathBuf,
    prefix: String,
    reference_profile: String,
    source_profile: String,
    region: String,
}

impl CloudProfileManager {
    pub fn new(
        config_path: impl Into<PathBuf>,
        prefix: impl Into<String>,
        reference_profile: impl Into<String>,
        source_profile: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            prefix: prefix.into(),
            reference_profile: reference_profile.into(),
            source_profile: source_profile.into(),
            region: region.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn profile_name(&self, issue_number: u64) -> String {
        format!("{}-{}", self.prefix, issue_number)
    }

    fn read_config(&self) -> Result<String> {
        if !self.config_path.exists() {
            return Err(WorkflowError::AwsProfileConfig(format!(
                "config file {} not found",
                self.config_path.display()
            )));
        }
        std::fs::read_to_string(&self.config_path).map_err(|e| WorkflowError::io(&self.config_path, e))
    }

    fn write_config(&self, content: &str) -> Result<()> {
        std::fs::write(&self.config_path, content).map_err(|e| WorkflowError::io(&self.config_path, e))
    }

    /// Append the issue's profile. Returns `false` when it already exists.
    pub fn create(&self, issue_number: u64) -> Result<bool> {
        let name = self.profile_name(issue_number);
        let content = self.read_config()?;
        if has_profile(&content, &name) {
            info!(profile = %name, "profile already exists");
            return Ok(false);
        }

        let role_arn = read_profile_value(&content, &self.reference_profile, "role_arn").ok_or_else(|| {
            WorkflowError::AwsProfileConfig(format!(
                "reference profile '{}' has no role_arn in {}",
                self.reference_profile,
                self.config_path.display()
            ))
        })?;

        let mut updated = content;
        if !updated.is_empty() {
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push('\n');
        }
        updated.push_str(&render_profile_block(&name, &role_arn, &self.source_profile, &self.region));
        self.write_config(&updated)?;
        info!(profile = %name, role_arn = %role_arn, "created profile");
        Ok(true)
    }

    /// Remove the issue's profile. Returns `false` when it does not exist.
    pub fn delete(&self, issue_number: u64) -> Result<bool> {
        let name = self.profile_name(issue_number);
        let content = self.read_config()?;
        match remove_profile(&content, &name) {
            Some(updated) => {
                self.write_config(&updated)?;
                info!(profile = %name, "deleted profile");
                Ok(true)
            }
            None => {
                info!(profile = %name, "profile does not exist, nothing to delete");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const BASE: &str = "[default]
region = ap-northeast-1

[profile issueflow-base]
role_arn = arn:aws:iam::123456789012:role/developer
source_profile = default

[profile other]
region = us-east-1
";

    fn manager(dir: &Path) -> CloudProfileManager {
        CloudProfileManager::new(
            dir.join("config"),
            "issueflow",
            "issueflow-base",
            "default",
            "ap-northeast-1",
        )
    }

    #[test]
    fn reads_values_only_from_the_named_block() {
        assert_eq!(
            read_profile_value(BASE, "issueflow-base", "role_arn").as_deref(),
            Some("arn:aws:iam::123456789012:role/developer")
        );
        assert_eq!(read_profile_value(BASE, "other", "role_arn"), None);
        assert_eq!(read_profile_value(BASE, "default", "region").as_deref(), Some("ap-northeast-1"));
    }

    #[test]
    fn remove_keeps_neighbours() {
        let updated = remove_profile(BASE, "issueflow-base").unwrap();
        assert!(!updated.contains("issueflow-base"));
        assert!(updated.contains("[default]"));
        assert!(updated.contains("[profile other]\nregion = us-east-1\n"));
        assert!(updated.ends_with('\n'));
        assert!(remove_profile(BASE, "missing").is_none());
    }

    #[test]
    fn create_then_delete_restores_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config"), BASE).unwrap();
        let profiles = manager(dir.path());

        assert!(profiles.create(12).unwrap());
        let content = fs::read_to_string(profiles.config_path()).unwrap();
        assert!(content.contains(
            "[profile issueflow-12]\nrole_arn = arn:aws:iam::123456789012:role/developer\nsource_profile = default\nregion = ap-northeast-1\n"
        ));

        assert!(profiles.delete(12).unwrap());
        assert_eq!(fs::read_to_string(profiles.config_path()).unwrap(), BASE);
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config"), BASE).unwrap();
        let profiles = manager(dir.path());
        assert!(profiles.create(7).unwrap());
        let once = fs::read_to_string(profiles.config_path()).unwrap();
        assert!(!profiles.create(7).unwrap());
        assert_eq!(fs::read_to_string(profiles.config_path()).unwrap(), once);
    }

    #[test]
    fn deleting_missing_profile_is_a_no_op() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config"), BASE).unwrap();
        assert!(!manager(dir.path()).delete(99).unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("config")).unwrap(), BASE);
    }

    #[test]
    fn missing_config_file_is_fatal() {
        let dir = tempdir().unwrap();
        let err = manager(dir.path()).create(1).unwrap_err();
        assert!(matches!(err, WorkflowError::AwsProfileConfig(_)));
    }

    #[test]
    fn missing_reference_role_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config"), "[default]\nregion = us-east-1\n").unwrap();
        let err = manager(dir.path()).create(1).unwrap_err();
        assert!(err.to_string().contains("issueflow-base"));
    }
}
