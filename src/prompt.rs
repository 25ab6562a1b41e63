//! Prompt file written into a new worktree.
//!
//! Placeholders of the form `{{NAME}}` are replaced verbatim; unknown
//! placeholders are left as they are.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{Result, WorkflowError};

const DEFAULT_TEMPLATE: &str = "# Issue #{{ISSUE_NUMBER}}: {{ISSUE_TITLE}}

You are working on branch `{{BRANCH_NAME}}` in a dedicated worktree.

## Environment

- Web server port: {{WEB_PORT}}
- API server port: {{API_PORT}}

## When you are done

1. Commit and push `{{BRANCH_NAME}}` and open a pull request that references #{{ISSUE_NUMBER}}.
2. Move the issue to \"In review\" on the project board:

```sh
gh project item-edit --project-id {{PROJECT_ID}} --field-id {{STATUS_FIELD_ID}} --single-select-option-id {{IN_REVIEW_OPTION_ID}} --id <item-id>
```
";

/// Values substituted into the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptValues {
    pub issue_number: u64,
    pub issue_title: String,
    pub branch_name: String,
    pub web_port: u16,
    pub api_port: u16,
    pub project_id: String,
    pub status_field_id: String,
    pub in_review_option_id: String,
}

impl PromptValues {
    fn pairs(&self) -> [(&'static str, String); 8] {
        [
            ("ISSUE_NUMBER", self.issue_number.to_string()),
            ("ISSUE_TITLE", self.issue_title.clone()),
            ("BRANCH_NAME", self.branch_name.clone()),
            ("WEB_PORT", self.web_port.to_string()),
            ("API_PORT", self.api_port.to_string()),
            ("PROJECT_ID", self.project_id.clone()),
            ("STATUS_FIELD_ID", self.status_field_id.clone()),
            ("IN_REVIEW_OPTION_ID", self.in_review_option_id.clone()),
        ]
    }
}

pub fn render(template: &str, values: &PromptValues) -> String {
    values
        .pairs()
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{{{name}}}}}"), value)
        })
}

/// Read `template_path` when it exists, else use the built-in template.
pub fn load_template(template_path: &Path) -> Result<String> {
    if template_path.is_file() {
        debug!(path = %template_path.display(), "using project prompt template");
        std::fs::read_to_string(template_path).map_err(|e| WorkflowError::io(template_path, e))
    } else {
        debug!("no project prompt template, using built-in");
        Ok(DEFAULT_TEMPLATE.to_string())
    }
}

/// Render and write the prompt to `{worktree}/{file_name}`.
pub fn write_prompt(
    template_path: &Path,
    worktree: &Path,
    file_name: &str,
    values: &PromptValues,
) -> Result<PathBuf> {
    let content = render(&load_template(template_path)?, values);
    let out = worktree.join(file_name);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
    }
    std::fs::write(&out, content).map_err(|e| WorkflowError::io(&out, e))?;
    info!(path = %out.display(), "wrote prompt file");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn values() -> PromptValues {
        PromptValues {
            issue_number: 12,
            issue_title: "ユーザー登録機能の追加".to_string(),
            branch_name: "feature/12-add-user-registration-feature".to_string(),
            web_port: 3012,
            api_port: 4012,
            project_id: "PVT_1".to_string(),
            status_field_id: "PVTSSF_1".to_string(),
            in_review_option_id: "opt-review".to_string(),
        }
    }

    #[test]
    fn replaces_every_occurrence() {
        let out = render("{{ISSUE_NUMBER}} / #{{ISSUE_NUMBER}} on {{WEB_PORT}}", &values());
        assert_eq!(out, "12 / #12 on 3012");
    }

    #[test]
    fn leaves_unknown_placeholders() {
        assert_eq!(render("{{UNKNOWN}} {{API_PORT}}", &values()), "{{UNKNOWN}} 4012");
    }

    #[test]
    fn builtin_template_uses_all_placeholders() {
        let out = render(DEFAULT_TEMPLATE, &values());
        assert!(!out.contains("{{"));
        assert!(out.contains("ユーザー登録機能の追加"));
        assert!(out.contains("--single-select-option-id opt-review"));
    }

    #[test]
    fn write_prompt_prefers_project_template() {
        let repo = tempdir().unwrap();
        let worktree = tempdir().unwrap();
        let template = repo.path().join("prompt-template.md");
        std::fs::write(&template, "Work on {{BRANCH_NAME}}").unwrap();

        let path = write_prompt(&template, worktree.path(), "PROMPT.md", &values()).unwrap();
        assert_eq!(path, worktree.path().join("PROMPT.md"));
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "Work on feature/12-add-user-registration-feature"
        );
    }

    #[test]
    fn write_prompt_falls_back_to_builtin() {
        let worktree = tempdir().unwrap();
        let path = write_prompt(Path::new("/nonexistent/template.md"), worktree.path(), "PROMPT.md", &values())
            .unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("# Issue #12"));
    }
}
