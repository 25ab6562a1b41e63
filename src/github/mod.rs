//! Issue tracker client for GitHub Issues on a Projects (v2) board.
//!
//! Board reads and status mutations go through GraphQL ([`graphql`]);
//! assignment and closing use the `gh issue` subcommands.

pub mod graphql;
pub mod queries;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::{Result, WorkflowError};
use crate::runner::{CommandRunner, CommandSpec};

use graphql::{GraphQlExecutor, Variables};

/// Labels with this prefix rank issues and never name a branch.
pub const PRIORITY_LABEL_PREFIX: &str = "priority:";

const CLOSE_COMMENT: &str = "Closed by issueflow post-merge cleanup after the branch was merged.";

/// Board ids read from the shared configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub project_id: String,
    pub status_field_name: String,
    pub todo_option_id: String,
    pub in_progress_option_id: String,
    pub in_review_option_id: String,
}

/// An issue as it appears on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub labels: Vec<String>,
    pub status_option_id: Option<String>,
    /// Board item id; distinct from the issue number and required for
    /// status mutations.
    pub project_item_id: String,
}

/// First label that is not a priority marker, else `default`.
pub fn extract_label(issue: &Issue, default: &str) -> String {
    issue
        .labels
        .iter()
        .find(|l| !l.starts_with(PRIORITY_LABEL_PREFIX))
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

// ── response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProjectItemsData {
    node: ProjectItemsNode,
}

#[derive(Debug, Deserialize)]
struct ProjectItemsNode {
    items: ItemConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemConnection {
    page_info: PageInfo,
    nodes: Vec<Option<ItemNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemNode {
    id: String,
    field_value_by_name: Option<FieldValue>,
    content: Option<ItemContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    option_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemContent {
    number: Option<u64>,
    title: Option<String>,
    labels: Option<LabelConnection>,
}

#[derive(Debug, Deserialize)]
struct LabelConnection {
    nodes: Vec<Option<LabelNode>>,
}

#[derive(Debug, Deserialize)]
struct LabelNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatusFieldData {
    node: StatusFieldNode,
}

#[derive(Debug, Deserialize)]
struct StatusFieldNode {
    field: Option<FieldId>,
}

#[derive(Debug, Deserialize)]
struct FieldId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateItemData {
    #[serde(rename = "updateProjectV2ItemFieldValue")]
    update: UpdatePayload,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    #[serde(rename = "projectV2Item")]
    item: UpdatedItem,
}

#[derive(Debug, Deserialize)]
struct UpdatedItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: ViewerLogin,
}

#[derive(Debug, Deserialize)]
struct ViewerLogin {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueStateView {
    state: String,
}

impl ItemNode {
    /// Board items that are draft issues or pull requests carry no issue number.
    fn into_issue(self) -> Option<Issue> {
        let content = self.content?;
        let number = content.number?;
        let labels = content
            .labels
            .map(|l| l.nodes.into_iter().flatten().map(|n| n.name).collect())
            .unwrap_or_default();
        Some(Issue {
            number,
            title: content.title.unwrap_or_default(),
            labels,
            status_option_id: self.field_value_by_name.and_then(|v| v.option_id),
            project_item_id: self.id,
        })
    }
}

// ── client ──────────────────────────────────────────────────────────

pub struct IssueTracker {
    graphql: GraphQlExecutor,
    runner: Arc<dyn CommandRunner>,
    repo_dir: PathBuf,
    board: BoardConfig,
}

impl IssueTracker {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_dir: impl Into<PathBuf>, board: BoardConfig) -> Self {
        let repo_dir = repo_dir.into();
        Self {
            graphql: GraphQlExecutor::new(runner.clone(), repo_dir.clone()),
            runner,
            repo_dir,
            board,
        }
    }

    pub fn board(&self) -> &BoardConfig {
        &self.board
    }

    /// Every issue on the board, in board order.
    pub async fn list_board_issues(&self) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut vars = Variables::new();
            vars.insert("projectId".into(), json!(self.board.project_id));
            vars.insert("fieldName".into(), json!(self.board.status_field_name));
            vars.insert("cursor".into(), json!(cursor));

            let data: ProjectItemsData = self
                .graphql
                .execute(
                    "projectItems",
                    "data.node.items { pageInfo, nodes[] }",
                    queries::PROJECT_ITEMS,
                    vars,
                )
                .await?;
            let connection = data.node.items;
            issues.extend(connection.nodes.into_iter().flatten().filter_map(ItemNode::into_issue));

            match (connection.page_info.has_next_page, connection.page_info.end_cursor) {
                (true, Some(end)) => cursor = Some(end),
                _ => break,
            }
        }
        debug!(count = issues.len(), "listed board issues");
        Ok(issues)
    }

    /// First board issue whose status is "todo". Board order decides ties,
    /// not issue number.
    pub async fn fetch_top_priority_issue(&self) -> Result<Issue> {
        let issue = self
            .list_board_issues()
            .await?
            .into_iter()
            .find(|i| i.status_option_id.as_deref() == Some(self.board.todo_option_id.as_str()))
            .ok_or_else(|| {
                WorkflowError::IssueNotFound(format!(
                    "no board item has status option {}",
                    self.board.todo_option_id
                ))
            })?;
        info!(issue = issue.number, title = %issue.title, "selected top priority issue");
        Ok(issue)
    }

    pub async fn current_user(&self) -> Result<String> {
        let data: ViewerData = self
            .graphql
            .execute("viewer", "data.viewer.login", queries::VIEWER, Variables::new())
            .await?;
        Ok(data.viewer.login)
    }

    pub async fn resolve_status_field_id(&self) -> Result<String> {
        let mut vars = Variables::new();
        vars.insert("projectId".into(), json!(self.board.project_id));
        vars.insert("fieldName".into(), json!(self.board.status_field_name));
        let data: StatusFieldData = self
            .graphql
            .execute("statusField", "data.node.field.id", queries::STATUS_FIELD, vars)
            .await?;
        data.node
            .field
            .map(|f| f.id)
            .ok_or_else(|| WorkflowError::GitHubGraphQl {
                operation: "statusField",
                expected: "data.node.field.id",
                message: format!(
                    "project has no single-select field named '{}'",
                    self.board.status_field_name
                ),
            })
    }

    /// Set the board status of one item.
    pub async fn update_status(&self, project_item_id: &str, field_id: &str, option_id: &str) -> Result<()> {
        let mut vars = Variables::new();
        vars.insert("projectId".into(), json!(self.board.project_id));
        vars.insert("itemId".into(), json!(project_item_id));
        vars.insert("fieldId".into(), json!(field_id));
        vars.insert("optionId".into(), json!(option_id));
        let data: UpdateItemData = self
            .graphql
            .execute(
                "updateItemStatus",
                "data.updateProjectV2ItemFieldValue.projectV2Item.id",
                queries::UPDATE_ITEM_FIELD,
                vars,
            )
            .await?;
        debug!(item = %data.update.item.id, option_id, "updated board status");
        Ok(())
    }

    /// Assign the authenticated user and move the item to "in progress".
    /// Returns the resolved status field id.
    pub async fn assign_and_move_to_in_progress(
        &self,
        issue_number: u64,
        project_item_id: &str,
    ) -> Result<String> {
        let login = self.current_user().await?;
        self.gh(&[
            "issue",
            "edit",
            &issue_number.to_string(),
            "--add-assignee",
            &login,
        ])
        .await?;
        info!(issue = issue_number, assignee = %login, "assigned issue");

        let field_id = self.resolve_status_field_id().await?;
        self.update_status(project_item_id, &field_id, &self.board.in_progress_option_id)
            .await?;
        info!(issue = issue_number, "moved issue to in progress");
        Ok(field_id)
    }

    /// `OPEN` or `CLOSED`.
    pub async fn issue_state(&self, issue_number: u64) -> Result<String> {
        let output = self
            .gh(&["issue", "view", &issue_number.to_string(), "--json", "state"])
            .await?;
        let view: IssueStateView = serde_json::from_str(output.trim())
            .map_err(|e| WorkflowError::GitHub(format!("unexpected issue view output: {e}")))?;
        Ok(view.state)
    }

    /// Close an issue with a fixed comment. Returns `false` without touching
    /// the tracker when it is already closed.
    pub async fn close_issue(&self, issue_number: u64) -> Result<bool> {
        if self.issue_state(issue_number).await?.eq_ignore_ascii_case("closed") {
            info!(issue = issue_number, "issue already closed");
            return Ok(false);
        }
        self.gh(&[
            "issue",
            "close",
            &issue_number.to_string(),
            "--comment",
            CLOSE_COMMENT,
        ])
        .await?;
        info!(issue = issue_number, "closed issue");
        Ok(true)
    }

    async fn gh(&self, args: &[&str]) -> Result<String> {
        let spec = CommandSpec::new("gh")
            .args(args.iter().copied())
            .current_dir(&self.repo_dir);
        self.runner
            .run_checked(&spec)
            .await
            .map(|o| o.stdout)
            .map_err(|e| WorkflowError::GitHub(format!("{}: {}", spec.display(), e.detail())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};

    fn board() -> BoardConfig {
        BoardConfig {
            project_id: "PVT_1".to_string(),
            status_field_name: "Status".to_string(),
            todo_option_id: "opt-todo".to_string(),
            in_progress_option_id: "opt-progress".to_string(),
            in_review_option_id: "opt-review".to_string(),
        }
    }

    fn tracker(runner: ScriptedRunner) -> (IssueTracker, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (IssueTracker::new(runner.clone(), "/repo", board()), runner)
    }

    fn issue_with_labels(labels: &[&str]) -> Issue {
        Issue {
            number: 1,
            title: "t".to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            status_option_id: None,
            project_item_id: "PVTI_1".to_string(),
        }
    }

    const PAGE_ONE: &str = r#"{"data":{"node":{"items":{
        "pageInfo":{"hasNextPage":true,"endCursor":"c1"},
        "nodes":[
          {"id":"PVTI_a","fieldValueByName":{"optionId":"opt-progress","name":"In progress"},
           "content":{"number":3,"title":"Busy","labels":{"nodes":[{"name":"bug"}]}}},
          {"id":"PVTI_draft","fieldValueByName":{"optionId":"opt-todo","name":"Todo"},
           "content":{"title":"Draft idea"}}
        ]}}}}"#;

    const PAGE_TWO: &str = r#"{"data":{"node":{"items":{
        "pageInfo":{"hasNextPage":false,"endCursor":null},
        "nodes":[
          {"id":"PVTI_b","fieldValueByName":{"optionId":"opt-todo","name":"Todo"},
           "content":{"number":12,"title":"ユーザー登録機能の追加",
                      "labels":{"nodes":[{"name":"priority:high"},{"name":"feature"}]}}},
          {"id":"PVTI_c","fieldValueByName":{"optionId":"opt-todo","name":"Todo"},
           "content":{"number":5,"title":"Later","labels":{"nodes":[]}}},
          {"id":"PVTI_d","fieldValueByName":null,"content":{"number":6,"title":"No status","labels":null}}
        ]}}}}"#;

    #[test]
    fn extract_label_skips_priority_labels() {
        let issue = issue_with_labels(&["priority:high", "bug", "feature"]);
        assert_eq!(extract_label(&issue, "feature"), "bug");
    }

    #[test]
    fn extract_label_falls_back_to_default() {
        assert_eq!(extract_label(&issue_with_labels(&["priority:low"]), "feature"), "feature");
        assert_eq!(extract_label(&issue_with_labels(&[]), "chore"), "chore");
    }

    #[tokio::test]
    async fn lists_all_pages_and_skips_non_issues() {
        let (tracker, runner) = tracker(
            ScriptedRunner::new()
                .on("cursor=c1", CommandOutput::ok(PAGE_TWO))
                .on("items(first", CommandOutput::ok(PAGE_ONE)),
        );
        let issues = tracker.list_board_issues().await.unwrap();
        let numbers: Vec<u64> = issues.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![3, 12, 5, 6]);
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(issues[3].status_option_id, None);
        assert!(issues[3].labels.is_empty());
    }

    #[tokio::test]
    async fn top_priority_is_first_todo_in_board_order() {
        let (tracker, _) = tracker(
            ScriptedRunner::new()
                .on("cursor=c1", CommandOutput::ok(PAGE_TWO))
                .on("items(first", CommandOutput::ok(PAGE_ONE)),
        );
        let issue = tracker.fetch_top_priority_issue().await.unwrap();
        // #5 has a lower number but comes later on the board
        assert_eq!(issue.number, 12);
        assert_eq!(issue.project_item_id, "PVTI_b");
        assert_eq!(issue.labels, vec!["priority:high", "feature"]);
    }

    #[tokio::test]
    async fn no_todo_items_is_issue_not_found() {
        let empty = r#"{"data":{"node":{"items":{"pageInfo":{"hasNextPage":false,"endCursor":null},"nodes":[]}}}}"#;
        let (tracker, _) = tracker(ScriptedRunner::new().on("items(first", CommandOutput::ok(empty)));
        let err = tracker.fetch_top_priority_issue().await.unwrap_err();
        assert!(matches!(err, WorkflowError::IssueNotFound(_)));
    }

    #[tokio::test]
    async fn non_project_node_is_a_shape_error() {
        let (tracker, _) = tracker(
            ScriptedRunner::new().on("items(first", CommandOutput::ok(r#"{"data":{"node":{}}}"#)),
        );
        let err = tracker.list_board_issues().await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::GitHubGraphQl {
                operation: "projectItems",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn assign_and_move_runs_in_order() {
        let (tracker, runner) = tracker(
            ScriptedRunner::new()
                .on("viewer", CommandOutput::ok(r#"{"data":{"viewer":{"login":"octo"}}}"#))
                .on(
                    "field(name",
                    CommandOutput::ok(r#"{"data":{"node":{"field":{"id":"PVTSSF_1","name":"Status"}}}}"#),
                )
                .on(
                    "updateProjectV2ItemFieldValue",
                    CommandOutput::ok(
                        r#"{"data":{"updateProjectV2ItemFieldValue":{"projectV2Item":{"id":"PVTI_b"}}}}"#,
                    ),
                ),
        );
        let field_id = tracker
            .assign_and_move_to_in_progress(12, "PVTI_b")
            .await
            .unwrap();
        assert_eq!(field_id, "PVTSSF_1");

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("viewer"));
        assert_eq!(lines[1], "gh issue edit 12 --add-assignee octo");
        assert!(lines[2].contains("field(name"));
        assert!(lines[3].contains("optionId=opt-progress"));
        assert!(lines[3].contains("itemId=PVTI_b"));
    }

    #[tokio::test]
    async fn missing_status_field_is_reported() {
        let (tracker, _) = tracker(
            ScriptedRunner::new().on("field(name", CommandOutput::ok(r#"{"data":{"node":{"field":null}}}"#)),
        );
        let err = tracker.resolve_status_field_id().await.unwrap_err();
        assert!(err.to_string().contains("Status"));
    }

    #[tokio::test]
    async fn closing_an_open_issue_comments_and_closes() {
        let (tracker, runner) = tracker(
            ScriptedRunner::new().on("issue view 12", CommandOutput::ok(r#"{"state":"OPEN"}"#)),
        );
        assert!(tracker.close_issue(12).await.unwrap());
        assert!(runner.was_called("gh issue close 12 --comment"));
    }

    #[tokio::test]
    async fn closing_a_closed_issue_is_a_no_op() {
        let (tracker, runner) = tracker(
            ScriptedRunner::new().on("issue view 12", CommandOutput::ok(r#"{"state":"CLOSED"}"#)),
        );
        assert!(!tracker.close_issue(12).await.unwrap());
        assert!(!runner.was_called("issue close"));
    }

    #[tokio::test]
    async fn gh_failures_become_github_errors() {
        let (tracker, _) = tracker(
            ScriptedRunner::new().on("issue view", CommandOutput::failed(1, "could not find issue")),
        );
        let err = tracker.issue_state(99).await.unwrap_err();
        match err {
            WorkflowError::GitHub(message) => assert!(message.contains("could not find issue")),
            other => panic!("Expected GitHub, got {other:?}"),
        }
    }
}
