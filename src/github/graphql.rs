//! GraphQL execution through `gh api graphql`.
//!
//! The `gh` CLI owns authentication; this module only builds the command
//! line and checks the response against the shape the caller expects.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{Result, WorkflowError};
use crate::runner::{CommandRunner, CommandSpec};

pub type Variables = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorsOnly {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Clone)]
pub struct GraphQlExecutor {
    runner: Arc<dyn CommandRunner>,
    repo_dir: PathBuf,
}

impl GraphQlExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            repo_dir: repo_dir.into(),
        }
    }

    /// `gh api graphql -f query=... [-f|-F name=value]...`
    ///
    /// Strings go through `-f` (raw), numbers and booleans through `-F`
    /// (typed); null variables are omitted.
    pub fn build_command(&self, query: &str, variables: &Variables) -> CommandSpec {
        let mut spec = CommandSpec::new("gh")
            .args(["api", "graphql", "-f"])
            .arg(format!("query={}", query.trim()))
            .current_dir(&self.repo_dir);
        for (name, value) in variables {
            match value {
                Value::Null => {}
                Value::String(s) => spec = spec.arg("-f").arg(format!("{name}={s}")),
                Value::Number(_) | Value::Bool(_) => {
                    spec = spec.arg("-F").arg(format!("{name}={value}"))
                }
                other => spec = spec.arg("-f").arg(format!("{name}={other}")),
            }
        }
        spec
    }

    /// Run `query` and deserialize its `data` into `T`.
    ///
    /// `operation` and `expected` name the call and the response shape in
    /// the error when the response does not match.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        expected: &'static str,
        query: &str,
        variables: Variables,
    ) -> Result<T> {
        let spec = self.build_command(query, &variables);
        debug!(operation, "executing GraphQL request");
        let output = self.runner.run(&spec).await?;

        let fail = |message: String| WorkflowError::GitHubGraphQl {
            operation,
            expected,
            message,
        };

        if !output.success() {
            let message = serde_json::from_str::<ErrorsOnly>(&output.stdout)
                .ok()
                .filter(|e| !e.errors.is_empty())
                .map(|e| join_messages(&e.errors))
                .unwrap_or_else(|| output.stderr.trim().to_string());
            return Err(fail(message));
        }

        parse_response(&output.stdout).map_err(fail)
    }
}

fn join_messages(errors: &[ErrorEntry]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Decode a GraphQL response body. Any `errors` entry, a missing `data`
/// object, or a structural mismatch is a failure.
fn parse_response<T: DeserializeOwned>(body: &str) -> std::result::Result<T, String> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;
    if !envelope.errors.is_empty() {
        return Err(join_messages(&envelope.errors));
    }
    envelope
        .data
        .ok_or_else(|| "response contained no data".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Viewer {
        viewer: Login,
    }

    #[derive(Debug, Deserialize)]
    struct Login {
        login: String,
    }

    fn executor(runner: ScriptedRunner) -> (GraphQlExecutor, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (GraphQlExecutor::new(runner.clone(), "/repo"), runner)
    }

    #[test]
    fn build_command_types_variables() {
        let (exec, _) = executor(ScriptedRunner::new());
        let vars = json!({"projectId": "PVT_1", "first": 100, "cursor": null})
            .as_object()
            .cloned()
            .unwrap();
        let spec = exec.build_command("query { x }", &vars);
        assert_eq!(spec.program, "gh");
        assert_eq!(&spec.args[..4], ["api", "graphql", "-f", "query=query { x }"]);
        let pairs: Vec<(&str, &str)> = spec.args[4..]
            .chunks(2)
            .map(|c| (c[0].as_str(), c[1].as_str()))
            .collect();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("-F", "first=100")));
        assert!(pairs.contains(&("-f", "projectId=PVT_1")));
        assert_eq!(spec.current_dir.as_deref(), Some(std::path::Path::new("/repo")));
    }

    #[tokio::test]
    async fn execute_decodes_data() {
        let (exec, _) = executor(
            ScriptedRunner::new().on("viewer", CommandOutput::ok(r#"{"data":{"viewer":{"login":"octo"}}}"#)),
        );
        let resp: Viewer = exec
            .execute("viewer", "data.viewer.login", "query { viewer { login } }", Variables::new())
            .await
            .unwrap();
        assert_eq!(resp.viewer.login, "octo");
    }

    #[tokio::test]
    async fn shape_mismatch_is_a_typed_error() {
        let (exec, _) = executor(
            ScriptedRunner::new().on("viewer", CommandOutput::ok(r#"{"data":{"viewer":null}}"#)),
        );
        let err = exec
            .execute::<Viewer>("viewer", "data.viewer.login", "query { viewer { login } }", Variables::new())
            .await
            .unwrap_err();
        match err {
            WorkflowError::GitHubGraphQl {
                operation,
                expected,
                message,
            } => {
                assert_eq!(operation, "viewer");
                assert_eq!(expected, "data.viewer.login");
                assert!(message.contains("malformed response"));
            }
            other => panic!("Expected GitHubGraphQl, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn graphql_errors_are_not_partial_success() {
        let body = r#"{"data":{"viewer":{"login":"octo"}},"errors":[{"message":"rate limited"}]}"#;
        let (exec, _) = executor(ScriptedRunner::new().on("viewer", CommandOutput::ok(body)));
        let err = exec
            .execute::<Viewer>("viewer", "data.viewer.login", "query { viewer { login } }", Variables::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn failed_cli_reports_stdout_errors_then_stderr() {
        let failed = CommandOutput {
            code: 1,
            stdout: r#"{"errors":[{"message":"Could not resolve to a node"}]}"#.to_string(),
            stderr: "gh: Could not resolve".to_string(),
        };
        let (exec, _) = executor(ScriptedRunner::new().on("graphql", failed));
        let err = exec
            .execute::<Viewer>("viewer", "data.viewer.login", "query { viewer { login } }", Variables::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Could not resolve to a node"));

        let (exec, _) = executor(
            ScriptedRunner::new().on("graphql", CommandOutput::failed(4, "gh: authentication required")),
        );
        let err = exec
            .execute::<Viewer>("viewer", "data.viewer.login", "query { viewer { login } }", Variables::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("authentication required"));
    }
}
