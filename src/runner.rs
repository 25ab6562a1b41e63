//! Subprocess execution seam.
//!
//! Every external CLI (git, gh, docker, the editor, migration tooling) is
//! invoked through [`CommandRunner`], so components never touch
//! `tokio::process` directly and tests can replay canned output with
//! [`ScriptedRunner`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{Result, WorkflowError};

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Extra environment for the child. Values never appear in [`CommandSpec::display`].
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when the process was terminated by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs subprocesses. Implementations report non-zero exits as a normal
/// [`CommandOutput`]; only spawn failures and timeouts are errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run and convert a non-zero exit into [`WorkflowError::CommandFailed`].
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        if !output.success() {
            return Err(WorkflowError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs commands as real child processes via `tokio::process`.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command_line = spec.display();
        debug!(command = %command_line, "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|source| WorkflowError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| WorkflowError::Spawn {
                command: command_line.clone(),
                source,
            })?,
            Err(_) => {
                return Err(WorkflowError::CommandTimedOut {
                    command: command_line,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %command_line, code = result.code, "command finished");
        Ok(result)
    }
}

struct Rule {
    pattern: String,
    output: CommandOutput,
    remaining: Option<usize>,
}

/// Replays canned output for commands whose rendered command line contains
/// a pattern. Rules are checked in insertion order; unmatched commands
/// succeed with empty output. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching command with `output`.
    pub fn on(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.push_rule(pattern.into(), output, None);
        self
    }

    /// Answer only the next `times` matching commands with `output`.
    pub fn on_times(self, pattern: impl Into<String>, times: usize, output: CommandOutput) -> Self {
        self.push_rule(pattern.into(), output, Some(times));
        self
    }

    fn push_rule(&self, pattern: String, output: CommandOutput, remaining: Option<usize>) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern,
                output,
                remaining,
            });
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered command lines of every recorded invocation.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    pub fn was_called(&self, pattern: &str) -> bool {
        self.command_lines().iter().any(|line| line.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        let Ok(mut rules) = self.rules.lock() else {
            return Ok(CommandOutput::default());
        };
        for rule in rules.iter_mut() {
            if !line.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining.as_mut() {
                Some(0) => continue,
                Some(n) => *n -= 1,
                None => {}
            }
            return Ok(rule.output.clone());
        }
        Ok(CommandOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hides_environment_values() {
        let spec = CommandSpec::new("docker")
            .args(["exec", "-e", "PGPASSWORD", "postgres"])
            .env("PGPASSWORD", "hunter2");
        assert_eq!(spec.display(), "docker exec -e PGPASSWORD postgres");
        assert!(!spec.display().contains("hunter2"));
    }

    #[tokio::test]
    async fn process_runner_captures_stdout_and_exit_code() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let out = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn process_runner_passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let out = runner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "echo $ISSUEFLOW_TEST_VAR; pwd"])
                    .env("ISSUEFLOW_TEST_VAR", "marker")
                    .current_dir(dir.path()),
            )
            .await
            .unwrap();
        let mut lines = out.stdout.lines();
        assert_eq!(lines.next(), Some("marker"));
        let cwd = lines.next().unwrap();
        assert!(cwd.ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn process_runner_reports_spawn_failure() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz").arg("--flag"))
            .await
            .unwrap_err();
        match err {
            WorkflowError::Spawn { command, .. } => {
                assert_eq!(command, "definitely-not-a-real-binary-xyz --flag")
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_runner_times_out() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&CommandSpec::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::CommandTimedOut { ref command, .. } if command == "sleep 5"
        ));
    }

    #[tokio::test]
    async fn run_checked_turns_non_zero_exit_into_error() {
        let runner = ScriptedRunner::new().on("git push", CommandOutput::failed(128, "rejected\n"));
        let err = runner
            .run_checked(&CommandSpec::new("git").args(["push", "origin"]))
            .await
            .unwrap_err();
        match err {
            WorkflowError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                assert_eq!(command, "git push origin");
                assert_eq!(code, 128);
                assert_eq!(stderr, "rejected");
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_runner_matches_in_order_and_records_calls() {
        let runner = ScriptedRunner::new()
            .on_times("show-ref", 1, CommandOutput::failed(1, ""))
            .on("show-ref", CommandOutput::ok("abc refs/heads/x"));

        let spec = CommandSpec::new("git").args(["show-ref", "--verify"]);
        assert_eq!(runner.run(&spec).await.unwrap().code, 1);
        assert_eq!(runner.run(&spec).await.unwrap().code, 0);

        let unmatched = runner.run(&CommandSpec::new("ls")).await.unwrap();
        assert!(unmatched.success());
        assert!(unmatched.stdout.is_empty());

        assert_eq!(runner.calls().len(), 3);
        assert!(runner.was_called("show-ref --verify"));
        assert!(!runner.was_called("branch -D"));
    }
}
