//! Git worktree manager.
//!
//! Each issue gets its own worktree under `{repo_root}/{worktree_dir}` on a
//! fresh branch cut from the trunk. Teardown finds the worktree again by
//! parsing `git worktree list --porcelain`, so no local state is kept.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::{Result, WorkflowError};
use crate::runner::{CommandRunner, CommandSpec};

static BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<label>[^/\s]+)/(?P<number>\d+)-(?P<slug>\S+)$").unwrap());

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name; `None` for detached or bare entries.
    pub branch: Option<String>,
}

/// Worktree located for an issue during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub issue_number: u64,
    pub path: PathBuf,
    pub branch: String,
}

/// `{label}/{n}-{slug}` split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBranch {
    pub label: String,
    pub issue_number: u64,
    pub slug: String,
}

pub fn parse_branch_name(branch: &str) -> Option<ParsedBranch> {
    let caps = BRANCH_PATTERN.captures(branch.trim())?;
    Some(ParsedBranch {
        label: caps["label"].to_string(),
        issue_number: caps["number"].parse().ok()?,
        slug: caps["slug"].to_string(),
    })
}

/// Parse porcelain output into entries. Records are separated by blank lines.
pub fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            entries.extend(current.take());
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            entry.branch = Some(branch.strip_prefix("refs/heads/").unwrap_or(branch).to_string());
        }
    }
    entries.extend(current);
    entries
}

/// Root of the main worktree of the repository containing `dir`.
///
/// Works from inside a linked worktree or a subdirectory too: the first
/// porcelain entry is always the main worktree.
pub async fn repository_root(runner: &dyn CommandRunner, dir: &Path) -> Result<PathBuf> {
    let spec = CommandSpec::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(dir);
    let output = runner.run_checked(&spec).await.map_err(|e| {
        WorkflowError::GitOperation(format!(
            "{} is not inside a git repository: {}",
            dir.display(),
            e.detail()
        ))
    })?;
    let root = parse_worktree_list(&output.stdout)
        .into_iter()
        .next()
        .map(|e| e.path)
        .ok_or_else(|| WorkflowError::GitOperation("git worktree list returned no entries".into()))?;
    debug!(root = %root.display(), "resolved repository root");
    Ok(root)
}

pub struct GitWorktreeManager {
    runner: Arc<dyn CommandRunner>,
    repo_root: PathBuf,
    remote: String,
    trunk: String,
}

impl GitWorktreeManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        repo_root: impl Into<PathBuf>,
        remote: impl Into<String>,
        trunk: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
            remote: remote.into(),
            trunk: trunk.into(),
        }
    }

    /// Resolve the main worktree of the repository containing `dir`.
    pub async fn discover(
        runner: Arc<dyn CommandRunner>,
        dir: &Path,
        remote: impl Into<String>,
        trunk: impl Into<String>,
    ) -> Result<Self> {
        let root = repository_root(runner.as_ref(), dir).await?;
        Ok(Self::new(runner, root, remote, trunk))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn git<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("git").args(args).current_dir(&self.repo_root)
    }

    async fn git_checked(&self, spec: CommandSpec, what: &str) -> Result<String> {
        self.runner
            .run_checked(&spec)
            .await
            .map(|o| o.stdout)
            .map_err(|e| WorkflowError::GitOperation(format!("{what}: {}", e.detail())))
    }

    /// Branch checked out in `dir`, which may be any worktree of the repository.
    pub async fn current_branch(&self, dir: &Path) -> Result<String> {
        let out = self
            .git_checked(
                CommandSpec::new("git")
                    .args(["rev-parse", "--abbrev-ref", "HEAD"])
                    .current_dir(dir),
                "failed to read current branch",
            )
            .await?;
        Ok(out.trim().to_string())
    }

    pub async fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self
            .runner
            .run(&self.git(["show-ref", "--verify", "--quiet", format!("refs/heads/{branch}").as_str()]))
            .await?;
        Ok(out.success())
    }

    /// Create `path` as a worktree on a new `branch` cut from the trunk.
    /// Refuses to reuse an existing branch or directory.
    pub async fn create_worktree(&self, branch: &str, path: &Path) -> Result<()> {
        if self.local_branch_exists(branch).await? {
            return Err(WorkflowError::GitOperation(format!("branch '{branch}' already exists")));
        }
        if path.exists() {
            return Err(WorkflowError::GitOperation(format!(
                "worktree path {} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
        }

        let path_str = path.to_string_lossy().into_owned();
        self.git_checked(
            self.git(["worktree", "add", "-b", branch, path_str.as_str(), self.trunk.as_str()]),
            &format!("failed to create worktree {path_str}"),
        )
        .await?;
        info!(branch, path = %path.display(), "created worktree");
        Ok(())
    }

    /// Copy repository-local files (ignored settings and the like) into a
    /// worktree. Missing sources are skipped. Returns how many were copied.
    pub fn copy_local_files(&self, worktree: &Path, files: &[String]) -> Result<usize> {
        let mut copied = 0;
        for file in files {
            let source = self.repo_root.join(file);
            if !source.is_file() {
                warn!(file = %source.display(), "local file not found, skipping copy");
                continue;
            }
            let target = worktree.join(file);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
            }
            std::fs::copy(&source, &target).map_err(|e| WorkflowError::io(&target, e))?;
            debug!(file, "copied local file into worktree");
            copied += 1;
        }
        Ok(copied)
    }

    pub async fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        self.git_checked(
            self.git(["worktree", "remove", "--force", path_str.as_str()]),
            &format!("failed to remove worktree {path_str}"),
        )
        .await?;
        info!(path = %path.display(), "removed worktree");
        Ok(())
    }

    /// Delete a local branch. Returns `false` when it does not exist.
    pub async fn remove_local_branch(&self, branch: &str) -> Result<bool> {
        if !self.local_branch_exists(branch).await? {
            info!(branch, "local branch does not exist, nothing to delete");
            return Ok(false);
        }
        self.git_checked(
            self.git(["branch", "-D", branch]),
            &format!("failed to delete local branch '{branch}'"),
        )
        .await?;
        info!(branch, "deleted local branch");
        Ok(true)
    }

    /// `ls-remote` matches patterns by path suffix, so the listing is
    /// checked for the exact ref.
    pub async fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let full_ref = format!("refs/heads/{branch}");
        let out = self
            .runner
            .run(&self.git([
                "ls-remote",
                "--exit-code",
                "--heads",
                self.remote.as_str(),
                full_ref.as_str(),
            ]))
            .await?;
        match out.code {
            0 => Ok(out
                .stdout
                .lines()
                .filter_map(|line| line.split_whitespace().nth(1))
                .any(|name| name == full_ref)),
            // --exit-code reports "no matching refs" as 2
            2 => Ok(false),
            code => Err(WorkflowError::GitOperation(format!(
                "failed to query remote '{}' (exit {code}): {}",
                self.remote,
                out.stderr.trim()
            ))),
        }
    }

    /// Delete a branch on the remote. Returns `false` when it is already gone.
    pub async fn remove_remote_branch(&self, branch: &str) -> Result<bool> {
        if !self.remote_branch_exists(branch).await? {
            info!(branch, remote = %self.remote, "remote branch does not exist, nothing to delete");
            return Ok(false);
        }
        self.git_checked(
            self.git(["push", self.remote.as_str(), "--delete", branch]),
            &format!("failed to delete remote branch '{branch}'"),
        )
        .await?;
        info!(branch, remote = %self.remote, "deleted remote branch");
        Ok(true)
    }

    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self
            .git_checked(
                self.git(["worktree", "list", "--porcelain"]),
                "failed to list worktrees",
            )
            .await?;
        Ok(parse_worktree_list(&out))
    }

    /// Find the linked worktree whose path contains `/{issue_number}-`.
    /// The main worktree is never a match, whatever its directory is called.
    pub async fn get_worktree_info(&self, issue_number: u64) -> Result<WorktreeInfo> {
        let needle = format!("/{issue_number}-");
        let entry = self
            .list_worktrees()
            .await?
            .into_iter()
            .skip(1)
            .find(|e| e.path.to_string_lossy().contains(&needle))
            .ok_or_else(|| {
                WorkflowError::GitOperation(format!("no worktree found for issue #{issue_number}"))
            })?;
        let branch = entry.branch.ok_or_else(|| {
            WorkflowError::GitOperation(format!(
                "worktree {} has no branch checked out",
                entry.path.display()
            ))
        })?;
        Ok(WorktreeInfo {
            issue_number,
            path: entry.path,
            branch,
        })
    }

    /// Check out the trunk in the main worktree and fast-forward it from the
    /// remote so it contains the merged work.
    pub async fn sync_trunk(&self) -> Result<()> {
        self.git_checked(
            self.git(["checkout", self.trunk.as_str()]),
            &format!("failed to check out {}", self.trunk),
        )
        .await?;
        self.git_checked(
            self.git(["pull", "--ff-only", self.remote.as_str(), self.trunk.as_str()]),
            &format!("failed to fast-forward {}", self.trunk),
        )
        .await?;
        info!(trunk = %self.trunk, remote = %self.remote, "synced trunk");
        Ok(())
    }
}
