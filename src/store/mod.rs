//! Typed client over the hierarchical parameter store.
//!
//! Shared configuration lives under `{root}/development`; state for one
//! issue's sandbox lives under `{root}/worktree/{issue_number}`. Keys are
//! handled in upper-snake-case form (see [`keys`]).

pub mod backend;
pub mod keys;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::errors::{Result, WorkflowError};

pub use backend::{InMemoryBackend, Parameter, ParameterBackend, ParameterKind, SsmBackend};

/// Upper-snake-case key → value, as read from one path.
pub type ParameterMap = BTreeMap<String, String>;

/// Outcome of a fan-out write or delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub success_count: usize,
    pub error_count: usize,
}

impl BatchSummary {
    fn from_results<T>(results: &[Result<T>]) -> Self {
        let success_count = results.iter().filter(|r| r.is_ok()).count();
        Self {
            success_count,
            error_count: results.len() - success_count,
        }
    }
}

#[derive(Clone)]
pub struct ParameterStore {
    backend: Arc<dyn ParameterBackend>,
    root: String,
}

impl ParameterStore {
    pub fn new(backend: Arc<dyn ParameterBackend>, root: impl Into<String>) -> Self {
        Self {
            backend,
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn development_path(&self) -> String {
        format!("{}/development", self.root)
    }

    pub fn worktree_path(&self, issue_number: u64) -> String {
        format!("{}/worktree/{}", self.root, issue_number)
    }

    /// Read every parameter under `path`, following pagination, keyed by
    /// upper-snake-case name.
    ///
    /// An empty path is a [`WorkflowError::ParametersEmpty`]: every caller
    /// expects specific keys to be there.
    pub async fn get_parameter_map(&self, path: &str) -> Result<ParameterMap> {
        let parameters = self.list_all(path).await?;
        if parameters.is_empty() {
            return Err(WorkflowError::ParametersEmpty {
                path: path.to_string(),
            });
        }
        let map: ParameterMap = parameters
            .into_iter()
            .map(|p| (keys::to_env_name(&p.name, path), p.value))
            .collect();
        debug!(path, count = map.len(), "loaded parameters");
        Ok(map)
    }

    async fn list_all(&self, path: &str) -> Result<Vec<Parameter>> {
        let mut all = Vec::new();
        let mut next_token = None;
        loop {
            let page = self.backend.list_page(path, next_token).await?;
            all.extend(page.parameters);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(all)
    }

    /// Write every entry under `worktree/{issue_number}`.
    ///
    /// Writes run concurrently and independently; failures are logged and
    /// counted rather than returned, since re-running registration repairs a
    /// partial write.
    pub async fn put_parameters(
        &self,
        issue_number: u64,
        entries: &ParameterMap,
    ) -> BatchSummary {
        let base = self.worktree_path(issue_number);
        let writes = entries.iter().map(|(key, value)| {
            let name = keys::to_parameter_name(key, &base);
            let kind = if keys::is_secret(key) {
                ParameterKind::Secret
            } else {
                ParameterKind::Plain
            };
            async move {
                let result = self.backend.put(&name, value, kind).await;
                if let Err(e) = &result {
                    warn!(parameter = %name, error = %e, "failed to register parameter");
                }
                result
            }
        });
        let results = join_all(writes).await;
        let summary = BatchSummary::from_results(&results);
        info!(
            issue = issue_number,
            success = summary.success_count,
            errors = summary.error_count,
            "registered worktree parameters"
        );
        summary
    }

    /// Delete every parameter under `worktree/{issue_number}`.
    ///
    /// An already-empty path is nothing to do, which keeps teardown safe to
    /// repeat.
    pub async fn delete_parameters_by_path(&self, issue_number: u64) -> Result<BatchSummary> {
        let path = self.worktree_path(issue_number);
        let parameters = self.list_all(&path).await?;
        if parameters.is_empty() {
            info!(path = %path, "no parameters to delete");
            return Ok(BatchSummary::default());
        }

        let deletes = parameters.iter().map(|p| async move {
            let result = self.backend.delete(&p.name).await;
            if let Err(e) = &result {
                warn!(parameter = %p.name, error = %e, "failed to delete parameter");
            }
            result
        });
        let results = join_all(deletes).await;
        let summary = BatchSummary::from_results(&results);
        info!(
            path = %path,
            success = summary.success_count,
            errors = summary.error_count,
            "deleted worktree parameters"
        );
        Ok(summary)
    }
}

/// Look up a required key, naming the path it was expected under.
pub fn get_required<'a>(map: &'a ParameterMap, key: &str, path: &str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| WorkflowError::ParameterNotFound {
            key: key.to_string(),
            path: path.to_string(),
        })
}
