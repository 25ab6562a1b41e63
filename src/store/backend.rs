//! Parameter store transports.
//!
//! [`SsmBackend`] talks to AWS Systems Manager Parameter Store;
//! [`InMemoryBackend`] keeps parameters in a sorted map and is used by tests
//! and pipeline dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::types::ParameterType;

use crate::errors::{Result, WorkflowError};

/// How a value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Plain,
    Secret,
}

/// A stored name/value pair. `name` is the full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// One page of a recursive path listing.
#[derive(Debug, Clone, Default)]
pub struct ParameterPage {
    pub parameters: Vec<Parameter>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait ParameterBackend: Send + Sync {
    /// List parameters under `path` (recursively, decrypted), one page at a time.
    async fn list_page(&self, path: &str, next_token: Option<String>) -> Result<ParameterPage>;

    /// Create or overwrite a parameter.
    async fn put(&self, name: &str, value: &str, kind: ParameterKind) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// AWS SSM Parameter Store.
pub struct SsmBackend {
    client: aws_sdk_ssm::Client,
}

impl SsmBackend {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }

    /// Build a client for `region` from the ambient credential chain
    /// (the aws-vault session exports its credentials as env vars).
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(aws_sdk_ssm::Client::new(&config))
    }
}

#[async_trait]
impl ParameterBackend for SsmBackend {
    async fn list_page(&self, path: &str, next_token: Option<String>) -> Result<ParameterPage> {
        let output = self
            .client
            .get_parameters_by_path()
            .path(path)
            .recursive(true)
            .with_decryption(true)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| WorkflowError::ParameterStore {
                path: path.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let parameters = output
            .parameters()
            .iter()
            .filter_map(|p| {
                Some(Parameter {
                    name: p.name()?.to_string(),
                    value: p.value().unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(ParameterPage {
            parameters,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn put(&self, name: &str, value: &str, kind: ParameterKind) -> Result<()> {
        let parameter_type = match kind {
            ParameterKind::Plain => ParameterType::String,
            ParameterKind::Secret => ParameterType::SecureString,
        };
        self.client
            .put_parameter()
            .name(name)
            .value(value)
            .r#type(parameter_type)
            .overwrite(true)
            .send()
            .await
            .map_err(|e| WorkflowError::ParameterStore {
                path: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.client
            .delete_parameter()
            .name(name)
            .send()
            .await
            .map_err(|e| WorkflowError::ParameterStore {
                path: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

/// Process-local parameter store.
pub struct InMemoryBackend {
    entries: Mutex<BTreeMap<String, (String, ParameterKind)>>,
    page_size: usize,
    failing: Mutex<HashSet<String>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            page_size: 10,
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size used by `list_page`; SSM returns at most 10 per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Seed a plain parameter.
    pub fn with_parameter(self, name: &str, value: &str) -> Self {
        self.insert(name, value, ParameterKind::Plain);
        self
    }

    /// Make every write or delete of `name` fail.
    pub fn fail_on(self, name: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(name.to_string());
        }
        self
    }

    fn insert(&self, name: &str, value: &str, kind: ParameterKind) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(name.to_string(), (value.to_string(), kind));
        }
    }

    pub fn get(&self, name: &str) -> Option<(String, ParameterKind)> {
        self.entries.lock().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_failure(&self, name: &str) -> Result<()> {
        let failing = self.failing.lock().map(|f| f.contains(name)).unwrap_or(false);
        if failing {
            return Err(WorkflowError::ParameterStore {
                path: name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ParameterBackend for InMemoryBackend {
    async fn list_page(&self, path: &str, next_token: Option<String>) -> Result<ParameterPage> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let offset = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| WorkflowError::ParameterStore {
                path: path.to_string(),
                message: format!("invalid next token '{token}'"),
            })?,
            None => 0,
        };

        let entries = self.entries.lock().map_err(|_| WorkflowError::ParameterStore {
            path: path.to_string(),
            message: "store lock poisoned".to_string(),
        })?;
        let matching: Vec<Parameter> = entries
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, (value, _))| Parameter {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let parameters = matching.get(offset..end).unwrap_or_default().to_vec();
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(ParameterPage {
            parameters,
            next_token,
        })
    }

    async fn put(&self, name: &str, value: &str, kind: ParameterKind) -> Result<()> {
        self.check_failure(name)?;
        self.insert(name, value, kind);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check_failure(name)?;
        let removed = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(WorkflowError::ParameterStore {
                path: name.to_string(),
                message: "parameter not found".to_string(),
            }),
        }
    }
}
