//! Per-issue Postgres databases inside the shared database container.
//!
//! Statements go through `docker exec ... psql` as the admin user. The admin
//! password travels in `PGPASSWORD` on the subprocess environment and never
//! appears in SQL text or logged command lines.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{Result, WorkflowError};
use crate::runner::{CommandRunner, CommandSpec};

/// Names are interpolated into SQL, so only `[a-z0-9_]+` is accepted.
pub fn validate_database_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WorkflowError::Database(format!(
            "invalid database name '{name}': only lowercase letters, digits and '_' are allowed"
        )))
    }
}

pub struct DatabaseProvisioner {
    runner: Arc<dyn CommandRunner>,
    container: String,
    admin_user: String,
    admin_database: String,
    readiness_attempts: u32,
    readiness_interval: Duration,
}

impl DatabaseProvisioner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        container: impl Into<String>,
        admin_user: impl Into<String>,
        admin_database: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            container: container.into(),
            admin_user: admin_user.into(),
            admin_database: admin_database.into(),
            readiness_attempts: 30,
            readiness_interval: Duration::from_secs(1),
        }
    }

    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.readiness_attempts = attempts.max(1);
        self.readiness_interval = interval;
        self
    }

    fn psql(&self, sql: &str, admin_password: &str) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["exec", "-e", "PGPASSWORD", self.container.as_str(), "psql"])
            .args(["-U", self.admin_user.as_str(), "-d", self.admin_database.as_str()])
            .args(["-v", "ON_ERROR_STOP=1", "-c", sql])
            .env("PGPASSWORD", admin_password)
    }

    async fn execute(&self, sql: &str, admin_password: &str, what: &str) -> Result<()> {
        self.runner
            .run_checked(&self.psql(sql, admin_password))
            .await
            .map(|_| ())
            .map_err(|e| WorkflowError::Database(format!("{what}: {}", e.detail())))
    }

    pub async fn create(&self, name: &str, admin_password: &str) -> Result<()> {
        validate_database_name(name)?;
        self.execute(
            &format!("CREATE DATABASE \"{name}\""),
            admin_password,
            &format!("failed to create database {name}"),
        )
        .await?;
        info!(database = name, container = %self.container, "created database");
        Ok(())
    }

    /// `DROP DATABASE IF EXISTS`, so repeated teardown is safe.
    pub async fn delete(&self, name: &str, admin_password: &str) -> Result<()> {
        validate_database_name(name)?;
        self.execute(
            &format!("DROP DATABASE IF EXISTS \"{name}\""),
            admin_password,
            &format!("failed to drop database {name}"),
        )
        .await?;
        info!(database = name, container = %self.container, "dropped database");
        Ok(())
    }

    /// Poll `pg_isready` until the server accepts connections. Returns the
    /// number of attempts used.
    pub async fn wait_until_ready(&self) -> Result<u32> {
        let spec = CommandSpec::new("docker").args([
            "exec",
            self.container.as_str(),
            "pg_isready",
            "-U",
            self.admin_user.as_str(),
            "-d",
            self.admin_database.as_str(),
        ]);
        for attempt in 1..=self.readiness_attempts {
            let out = self.runner.run(&spec).await?;
            if out.success() {
                debug!(attempt, "database accepting connections");
                return Ok(attempt);
            }
            debug!(attempt, max = self.readiness_attempts, "database not ready yet");
            if attempt < self.readiness_attempts {
                tokio::time::sleep(self.readiness_interval).await;
            }
        }
        Err(WorkflowError::Database(format!(
            "container {} not ready after {} attempts",
            self.container, self.readiness_attempts
        )))
    }

    /// Run the project's migration command in `worktree` against `database_url`.
    pub async fn run_migrations(&self, worktree: &Path, command: &[String], database_url: &str) -> Result<()> {
        let Some((program, args)) = command.split_first() else {
            warn!("no migration command configured, skipping migrations");
            return Ok(());
        };
        let spec = CommandSpec::new(program)
            .args(args.iter().cloned())
            .current_dir(worktree)
            .env("DATABASE_URL", database_url);
        self.runner
            .run_checked(&spec)
            .await
            .map_err(|e| WorkflowError::Database(format!("migrations failed: {}", e.detail())))?;
        info!(worktree = %worktree.display(), "applied migrations");
        Ok(())
    }
}
