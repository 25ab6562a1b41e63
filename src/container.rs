//! Container and image cleanup for a finished issue.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{Result, WorkflowError};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// What [`ContainerManager::cleanup`] actually removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub container_removed: bool,
    pub image_removed: bool,
}

pub struct ContainerManager {
    runner: Arc<dyn CommandRunner>,
}

impl ContainerManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner
            .run(&CommandSpec::new("docker").args(args.iter().copied()))
            .await
    }

    async fn docker_checked(&self, args: &[&str], what: &str) -> Result<()> {
        self.runner
            .run_checked(&CommandSpec::new("docker").args(args.iter().copied()))
            .await
            .map(|_| ())
            .map_err(|e| WorkflowError::Container(format!("{what}: {}", e.detail())))
    }

    /// Whether a container with exactly this name exists, running or not.
    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^{name}$");
        let out = self
            .docker(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        if !out.success() {
            return Err(WorkflowError::Container(format!(
                "failed to list containers: {}",
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.lines().any(|l| l.trim() == name))
    }

    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.docker(&["image", "inspect", image]).await?.success())
    }

    /// Stop and remove the container, then remove its image. Either being
    /// absent is a no-op.
    pub async fn cleanup(&self, name: &str, image: &str) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        if self.container_exists(name).await? {
            self.docker_checked(&["stop", name], &format!("failed to stop container {name}"))
                .await?;
            self.docker_checked(&["rm", name], &format!("failed to remove container {name}"))
                .await?;
            info!(container = name, "removed container");
            report.container_removed = true;
        } else {
            info!(container = name, "container does not exist, nothing to remove");
        }

        if self.image_exists(image).await? {
            self.docker_checked(&["rmi", image], &format!("failed to remove image {image}"))
                .await?;
            info!(image, "removed image");
            report.image_removed = true;
        } else {
            debug!(image, "image does not exist, nothing to remove");
        }

        Ok(report)
    }
}
