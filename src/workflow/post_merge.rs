//! `post-merge`: tear down the sandbox of a merged issue.
//!
//! Every step probes before it mutates, so the pipeline can be re-run after
//! a partial failure or a manual cleanup.

use tracing::info;

use crate::container::CleanupReport;
use crate::environment::EnvironmentParameters;
use crate::errors::{Result, WorkflowError};
use crate::git::parse_branch_name;
use crate::store::BatchSummary;
use crate::ui::PipelineProgress;

use super::context::{
    ContainerRemoved, DatabaseDropped, Initialized, ParametersDeleted, PostMergeOutcome, ProfileDeleted,
    Services, TeardownTarget, TrunkSynced, WorktreeRemoved,
};
use super::{run_idempotent_step, run_step};

pub const STEP_COUNT: u64 = 9;

/// Run the teardown. Without `issue`, the number is read from the branch
/// checked out in the project directory.
pub async fn run(
    services: Services,
    issue: Option<u64>,
    progress: &PipelineProgress,
) -> Result<PostMergeOutcome> {
    let ctx = run_step(progress, "load shared configuration", Initialized::load(services)).await?;
    let ctx = run_step(progress, "locate worktree", locate_target(ctx, issue)).await?;
    let ctx = run_step(progress, "sync trunk", sync_trunk(ctx)).await?;
    let ctx = run_step(progress, "drop database", drop_database(ctx)).await?;
    let ctx = run_idempotent_step(progress, "delete parameters", delete_parameters(ctx), |c: &ParametersDeleted| {
        (c.deletion == BatchSummary::default()).then_some("no parameters registered")
    })
    .await?;
    let ctx = run_idempotent_step(progress, "delete cloud profile", delete_profile(ctx), |c: &ProfileDeleted| {
        (!c.profile_deleted).then_some("profile not present")
    })
    .await?;
    let ctx = run_idempotent_step(progress, "remove container", remove_container(ctx), |c: &ContainerRemoved| {
        (c.cleanup == CleanupReport::default()).then_some("container and image already gone")
    })
    .await?;
    let ctx = run_step(progress, "remove worktree and branches", remove_worktree(ctx)).await?;
    let outcome = run_idempotent_step(progress, "close issue", close_issue(ctx), |o: &PostMergeOutcome| {
        (!o.issue_closed).then_some("already closed")
    })
    .await?;

    progress.finish(&format!("Issue #{} cleaned up", outcome.issue_number));
    info!(issue = outcome.issue_number, "post-merge complete");
    Ok(outcome)
}

async fn infer_issue_number(ctx: &Initialized) -> Result<u64> {
    let branch = ctx.git.current_branch(&ctx.project_dir).await?;
    parse_branch_name(&branch)
        .map(|parsed| parsed.issue_number)
        .ok_or_else(|| {
            WorkflowError::GitOperation(format!(
                "cannot infer the issue number from branch '{branch}'; pass --issue"
            ))
        })
}

async fn locate_target(ctx: Initialized, issue: Option<u64>) -> Result<TeardownTarget> {
    let issue_number = match issue {
        Some(n) => n,
        None => infer_issue_number(&ctx).await?,
    };
    let worktree = ctx.git.get_worktree_info(issue_number).await?;
    let slug = parse_branch_name(&worktree.branch)
        .map(|parsed| parsed.slug)
        .ok_or_else(|| {
            WorkflowError::GitOperation(format!(
                "branch '{}' does not follow the label/number-slug pattern",
                worktree.branch
            ))
        })?;
    let environment =
        EnvironmentParameters::compute(&ctx.config, issue_number, &slug, ctx.credentials.clone())?;
    info!(
        issue = issue_number,
        worktree = %worktree.path.display(),
        branch = %worktree.branch,
        "located sandbox"
    );
    Ok(TeardownTarget {
        prev: ctx,
        issue_number,
        worktree,
        slug,
        environment,
    })
}

async fn sync_trunk(ctx: TeardownTarget) -> Result<TrunkSynced> {
    ctx.git.sync_trunk().await?;
    Ok(TrunkSynced { prev: ctx })
}

async fn drop_database(ctx: TrunkSynced) -> Result<DatabaseDropped> {
    ctx.database
        .delete(&ctx.environment.database_name, &ctx.credentials.admin_password)
        .await?;
    Ok(DatabaseDropped { prev: ctx })
}

async fn delete_parameters(ctx: DatabaseDropped) -> Result<ParametersDeleted> {
    let deletion = ctx.store.delete_parameters_by_path(ctx.issue_number).await?;
    Ok(ParametersDeleted { prev: ctx, deletion })
}

async fn delete_profile(ctx: ParametersDeleted) -> Result<ProfileDeleted> {
    let profile_deleted = ctx.profiles.delete(ctx.issue_number)?;
    Ok(ProfileDeleted {
        prev: ctx,
        profile_deleted,
    })
}

async fn remove_container(ctx: ProfileDeleted) -> Result<ContainerRemoved> {
    let app_name = &ctx.environment.app_name;
    let cleanup = ctx.containers.cleanup(app_name, app_name).await?;
    Ok(ContainerRemoved { prev: ctx, cleanup })
}

async fn remove_worktree(ctx: ContainerRemoved) -> Result<WorktreeRemoved> {
    ctx.git.remove_worktree(&ctx.worktree.path).await?;
    let local_branch_deleted = ctx.git.remove_local_branch(&ctx.worktree.branch).await?;
    let remote_branch_deleted = ctx.git.remove_remote_branch(&ctx.worktree.branch).await?;
    Ok(WorktreeRemoved {
        prev: ctx,
        local_branch_deleted,
        remote_branch_deleted,
    })
}

async fn close_issue(ctx: WorktreeRemoved) -> Result<PostMergeOutcome> {
    let issue_closed = ctx.tracker.close_issue(ctx.issue_number).await?;
    Ok(PostMergeOutcome {
        issue_number: ctx.issue_number,
        branch_name: ctx.worktree.branch.clone(),
        database_name: ctx.environment.database_name.clone(),
        parameters_deleted: ctx.deletion,
        profile_deleted: ctx.profile_deleted,
        container: ctx.cleanup,
        local_branch_deleted: ctx.local_branch_deleted,
        remote_branch_deleted: ctx.remote_branch_deleted,
        issue_closed,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use crate::workflow::fixtures;

    const BRANCH: &str = "feature/12-add-user-registration-feature";

    fn worktree(root: &Path) -> PathBuf {
        root.join(".worktrees/12-add-user-registration-feature")
    }

    fn aws_config_with_issue_profile(dir: &Path) -> PathBuf {
        let path = dir.join("config");
        fs::write(
            &path,
            format!(
                "{}\n[profile issueflow-12]\nrole_arn = arn:aws:iam::123456789012:role/developer\nsource_profile = default\nregion = ap-northeast-1\n",
                fixtures::AWS_CONFIG
            ),
        )
        .unwrap();
        path
    }

    fn backend_with_issue_parameters() -> Arc<crate::store::InMemoryBackend> {
        Arc::new(
            fixtures::shared_backend()
                .with_parameter("/issueflow/worktree/12/branch-name", BRANCH)
                .with_parameter("/issueflow/worktree/12/web-port", "3012")
                .with_parameter("/issueflow/worktree/12/database-url", "postgresql://..."),
        )
    }

    #[tokio::test]
    async fn tears_down_every_resource() {
        let repo = tempdir().unwrap();
        let aws = tempdir().unwrap();
        let aws_config = aws_config_with_issue_profile(aws.path());
        let backend = backend_with_issue_parameters();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "worktree list",
                    CommandOutput::ok(fixtures::porcelain(repo.path(), &[(worktree(repo.path()), BRANCH)])),
                )
                .on("docker ps", CommandOutput::ok("issueflow-12\n"))
                .on("ls-remote", CommandOutput::ok(format!("abc\trefs/heads/{BRANCH}\n")))
                .on("issue view 12", CommandOutput::ok(r#"{"state":"OPEN"}"#)),
        );
        let services = fixtures::services(repo.path(), runner.clone(), backend.clone(), aws_config.clone());
        let progress = PipelineProgress::hidden(STEP_COUNT);

        let outcome = run(services, Some(12), &progress).await.unwrap();

        assert_eq!(outcome.branch_name, BRANCH);
        assert_eq!(outcome.database_name, "wt_add_user_registration_feature");
        assert_eq!(
            outcome.parameters_deleted,
            BatchSummary {
                success_count: 3,
                error_count: 0
            }
        );
        assert!(outcome.profile_deleted);
        assert_eq!(
            outcome.container,
            CleanupReport {
                container_removed: true,
                image_removed: true
            }
        );
        assert!(outcome.local_branch_deleted && outcome.remote_branch_deleted && outcome.issue_closed);
        assert_eq!(progress.completed(), STEP_COUNT as usize);
        assert_eq!(progress.skipped(), 0);

        assert!(backend.names().iter().all(|n| !n.contains("/worktree/12/")));
        assert_eq!(fs::read_to_string(&aws_config).unwrap(), fixtures::AWS_CONFIG);

        let lines = runner.command_lines();
        let position = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
        assert!(position("git checkout main") < position("DROP DATABASE IF EXISTS \"wt_add_user_registration_feature\""));
        assert!(position("DROP DATABASE") < position("docker stop issueflow-12"));
        assert!(position("docker rmi issueflow-12") < position("worktree remove --force"));
        assert!(position(&format!("git push origin --delete {BRANCH}")) < position("issue close 12"));
    }

    #[tokio::test]
    async fn teardown_of_already_cleaned_resources_is_a_no_op() {
        // The worktree is still listed, but everything else is already gone,
        // as after a manual cleanup or a run that failed at worktree removal.
        let repo = tempdir().unwrap();
        let aws = tempdir().unwrap();
        let aws_config = aws.path().join("config");
        fs::write(&aws_config, fixtures::AWS_CONFIG).unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "worktree list",
                    CommandOutput::ok(fixtures::porcelain(repo.path(), &[(worktree(repo.path()), BRANCH)])),
                )
                .on("docker ps", CommandOutput::ok(""))
                .on("image inspect", CommandOutput::failed(1, "No such image"))
                .on("show-ref", CommandOutput::failed(1, ""))
                .on("ls-remote", CommandOutput::failed(2, ""))
                .on("issue view 12", CommandOutput::ok(r#"{"state":"CLOSED"}"#)),
        );
        let services = fixtures::services(
            repo.path(),
            runner.clone(),
            Arc::new(fixtures::shared_backend()),
            aws_config.clone(),
        );
        let progress = PipelineProgress::hidden(STEP_COUNT);

        let outcome = run(services, Some(12), &progress).await.unwrap();

        assert_eq!(outcome.parameters_deleted, BatchSummary::default());
        assert!(!outcome.profile_deleted);
        assert_eq!(outcome.container, CleanupReport::default());
        assert!(!outcome.local_branch_deleted);
        assert!(!outcome.remote_branch_deleted);
        assert!(!outcome.issue_closed);
        for effect in ["branch -D", "push origin --delete", "docker stop", "docker rmi", "issue close"] {
            assert!(!runner.was_called(effect), "{effect} should not run");
        }
        // parameters, profile, container and issue
        assert_eq!(progress.skipped(), 4);
        assert_eq!(progress.completed(), STEP_COUNT as usize);
    }

    #[tokio::test]
    async fn infers_issue_from_current_branch() {
        let repo = tempdir().unwrap();
        let aws = tempdir().unwrap();
        let aws_config = aws_config_with_issue_profile(aws.path());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("rev-parse", CommandOutput::ok(format!("{BRANCH}\n")))
                .on(
                    "worktree list",
                    CommandOutput::ok(fixtures::porcelain(repo.path(), &[(worktree(repo.path()), BRANCH)])),
                )
                .on("issue view 12", CommandOutput::ok(r#"{"state":"OPEN"}"#)),
        );
        let services = fixtures::services(repo.path(), runner.clone(), backend_with_issue_parameters(), aws_config);

        let outcome = run(services, None, &PipelineProgress::hidden(STEP_COUNT))
            .await
            .unwrap();
        assert_eq!(outcome.issue_number, 12);
        assert!(runner.was_called("gh issue close 12"));
    }

    #[tokio::test]
    async fn trunk_branch_cannot_be_inferred() {
        let repo = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("rev-parse", CommandOutput::ok("main\n"))
                .on("worktree list", CommandOutput::ok(fixtures::porcelain(repo.path(), &[]))),
        );
        let services = fixtures::services(
            repo.path(),
            runner.clone(),
            Arc::new(fixtures::shared_backend()),
            repo.path().join("aws-config"),
        );

        let err = run(services, None, &PipelineProgress::hidden(STEP_COUNT))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--issue"));
        assert!(!runner.was_called("checkout"));
    }

    #[tokio::test]
    async fn missing_worktree_stops_before_teardown() {
        let repo = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("worktree list", CommandOutput::ok(fixtures::porcelain(repo.path(), &[]))),
        );
        let services = fixtures::services(
            repo.path(),
            runner.clone(),
            Arc::new(fixtures::shared_backend()),
            repo.path().join("aws-config"),
        );

        let err = run(services, Some(12), &PipelineProgress::hidden(STEP_COUNT))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::GitOperation(_)));
        assert!(err.to_string().contains("no worktree found for issue #12"));
        assert!(!runner.was_called("checkout"));
        assert!(!runner.was_called("psql"));
    }
}
