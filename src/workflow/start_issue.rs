//! `start-issue`: take the top "todo" issue off the board and build its
//! sandbox.

use tracing::info;

use crate::environment::{self, EnvironmentParameters};
use crate::errors::{Result, WorkflowError};
use crate::github::extract_label;
use crate::prompt::{self, PromptValues};
use crate::runner::CommandSpec;
use crate::store::get_required;
use crate::translate::SlugService;
use crate::ui::PipelineProgress;

use super::context::{
    DatabaseReady, EnvironmentRegistered, Initialized, IssueInProgress, IssueSelected, ProfileCreated,
    PromptWritten, Services, Slugged, StartIssueOutcome, WorktreeCreated,
};
use super::run_step;

pub const STEP_COUNT: u64 = 10;

pub async fn run(services: Services, progress: &PipelineProgress) -> Result<StartIssueOutcome> {
    let ctx = run_step(progress, "load shared configuration", Initialized::load(services)).await?;
    let ctx = run_step(progress, "select top priority issue", select_issue(ctx)).await?;
    let ctx = run_step(progress, "move issue to in progress", mark_in_progress(ctx)).await?;
    let ctx = run_step(progress, "derive slug", derive_slug(ctx)).await?;
    let ctx = run_step(progress, "create worktree", create_worktree(ctx)).await?;
    let ctx = run_step(progress, "register environment", register_environment(ctx)).await?;
    let ctx = run_step(progress, "create cloud profile", create_profile(ctx)).await?;
    let ctx = run_step(progress, "create database", prepare_database(ctx)).await?;
    let ctx = run_step(progress, "write prompt", write_prompt(ctx)).await?;
    let outcome = run_step(progress, "open editor", open_editor(ctx)).await?;

    progress.finish(&format!(
        "Issue #{} ready at {}",
        outcome.issue_number,
        outcome.worktree_path.display()
    ));
    info!(
        issue = outcome.issue_number,
        branch = %outcome.branch_name,
        web_port = outcome.web_port,
        api_port = outcome.api_port,
        "start-issue complete"
    );
    Ok(outcome)
}

async fn select_issue(ctx: Initialized) -> Result<IssueSelected> {
    let issue = ctx.tracker.fetch_top_priority_issue().await?;
    // refuse before touching the board when the ports cannot be assigned
    environment::web_port(&ctx.config, issue.number)?;
    environment::api_port(&ctx.config, issue.number)?;
    let label = extract_label(&issue, &ctx.config.default_label);
    Ok(IssueSelected {
        prev: ctx,
        issue,
        label,
    })
}

async fn mark_in_progress(ctx: IssueSelected) -> Result<IssueInProgress> {
    let status_field_id = ctx
        .tracker
        .assign_and_move_to_in_progress(ctx.issue.number, &ctx.issue.project_item_id)
        .await?;
    Ok(IssueInProgress {
        prev: ctx,
        status_field_id,
    })
}

async fn derive_slug(ctx: IssueInProgress) -> Result<Slugged> {
    let api_key = get_required(&ctx.shared, "DEEPL_API_KEY", &ctx.store.development_path())?;
    let slugs = SlugService::new((ctx.translators)(api_key));
    let slug = slugs.slug_for_title(&ctx.issue.title).await?;
    let branch_name = environment::branch_name(&ctx.label, ctx.issue.number, &slug);
    Ok(Slugged {
        prev: ctx,
        slug,
        branch_name,
    })
}

async fn create_worktree(ctx: Slugged) -> Result<WorktreeCreated> {
    let worktree_path =
        environment::worktree_path(&ctx.config, ctx.git.repo_root(), ctx.issue.number, &ctx.slug);
    ctx.git.create_worktree(&ctx.branch_name, &worktree_path).await?;
    ctx.git.copy_local_files(&worktree_path, &ctx.config.copy_files)?;
    Ok(WorktreeCreated {
        prev: ctx,
        worktree_path,
    })
}

async fn register_environment(ctx: WorktreeCreated) -> Result<EnvironmentRegistered> {
    let environment = EnvironmentParameters::compute(
        &ctx.config,
        ctx.issue.number,
        &ctx.slug,
        ctx.credentials.clone(),
    )?;
    let registration = ctx
        .store
        .put_parameters(ctx.issue.number, &environment.to_parameter_map(&ctx.branch_name))
        .await;
    Ok(EnvironmentRegistered {
        prev: ctx,
        environment,
        registration,
    })
}

async fn create_profile(ctx: EnvironmentRegistered) -> Result<ProfileCreated> {
    let profile_created = ctx.profiles.create(ctx.issue.number)?;
    Ok(ProfileCreated {
        prev: ctx,
        profile_created,
    })
}

async fn prepare_database(ctx: ProfileCreated) -> Result<DatabaseReady> {
    let readiness_attempts_used = ctx.database.wait_until_ready().await?;
    ctx.database
        .create(&ctx.environment.database_name, &ctx.credentials.admin_password)
        .await?;
    ctx.database
        .run_migrations(
            &ctx.worktree_path,
            &ctx.config.migrate_command,
            &ctx.environment.database_admin_url,
        )
        .await?;
    Ok(DatabaseReady {
        prev: ctx,
        readiness_attempts_used,
    })
}

async fn write_prompt(ctx: DatabaseReady) -> Result<PromptWritten> {
    let values = PromptValues {
        issue_number: ctx.issue.number,
        issue_title: ctx.issue.title.clone(),
        branch_name: ctx.branch_name.clone(),
        web_port: ctx.environment.web_port,
        api_port: ctx.environment.api_port,
        project_id: ctx.board.project_id.clone(),
        status_field_id: ctx.status_field_id.clone(),
        in_review_option_id: ctx.board.in_review_option_id.clone(),
    };
    let template = ctx.git.repo_root().join(&ctx.config.prompt_template);
    let prompt_path = prompt::write_prompt(&template, &ctx.worktree_path, &ctx.config.prompt_output, &values)
        .map_err(|e| WorkflowError::Step {
            step: "write prompt",
            message: e.to_string(),
        })?;
    Ok(PromptWritten {
        prev: ctx,
        prompt_path,
    })
}

async fn open_editor(ctx: PromptWritten) -> Result<StartIssueOutcome> {
    let mut words = ctx.config.editor.split_whitespace();
    if let Some(program) = words.next() {
        let spec = CommandSpec::new(program)
            .args(words)
            .arg(ctx.worktree_path.to_string_lossy())
            .current_dir(&ctx.worktree_path);
        ctx.runner
            .run_checked(&spec)
            .await
            .map_err(|e| WorkflowError::Step {
                step: "open editor",
                message: e.detail(),
            })?;
        info!(editor = program, "opened editor");
    } else {
        info!("no editor configured");
    }

    Ok(StartIssueOutcome {
        issue_number: ctx.issue.number,
        issue_title: ctx.issue.title.clone(),
        branch_name: ctx.branch_name.clone(),
        worktree_path: ctx.worktree_path.clone(),
        web_port: ctx.environment.web_port,
        api_port: ctx.environment.api_port,
        database_name: ctx.environment.database_name.clone(),
        profile_name: ctx.environment.profile_name.clone(),
        prompt_path: ctx.prompt_path.clone(),
        registration: ctx.registration,
    })
}
