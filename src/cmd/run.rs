//! Pipeline commands: `issueflow start-issue` and `issueflow post-merge`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use issueflow::aws_profile;
use issueflow::config::{RuntimeEnv, WorkflowConfig};
use issueflow::runner::{CommandRunner, ProcessRunner};
use issueflow::store::{ParameterBackend, SsmBackend};
use issueflow::translate::{DeepLTranslator, Translator};
use issueflow::ui::PipelineProgress;
use issueflow::workflow::{Services, TranslatorFactory, post_merge, start_issue};

/// Check the required environment, load configuration and connect the real
/// backends. Nothing touches the network before the environment check passes.
async fn build_services(project_dir: &Path) -> Result<Services> {
    let runtime = RuntimeEnv::from_env()?;
    let bootstrap = ProcessRunner::new(WorkflowConfig::default().command_timeout());
    let config = WorkflowConfig::load_for_repository(&bootstrap, project_dir).await?;

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(config.command_timeout()));
    let parameters: Arc<dyn ParameterBackend> =
        Arc::new(SsmBackend::from_region(&runtime.region).await);
    let endpoint = config.translation_endpoint.clone();
    let translators: TranslatorFactory = Box::new(move |api_key: &str| -> Box<dyn Translator> {
        Box::new(DeepLTranslator::new(api_key, endpoint.clone()))
    });

    Ok(Services {
        config,
        region: runtime.region,
        project_dir: project_dir.to_path_buf(),
        runner,
        parameters,
        translators,
        aws_config_path: aws_profile::default_config_path()?,
    })
}

pub async fn cmd_start_issue(project_dir: &Path) -> Result<()> {
    let services = build_services(project_dir).await?;
    let progress = PipelineProgress::new("start-issue", start_issue::STEP_COUNT);
    let outcome = start_issue::run(services, &progress)
        .await
        .context("start-issue pipeline failed")?;

    println!();
    println!(
        "{} #{} {}",
        style("Issue").bold(),
        outcome.issue_number,
        outcome.issue_title
    );
    println!("  Branch:   {}", style(&outcome.branch_name).cyan());
    println!("  Worktree: {}", outcome.worktree_path.display());
    println!("  Web port: {}", outcome.web_port);
    println!("  API port: {}", outcome.api_port);
    println!("  Database: {}", outcome.database_name);
    println!("  Profile:  {}", outcome.profile_name);
    println!("  Prompt:   {}", outcome.prompt_path.display());
    if outcome.registration.error_count > 0 {
        println!(
            "{}",
            style(format!(
                "  {} of {} parameters failed to register (see warnings above)",
                outcome.registration.error_count,
                outcome.registration.error_count + outcome.registration.success_count
            ))
            .yellow()
        );
    }
    Ok(())
}

pub async fn cmd_post_merge(project_dir: &Path, issue: Option<u64>) -> Result<()> {
    let services = build_services(project_dir).await?;
    let progress = PipelineProgress::new("post-merge", post_merge::STEP_COUNT);
    let outcome = post_merge::run(services, issue, &progress)
        .await
        .context("post-merge pipeline failed")?;

    println!();
    println!(
        "{} #{} ({})",
        style("Cleaned up issue").bold(),
        outcome.issue_number,
        outcome.branch_name
    );
    println!(
        "  Parameters deleted: {} ({} failed)",
        outcome.parameters_deleted.success_count, outcome.parameters_deleted.error_count
    );
    if !outcome.issue_closed {
        println!("  Issue was already closed");
    }
    if outcome.parameters_deleted.error_count > 0 {
        println!(
            "{}",
            style("  Some parameters could not be deleted; re-run post-merge to retry").yellow()
        );
    }
    Ok(())
}
