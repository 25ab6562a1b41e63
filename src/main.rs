use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::backtrace::BacktraceStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "issueflow")]
#[command(version, about = "Per-issue development sandboxes for GitHub Projects boards")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory inside the repository; defaults to the current directory
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Take the top "todo" issue off the board and build its sandbox
    StartIssue,
    /// Tear down the sandbox of a merged issue and close it
    PostMerge {
        /// Issue number; inferred from the current branch when omitted
        #[arg(long)]
        issue: Option<u64>,
    },
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "issueflow=debug"
    } else {
        "issueflow=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `[timestamp] error: message`, then the cause chain and any captured backtrace.
fn report_fatal(err: &anyhow::Error) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    eprintln!("[{}] error: {}", timestamp, err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        eprintln!("{}", backtrace);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::StartIssue => cmd::cmd_start_issue(&project_dir).await,
        Commands::PostMerge { issue } => cmd::cmd_post_merge(&project_dir, issue).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_fatal(&err);
            ExitCode::FAILURE
        }
    }
}
