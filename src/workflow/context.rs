//! Stage-typed pipeline contexts.
//!
//! Each stage owns the stage before it and dereferences to it, so a step can
//! only be called once every field it needs exists, and earlier fields stay
//! readable (`ctx.issue.number`, `ctx.config.trunk_branch`) at every later
//! stage without being copied.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use crate::aws_profile::CloudProfileManager;
use crate::config::WorkflowConfig;
use crate::container::{CleanupReport, ContainerManager};
use crate::database::DatabaseProvisioner;
use crate::environment::{DatabaseCredentials, EnvironmentParameters};
use crate::errors::Result;
use crate::git::{GitWorktreeManager, WorktreeInfo};
use crate::github::{BoardConfig, Issue, IssueTracker};
use crate::runner::CommandRunner;
use crate::store::{BatchSummary, ParameterBackend, ParameterMap, ParameterStore, get_required};
use crate::translate::Translator;

/// Builds a translator once the API key has been read from the store.
pub type TranslatorFactory = Box<dyn Fn(&str) -> Box<dyn Translator> + Send + Sync>;

/// Everything a pipeline needs from the outside world.
pub struct Services {
    pub config: WorkflowConfig,
    pub region: String,
    /// Directory the command was started in; any worktree of the repository.
    pub project_dir: PathBuf,
    pub runner: Arc<dyn CommandRunner>,
    pub parameters: Arc<dyn ParameterBackend>,
    pub translators: TranslatorFactory,
    pub aws_config_path: PathBuf,
}

macro_rules! stage {
    ($stage:ident => $prev:ty) => {
        impl Deref for $stage {
            type Target = $prev;

            fn deref(&self) -> &$prev {
                &self.prev
            }
        }
    };
}

/// Shared configuration loaded and every component constructed.
pub struct Initialized {
    pub config: WorkflowConfig,
    pub project_dir: PathBuf,
    pub runner: Arc<dyn CommandRunner>,
    pub translators: TranslatorFactory,
    pub store: ParameterStore,
    /// Everything under the `development` path.
    pub shared: ParameterMap,
    pub credentials: DatabaseCredentials,
    pub board: BoardConfig,
    pub git: GitWorktreeManager,
    pub tracker: IssueTracker,
    pub profiles: CloudProfileManager,
    pub database: DatabaseProvisioner,
    pub containers: ContainerManager,
}

impl Initialized {
    /// Read the shared parameters and wire up the components.
    pub async fn load(services: Services) -> Result<Self> {
        let Services {
            config,
            region,
            project_dir,
            runner,
            parameters,
            translators,
            aws_config_path,
        } = services;

        let store = ParameterStore::new(parameters, &config.parameter_root);
        let path = store.development_path();
        let shared = store.get_parameter_map(&path).await?;
        let required = |key: &str| get_required(&shared, key, &path).map(str::to_string);

        let credentials = DatabaseCredentials {
            admin_user: required("DATABASE_ADMIN_USER")?,
            admin_password: required("DATABASE_ADMIN_PASSWORD")?,
            user: required("DATABASE_USER")?,
            password: required("DATABASE_PASSWORD")?,
        };
        let board = BoardConfig {
            project_id: required("GITHUB_PROJECT_ID")?,
            status_field_name: required("GITHUB_STATUS_FIELD_NAME")?,
            todo_option_id: required("GITHUB_TODO_OPTION_ID")?,
            in_progress_option_id: required("GITHUB_IN_PROGRESS_OPTION_ID")?,
            in_review_option_id: required("GITHUB_IN_REVIEW_OPTION_ID")?,
        };

        let git = GitWorktreeManager::discover(
            runner.clone(),
            &project_dir,
            &config.remote,
            &config.trunk_branch,
        )
        .await?;
        let tracker = IssueTracker::new(runner.clone(), git.repo_root(), board.clone());
        let profiles = CloudProfileManager::new(
            aws_config_path,
            &config.profile_prefix,
            &config.reference_profile,
            &config.source_profile,
            region,
        );
        let database = DatabaseProvisioner::new(
            runner.clone(),
            &config.database_container,
            &credentials.admin_user,
            &config.admin_database,
        )
        .with_readiness(config.readiness_attempts, config.readiness_interval());
        let containers = ContainerManager::new(runner.clone());

        Ok(Self {
            config,
            project_dir,
            runner,
            translators,
            store,
            shared,
            credentials,
            board,
            git,
            tracker,
            profiles,
            database,
            containers,
        })
    }
}

// ── start-issue ─────────────────────────────────────────────────────

pub struct IssueSelected {
    pub prev: Initialized,
    pub issue: Issue,
    /// Branch prefix taken from the issue's labels.
    pub label: String,
}
stage!(IssueSelected => Initialized);

pub struct IssueInProgress {
    pub prev: IssueSelected,
    pub status_field_id: String,
}
stage!(IssueInProgress => IssueSelected);

pub struct Slugged {
    pub prev: IssueInProgress,
    pub slug: String,
    pub branch_name: String,
}
stage!(Slugged => IssueInProgress);

pub struct WorktreeCreated {
    pub prev: Slugged,
    pub worktree_path: PathBuf,
}
stage!(WorktreeCreated => Slugged);

pub struct EnvironmentRegistered {
    pub prev: WorktreeCreated,
    pub environment: EnvironmentParameters,
    pub registration: BatchSummary,
}
stage!(EnvironmentRegistered => WorktreeCreated);

pub struct ProfileCreated {
    pub prev: EnvironmentRegistered,
    /// `false` when the profile was already present.
    pub profile_created: bool,
}
stage!(ProfileCreated => EnvironmentRegistered);

pub struct DatabaseReady {
    pub prev: ProfileCreated,
    pub readiness_attempts_used: u32,
}
stage!(DatabaseReady => ProfileCreated);

pub struct PromptWritten {
    pub prev: DatabaseReady,
    pub prompt_path: PathBuf,
}
stage!(PromptWritten => DatabaseReady);

/// Summary of a finished start-issue run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartIssueOutcome {
    pub issue_number: u64,
    pub issue_title: String,
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub web_port: u16,
    pub api_port: u16,
    pub database_name: String,
    pub profile_name: String,
    pub prompt_path: PathBuf,
    pub registration: BatchSummary,
}

// ── post-merge ──────────────────────────────────────────────────────

/// The sandbox to tear down, reconstructed from the worktree listing.
pub struct TeardownTarget {
    pub prev: Initialized,
    pub issue_number: u64,
    pub worktree: WorktreeInfo,
    pub slug: String,
    pub environment: EnvironmentParameters,
}
stage!(TeardownTarget => Initialized);

pub struct TrunkSynced {
    pub prev: TeardownTarget,
}
stage!(TrunkSynced => TeardownTarget);

pub struct DatabaseDropped {
    pub prev: TrunkSynced,
}
stage!(DatabaseDropped => TrunkSynced);

pub struct ParametersDeleted {
    pub prev: DatabaseDropped,
    pub deletion: BatchSummary,
}
stage!(ParametersDeleted => DatabaseDropped);

pub struct ProfileDeleted {
    pub prev: ParametersDeleted,
    pub profile_deleted: bool,
}
stage!(ProfileDeleted => ParametersDeleted);

pub struct ContainerRemoved {
    pub prev: ProfileDeleted,
    pub cleanup: CleanupReport,
}
stage!(ContainerRemoved => ProfileDeleted);

pub struct WorktreeRemoved {
    pub prev: ContainerRemoved,
    pub local_branch_deleted: bool,
    pub remote_branch_deleted: bool,
}
stage!(WorktreeRemoved => ContainerRemoved);

/// Summary of a finished post-merge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMergeOutcome {
    pub issue_number: u64,
    pub branch_name: String,
    pub database_name: String,
    pub parameters_deleted: BatchSummary,
    pub profile_deleted: bool,
    pub container: CleanupReport,
    pub local_branch_deleted: bool,
    pub remote_branch_deleted: bool,
    pub issue_closed: bool,
}
