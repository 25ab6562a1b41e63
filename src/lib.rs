//! Per-issue development sandboxes.
//!
//! `start-issue` takes the top "todo" issue off a GitHub Projects board and
//! provisions a git worktree, ports, a database, parameter store entries and
//! an AWS CLI profile for it. `post-merge` tears all of that down again.

pub mod aws_profile;
pub mod config;
pub mod container;
pub mod database;
pub mod environment;
pub mod errors;
pub mod git;
pub mod github;
pub mod prompt;
pub mod runner;
pub mod store;
pub mod translate;
pub mod ui;
pub mod workflow;

pub use errors::{Result, WorkflowError};
