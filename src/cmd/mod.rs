//! CLI command implementations.
//!
//! | Module | Commands handled          |
//! |--------|---------------------------|
//! | `run`  | `StartIssue`, `PostMerge` |

pub mod run;

pub use run::{cmd_post_merge, cmd_start_issue};
