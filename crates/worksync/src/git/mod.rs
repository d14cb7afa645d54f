//! Git analysis and operations for workspace repositories.
//!
//! - `analyzer` builds read-only status reports before an operation runs
//! - `executor` performs commit, push, pull and stash operations
//! - `merge` extracts line-level conflict regions from three versions of a file

pub mod analyzer;
pub mod auth;
pub mod executor;
pub mod merge;
pub mod repository;
mod suggest;
pub mod types;

pub use analyzer::{check_git_status, StatusAnalyzer};
pub use auth::{resolve_credential, Credential, CredentialProvider, WorkspaceCredentials};
pub use executor::GitExecutor;
pub use merge::conflict_blocks_for;
pub use repository::{NetworkPolicy, Tracking, DEFAULT_REMOTE};
pub use types::*;
