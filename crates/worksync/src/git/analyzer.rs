//! Pre-flight status and conflict analysis.
//!
//! The analyzer never mutates the working copy or the branch; the only refs it
//! move are the remote-tracking refs refreshed by fetch.

use std::collections::BTreeSet;
use std::path::Path;

use git2::{Oid, Repository};
use log::{debug, warn};
use tracing::info_span;

use super::auth::Credential;
use super::merge::conflict_blocks_for;
use super::repository::{self, NetworkPolicy, PathChange, Tracking};
use super::suggest;
use super::types::{ChangeKind, MergeOutcome, OperationType, StatusCheck};
use crate::error::{Result, WorksyncError};

/// Produces [`StatusCheck`] reports for workspaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusAnalyzer {
    policy: NetworkPolicy,
}

/// Analyzes `path` with the default network policy.
pub fn check_git_status(
    path: &Path,
    operation: OperationType,
    credential: Option<&Credential>,
) -> Result<StatusCheck> {
    StatusAnalyzer::default().check_git_status(path, operation, credential)
}

/// Result of the fetch step.
struct Refresh {
    connected: bool,
    remote_tip: Option<Oid>,
}

impl StatusAnalyzer {
    pub fn new(policy: NetworkPolicy) -> Self {
        Self { policy }
    }

    pub fn check_git_status(
        &self,
        path: &Path,
        operation: OperationType,
        credential: Option<&Credential>,
    ) -> Result<StatusCheck> {
        self.check_with_warnings(path, operation, credential, Vec::new())
    }

    /// Like [`check_git_status`](Self::check_git_status), with `warnings` placed
    /// ahead of the ones the analysis produces.
    pub fn check_with_warnings(
        &self,
        path: &Path,
        operation: OperationType,
        credential: Option<&Credential>,
        warnings: Vec<String>,
    ) -> Result<StatusCheck> {
        let span = info_span!("check_git_status", path = %path.display(), %operation);
        let _guard = span.enter();

        let repo = repository::open(path)?;
        let mut check = StatusCheck::new(operation);
        check.warnings = warnings;

        check.branch = repository::current_branch(&repo)?;
        let local_tip = repository::head_oid(&repo);
        check.is_empty_local_repository = local_tip.is_none();

        check.local_changes = repository::local_changes(&repo)?;
        check.has_uncommitted_changes = !check.local_changes.is_empty();
        check.can_commit =
            check.has_uncommitted_changes && check.local_changes.conflicting.is_empty();

        match repository::default_remote(&repo)? {
            None => {
                debug!("No remote configured for {}", path.display());
            }
            Some(remote) => {
                check.has_remote_repository = true;
                let tracking = match check.branch.as_deref() {
                    Some(branch) => repository::tracking(&repo, branch)?,
                    None => None,
                };
                match tracking {
                    Some(tracking) => {
                        self.analyze_tracked(&repo, &mut check, &tracking, local_tip, credential)?
                    }
                    None => {
                        self.analyze_untracked(&repo, &mut check, &remote, local_tip, credential)?
                    }
                }
            }
        }

        suggest::annotate(&mut check);
        debug!(
            "Status for {}: ahead={} behind={} conflicts={}",
            path.display(),
            check.local_commits_ahead,
            check.remote_commits_behind,
            check.conflict_details.len()
        );
        Ok(check)
    }

    fn refresh(
        &self,
        repo: &Repository,
        check: &mut StatusCheck,
        tracking: &Tracking,
        credential: Option<&Credential>,
        update_tracking: bool,
    ) -> Refresh {
        match repository::fetch_branch(repo, tracking, credential, &self.policy, update_tracking) {
            Ok(remote_tip) => Refresh {
                connected: true,
                remote_tip,
            },
            Err(e) => {
                warn!("Fetch from {} failed: {}", tracking.remote, e);
                check
                    .warnings
                    .push(format!("Could not reach remote '{}': {}", tracking.remote, e));
                if credential.is_some() || matches!(e, WorksyncError::GitAuthFailed(_)) {
                    check.warnings.push(
                        "The remote may have rejected the configured credentials".to_string(),
                    );
                }
                let remote_tip = if update_tracking {
                    repository::remote_tip(repo, tracking)
                } else {
                    None
                };
                Refresh {
                    connected: false,
                    remote_tip,
                }
            }
        }
    }

    fn analyze_tracked(
        &self,
        repo: &Repository,
        check: &mut StatusCheck,
        tracking: &Tracking,
        local_tip: Option<Oid>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        check.has_upstream_branch = true;
        check.remote_branch = Some(tracking.display());

        let refresh = self.refresh(repo, check, tracking, credential, true);
        check.can_connect_to_remote = refresh.connected;

        compare(repo, check, local_tip, refresh.remote_tip, refresh.connected)?;

        let ahead = check.local_commits_ahead;
        let behind = check.remote_commits_behind;
        check.can_pull = refresh.remote_tip.is_some() && refresh.connected && behind > 0;
        check.can_push = ahead > 0 && (!check.has_uncommitted_changes || check.is_first_push);
        check.needs_force_push = ahead > 0 && behind > 0;
        check.needs_force_pull = check.has_uncommitted_changes && behind > 0;
        Ok(())
    }

    /// A remote exists but the branch has no upstream. The would-be remote
    /// branch is probed without leaving any ref behind.
    fn analyze_untracked(
        &self,
        repo: &Repository,
        check: &mut StatusCheck,
        remote: &str,
        local_tip: Option<Oid>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        let branch = match check.branch.clone() {
            Some(branch) => branch,
            None => {
                check
                    .warnings
                    .push("HEAD is detached; check out a branch first".to_string());
                return Ok(());
            }
        };
        let candidate = Tracking {
            remote: remote.to_string(),
            branch,
        };

        let refresh = self.refresh(repo, check, &candidate, credential, false);
        check.can_connect_to_remote = refresh.connected;

        if refresh.remote_tip.is_some() {
            check.warnings.push(format!(
                "Remote branch {} already exists; a first push may collide with its history",
                candidate.display()
            ));
        }
        compare(repo, check, local_tip, refresh.remote_tip, refresh.connected)?;
        Ok(())
    }
}

/// Divergence counts, remote change classification and conflict detection.
fn compare(
    repo: &Repository,
    check: &mut StatusCheck,
    local_tip: Option<Oid>,
    remote_tip: Option<Oid>,
    connected: bool,
) -> Result<()> {
    let (local, remote) = match (local_tip, remote_tip) {
        (None, None) => {
            if connected {
                check.is_remote_repository_empty = true;
                check.is_first_push = true;
            }
            return Ok(());
        }
        (Some(local), None) => {
            check.local_commits_ahead = repository::count_commits(repo, local, None)?;
            if connected {
                check.is_remote_repository_empty = true;
                check.is_first_push = true;
                check.merge_outcome = Some(MergeOutcome::FirstPush);
            }
            check.can_auto_merge = true;
            return Ok(());
        }
        (None, Some(remote)) => {
            check.remote_commits_behind = repository::count_commits(repo, remote, None)?;
            for change in repository::changed_paths(repo, None, remote)? {
                check.remote_changes.push(change.kind, change.path);
            }
            if check.has_uncommitted_changes {
                detect_conflicts(repo, check, None, None, remote)?;
            } else {
                check.can_auto_merge = true;
                check.merge_outcome = Some(MergeOutcome::FastForwardPull);
            }
            return Ok(());
        }
        (Some(local), Some(remote)) => (local, remote),
    };

    let (ahead, behind) = repo.graph_ahead_behind(local, remote)?;
    check.local_commits_ahead = ahead;
    check.remote_commits_behind = behind;

    let base = repository::merge_base(repo, local, remote)?;
    let remote_diff = match base {
        Some(base) => repository::changed_paths(repo, Some(base), remote)?,
        None => repository::changed_paths(repo, Some(local), remote)?,
    };
    for change in remote_diff {
        check.remote_changes.push(change.kind, change.path);
    }

    if local == remote {
        check.can_auto_merge = true;
        check.merge_outcome = Some(MergeOutcome::UpToDate);
    } else if base == Some(remote) {
        check.can_auto_merge = true;
        check.merge_outcome = Some(MergeOutcome::FastForwardPush);
    } else if base == Some(local) && !check.has_uncommitted_changes {
        check.can_auto_merge = true;
        check.merge_outcome = Some(MergeOutcome::FastForwardPull);
    } else {
        detect_conflicts(repo, check, base, Some(local), remote)?;
    }
    Ok(())
}

fn touched(changes: &[PathChange]) -> BTreeSet<String> {
    changes
        .iter()
        .flat_map(|change| std::iter::once(change.path.clone()).chain(change.old_path.clone()))
        .collect()
}

fn only_added(changes: &[PathChange]) -> bool {
    changes.iter().all(|change| change.kind == ChangeKind::Added)
}

/// Three-way content comparison of every path changed on both sides of `base`.
fn detect_conflicts(
    repo: &Repository,
    check: &mut StatusCheck,
    base: Option<Oid>,
    local: Option<Oid>,
    remote: Oid,
) -> Result<()> {
    let remote_changes = repository::changed_paths(repo, base, remote)?;
    let local_changes = match local {
        Some(local) => repository::changed_paths(repo, base, local)?,
        None => Vec::new(),
    };
    let uncommitted = check.local_changes.paths();

    let local_touched: BTreeSet<String> = touched(&local_changes)
        .into_iter()
        .chain(uncommitted.iter().cloned())
        .collect();
    let remote_touched = touched(&remote_changes);
    let overlap: Vec<&String> = local_touched.intersection(&remote_touched).collect();

    for path in &overlap {
        let base_text = match base {
            Some(base) => repository::blob_text(repo, base, path)?,
            None => None,
        };
        let local_text = if uncommitted.contains(*path) {
            repository::workdir_text(repo, path)?
        } else {
            match local {
                Some(local) => repository::blob_text(repo, local, path)?,
                None => None,
            }
        };
        let remote_text = repository::blob_text(repo, remote, path)?;

        if local_text == remote_text {
            continue;
        }
        let blocks = conflict_blocks_for(
            base_text.as_deref().unwrap_or(""),
            local_text.as_deref().unwrap_or(""),
            remote_text.as_deref().unwrap_or(""),
        );
        if !blocks.is_empty() {
            debug!("{} has {} conflict block(s)", path, blocks.len());
            check.conflict_details.insert(path.to_string(), blocks);
        }
    }

    check.has_actual_conflicts = !check.conflict_details.is_empty();
    check.can_auto_merge = !check.has_actual_conflicts;
    check.merge_outcome = Some(if check.has_actual_conflicts {
        MergeOutcome::Conflicts
    } else if overlap.is_empty() {
        if only_added(&local_changes)
            && check.local_changes.only_new_files()
            && only_added(&remote_changes)
        {
            MergeOutcome::OnlyNewFiles
        } else {
            MergeOutcome::NonOverlappingFiles
        }
    } else {
        MergeOutcome::NonOverlappingChanges
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    #[test]
    fn test_no_remote_never_pulls_or_pushes() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("collections.json"), "[]\n").unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        repository::commit_all(&repo, "initial", &sig).unwrap();

        let check = check_git_status(dir.path(), OperationType::Push, None).unwrap();
        assert!(!check.has_remote_repository);
        assert!(!check.can_pull);
        assert!(!check.can_push);
        assert!(!check.can_commit);
        assert!(check
            .warnings
            .iter()
            .any(|w| w.contains("No remote repository configured")));
    }

    #[test]
    fn test_uncommitted_changes_can_commit() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("environments.json"), "{}\n").unwrap();

        let check = check_git_status(dir.path(), OperationType::Commit, None).unwrap();
        assert!(check.is_empty_local_repository);
        assert!(check.has_uncommitted_changes);
        assert!(check.can_commit);
        assert_eq!(check.local_changes.untracked, vec!["environments.json"]);
    }

    #[test]
    fn test_not_a_repository() {
        let dir = TempDir::new().unwrap();
        let err = check_git_status(dir.path(), OperationType::Pull, None).unwrap_err();
        assert!(err.is_operation_failure());
    }
}
