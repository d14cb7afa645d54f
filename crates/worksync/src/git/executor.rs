//! Mutating git operations.
//!
//! Each call opens the repository, performs one logical operation and reports
//! an [`OperationResult`]. Precondition and network failures come back as a
//! failed result; validation and internal errors propagate.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use git2::{ErrorCode, PushOptions, Repository, StashApplyOptions, StashFlags};
use log::{debug, info, warn};
use tracing::info_span;

use super::auth::{remote_callbacks, Credential};
use super::repository::{self, NetworkPolicy, Tracking};
use super::types::{GitOperation, OperationPhase, OperationResult};
use crate::error::{Result, WorksyncError};

/// Runs commit, push, pull and stash operations.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    policy: NetworkPolicy,
    author_name: String,
    author_email: String,
}

impl Default for GitExecutor {
    fn default() -> Self {
        Self::new(NetworkPolicy::default(), "worksync", "worksync@localhost")
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

fn phase(operation: GitOperation, phase: OperationPhase) {
    debug!("{}: {}", operation, phase);
}

fn require_branch(repo: &Repository, action: &str) -> Result<String> {
    repository::current_branch(repo)?.ok_or_else(|| {
        WorksyncError::state(format!("HEAD is detached; check out a branch before {}", action))
    })
}

fn require_tracking(repo: &Repository, branch: &str) -> Result<Tracking> {
    repository::tracking(repo, branch)?.ok_or_else(|| {
        WorksyncError::state(format!(
            "Branch '{}' has no upstream branch; add a remote repository first",
            branch
        ))
    })
}

/// Paths touched between `base` (or the empty tree) and `tip`.
fn touched_files(repo: &Repository, base: Option<git2::Oid>, tip: git2::Oid) -> Result<Vec<String>> {
    let paths: BTreeSet<String> = repository::changed_paths(repo, base, tip)?
        .into_iter()
        .map(|change| change.path)
        .collect();
    Ok(paths.into_iter().collect())
}

/// Why a push whose per-ref updates are `statuses` did not succeed, if it did not.
/// Success needs at least one ref reported as updated and none rejected.
fn push_failure(statuses: &[(String, Option<String>)]) -> Option<&'static str> {
    if statuses.iter().any(|(_, status)| status.is_some()) {
        Some("was rejected")
    } else if statuses.is_empty() {
        Some("could not be confirmed: no ref status reported")
    } else {
        None
    }
}

impl GitExecutor {
    pub fn new(
        policy: NetworkPolicy,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    fn run<F>(&self, operation: GitOperation, path: &Path, body: F) -> Result<OperationResult>
    where
        F: FnOnce() -> Result<OperationResult>,
    {
        let span = info_span!("git_operation", %operation, path = %path.display());
        let _guard = span.enter();
        phase(operation, OperationPhase::Validating);

        match body() {
            Ok(result) => {
                if result.success {
                    phase(operation, OperationPhase::Succeeded);
                    info!("{} succeeded: {}", operation, result.message);
                } else {
                    phase(operation, OperationPhase::Failed);
                    warn!("{} failed: {}", operation, result.message);
                }
                Ok(result)
            }
            Err(e) if e.is_operation_failure() => {
                phase(operation, OperationPhase::Failed);
                warn!("{} failed: {}", operation, e);
                Ok(OperationResult::failed(operation, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn signature(&self, repo: &Repository) -> Result<git2::Signature<'static>> {
        repository::signature(repo, &self.author_name, &self.author_email)
    }

    /// Stages every change and commits it.
    pub fn commit(&self, path: &Path, message: &str) -> Result<OperationResult> {
        let message = message.trim();
        if message.is_empty() {
            return Err(WorksyncError::validation("Commit message must not be empty"));
        }

        self.run(GitOperation::Commit, path, || {
            let repo = repository::open(path)?;
            let changes = repository::local_changes(&repo)?;
            if changes.is_empty() {
                return Err(WorksyncError::state("Nothing to commit"));
            }
            if !changes.conflicting.is_empty() {
                return Err(WorksyncError::state(format!(
                    "Cannot commit with unresolved conflicts: {}",
                    changes.conflicting.join(", ")
                )));
            }

            phase(GitOperation::Commit, OperationPhase::Mutating);
            let sig = self.signature(&repo)?;
            let oid = repository::commit_all(&repo, message, &sig)?;

            let files: Vec<String> = changes.paths().into_iter().collect();
            let mut result = OperationResult::succeeded(
                GitOperation::Commit,
                format!("Committed {}", plural(files.len(), "file")),
            )
            .with_files(files)
            .with_detail(format!("commit {}", oid));

            let added: Vec<&String> = changes.added.iter().chain(&changes.untracked).collect();
            let modified: Vec<&String> = changes.changed.iter().chain(&changes.modified).collect();
            let removed: Vec<&String> = changes.removed.iter().chain(&changes.missing).collect();
            for (label, list) in [("added", added), ("modified", modified), ("removed", removed)] {
                if !list.is_empty() {
                    let names: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
                    result = result.with_detail(format!("{}: {}", label, names.join(", ")));
                }
            }
            Ok(result)
        })
    }

    pub fn push(&self, path: &Path, credential: Option<&Credential>) -> Result<OperationResult> {
        self.run(GitOperation::Push, path, || self.push_inner(path, credential, false))
    }

    /// Pushes with the force flag, overwriting remote history.
    pub fn force_push(&self, path: &Path, credential: Option<&Credential>) -> Result<OperationResult> {
        self.run(GitOperation::ForcePush, path, || {
            self.push_inner(path, credential, true)
        })
    }

    fn push_inner(
        &self,
        path: &Path,
        credential: Option<&Credential>,
        force: bool,
    ) -> Result<OperationResult> {
        let operation = if force {
            GitOperation::ForcePush
        } else {
            GitOperation::Push
        };
        let repo = repository::open(path)?;
        let branch = require_branch(&repo, "pushing")?;
        let tracking = require_tracking(&repo, &branch)?;
        let local = repository::head_oid(&repo)
            .ok_or_else(|| WorksyncError::state("Nothing to push: the repository has no commits"))?;

        phase(operation, OperationPhase::Fetching);
        let remote_tip = repository::fetch_branch(&repo, &tracking, credential, &self.policy, true)?;

        if remote_tip == Some(local) {
            return Ok(OperationResult::succeeded(operation, "Everything up-to-date")
                .with_detail(format!("{} -> {}", branch, tracking.display())));
        }

        let unpushed = repository::list_commits(&repo, local, remote_tip)?;
        let mut overwritten = 0;
        if let Some(remote_tip) = remote_tip {
            if force {
                overwritten = repository::count_commits(&repo, remote_tip, Some(local))?;
            } else if unpushed.is_empty() {
                return Ok(OperationResult::succeeded(operation, "Everything up-to-date")
                    .with_detail(format!("{} is behind {}", branch, tracking.display())));
            } else if !repo.graph_descendant_of(local, remote_tip)? {
                return Err(WorksyncError::state(format!(
                    "Push rejected: {} has commits that are not in the local history; pull first or force-push",
                    tracking.display()
                )));
            }
        }

        let base = match remote_tip {
            Some(remote_tip) => repository::merge_base(&repo, local, remote_tip)?,
            None => None,
        };
        let files = touched_files(&repo, base, local)?;

        phase(operation, OperationPhase::Mutating);
        let refspec = format!(
            "{}refs/heads/{}:{}",
            if force { "+" } else { "" },
            branch,
            tracking.upstream_ref()
        );
        let statuses: RefCell<Vec<(String, Option<String>)>> = RefCell::new(Vec::new());
        {
            let deadline = self.policy.deadline();
            let mut callbacks = remote_callbacks(credential, deadline);
            callbacks.push_update_reference(|refname, status| {
                statuses
                    .borrow_mut()
                    .push((refname.to_string(), status.map(str::to_string)));
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let mut remote = repo.find_remote(&tracking.remote)?;
            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| self.policy.network_error(e, deadline))?;
        }

        let statuses = statuses.into_inner();
        let details: Vec<String> = statuses
            .iter()
            .map(|(refname, status)| match status {
                None => format!("{}: ok", refname),
                Some(reason) => format!("{}: rejected ({})", refname, reason),
            })
            .collect();

        if let Some(reason) = push_failure(&statuses) {
            let mut result =
                OperationResult::failed(operation, format!("Push to {} {}", tracking.display(), reason));
            result.details = details;
            return Ok(result);
        }

        repo.reference(&tracking.remote_ref(), local, true, "worksync: push")?;

        let mut result = OperationResult::succeeded(
            operation,
            format!(
                "Pushed {} to {}",
                plural(unpushed.len(), "commit"),
                tracking.display()
            ),
        )
        .with_files(files)
        .with_detail(format!("{} -> {}", branch, tracking.display()))
        .with_detail(format!("head {}", local));
        result.details.extend(details);
        if remote_tip.is_none() {
            result = result.with_detail("Created remote branch");
        }
        if force {
            result = result.with_detail("Remote history was overwritten");
            if overwritten > 0 {
                result = result.with_detail(format!(
                    "Discarded {} from the remote",
                    plural(overwritten, "commit")
                ));
            }
        }
        Ok(result)
    }

    /// Resets and cleans a dirty working tree.
    fn discard_local_changes(&self, repo: &Repository, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        warn!(
            "Discarding {} before pull: {}",
            plural(paths.len(), "local change"),
            paths.join(", ")
        );

        match repository::head_oid(repo) {
            Some(head) => repository::reset_hard(repo, head)?,
            None => {
                let mut index = repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }
        repository::remove_untracked(repo)?;

        let remaining = repository::local_changes(repo)?;
        if !remaining.is_empty() {
            return Err(WorksyncError::state(format!(
                "Working tree is still dirty after reset: {}",
                remaining.paths().into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(())
    }

    /// Fetches the tracking branch, then discards local changes and integrates it.
    ///
    /// Local changes are only discarded once the fetch has succeeded. Any failure
    /// after that still lists what was discarded.
    pub fn pull(&self, path: &Path, credential: Option<&Credential>) -> Result<OperationResult> {
        self.run(GitOperation::Pull, path, || {
            let repo = repository::open(path)?;
            let branch = require_branch(&repo, "pulling")?;
            let tracking = require_tracking(&repo, &branch)?;
            let pending: Vec<String> =
                repository::local_changes(&repo)?.paths().into_iter().collect();

            phase(GitOperation::Pull, OperationPhase::Fetching);
            let remote_tip =
                match repository::fetch_branch(&repo, &tracking, credential, &self.policy, true)? {
                    Some(tip) => tip,
                    None => {
                        return Ok(OperationResult::succeeded(
                            GitOperation::Pull,
                            format!(
                                "Remote branch {} does not exist yet; nothing to pull",
                                tracking.display()
                            ),
                        ));
                    }
                };

            phase(GitOperation::Pull, OperationPhase::Mutating);
            let outcome = self
                .discard_local_changes(&repo, &pending)
                .and_then(|()| self.integrate(&repo, &branch, &tracking, remote_tip));
            let outcome = match outcome {
                Err(e) if !pending.is_empty() => {
                    warn!("Pull failed after discarding local changes: {}", e);
                    Ok(OperationResult::failed(GitOperation::Pull, e.to_string()))
                }
                other => other,
            };
            outcome.map(|result| {
                if pending.is_empty() {
                    result
                } else {
                    result.with_detail(format!("Discarded local changes: {}", pending.join(", ")))
                }
            })
        })
    }

    /// Moves a clean working tree onto `remote_tip` by fast-forward or merge commit.
    fn integrate(
        &self,
        repo: &Repository,
        branch: &str,
        tracking: &Tracking,
        remote_tip: git2::Oid,
    ) -> Result<OperationResult> {
        let local = match repository::head_oid(repo) {
            Some(local) => local,
            None => {
                repository::reset_hard(repo, remote_tip)?;
                let files = touched_files(repo, None, remote_tip)?;
                return Ok(OperationResult::succeeded(
                    GitOperation::Pull,
                    format!("Checked out {} from {}", branch, tracking.display()),
                )
                .with_files(files)
                .with_detail(format!("head {}", remote_tip)));
            }
        };

        if local == remote_tip {
            return Ok(OperationResult::succeeded(GitOperation::Pull, "Already up to date"));
        }

        let annotated = repo.find_annotated_commit(remote_tip)?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(OperationResult::succeeded(GitOperation::Pull, "Already up to date"));
        }

        if analysis.is_fast_forward() {
            let files = touched_files(repo, Some(local), remote_tip)?;
            repository::reset_hard(repo, remote_tip)?;
            return Ok(OperationResult::succeeded(
                GitOperation::Pull,
                format!(
                    "Fast-forwarded {} to {} ({})",
                    branch,
                    tracking.display(),
                    plural(files.len(), "file")
                ),
            )
            .with_files(files)
            .with_detail(format!("head {}", remote_tip)));
        }

        repo.merge(&[&annotated], None, None)?;
        let mut index = repo.index()?;
        if index.has_conflicts() {
            let conflicts: BTreeSet<String> = index
                .conflicts()?
                .filter_map(|conflict| conflict.ok())
                .filter_map(|conflict| conflict.our.or(conflict.their))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            repository::reset_hard(repo, local)?;
            repo.cleanup_state()?;
            return Ok(OperationResult::failed(
                GitOperation::Pull,
                format!(
                    "Pull aborted: {} conflict with {}",
                    plural(conflicts.len(), "file"),
                    tracking.display()
                ),
            )
            .with_files(conflicts.into_iter().collect())
            .with_detail("Resolve the conflicts manually or force-pull to take the remote version"));
        }

        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = self.signature(repo)?;
        let ours = repo.find_commit(local)?;
        let theirs = repo.find_commit(remote_tip)?;
        let merge_oid = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge {} into {}", tracking.display(), branch),
            &tree,
            &[&ours, &theirs],
        )?;
        repo.cleanup_state()?;

        let files = touched_files(repo, Some(local), merge_oid)?;
        Ok(OperationResult::succeeded(
            GitOperation::Pull,
            format!("Merged {} into {}", tracking.display(), branch),
        )
        .with_files(files)
        .with_detail(format!("merge commit {}", merge_oid)))
    }

    /// Discards every local change and commit and resets to the tracking branch.
    pub fn force_pull(&self, path: &Path, credential: Option<&Credential>) -> Result<OperationResult> {
        self.run(GitOperation::ForcePull, path, || {
            let repo = repository::open(path)?;
            let branch = require_branch(&repo, "pulling")?;
            let tracking = require_tracking(&repo, &branch)?;

            let discarded: Vec<String> =
                repository::local_changes(&repo)?.paths().into_iter().collect();

            phase(GitOperation::ForcePull, OperationPhase::Fetching);
            let remote_tip =
                match repository::fetch_branch(&repo, &tracking, credential, &self.policy, true)? {
                    Some(tip) => tip,
                    None => {
                        return Ok(OperationResult::succeeded(
                            GitOperation::ForcePull,
                            format!(
                                "Remote branch {} does not exist yet; nothing to pull",
                                tracking.display()
                            ),
                        ));
                    }
                };

            let dropped_commits = match repository::head_oid(&repo) {
                Some(local) => repository::count_commits(&repo, local, Some(remote_tip))?,
                None => 0,
            };

            phase(GitOperation::ForcePull, OperationPhase::Mutating);
            repository::reset_hard(&repo, remote_tip)?;
            repository::remove_untracked(&repo)?;

            let mut result = OperationResult::succeeded(
                GitOperation::ForcePull,
                format!("Reset {} to {}", branch, tracking.display()),
            )
            .with_files(discarded.clone())
            .with_detail(format!("head {}", remote_tip));
            if !discarded.is_empty() {
                result = result.with_detail(format!(
                    "Discarded {}",
                    plural(discarded.len(), "local change")
                ));
            }
            if dropped_commits > 0 {
                result = result.with_detail(format!(
                    "Discarded {}",
                    plural(dropped_commits, "local commit")
                ));
            }
            Ok(result)
        })
    }

    /// Saves all local changes, including untracked files, to a new stash entry.
    pub fn stash(&self, path: &Path) -> Result<OperationResult> {
        self.run(GitOperation::Stash, path, || {
            let mut repo = repository::open(path)?;
            let changes = repository::local_changes(&repo)?;
            if changes.is_empty() {
                return Err(WorksyncError::state("No local changes to stash"));
            }
            if repository::head_oid(&repo).is_none() {
                return Err(WorksyncError::state(
                    "Cannot stash in a repository without commits",
                ));
            }

            phase(GitOperation::Stash, OperationPhase::Mutating);
            let sig = self.signature(&repo)?;
            let message = format!("worksync stash {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
            let oid = repo.stash_save(&sig, &message, Some(StashFlags::INCLUDE_UNTRACKED))?;

            let files: Vec<String> = changes.paths().into_iter().collect();
            Ok(OperationResult::succeeded(
                GitOperation::Stash,
                format!("Stashed {}", plural(files.len(), "change")),
            )
            .with_files(files)
            .with_detail(format!("stash {}", oid)))
        })
    }

    /// Restores and drops the most recent stash entry.
    pub fn pop_stash(&self, path: &Path) -> Result<OperationResult> {
        self.run(GitOperation::PopStash, path, || {
            let mut repo = repository::open(path)?;
            let mut entries = 0usize;
            repo.stash_foreach(|_, _, _| {
                entries += 1;
                true
            })?;
            if entries == 0 {
                return Err(WorksyncError::state("No stash entries to restore"));
            }

            phase(GitOperation::PopStash, OperationPhase::Mutating);
            let mut options = StashApplyOptions::new();
            match repo.stash_pop(0, Some(&mut options)) {
                Ok(()) => {}
                Err(e) if e.code() == ErrorCode::Conflict || e.code() == ErrorCode::MergeConflict => {
                    return Err(WorksyncError::state(
                        "Stash could not be restored because it conflicts with local changes",
                    ));
                }
                Err(e) => return Err(e.into()),
            }

            let files: Vec<String> = repository::local_changes(&repo)?.paths().into_iter().collect();
            let remaining = entries - 1;
            Ok(OperationResult::succeeded(
                GitOperation::PopStash,
                format!("Restored {}", plural(files.len(), "change")),
            )
            .with_files(files)
            .with_detail(if remaining == 1 {
                "1 stash entry left".to_string()
            } else {
                format!("{} stash entries left", remaining)
            }))
        })
    }
}
