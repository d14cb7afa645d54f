//! libgit2 plumbing shared by the analyzer, the executor and the lifecycle manager.
//!
//! Every function takes an already opened [`Repository`]; callers open one per
//! operation and drop it before returning.

use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::{Duration, Instant};

use git2::build::CheckoutBuilder;
use git2::{
    AutotagOption, Delta, DiffFindOptions, ErrorCode, FetchOptions, FetchPrune, IndexAddOption,
    Oid, Repository, ResetType, Signature, StatusOptions,
};
use log::{debug, warn};

use super::auth::{remote_callbacks, Credential};
use super::types::{ChangeKind, LocalChanges};
use crate::error::{is_ref_not_advertised, Result, WorksyncError};

/// Remote every workspace talks to.
pub const DEFAULT_REMOTE: &str = "origin";

static GLOBAL_TIMEOUTS: Once = Once::new();

/// Bounded-timeout policy for network calls. One attempt, no retries.
#[derive(Debug, Clone, Copy)]
pub struct NetworkPolicy {
    timeout: Duration,
}

impl NetworkPolicy {
    /// Creates the policy and installs libgit2's connect/read timeouts on first use.
    pub fn new(timeout: Duration) -> Self {
        GLOBAL_TIMEOUTS.call_once(|| {
            let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
            // SAFETY: process-global libgit2 options, written once before any transport is used.
            let result = unsafe {
                git2::opts::set_server_connect_timeout_in_milliseconds(millis)
                    .and_then(|_| git2::opts::set_server_timeout_in_milliseconds(millis))
            };
            if let Err(e) = result {
                warn!("Could not install libgit2 server timeouts: {}", e);
            }
        });
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    pub(crate) fn fetch_options<'a>(
        &self,
        credential: Option<&'a Credential>,
        deadline: Instant,
    ) -> FetchOptions<'a> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(remote_callbacks(credential, deadline));
        options.download_tags(AutotagOption::None);
        options
    }

    /// Maps a failed network call, reporting a timeout once the deadline has passed.
    pub(crate) fn network_error(&self, err: git2::Error, deadline: Instant) -> WorksyncError {
        if Instant::now() >= deadline {
            WorksyncError::GitTimeout(self.timeout.as_secs())
        } else {
            WorksyncError::from(err)
        }
    }
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

pub(crate) fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| match e.code() {
        ErrorCode::NotFound => {
            WorksyncError::state(format!("Not a git repository: {}", path.display()))
        }
        _ => e.into(),
    })
}

/// Current branch name, including an unborn branch HEAD points at. `None` when detached.
pub(crate) fn current_branch(repo: &Repository) -> Result<Option<String>> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|target| target.strip_prefix("refs/heads/"))
                .map(str::to_string))
        }
        Err(e) => Err(e.into()),
    }
}

/// Id of the commit HEAD points at; `None` for an empty repository.
pub(crate) fn head_oid(repo: &Repository) -> Option<Oid> {
    repo.head().ok().and_then(|head| head.target())
}

/// `origin` if configured, else the first remote.
pub(crate) fn default_remote(repo: &Repository) -> Result<Option<String>> {
    let remotes = repo.remotes()?;
    let names: Vec<&str> = remotes.iter().flatten().collect();
    if names.contains(&DEFAULT_REMOTE) {
        return Ok(Some(DEFAULT_REMOTE.to_string()));
    }
    Ok(names.first().map(|name| name.to_string()))
}

/// Upstream configuration of a local branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    pub remote: String,
    pub branch: String,
}

impl Tracking {
    /// `origin/<branch>` form.
    pub fn display(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    pub fn remote_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }

    pub fn upstream_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

fn config_string(config: &git2::Config, key: &str) -> Result<Option<String>> {
    match config.get_string(key) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads `branch.<name>.remote` and `branch.<name>.merge`.
pub(crate) fn tracking(repo: &Repository, local_branch: &str) -> Result<Option<Tracking>> {
    let config = repo.config()?.snapshot()?;
    let remote = config_string(&config, &format!("branch.{}.remote", local_branch))?;
    let merge = config_string(&config, &format!("branch.{}.merge", local_branch))?;

    Ok(match (remote, merge) {
        (Some(remote), Some(merge)) => Some(Tracking {
            remote,
            branch: merge
                .strip_prefix("refs/heads/")
                .unwrap_or(&merge)
                .to_string(),
        }),
        _ => None,
    })
}

/// Writes the upstream configuration directly so it also works for unborn
/// branches and remotes without any commits.
pub(crate) fn bind_tracking(
    repo: &Repository,
    local_branch: &str,
    remote: &str,
    remote_branch: &str,
) -> Result<Tracking> {
    let mut config = repo.config()?;
    config.set_str(&format!("branch.{}.remote", local_branch), remote)?;
    config.set_str(
        &format!("branch.{}.merge", local_branch),
        &format!("refs/heads/{}", remote_branch),
    )?;
    debug!(
        "Bound branch {} to {}/{}",
        local_branch, remote, remote_branch
    );
    Ok(Tracking {
        remote: remote.to_string(),
        branch: remote_branch.to_string(),
    })
}

/// Namespace for refs written by probe-only fetches; removed again before returning.
const PROBE_NAMESPACE: &str = "refs/worksync/probe";

fn delete_ref(repo: &Repository, name: &str) -> Result<()> {
    match repo.find_reference(name) {
        Ok(mut reference) => Ok(reference.delete()?),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fetches every branch of `remote_name` into `refs/remotes/<remote>/*` and
/// prunes tracking refs of branches the remote no longer has. Works for remotes
/// without any refs.
pub(crate) fn fetch_remote(
    repo: &Repository,
    remote_name: &str,
    credential: Option<&Credential>,
    policy: &NetworkPolicy,
) -> Result<()> {
    let mut remote = repo.find_remote(remote_name)?;
    let refspec = format!("+refs/heads/*:refs/remotes/{}/*", remote_name);

    let deadline = policy.deadline();
    let mut options = policy.fetch_options(credential, deadline);
    options.prune(FetchPrune::On);
    debug!("Fetching {} from {}", refspec, remote_name);
    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| policy.network_error(e, deadline))
}

/// Branch names under `refs/remotes/<remote>/`, as last fetched.
pub(crate) fn remote_branches(repo: &Repository, remote_name: &str) -> Result<Vec<String>> {
    let prefix = format!("refs/remotes/{}/", remote_name);
    let mut branches = Vec::new();
    for reference in repo.references_glob(&format!("{}*", prefix))? {
        let reference = reference?;
        if let Some(branch) = reference.name().and_then(|name| name.strip_prefix(&prefix)) {
            if branch != "HEAD" {
                branches.push(branch.to_string());
            }
        }
    }
    branches.sort();
    Ok(branches)
}

/// Fetches one remote branch and returns its tip, or `None` if the remote
/// does not have it.
///
/// With `update_tracking` all remote-tracking refs of the remote are refreshed
/// and pruned. Otherwise the branch is fetched into a temporary ref that is
/// deleted again, so only objects are left behind.
pub(crate) fn fetch_branch(
    repo: &Repository,
    tracking: &Tracking,
    credential: Option<&Credential>,
    policy: &NetworkPolicy,
    update_tracking: bool,
) -> Result<Option<Oid>> {
    if update_tracking {
        return match fetch_remote(repo, &tracking.remote, credential, policy) {
            Ok(()) => Ok(remote_tip(repo, tracking)),
            Err(WorksyncError::RefNotAdvertised(_)) => {
                delete_ref(repo, &tracking.remote_ref())?;
                Ok(None)
            }
            Err(e) => Err(e),
        };
    }

    let probe_ref = format!("{}/{}/{}", PROBE_NAMESPACE, tracking.remote, tracking.branch);
    delete_ref(repo, &probe_ref)?;
    let mut remote = repo.find_remote(&tracking.remote)?;
    let refspec = format!("+{}:{}", tracking.upstream_ref(), probe_ref);

    let deadline = policy.deadline();
    let mut options = policy.fetch_options(credential, deadline);
    debug!("Probing {} on {}", tracking.branch, tracking.remote);
    let fetched = remote.fetch(&[refspec.as_str()], Some(&mut options), None);
    let tip = repo.refname_to_id(&probe_ref).ok();
    delete_ref(repo, &probe_ref)?;

    match fetched {
        Ok(()) => Ok(tip),
        Err(e) if is_ref_not_advertised(e.message()) => {
            debug!("{} is not advertised by {}", tracking.branch, tracking.remote);
            Ok(None)
        }
        Err(e) => Err(policy.network_error(e, deadline)),
    }
}

/// Tip of the remote-tracking ref as last fetched.
pub(crate) fn remote_tip(repo: &Repository, tracking: &Tracking) -> Option<Oid> {
    repo.refname_to_id(&tracking.remote_ref()).ok()
}

pub(crate) fn merge_base(repo: &Repository, a: Oid, b: Oid) -> Result<Option<Oid>> {
    match repo.merge_base(a, b) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Commits reachable from `from` but not from `hide`, newest first.
pub(crate) fn list_commits(repo: &Repository, from: Oid, hide: Option<Oid>) -> Result<Vec<Oid>> {
    let mut walk = repo.revwalk()?;
    walk.push(from)?;
    if let Some(hide) = hide {
        walk.hide(hide)?;
    }
    walk.map(|oid| oid.map_err(WorksyncError::from)).collect()
}

pub(crate) fn count_commits(repo: &Repository, from: Oid, hide: Option<Oid>) -> Result<usize> {
    Ok(list_commits(repo, from, hide)?.len())
}

/// One path touched between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathChange {
    pub path: String,
    /// Previous location of a renamed or copied file.
    pub old_path: Option<String>,
    pub kind: ChangeKind,
}

/// Paths that differ between `old` (or the empty tree) and `new`, with renames detected.
pub(crate) fn changed_paths(repo: &Repository, old: Option<Oid>, new: Oid) -> Result<Vec<PathChange>> {
    let new_tree = repo.find_commit(new)?.tree()?;
    let old_tree = match old {
        Some(oid) => Some(repo.find_commit(oid)?.tree()?),
        None => None,
    };

    let mut diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
    let mut find = DiffFindOptions::new();
    find.renames(true).copies(true);
    diff.find_similar(Some(&mut find))?;

    let lossy = |p: Option<&Path>| p.map(|p| p.to_string_lossy().replace('\\', "/"));
    let mut changes = Vec::new();
    for delta in diff.deltas() {
        let kind = match delta.status() {
            Delta::Added => ChangeKind::Added,
            Delta::Deleted => ChangeKind::Removed,
            Delta::Modified | Delta::Typechange => ChangeKind::Modified,
            Delta::Renamed => ChangeKind::Renamed,
            Delta::Copied => ChangeKind::Copied,
            _ => continue,
        };
        let new_path = lossy(delta.new_file().path());
        let old_path = lossy(delta.old_file().path());
        let (path, old_path) = match kind {
            ChangeKind::Removed => (old_path, None),
            ChangeKind::Renamed | ChangeKind::Copied => (new_path, old_path),
            _ => (new_path.or(old_path), None),
        };
        if let Some(path) = path {
            changes.push(PathChange {
                path,
                old_path,
                kind,
            });
        }
    }
    Ok(changes)
}

/// Text of `path` at `commit`; `None` if the file does not exist there.
pub(crate) fn blob_text(repo: &Repository, commit: Oid, path: &str) -> Result<Option<String>> {
    let tree = repo.find_commit(commit)?.tree()?;
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let blob = repo.find_blob(entry.id())?;
    Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
}

/// Working-copy text of `path`; `None` if the file is absent.
pub(crate) fn workdir_text(repo: &Repository, path: &str) -> Result<Option<String>> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| WorksyncError::state("Repository has no working directory"))?;
    let full = workdir.join(path);
    if !full.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(&full).map_err(|source| WorksyncError::ReadFile { path: full, source })?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Repository signature, or the configured fallback identity.
pub(crate) fn signature(
    repo: &Repository,
    fallback_name: &str,
    fallback_email: &str,
) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig),
        Err(_) => Ok(Signature::now(fallback_name, fallback_email)?),
    }
}

/// Classifies working-copy changes against HEAD and the index.
pub(crate) fn local_changes(repo: &Repository) -> Result<LocalChanges> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut options))?;
    let mut changes = LocalChanges::default();
    for entry in statuses.iter() {
        let path = match entry.path() {
            Some(path) => path.to_string(),
            None => continue,
        };
        let status = entry.status();

        if status.is_conflicted() {
            changes.conflicting.push(path);
            continue;
        }
        if status.is_index_new() {
            changes.added.push(path.clone());
        }
        if status.is_index_modified() || status.is_index_renamed() || status.is_index_typechange() {
            changes.changed.push(path.clone());
        }
        if status.is_index_deleted() {
            changes.removed.push(path.clone());
        }
        if status.is_wt_modified() || status.is_wt_renamed() || status.is_wt_typechange() {
            changes.modified.push(path.clone());
        }
        if status.is_wt_deleted() {
            changes.missing.push(path.clone());
        }
        if status.is_wt_new() {
            changes.untracked.push(path);
        }
    }
    Ok(changes)
}

/// Stages everything, including deletions, and commits on HEAD.
pub(crate) fn commit_all(repo: &Repository, message: &str, sig: &Signature<'_>) -> Result<Oid> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;

    let tree = repo.find_tree(index.write_tree()?)?;
    let parent = match head_oid(repo) {
        Some(oid) => Some(repo.find_commit(oid)?),
        None => None,
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    Ok(repo.commit(Some("HEAD"), sig, sig, message, &tree, &parents)?)
}

/// Moves the current branch, index and working tree to `target`. Also creates an
/// unborn branch.
pub(crate) fn reset_hard(repo: &Repository, target: Oid) -> Result<()> {
    let object = repo.find_object(target, None)?;
    repo.reset(&object, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

/// Deletes untracked files and the directories they leave empty.
pub(crate) fn remove_untracked(repo: &Repository) -> Result<Vec<String>> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| WorksyncError::state("Repository has no working directory"))?
        .to_path_buf();
    let untracked = local_changes(repo)?.untracked;

    for path in &untracked {
        let full = workdir.join(path);
        if full.is_file() {
            fs::remove_file(&full)?;
        }
        let mut dir = full.parent();
        while let Some(parent) = dir {
            if parent == workdir.as_path() || fs::remove_dir(parent).is_err() {
                break;
            }
            dir = parent.parent();
        }
    }
    Ok(untracked)
}
