//! Value types produced by status analysis and git operations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Operation a status check is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Commit,
    Push,
    Pull,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Commit => write!(f, "commit"),
            OperationType::Push => write!(f, "push"),
            OperationType::Pull => write!(f, "pull"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "commit" => Ok(OperationType::Commit),
            "push" => Ok(OperationType::Push),
            "pull" => Ok(OperationType::Pull),
            other => Err(format!("Unknown operation type: {}", other)),
        }
    }
}

/// Mutating operation that produced an [`OperationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitOperation {
    Commit,
    Push,
    ForcePush,
    Pull,
    ForcePull,
    Stash,
    PopStash,
    RemoteStatus,
    AddRemote,
}

impl std::fmt::Display for GitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitOperation::Commit => write!(f, "commit"),
            GitOperation::Push => write!(f, "push"),
            GitOperation::ForcePush => write!(f, "force-push"),
            GitOperation::Pull => write!(f, "pull"),
            GitOperation::ForcePull => write!(f, "force-pull"),
            GitOperation::Stash => write!(f, "stash"),
            GitOperation::PopStash => write!(f, "pop-stash"),
            GitOperation::RemoteStatus => write!(f, "remote-status"),
            GitOperation::AddRemote => write!(f, "add-remote"),
        }
    }
}

/// Phase of a single operation invocation. Only logged, never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationPhase {
    Validating,
    Fetching,
    Mutating,
    Succeeded,
    Failed,
}

impl std::fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationPhase::Validating => "validating",
            OperationPhase::Fetching => "fetching",
            OperationPhase::Mutating => "mutating",
            OperationPhase::Succeeded => "succeeded",
            OperationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Working-copy changes partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChanges {
    /// New files staged in the index.
    pub added: Vec<String>,
    /// Tracked files with staged modifications.
    pub changed: Vec<String>,
    /// Tracked files modified in the working tree but not staged.
    pub modified: Vec<String>,
    /// Files whose deletion is staged.
    pub removed: Vec<String>,
    /// Tracked files deleted from the working tree but not staged.
    pub missing: Vec<String>,
    /// Files unknown to the index.
    pub untracked: Vec<String>,
    /// Files with unresolved merge conflicts.
    pub conflicting: Vec<String>,
}

impl LocalChanges {
    /// Number of distinct paths with any kind of change.
    pub fn total(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.changed.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.missing.is_empty()
            && self.untracked.is_empty()
            && self.conflicting.is_empty()
    }

    /// All changed paths, deduplicated and sorted.
    pub fn paths(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(&self.changed)
            .chain(&self.modified)
            .chain(&self.removed)
            .chain(&self.missing)
            .chain(&self.untracked)
            .chain(&self.conflicting)
            .cloned()
            .collect()
    }

    /// Returns true if every change introduces a file that did not exist before.
    pub fn only_new_files(&self) -> bool {
        self.changed.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.missing.is_empty()
            && self.conflicting.is_empty()
    }
}

/// Kind of change a commit range made to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
}

/// Paths touched on the remote side, classified by change kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub renamed: Vec<String>,
    pub copied: Vec<String>,
}

impl RemoteChanges {
    pub(crate) fn push(&mut self, kind: ChangeKind, path: String) {
        match kind {
            ChangeKind::Added => self.added.push(path),
            ChangeKind::Modified => self.modified.push(path),
            ChangeKind::Removed => self.removed.push(path),
            ChangeKind::Renamed => self.renamed.push(path),
            ChangeKind::Copied => self.copied.push(path),
        }
    }

    pub fn total(&self) -> usize {
        self.added.len()
            + self.modified.len()
            + self.removed.len()
            + self.renamed.len()
            + self.copied.len()
    }
}

/// Why a pending merge is considered safe, or that it is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeOutcome {
    /// Local and remote point at the same commit.
    UpToDate,
    /// The remote branch does not exist yet.
    FirstPush,
    /// Local history contains the remote history.
    FastForwardPush,
    /// Remote history contains the local history and nothing is uncommitted.
    FastForwardPull,
    /// Both sides only introduced new files, at different paths.
    OnlyNewFiles,
    /// Both sides changed files, but never the same file.
    NonOverlappingFiles,
    /// Some files changed on both sides, in disjoint line ranges.
    NonOverlappingChanges,
    /// At least one file has a genuine content conflict.
    Conflicts,
}

/// One disputed region within a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBlock {
    /// First line of the region in the merged output.
    pub start_line: usize,
    /// One past the last line of the region in the merged output.
    pub end_line: usize,
    pub base_lines: Vec<String>,
    pub local_lines: Vec<String>,
    pub remote_lines: Vec<String>,
}

/// Snapshot of one pre-flight analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCheck {
    pub operation: OperationType,
    /// Current local branch, if HEAD is not detached.
    pub branch: Option<String>,
    /// Tracking branch in `origin/<branch>` form.
    pub remote_branch: Option<String>,

    pub local_changes: LocalChanges,
    pub has_uncommitted_changes: bool,
    pub is_empty_local_repository: bool,

    pub can_commit: bool,
    pub can_pull: bool,
    pub can_push: bool,

    pub has_remote_repository: bool,
    pub has_upstream_branch: bool,
    pub can_connect_to_remote: bool,
    pub is_remote_repository_empty: bool,
    pub is_first_push: bool,

    pub local_commits_ahead: usize,
    pub remote_commits_behind: usize,
    pub remote_changes: RemoteChanges,

    pub needs_force_push: bool,
    pub needs_force_pull: bool,

    pub has_actual_conflicts: bool,
    pub can_auto_merge: bool,
    pub merge_outcome: Option<MergeOutcome>,
    /// Conflicting file path to its disputed regions, in file order.
    pub conflict_details: BTreeMap<String, Vec<ConflictBlock>>,

    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl StatusCheck {
    pub(crate) fn new(operation: OperationType) -> Self {
        Self {
            operation,
            branch: None,
            remote_branch: None,
            local_changes: LocalChanges::default(),
            has_uncommitted_changes: false,
            is_empty_local_repository: false,
            can_commit: false,
            can_pull: false,
            can_push: false,
            has_remote_repository: false,
            has_upstream_branch: false,
            can_connect_to_remote: false,
            is_remote_repository_empty: false,
            is_first_push: false,
            local_commits_ahead: 0,
            remote_commits_behind: 0,
            remote_changes: RemoteChanges::default(),
            needs_force_push: false,
            needs_force_pull: false,
            has_actual_conflicts: false,
            can_auto_merge: false,
            merge_outcome: None,
            conflict_details: BTreeMap::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Paths with at least one conflict block, sorted.
    pub fn conflicting_files(&self) -> Vec<&str> {
        self.conflict_details.keys().map(String::as_str).collect()
    }
}

/// Outcome of one mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation: GitOperation,
    pub success: bool,
    pub message: String,
    pub affected_files: Vec<String>,
    /// Commit ids, branch names and per-ref statuses.
    pub details: Vec<String>,
}

impl OperationResult {
    pub fn succeeded(operation: GitOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            success: true,
            message: message.into(),
            affected_files: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn failed(operation: GitOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            success: false,
            message: message.into(),
            affected_files: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.affected_files = files;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}
