//! The operation API, addressed by workspace id.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::warn;
use tracing::{debug, info, info_span};

use crate::config::EngineConfig;
use crate::error::{Result, WorksyncError};
use crate::git::auth::{Credential, CredentialProvider, WorkspaceCredentials};
use crate::git::repository::{self, NetworkPolicy};
use crate::git::{
    GitExecutor, GitOperation, OperationResult, OperationType, StatusAnalyzer, StatusCheck,
};
use crate::lifecycle::{workspace_from_descriptor, RepositoryLifecycle};
use crate::workspace::{
    GitAuthSettings, JsonWorkspaceStore, Workspace, WorkspaceDescriptor, WorkspaceRegistry,
    WorkspaceStore,
};

/// Explicitly constructed engine with injected storage and credentials.
pub struct SyncEngine {
    config: EngineConfig,
    policy: NetworkPolicy,
    registry: Mutex<WorkspaceRegistry>,
    credentials: Box<dyn CredentialProvider>,
    analyzer: StatusAnalyzer,
    executor: GitExecutor,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn into_result(operation: GitOperation, outcome: Result<OperationResult>) -> Result<OperationResult> {
    match outcome {
        Err(e) if e.is_operation_failure() => {
            warn!("{} failed: {}", operation, e);
            Ok(OperationResult::failed(operation, e.to_string()))
        }
        other => other,
    }
}

impl SyncEngine {
    /// Engine backed by the JSON registry in the configured data directory.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = JsonWorkspaceStore::new(&config.data_dir);
        Self::with_parts(config, Box::new(store), Box::new(WorkspaceCredentials))
    }

    pub fn with_parts(
        config: EngineConfig,
        store: Box<dyn WorkspaceStore>,
        credentials: Box<dyn CredentialProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = WorkspaceRegistry::open(store, config.default_workspace_path())?;
        let policy = NetworkPolicy::new(config.network_timeout());
        let executor = GitExecutor::new(policy, &config.author_name, &config.author_email);
        info!(data_dir = %config.data_dir.display(), "Sync engine ready");

        Ok(Self {
            analyzer: StatusAnalyzer::new(policy),
            executor,
            policy,
            registry: Mutex::new(registry),
            credentials,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn registry(&self) -> Result<MutexGuard<'_, WorkspaceRegistry>> {
        self.registry
            .lock()
            .map_err(|_| WorksyncError::RegistryPoisoned)
    }

    fn lifecycle(&self) -> RepositoryLifecycle<'_> {
        RepositoryLifecycle::new(&self.config, self.policy)
    }

    fn git_workspace(&self, id: &str) -> Result<Workspace> {
        let workspace = self.get_workspace(id)?;
        workspace.require_git()?;
        Ok(workspace)
    }

    // Registry

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(self.registry()?.list().to_vec())
    }

    pub fn get_workspace(&self, id: &str) -> Result<Workspace> {
        self.registry()?.get(id).cloned()
    }

    pub fn find_workspace_by_path(&self, path: &Path) -> Result<Option<Workspace>> {
        Ok(self.registry()?.find_by_path(path).cloned())
    }

    pub fn active_workspace(&self) -> Result<Workspace> {
        self.registry()?.active().cloned()
    }

    pub fn set_active_workspace(&self, id: &str) -> Result<()> {
        self.registry()?.set_active(id)
    }

    pub fn rename_workspace(&self, id: &str, name: &str) -> Result<Workspace> {
        self.registry()?.rename(id, name)
    }

    pub fn delete_workspace(&self, id: &str, remove_files: bool) -> Result<Workspace> {
        self.registry()?.delete(id, remove_files)
    }

    pub fn move_workspace(&self, id: &str, new_path: &Path) -> Result<Workspace> {
        self.registry()?.move_to(id, new_path)
    }

    pub fn collections_path(&self, id: &str) -> Result<PathBuf> {
        self.registry()?.collections_path(id)
    }

    pub fn environments_path(&self, id: &str) -> Result<PathBuf> {
        self.registry()?.environments_path(id)
    }

    // Lifecycle

    /// Validates, creates the directory or repository, then registers the workspace.
    /// Nothing is left behind when any step fails.
    pub fn create_workspace(&self, descriptor: &WorkspaceDescriptor) -> Result<Workspace> {
        let span = info_span!("create_workspace", name = %descriptor.name, kind = ?descriptor.kind);
        let _guard = span.enter();

        let lifecycle = self.lifecycle();
        lifecycle.validate(descriptor)?;
        let mut workspace = workspace_from_descriptor(descriptor);
        self.registry()?
            .validate_candidate(&workspace.id, &workspace.name, &workspace.path)?;

        let existed = workspace.path.exists();
        let owns_directory = workspace.is_git() || !existed;
        let undo = |path: &Path| {
            if owns_directory {
                lifecycle.rollback(path, existed);
            }
        };

        let credential = if workspace.is_git() {
            self.credentials.resolve(&workspace)?
        } else {
            None
        };

        if let Err(e) =
            lifecycle.materialize(&mut workspace, descriptor.branch.as_deref(), credential.as_ref())
        {
            warn!("Creating workspace '{}' failed: {}", workspace.name, e);
            undo(&workspace.path);
            return Err(e);
        }

        let registered = self
            .registry()
            .and_then(|mut registry| registry.add(workspace.clone()));
        if let Err(e) = registered {
            warn!("Registering workspace '{}' failed: {}", workspace.name, e);
            undo(&workspace.path);
            return Err(e);
        }

        info!(id = %workspace.id, "Created workspace '{}'", workspace.name);
        Ok(workspace)
    }

    /// Registers `origin` for a git workspace and binds its branch to it.
    pub fn add_remote_repository(
        &self,
        id: &str,
        url: &str,
        branch: Option<&str>,
        auth: Option<GitAuthSettings>,
    ) -> Result<OperationResult> {
        let span = info_span!("add_remote_repository", workspace = id);
        let _guard = span.enter();

        let outcome = (|| {
            let mut workspace = self.git_workspace(id)?;
            if let Some(auth) = auth {
                auth.validate()?;
                workspace.auth = auth;
            }
            let tracking = self.lifecycle().add_remote(&mut workspace, url, branch)?;
            self.registry()?.update(workspace.clone())?;

            Ok(OperationResult::succeeded(
                GitOperation::AddRemote,
                format!("Added remote {} tracking {}", tracking.remote, tracking.display()),
            )
            .with_detail(format!("url {}", url.trim()))
            .with_detail(format!(
                "{} -> {}",
                workspace.branch.as_deref().unwrap_or_default(),
                tracking.display()
            )))
        })();
        into_result(GitOperation::AddRemote, outcome)
    }

    /// Replaces the stored credentials of a git workspace.
    pub fn update_git_authentication(&self, id: &str, auth: GitAuthSettings) -> Result<Workspace> {
        let mut workspace = self.git_workspace(id)?;
        auth.validate()?;
        workspace.auth = auth;
        workspace.updated_at = chrono::Utc::now();
        self.registry()?.update(workspace.clone())?;
        info!(workspace = id, auth_type = ?workspace.auth.auth_type, "Updated git authentication");
        Ok(workspace)
    }

    // Analysis

    pub fn check_git_status(&self, id: &str, operation: OperationType) -> Result<StatusCheck> {
        let workspace = self.git_workspace(id)?;
        let (credential, warnings) = match self.credentials.resolve(&workspace) {
            Ok(credential) => (credential, Vec::new()),
            Err(e) => {
                warn!("Credentials for '{}' could not be resolved: {}", workspace.name, e);
                (None, vec![format!("Credentials could not be resolved: {}", e)])
            }
        };

        self.analyzer.check_with_warnings(
            &workspace.path,
            operation,
            credential.as_ref(),
            warnings,
        )
    }

    /// Summarizes reachability and divergence against the tracking branch.
    pub fn get_remote_status(&self, id: &str) -> Result<OperationResult> {
        let outcome = (|| {
            let workspace = self.git_workspace(id)?;
            let check = self.check_git_status(id, OperationType::Push)?;
            let target = check
                .remote_branch
                .clone()
                .unwrap_or_else(|| "the remote".to_string());

            let mut result = if !check.has_remote_repository {
                OperationResult::failed(GitOperation::RemoteStatus, "No remote repository configured")
            } else if !check.can_connect_to_remote {
                OperationResult::failed(GitOperation::RemoteStatus, "Cannot connect to the remote")
            } else if !check.has_upstream_branch {
                OperationResult::succeeded(GitOperation::RemoteStatus, "No upstream branch configured")
            } else if check.is_remote_repository_empty {
                OperationResult::succeeded(
                    GitOperation::RemoteStatus,
                    format!("{} does not exist yet", target),
                )
            } else if check.local_commits_ahead == 0 && check.remote_commits_behind == 0 {
                OperationResult::succeeded(
                    GitOperation::RemoteStatus,
                    format!("Up to date with {}", target),
                )
            } else {
                OperationResult::succeeded(
                    GitOperation::RemoteStatus,
                    format!(
                        "{} ahead, {} behind {}",
                        check.local_commits_ahead, check.remote_commits_behind, target
                    ),
                )
            };

            if let Some(url) = workspace.remote_url.as_deref() {
                result = result.with_detail(format!("url {}", url));
            }
            result = result
                .with_detail(format!("tracking {}", target))
                .with_detail(format!("ahead {}", check.local_commits_ahead))
                .with_detail(format!("behind {}", check.remote_commits_behind))
                .with_detail(format!("canPush {}", check.can_push))
                .with_detail(format!("canPull {}", check.can_pull))
                .with_detail(format!("isFirstPush {}", check.is_first_push));
            result.details.extend(check.warnings);
            Ok(result)
        })();
        into_result(GitOperation::RemoteStatus, outcome)
    }

    // Mutations

    fn mutate<F>(&self, id: &str, operation: GitOperation, body: F) -> Result<OperationResult>
    where
        F: FnOnce(&GitExecutor, &Path, Option<&Credential>) -> Result<OperationResult>,
    {
        let span = info_span!("workspace_operation", workspace = id, %operation);
        let _guard = span.enter();

        let outcome = (|| {
            let workspace = self.git_workspace(id)?;
            let credential = self.credentials.resolve(&workspace)?;
            let result = body(&self.executor, &workspace.path, credential.as_ref())?;
            if result.success {
                self.refresh_metadata(&workspace.id);
            }
            Ok(result)
        })();
        into_result(operation, outcome)
    }

    /// Persists the branch and HEAD after a successful operation.
    fn refresh_metadata(&self, id: &str) {
        let refreshed = (|| -> Result<()> {
            let mut workspace = self.get_workspace(id)?;
            let repo = repository::open(&workspace.path)?;
            workspace.branch = repository::current_branch(&repo)?;
            workspace.last_commit_id = repository::head_oid(&repo).map(|oid| oid.to_string());
            if let Some(branch) = workspace.branch.as_deref() {
                if let Some(tracking) = repository::tracking(&repo, branch)? {
                    workspace.remote_branch = Some(tracking.display());
                }
            }
            workspace.updated_at = chrono::Utc::now();
            self.registry()?.update(workspace)
        })();

        match refreshed {
            Ok(()) => debug!(workspace = id, "Workspace metadata refreshed"),
            Err(e) => warn!("Could not persist metadata for workspace {}: {}", id, e),
        }
    }

    pub fn commit_changes(&self, id: &str, message: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::Commit, |executor, path, _| {
            executor.commit(path, message)
        })
    }

    pub fn push_changes(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::Push, |executor, path, credential| {
            executor.push(path, credential)
        })
    }

    pub fn force_push_changes(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::ForcePush, |executor, path, credential| {
            executor.force_push(path, credential)
        })
    }

    pub fn pull_updates(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::Pull, |executor, path, credential| {
            executor.pull(path, credential)
        })
    }

    pub fn force_pull_updates(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::ForcePull, |executor, path, credential| {
            executor.force_pull(path, credential)
        })
    }

    pub fn stash_changes(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::Stash, |executor, path, _| executor.stash(path))
    }

    pub fn pop_stash_changes(&self, id: &str) -> Result<OperationResult> {
        self.mutate(id, GitOperation::PopStash, |executor, path, _| {
            executor.pop_stash(path)
        })
    }
}
