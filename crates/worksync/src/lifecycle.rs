//! Workspace directory and repository creation.

use std::fs;
use std::path::Path;

use chrono::Utc;
use git2::build::RepoBuilder;
use git2::{ErrorCode, Repository, RepositoryInitOptions};
use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Result, WorksyncError};
use crate::git::auth::Credential;
use crate::git::repository::{self, NetworkPolicy, Tracking, DEFAULT_REMOTE};
use crate::workspace::{normalize_remote_branch, GitOrigin, Workspace, WorkspaceDescriptor, WorkspaceKind};

const README_FILE: &str = "README.md";

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn validate_branch_name(branch: &str) -> Result<()> {
    if branch.is_empty() || !git2::Reference::is_valid_name(&format!("refs/heads/{}", branch)) {
        return Err(WorksyncError::Validation(format!(
            "Invalid branch name: '{}'",
            branch
        )));
    }
    Ok(())
}

/// Builds the unregistered record a descriptor describes.
pub fn workspace_from_descriptor(descriptor: &WorkspaceDescriptor) -> Workspace {
    let mut workspace = Workspace::new_local(descriptor.name.trim(), &descriptor.path);
    workspace.kind = descriptor.kind;
    if descriptor.kind == WorkspaceKind::Git {
        workspace.git_origin = descriptor.git_origin;
        workspace.remote_url = descriptor
            .remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        workspace.auth = descriptor.auth.clone();
    }
    workspace
}

/// Creates workspace directories and repositories.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryLifecycle<'a> {
    config: &'a EngineConfig,
    policy: NetworkPolicy,
}

impl<'a> RepositoryLifecycle<'a> {
    pub fn new(config: &'a EngineConfig, policy: NetworkPolicy) -> Self {
        Self { config, policy }
    }

    /// Checks a descriptor without touching the filesystem.
    pub fn validate(&self, descriptor: &WorkspaceDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(WorksyncError::validation("Workspace name must not be empty"));
        }
        if descriptor.path.as_os_str().is_empty() {
            return Err(WorksyncError::validation("Workspace path must not be empty"));
        }
        if descriptor.path.exists() && !descriptor.path.is_dir() {
            return Err(WorksyncError::Validation(format!(
                "Workspace path is not a directory: {}",
                descriptor.path.display()
            )));
        }
        if let Some(branch) = descriptor.branch.as_deref() {
            validate_branch_name(&normalize_remote_branch(branch))?;
        }

        if descriptor.kind == WorkspaceKind::Local {
            return Ok(());
        }

        let origin = descriptor.git_origin.ok_or_else(|| {
            WorksyncError::validation("Git workspaces must be either CLONED or INITIALIZED")
        })?;
        if descriptor.path.exists() && !is_empty_dir(&descriptor.path)? {
            return Err(WorksyncError::Validation(format!(
                "Destination directory is not empty: {}",
                descriptor.path.display()
            )));
        }

        let has_url = descriptor
            .remote_url
            .as_deref()
            .map_or(false, |url| !url.trim().is_empty());
        match origin {
            GitOrigin::Cloned if !has_url => {
                return Err(WorksyncError::validation(
                    "A remote URL is required to clone a workspace",
                ));
            }
            GitOrigin::Initialized if has_url => {
                return Err(WorksyncError::validation(
                    "Initialized workspaces start without a remote; add one after creation",
                ));
            }
            _ => {}
        }
        descriptor.auth.validate()
    }

    /// Creates the directory (and repository) for a validated descriptor and fills in
    /// the branch metadata of `workspace`.
    pub fn materialize(
        &self,
        workspace: &mut Workspace,
        branch: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        match (workspace.kind, workspace.git_origin) {
            (WorkspaceKind::Local, _) => {
                fs::create_dir_all(&workspace.path)?;
                Ok(())
            }
            (WorkspaceKind::Git, Some(GitOrigin::Cloned)) => {
                let url = workspace
                    .remote_url
                    .clone()
                    .ok_or_else(|| WorksyncError::validation("A remote URL is required"))?;
                self.clone_into(workspace, &url, branch, credential)
            }
            (WorkspaceKind::Git, _) => self.initialize(workspace, branch),
        }
    }

    /// Undoes [`materialize`](Self::materialize) after a later step failed.
    pub fn rollback(&self, path: &Path, existed_before: bool) {
        if !path.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to remove {} during rollback: {}", path.display(), e);
            return;
        }
        if existed_before {
            if let Err(e) = fs::create_dir_all(path) {
                warn!("Failed to restore {} during rollback: {}", path.display(), e);
            }
        }
    }

    fn init_repository(&self, path: &Path, branch: &str) -> Result<Repository> {
        fs::create_dir_all(path)?;
        let mut options = RepositoryInitOptions::new();
        options.initial_head(branch);
        Ok(Repository::init_opts(path, &options)?)
    }

    fn initialize(&self, workspace: &mut Workspace, branch: Option<&str>) -> Result<()> {
        let branch = branch
            .map(normalize_remote_branch)
            .unwrap_or_else(|| self.config.default_branch.clone());
        let repo = self.init_repository(&workspace.path, &branch)?;

        fs::write(
            workspace.path.join(README_FILE),
            self.config.render_readme(&workspace.name),
        )?;
        let sig = repository::signature(&repo, &self.config.author_name, &self.config.author_email)?;
        let oid = repository::commit_all(&repo, "Initial commit", &sig)?;

        info!(
            "Initialized repository for '{}' on branch {}",
            workspace.name, branch
        );
        workspace.branch = Some(branch);
        workspace.remote_branch = None;
        workspace.last_commit_id = Some(oid.to_string());
        Ok(())
    }

    fn clone_into(
        &self,
        workspace: &mut Workspace,
        url: &str,
        branch: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        let wanted = branch.map(normalize_remote_branch);

        // Fetch into a fresh repository first; an empty remote stays initialized here.
        let initial = wanted
            .clone()
            .unwrap_or_else(|| self.config.default_branch.clone());
        let branches = {
            let repo = self.init_repository(&workspace.path, &initial)?;
            repo.remote(DEFAULT_REMOTE, url)?;
            repository::fetch_remote(&repo, DEFAULT_REMOTE, credential, &self.policy)?;
            let branches = repository::remote_branches(&repo, DEFAULT_REMOTE)?;

            if branches.is_empty() {
                info!("Remote {} is empty; initialized {} locally", url, initial);
                let tracking = repository::bind_tracking(&repo, &initial, DEFAULT_REMOTE, &initial)?;
                workspace.branch = Some(initial);
                workspace.remote_branch = Some(tracking.display());
                workspace.last_commit_id = None;
                return Ok(());
            }
            branches
        };

        if let Some(branch) = wanted.as_deref() {
            if !branches.iter().any(|b| b == branch) {
                return Err(WorksyncError::Validation(format!(
                    "Branch '{}' does not exist on the remote",
                    branch
                )));
            }
        }

        // The clone tool recreates the destination itself.
        fs::remove_dir_all(&workspace.path)?;

        let deadline = self.policy.deadline();
        let mut builder = RepoBuilder::new();
        builder.fetch_options(self.policy.fetch_options(credential, deadline));
        if let Some(branch) = wanted.as_deref() {
            builder.branch(branch);
        }
        debug!("Cloning {} into {}", url, workspace.path.display());
        let repo = builder
            .clone(url, &workspace.path)
            .map_err(|e| self.policy.network_error(e, deadline))?;

        let actual = repository::current_branch(&repo)?.ok_or_else(|| {
            WorksyncError::state("Cloned repository has no checked-out branch")
        })?;
        let tracking = match repository::tracking(&repo, &actual)? {
            Some(tracking) => tracking,
            None => repository::bind_tracking(&repo, &actual, DEFAULT_REMOTE, &actual)?,
        };

        info!(
            "Cloned {} into {} on branch {}",
            url,
            workspace.path.display(),
            actual
        );
        workspace.branch = Some(actual);
        workspace.remote_branch = Some(tracking.display());
        workspace.last_commit_id = repository::head_oid(&repo).map(|oid| oid.to_string());
        Ok(())
    }

    /// Registers `origin` and binds the current branch to `origin/<branch>`.
    pub fn add_remote(
        &self,
        workspace: &mut Workspace,
        url: &str,
        branch: Option<&str>,
    ) -> Result<Tracking> {
        workspace.require_git()?;
        let url = url.trim();
        if url.is_empty() {
            return Err(WorksyncError::validation("Remote URL must not be empty"));
        }

        let repo = repository::open(&workspace.path)?;
        let local_branch = repository::current_branch(&repo)?.ok_or_else(|| {
            WorksyncError::state("HEAD is detached; check out a branch before adding a remote")
        })?;
        let remote_branch = branch
            .map(normalize_remote_branch)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| local_branch.clone());
        validate_branch_name(&remote_branch)?;

        match repo.find_remote(DEFAULT_REMOTE) {
            Ok(_) => repo.remote_set_url(DEFAULT_REMOTE, url)?,
            Err(e) if e.code() == ErrorCode::NotFound => {
                repo.remote(DEFAULT_REMOTE, url)?;
            }
            Err(e) => return Err(e.into()),
        }
        let tracking =
            repository::bind_tracking(&repo, &local_branch, DEFAULT_REMOTE, &remote_branch)?;

        workspace.remote_url = Some(url.to_string());
        workspace.branch = Some(local_branch);
        workspace.remote_branch = Some(tracking.display());
        workspace.updated_at = Utc::now();
        Ok(tracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(path: &Path, origin: Option<GitOrigin>) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            name: "Team".to_string(),
            path: path.to_path_buf(),
            kind: if origin.is_some() {
                WorkspaceKind::Git
            } else {
                WorkspaceKind::Local
            },
            git_origin: origin,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_descriptor() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(dir.path());
        let lifecycle = RepositoryLifecycle::new(&config, NetworkPolicy::default());

        let mut blank = descriptor(&dir.path().join("a"), None);
        blank.name = " ".to_string();
        assert!(lifecycle.validate(&blank).is_err());

        let clone_without_url = descriptor(&dir.path().join("b"), Some(GitOrigin::Cloned));
        assert!(lifecycle
            .validate(&clone_without_url)
            .unwrap_err()
            .to_string()
            .contains("remote URL is required"));

        let busy = dir.path().join("busy");
        fs::create_dir_all(&busy).unwrap();
        fs::write(busy.join("file.txt"), "x").unwrap();
        let mut occupied = descriptor(&busy, Some(GitOrigin::Cloned));
        occupied.remote_url = Some("/tmp/remote.git".to_string());
        assert!(lifecycle
            .validate(&occupied)
            .unwrap_err()
            .to_string()
            .contains("not empty"));
    }

    #[test]
    fn test_initialize_creates_initial_commit() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(dir.path());
        let lifecycle = RepositoryLifecycle::new(&config, NetworkPolicy::default());

        let desc = descriptor(&dir.path().join("init"), Some(GitOrigin::Initialized));
        lifecycle.validate(&desc).unwrap();
        let mut workspace = workspace_from_descriptor(&desc);
        lifecycle.materialize(&mut workspace, None, None).unwrap();

        assert_eq!(workspace.branch.as_deref(), Some("main"));
        assert!(workspace.remote_branch.is_none());
        assert!(workspace.last_commit_id.is_some());
        let readme = fs::read_to_string(dir.path().join("init").join(README_FILE)).unwrap();
        assert!(readme.starts_with("# Team"));
    }

    #[test]
    fn test_add_remote_strips_prefix() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(dir.path());
        let lifecycle = RepositoryLifecycle::new(&config, NetworkPolicy::default());

        let desc = descriptor(&dir.path().join("ws"), Some(GitOrigin::Initialized));
        let mut workspace = workspace_from_descriptor(&desc);
        lifecycle.materialize(&mut workspace, None, None).unwrap();

        let tracking = lifecycle
            .add_remote(&mut workspace, "/tmp/elsewhere.git", Some("origin/develop"))
            .unwrap();
        assert_eq!(tracking.branch, "develop");
        assert_eq!(workspace.remote_branch.as_deref(), Some("origin/develop"));
        assert_eq!(workspace.remote_url.as_deref(), Some("/tmp/elsewhere.git"));
    }
}
