//! Workspace descriptors and their registry.

pub mod registry;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorksyncError};
use crate::secrets::{expand_home, SecretSource};

pub use registry::{
    JsonWorkspaceStore, MemoryWorkspaceStore, RegistrySnapshot, WorkspaceRegistry, WorkspaceStore,
};

/// Id of the reserved workspace that always exists.
pub const DEFAULT_WORKSPACE_ID: &str = "default";

/// Per-workspace data files whose location is derived from the workspace path.
pub const COLLECTIONS_FILE: &str = "collections.json";
pub const ENVIRONMENTS_FILE: &str = "environments.json";

/// Workspace kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceKind {
    #[default]
    Local,
    Git,
}

/// How a git workspace came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitOrigin {
    Cloned,
    Initialized,
}

/// Git authentication type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitAuthType {
    #[default]
    None,
    Password,
    Token,
    SshKey,
}

/// Authentication settings stored with a workspace.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthSettings {
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password (PASSWORD auth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Plaintext token (TOKEN auth). Prefer `token_file` or `token_env_var`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env_var: Option<String>,

    /// Private key path; defaults to `~/.ssh/id_ed25519`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_passphrase: Option<String>,
}

impl std::fmt::Debug for GitAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("GitAuthSettings")
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("token_file", &self.token_file)
            .field("token_env_var", &self.token_env_var)
            .field("ssh_key_path", &self.ssh_key_path)
            .field("ssh_passphrase", &redact(&self.ssh_passphrase))
            .finish()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl GitAuthSettings {
    /// Source of the password or token for HTTPS auth.
    pub fn secret_source(&self) -> SecretSource<'_> {
        match self.auth_type {
            GitAuthType::Password => SecretSource {
                direct: self.password.as_deref(),
                ..Default::default()
            },
            GitAuthType::Token => SecretSource {
                direct: self.token.as_deref(),
                file: self.token_file.as_deref(),
                env_var: self.token_env_var.as_deref(),
            },
            GitAuthType::None | GitAuthType::SshKey => SecretSource::default(),
        }
    }

    /// Private key location with `~` expanded and the default applied.
    pub fn ssh_key_file(&self) -> PathBuf {
        match self.ssh_key_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => expand_home(path),
            None => expand_home("~/.ssh/id_ed25519"),
        }
    }

    /// Checks that the fields required by the auth type are present.
    pub fn validate(&self) -> Result<()> {
        match self.auth_type {
            GitAuthType::None => Ok(()),
            GitAuthType::Password => {
                if is_blank(&self.username) {
                    return Err(WorksyncError::validation(
                        "Username is required for password authentication",
                    ));
                }
                if is_blank(&self.password) {
                    return Err(WorksyncError::validation(
                        "Password is required for password authentication",
                    ));
                }
                Ok(())
            }
            GitAuthType::Token => {
                if is_blank(&self.username) {
                    return Err(WorksyncError::validation(
                        "Username is required for token authentication",
                    ));
                }
                if !self.secret_source().is_configured() {
                    return Err(WorksyncError::validation(
                        "Token is required for token authentication (token, tokenFile or tokenEnvVar)",
                    ));
                }
                Ok(())
            }
            GitAuthType::SshKey => {
                let key = self.ssh_key_file();
                if !key.is_file() {
                    return Err(WorksyncError::Validation(format!(
                        "SSH key file not found: {}",
                        key.display()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Identity and connection descriptor of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub kind: WorkspaceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_origin: Option<GitOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Current local branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Tracking branch in `origin/<branch>` form; absent until bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_id: Option<String>,
    #[serde(default)]
    pub auth: GitAuthSettings,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Creates a local workspace record with a fresh id.
    pub fn new_local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            path: path.into(),
            kind: WorkspaceKind::Local,
            git_origin: None,
            remote_url: None,
            branch: None,
            remote_branch: None,
            last_commit_id: None,
            auth: GitAuthSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_git(&self) -> bool {
        self.kind == WorkspaceKind::Git
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_WORKSPACE_ID
    }

    pub fn collections_path(&self) -> PathBuf {
        self.path.join(COLLECTIONS_FILE)
    }

    pub fn environments_path(&self) -> PathBuf {
        self.path.join(ENVIRONMENTS_FILE)
    }

    /// Fails unless this is a git workspace.
    pub fn require_git(&self) -> Result<()> {
        if self.is_git() {
            Ok(())
        } else {
            Err(WorksyncError::NotGitWorkspace(self.name.clone()))
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Strips a leading `origin/` (or `refs/heads/`) from a user supplied branch name.
pub fn normalize_remote_branch(branch: &str) -> String {
    let trimmed = branch.trim();
    trimmed
        .strip_prefix("refs/heads/")
        .or_else(|| trimmed.strip_prefix("origin/"))
        .unwrap_or(trimmed)
        .to_string()
}

/// Input for creating a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDescriptor {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub kind: WorkspaceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_origin: Option<GitOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Initial branch to check out or initialize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub auth: GitAuthSettings,
}

/// Returns true if two paths refer to the same location.
pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}
