//! Git authentication handling.

use std::path::PathBuf;
use std::time::Instant;

use git2::{Cred, CredentialType, ErrorClass, ErrorCode, RemoteCallbacks};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, WorksyncError};
use crate::workspace::{GitAuthSettings, GitAuthType, Workspace};

/// libgit2 keeps asking for credentials when the server rejects them.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

const DEFAULT_SSH_USER: &str = "git";

/// Transport credential for one network operation.
#[derive(Debug)]
pub enum Credential {
    /// HTTPS username plus password or token.
    UserPass {
        username: String,
        secret: SecretString,
    },
    /// SSH private key with an optional passphrase.
    SshKey {
        username: String,
        private_key: PathBuf,
        passphrase: Option<SecretString>,
    },
}

/// Resolves the credential a workspace should connect with.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, workspace: &Workspace) -> Result<Option<Credential>>;
}

/// Reads credentials from the workspace's own auth settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceCredentials;

impl CredentialProvider for WorkspaceCredentials {
    fn resolve(&self, workspace: &Workspace) -> Result<Option<Credential>> {
        resolve_credential(&workspace.auth)
    }
}

fn username_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Turns stored auth settings into a credential. `NONE` yields no credential.
pub fn resolve_credential(auth: &GitAuthSettings) -> Result<Option<Credential>> {
    match auth.auth_type {
        GitAuthType::None => Ok(None),
        GitAuthType::Password | GitAuthType::Token => {
            let kind = if auth.auth_type == GitAuthType::Password {
                "password"
            } else {
                "token"
            };
            let secret = auth.secret_source().resolve().map_err(|e| {
                WorksyncError::GitAuthFailed(format!("Failed to resolve git {}: {}", kind, e))
            })?;
            Ok(Some(Credential::UserPass {
                username: username_or(auth.username.as_deref(), DEFAULT_SSH_USER),
                secret,
            }))
        }
        GitAuthType::SshKey => {
            let private_key = auth.ssh_key_file();
            if !private_key.is_file() {
                return Err(WorksyncError::GitAuthFailed(format!(
                    "SSH key file not found: {}",
                    private_key.display()
                )));
            }
            let passphrase = auth
                .ssh_passphrase
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| SecretString::from(p.to_string()));
            Ok(Some(Credential::SshKey {
                username: username_or(auth.username.as_deref(), DEFAULT_SSH_USER),
                private_key,
                passphrase,
            }))
        }
    }
}

fn auth_error(message: &str) -> git2::Error {
    git2::Error::new(ErrorCode::Auth, ErrorClass::Net, message)
}

/// Builds callbacks that answer credential requests and abort transfers past `deadline`.
pub fn remote_callbacks(credential: Option<&Credential>, deadline: Instant) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;

    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(auth_error("authentication failed: credentials were rejected"));
        }

        match credential {
            Some(Credential::UserPass { username, secret })
                if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) =>
            {
                Cred::userpass_plaintext(username, secret.expose_secret())
            }
            Some(Credential::SshKey {
                username,
                private_key,
                passphrase,
            }) if allowed.contains(CredentialType::SSH_KEY) => Cred::ssh_key(
                username_from_url.unwrap_or(username.as_str()),
                None,
                private_key,
                passphrase.as_ref().map(|p| p.expose_secret()),
            ),
            Some(Credential::SshKey { username, .. })
                if allowed.contains(CredentialType::USERNAME) =>
            {
                Cred::username(username_from_url.unwrap_or(username.as_str()))
            }
            None if allowed.contains(CredentialType::USERNAME) => {
                Cred::username(username_from_url.unwrap_or(DEFAULT_SSH_USER))
            }
            None if allowed.contains(CredentialType::SSH_KEY) => {
                Cred::ssh_key_from_agent(username_from_url.unwrap_or(DEFAULT_SSH_USER))
            }
            None if allowed.contains(CredentialType::DEFAULT) => Cred::default(),
            _ => Err(auth_error(
                "authentication required but no matching credentials are configured",
            )),
        }
    });

    callbacks.transfer_progress(move |_| Instant::now() < deadline);
    callbacks.sideband_progress(move |_| Instant::now() < deadline);
    callbacks
}
