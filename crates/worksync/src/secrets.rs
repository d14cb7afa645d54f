//! Secret lookup for workspace credentials.
//!
//! A secret can be stored inline in the workspace record, read from a file
//! (Docker secrets) or taken from an environment variable. The first non-empty
//! source wins, in that order.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source configured (set a value, a file or an environment variable)")]
    NoSourceProvided,

    #[error("Failed to read secret file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Where a single secret may come from.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSource<'a> {
    pub direct: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl<'a> SecretSource<'a> {
    /// Returns true if at least one source is configured.
    pub fn is_configured(&self) -> bool {
        non_empty(self.direct).is_some()
            || non_empty(self.file).is_some()
            || non_empty(self.env_var).is_some()
    }

    /// Resolves the secret, failing when no source yields a value.
    pub fn resolve(&self) -> Result<SecretString, SecretError> {
        if let Some(value) = non_empty(self.direct) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = non_empty(self.file) {
            let expanded = expand_home(path);
            return fs::read_to_string(&expanded)
                .map(|content| SecretString::from(content.trim().to_string()))
                .map_err(|source| SecretError::FileReadError {
                    path: expanded.display().to_string(),
                    source,
                });
        }

        if let Some(name) = non_empty(self.env_var) {
            return match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(path),
    };

    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}
