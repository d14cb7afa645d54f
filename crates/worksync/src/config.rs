//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorksyncError};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WORKSYNC_DATA_DIR";

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_README: &str = "# {name}\n\nThis workspace is synchronized with git.\n";

/// Data directory from `WORKSYNC_DATA_DIR`, else the platform data dir.
pub fn default_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("worksync"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Registry location.
    pub data_dir: PathBuf,
    /// Bound for every clone, fetch, pull and push.
    pub network_timeout_secs: u64,
    /// Branch new repositories are initialized with.
    pub default_branch: String,
    /// Commit identity used when the repository has none configured.
    pub author_name: String,
    pub author_email: String,
    /// README written into initialized repositories; `{name}` is replaced.
    pub readme_template: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            network_timeout_secs: 10,
            default_branch: "main".to_string(),
            author_name: "worksync".to_string(),
            author_email: "worksync@localhost".to_string(),
            readme_template: DEFAULT_README.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| WorksyncError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| WorksyncError::ParseJson {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<data dir>/config.json`, keeping the data directory it was found in.
    pub fn discover() -> Result<Self> {
        let data_dir = default_data_dir();
        let mut config = Self::load(data_dir.join(CONFIG_FILE))?;
        config.data_dir = data_dir;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network_timeout_secs == 0 {
            return Err(WorksyncError::validation(
                "networkTimeoutSecs must be greater than zero",
            ));
        }
        let refname = format!("refs/heads/{}", self.default_branch);
        if self.default_branch.trim().is_empty() || !git2::Reference::is_valid_name(&refname) {
            return Err(WorksyncError::Validation(format!(
                "Invalid default branch name: '{}'",
                self.default_branch
            )));
        }
        if self.author_name.trim().is_empty() || self.author_email.trim().is_empty() {
            return Err(WorksyncError::validation(
                "authorName and authorEmail must not be empty",
            ));
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn default_workspace_path(&self) -> PathBuf {
        self.workspaces_dir().join("default")
    }

    pub fn render_readme(&self, workspace_name: &str) -> String {
        self.readme_template.replace("{name}", workspace_name)
    }
}
