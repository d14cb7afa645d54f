//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use worksync::{GitAuthSettings, GitAuthType, OperationType};

/// Manage workspaces and keep them in sync with git remotes
#[derive(Parser)]
#[command(name = "worksync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding the workspace registry
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered workspaces
    List,

    /// Show one workspace
    Show { id: String },

    /// Create a local or git workspace
    Create(CreateArgs),

    /// Rename a workspace
    Rename { id: String, name: String },

    /// Remove a workspace from the registry
    Delete {
        id: String,
        /// Also delete the workspace directory
        #[arg(long)]
        remove_files: bool,
    },

    /// Move a workspace directory
    Move { id: String, path: PathBuf },

    /// Make a workspace the active one
    Activate { id: String },

    /// Analyze a workspace before an operation
    Status {
        id: String,
        #[arg(long, value_enum, default_value = "push")]
        operation: OperationArg,
    },

    /// Commit every local change
    Commit {
        id: String,
        #[arg(short, long)]
        message: String,
    },

    /// Push committed changes
    Push {
        id: String,
        /// Overwrite the remote branch
        #[arg(long)]
        force: bool,
    },

    /// Pull remote changes
    Pull {
        id: String,
        /// Discard local state and take the remote branch
        #[arg(long)]
        force: bool,
    },

    /// Stash local changes
    Stash { id: String },

    /// Restore the most recent stash
    PopStash { id: String },

    /// Summarize the relation to the remote branch
    RemoteStatus { id: String },

    /// Register a remote and bind the current branch to it
    AddRemote {
        id: String,
        url: String,
        #[arg(long)]
        branch: Option<String>,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Replace the stored git credentials
    SetAuth {
        id: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    pub name: String,
    pub path: PathBuf,

    /// Initialize a new git repository
    #[arg(long, conflicts_with = "clone_url")]
    pub git: bool,

    /// Clone this remote URL
    #[arg(long = "clone", value_name = "URL")]
    pub clone_url: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OperationArg {
    Commit,
    Push,
    Pull,
}

impl From<OperationArg> for OperationType {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Commit => OperationType::Commit,
            OperationArg::Push => OperationType::Push,
            OperationArg::Pull => OperationType::Pull,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AuthTypeArg {
    None,
    Password,
    Token,
    SshKey,
}

#[derive(Args, Default)]
pub struct AuthArgs {
    #[arg(long, value_enum)]
    pub auth_type: Option<AuthTypeArg>,

    #[arg(long)]
    pub username: Option<String>,

    /// Environment variable holding the password
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub token_file: Option<String>,

    #[arg(long, value_name = "VAR")]
    pub token_env: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub ssh_key: Option<String>,

    /// Environment variable holding the SSH key passphrase
    #[arg(long, value_name = "VAR")]
    pub ssh_passphrase_env: Option<String>,
}

impl AuthArgs {
    /// Settings described by the flags, or `None` when no auth type was given.
    pub fn settings(&self) -> Result<Option<GitAuthSettings>, String> {
        let Some(auth_type) = self.auth_type else {
            return Ok(None);
        };
        let read_env = |var: &Option<String>| -> Result<Option<String>, String> {
            match var {
                Some(name) => std::env::var(name)
                    .map(Some)
                    .map_err(|_| format!("Environment variable {} is not set", name)),
                None => Ok(None),
            }
        };

        Ok(Some(GitAuthSettings {
            auth_type: match auth_type {
                AuthTypeArg::None => GitAuthType::None,
                AuthTypeArg::Password => GitAuthType::Password,
                AuthTypeArg::Token => GitAuthType::Token,
                AuthTypeArg::SshKey => GitAuthType::SshKey,
            },
            username: self.username.clone(),
            password: read_env(&self.password_env)?,
            token: None,
            token_file: self.token_file.clone(),
            token_env_var: self.token_env.clone(),
            ssh_key_path: self.ssh_key.clone(),
            ssh_passphrase: read_env(&self.ssh_passphrase_env)?,
        }))
    }
}
