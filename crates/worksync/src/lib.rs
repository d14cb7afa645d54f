pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod lifecycle;
pub mod secrets;
pub mod workspace;

pub use config::{default_data_dir, EngineConfig};
pub use engine::SyncEngine;
pub use error::{ErrorKind, Result, WorksyncError};
pub use git::{
    ChangeKind, ConflictBlock, Credential, CredentialProvider, GitOperation, LocalChanges,
    MergeOutcome, OperationResult, OperationType, RemoteChanges, StatusCheck,
};
pub use lifecycle::RepositoryLifecycle;
pub use workspace::{
    GitAuthSettings, GitAuthType, GitOrigin, JsonWorkspaceStore, MemoryWorkspaceStore, Workspace,
    WorkspaceDescriptor, WorkspaceKind, WorkspaceRegistry, WorkspaceStore,
};
