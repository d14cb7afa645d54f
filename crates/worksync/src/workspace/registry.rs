//! Persistent list of workspaces plus the active workspace id.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{same_path, Workspace, WorkspaceKind, DEFAULT_WORKSPACE_ID};
use crate::error::{Result, WorksyncError};

const WORKSPACES_FILE: &str = "workspaces.json";
const SETTINGS_FILE: &str = "settings.json";

/// Everything the registry persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub workspaces: Vec<Workspace>,
    pub active_workspace_id: Option<String>,
}

/// Storage backend for the registry.
pub trait WorkspaceStore: Send + Sync {
    fn load(&self) -> Result<RegistrySnapshot>;
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_workspace_id: Option<String>,
}

/// Stores `workspaces.json` and `settings.json` in a directory.
#[derive(Debug, Clone)]
pub struct JsonWorkspaceStore {
    dir: PathBuf,
}

impl JsonWorkspaceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn workspaces_file(&self) -> PathBuf {
        self.dir.join(WORKSPACES_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(path).map_err(|source| WorksyncError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&content).map_err(|e| WorksyncError::ParseJson {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Writes through a sibling temp file and renames it over the target.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| WorksyncError::WriteFile {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).map_err(|source| WorksyncError::WriteFile {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        WorksyncError::WriteFile {
            path: path.to_path_buf(),
            source,
        }
    })
}

impl WorkspaceStore for JsonWorkspaceStore {
    fn load(&self) -> Result<RegistrySnapshot> {
        let workspaces: Vec<Workspace> = Self::read_json(&self.workspaces_file())?;
        let settings: Settings = Self::read_json(&self.settings_file())?;
        Ok(RegistrySnapshot {
            workspaces,
            active_workspace_id: settings.active_workspace_id,
        })
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let workspaces = serde_json::to_vec_pretty(&snapshot.workspaces)?;
        write_atomic(&self.workspaces_file(), &workspaces)?;

        let settings = serde_json::to_vec_pretty(&Settings {
            active_workspace_id: snapshot.active_workspace_id.clone(),
        })?;
        write_atomic(&self.settings_file(), &settings)
    }
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspaceStore {
    inner: Arc<Mutex<RegistrySnapshot>>,
}

impl MemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of what was last saved.
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| WorksyncError::RegistryPoisoned)
    }
}

impl WorkspaceStore for MemoryWorkspaceStore {
    fn load(&self) -> Result<RegistrySnapshot> {
        self.snapshot()
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| WorksyncError::RegistryPoisoned)?;
        *guard = snapshot.clone();
        Ok(())
    }
}

/// The workspace list, kept in memory and written through to a store.
///
/// Every mutation builds the next state, saves it and only then replaces the
/// in-memory copy, so a failed save leaves the registry unchanged.
pub struct WorkspaceRegistry {
    store: Box<dyn WorkspaceStore>,
    state: RegistrySnapshot,
}

impl std::fmt::Debug for WorkspaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceRegistry")
            .field("workspaces", &self.state.workspaces.len())
            .field("active_workspace_id", &self.state.active_workspace_id)
            .finish()
    }
}

impl WorkspaceRegistry {
    /// Loads the registry, creating the default workspace at `default_path` if absent.
    pub fn open(store: Box<dyn WorkspaceStore>, default_path: impl Into<PathBuf>) -> Result<Self> {
        let mut state = store.load()?;
        let default_path = default_path.into();
        let mut dirty = false;

        if !state.workspaces.iter().any(Workspace::is_default) {
            let mut default = Workspace::new_local("Default", &default_path);
            default.id = DEFAULT_WORKSPACE_ID.to_string();
            state.workspaces.insert(0, default);
            dirty = true;
        }

        let active_valid = state
            .active_workspace_id
            .as_ref()
            .map_or(false, |id| state.workspaces.iter().any(|w| &w.id == id));
        if !active_valid {
            state.active_workspace_id = Some(DEFAULT_WORKSPACE_ID.to_string());
            dirty = true;
        }

        if let Some(default) = state.workspaces.iter().find(|w| w.is_default()) {
            if !default.path.exists() {
                fs::create_dir_all(&default.path).map_err(|source| WorksyncError::WriteFile {
                    path: default.path.clone(),
                    source,
                })?;
            }
        }

        if dirty {
            store.save(&state)?;
        }

        debug!("Registry loaded with {} workspace(s)", state.workspaces.len());
        Ok(Self { store, state })
    }

    pub fn list(&self) -> &[Workspace] {
        &self.state.workspaces
    }

    pub fn get(&self, id: &str) -> Result<&Workspace> {
        self.state
            .workspaces
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| WorksyncError::WorkspaceNotFound(id.to_string()))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&Workspace> {
        self.state
            .workspaces
            .iter()
            .find(|w| same_path(&w.path, path))
    }

    pub fn active_id(&self) -> &str {
        self.state
            .active_workspace_id
            .as_deref()
            .unwrap_or(DEFAULT_WORKSPACE_ID)
    }

    pub fn active(&self) -> Result<&Workspace> {
        self.get(self.active_id())
    }

    pub fn collections_path(&self, id: &str) -> Result<PathBuf> {
        self.get(id).map(Workspace::collections_path)
    }

    pub fn environments_path(&self, id: &str) -> Result<PathBuf> {
        self.get(id).map(Workspace::environments_path)
    }

    /// Checks the name and path of a workspace about to be stored under `id`.
    pub fn validate_candidate(&self, id: &str, name: &str, path: &Path) -> Result<()> {
        if name.trim().is_empty() {
            return Err(WorksyncError::validation("Workspace name must not be empty"));
        }
        if path.as_os_str().is_empty() {
            return Err(WorksyncError::validation("Workspace path must not be empty"));
        }
        if let Some(owner) = self
            .state
            .workspaces
            .iter()
            .find(|w| w.id != id && same_path(&w.path, path))
        {
            return Err(WorksyncError::Validation(format!(
                "Path {} is already used by workspace '{}'",
                path.display(),
                owner.name
            )));
        }
        Ok(())
    }

    fn commit(&mut self, next: RegistrySnapshot) -> Result<()> {
        self.store.save(&next)?;
        self.state = next;
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.state
            .workspaces
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| WorksyncError::WorkspaceNotFound(id.to_string()))
    }

    pub fn add(&mut self, workspace: Workspace) -> Result<()> {
        if self.state.workspaces.iter().any(|w| w.id == workspace.id) {
            return Err(WorksyncError::Validation(format!(
                "Workspace id already exists: {}",
                workspace.id
            )));
        }
        self.validate_candidate(&workspace.id, &workspace.name, &workspace.path)?;

        let mut next = self.state.clone();
        info!("Registering workspace '{}' at {}", workspace.name, workspace.path.display());
        next.workspaces.push(workspace);
        self.commit(next)
    }

    /// Replaces the stored record with the same id.
    pub fn update(&mut self, workspace: Workspace) -> Result<()> {
        let index = self.index_of(&workspace.id)?;
        let current = &self.state.workspaces[index];
        if current.is_default()
            && (current.name != workspace.name
                || current.path != workspace.path
                || workspace.kind != WorkspaceKind::Local)
        {
            return Err(WorksyncError::DefaultWorkspaceImmutable("modified"));
        }
        self.validate_candidate(&workspace.id, &workspace.name, &workspace.path)?;

        let mut next = self.state.clone();
        next.workspaces[index] = workspace;
        self.commit(next)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<Workspace> {
        let index = self.index_of(id)?;
        if self.state.workspaces[index].is_default() {
            return Err(WorksyncError::DefaultWorkspaceImmutable("renamed"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(WorksyncError::validation("Workspace name must not be empty"));
        }

        let mut next = self.state.clone();
        let workspace = &mut next.workspaces[index];
        workspace.name = name.to_string();
        workspace.touch();
        let renamed = workspace.clone();
        self.commit(next)?;
        Ok(renamed)
    }

    /// Removes a workspace record, optionally deleting its directory afterwards.
    pub fn delete(&mut self, id: &str, remove_files: bool) -> Result<Workspace> {
        let index = self.index_of(id)?;
        if self.state.workspaces[index].is_default() {
            return Err(WorksyncError::DefaultWorkspaceImmutable("deleted"));
        }

        let mut next = self.state.clone();
        let removed = next.workspaces.remove(index);
        if next.active_workspace_id.as_deref() == Some(id) {
            next.active_workspace_id = Some(DEFAULT_WORKSPACE_ID.to_string());
        }
        self.commit(next)?;

        if remove_files && removed.path.exists() {
            if let Err(e) = fs::remove_dir_all(&removed.path) {
                warn!(
                    "Workspace '{}' removed but its directory could not be deleted: {}",
                    removed.name, e
                );
            }
        }
        info!("Deleted workspace '{}'", removed.name);
        Ok(removed)
    }

    /// Relocates a workspace directory and updates its record.
    pub fn move_to(&mut self, id: &str, new_path: &Path) -> Result<Workspace> {
        let index = self.index_of(id)?;
        let current = self.state.workspaces[index].clone();
        if current.is_default() {
            return Err(WorksyncError::DefaultWorkspaceImmutable("moved"));
        }
        self.validate_candidate(id, &current.name, new_path)?;
        if new_path.exists() {
            return Err(WorksyncError::Validation(format!(
                "Destination already exists: {}",
                new_path.display()
            )));
        }

        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if current.path.exists() {
            fs::rename(&current.path, new_path).map_err(|source| WorksyncError::WriteFile {
                path: new_path.to_path_buf(),
                source,
            })?;
        }

        let mut next = self.state.clone();
        let workspace = &mut next.workspaces[index];
        workspace.path = new_path.to_path_buf();
        workspace.updated_at = Utc::now();
        let moved = workspace.clone();

        if let Err(e) = self.commit(next) {
            if new_path.exists() {
                let _ = fs::rename(new_path, &current.path);
            }
            return Err(e);
        }
        info!(
            "Moved workspace '{}' from {} to {}",
            moved.name,
            current.path.display(),
            new_path.display()
        );
        Ok(moved)
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        self.index_of(id)?;
        let mut next = self.state.clone();
        next.active_workspace_id = Some(id.to_string());
        self.commit(next)
    }
}
