//! Shared fixtures for worksync integration tests.
//!
//! Every test gets its own temp directory holding:
//! - a bare repository acting as the remote
//! - a collaborator clone that pushes competing history
//! - a `SyncEngine` backed by an in-memory registry

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use git2::{
    IndexAddOption, Oid, PushOptions, Repository, RepositoryInitOptions, ResetType, Signature,
};
use tempfile::TempDir;

use worksync::git::WorkspaceCredentials;
use worksync::{
    EngineConfig, GitOrigin, MemoryWorkspaceStore, SyncEngine, Workspace, WorkspaceDescriptor,
    WorkspaceKind,
};

pub const BRANCH: &str = "main";

/// Isolated engine plus a bare remote on disk.
pub struct Fixture {
    temp_dir: TempDir,
    pub remote_path: PathBuf,
    pub store: MemoryWorkspaceStore,
    pub engine: SyncEngine,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote.git");

        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head(BRANCH);
        Repository::init_opts(&remote_path, &options).expect("Failed to init bare remote");

        let mut config = EngineConfig::with_data_dir(temp_dir.path().join("data"));
        config.network_timeout_secs = 5;
        let store = MemoryWorkspaceStore::new();
        let engine = SyncEngine::with_parts(
            config,
            Box::new(store.clone()),
            Box::new(WorkspaceCredentials),
        )
        .expect("Failed to open engine");

        Self {
            temp_dir,
            remote_path,
            store,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn remote_url(&self) -> String {
        self.remote_path.to_string_lossy().into_owned()
    }

    /// Registers a workspace cloned from the fixture remote.
    pub fn clone_workspace(&self, name: &str) -> Workspace {
        let descriptor = WorkspaceDescriptor {
            name: name.to_string(),
            path: self.path(name),
            kind: WorkspaceKind::Git,
            git_origin: Some(GitOrigin::Cloned),
            remote_url: Some(self.remote_url()),
            ..Default::default()
        };
        self.engine
            .create_workspace(&descriptor)
            .expect("Failed to clone workspace")
    }

    /// Registers a freshly initialized git workspace without a remote.
    pub fn init_workspace(&self, name: &str) -> Workspace {
        let descriptor = WorkspaceDescriptor {
            name: name.to_string(),
            path: self.path(name),
            kind: WorkspaceKind::Git,
            git_origin: Some(GitOrigin::Initialized),
            ..Default::default()
        };
        self.engine
            .create_workspace(&descriptor)
            .expect("Failed to initialize workspace")
    }

    /// A second clone of the remote, driven directly through git2.
    pub fn collaborator(&self) -> Collaborator {
        let path = self.path("collaborator");
        let mut options = RepositoryInitOptions::new();
        options.initial_head(BRANCH);
        let repo = Repository::init_opts(&path, &options).expect("Failed to init collaborator");
        repo.remote("origin", &self.remote_url())
            .expect("Failed to add collaborator remote");
        let collaborator = Collaborator { repo, path };
        collaborator.sync();
        collaborator
    }

    /// Seeds the remote with one commit holding `files`.
    pub fn seed_remote(&self, files: &[(&str, &str)]) -> Collaborator {
        let collaborator = self.collaborator();
        for (name, content) in files {
            collaborator.write(name, content);
        }
        collaborator.commit("Seed remote");
        collaborator.push();
        collaborator
    }
}

pub struct Collaborator {
    pub repo: Repository,
    pub path: PathBuf,
}

impl Collaborator {
    pub fn write(&self, name: &str, content: &str) {
        write_file(&self.path, name, content);
    }

    pub fn commit(&self, message: &str) -> Oid {
        commit_all(&self.repo, message)
    }

    pub fn push(&self) {
        self.push_refspec(&format!("refs/heads/{0}:refs/heads/{0}", BRANCH));
    }

    pub fn force_push(&self) {
        self.push_refspec(&format!("+refs/heads/{0}:refs/heads/{0}", BRANCH));
    }

    fn push_refspec(&self, refspec: &str) {
        let mut remote = self.repo.find_remote("origin").unwrap();
        let mut options = PushOptions::new();
        remote
            .push(&[refspec], Some(&mut options))
            .expect("Collaborator push failed");
    }

    /// Resets to the remote branch if it exists.
    pub fn sync(&self) {
        let mut remote = self.repo.find_remote("origin").unwrap();
        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", BRANCH);
        remote
            .fetch(&[refspec.as_str()], None, None)
            .expect("Collaborator fetch failed");
        if let Ok(oid) = self
            .repo
            .refname_to_id(&format!("refs/remotes/origin/{}", BRANCH))
        {
            let object = self.repo.find_object(oid, None).unwrap();
            self.repo.reset(&object, ResetType::Hard, None).unwrap();
        }
    }

    pub fn head(&self) -> Oid {
        self.repo.head().unwrap().target().unwrap()
    }
}

pub fn write_file(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn read_file(root: &Path, name: &str) -> String {
    fs::read_to_string(root.join(name)).unwrap()
}

/// Stages everything and commits on HEAD with a fixed identity.
pub fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("Collaborator", "collaborator@example.com").unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.target())
        .map(|oid| repo.find_commit(oid).unwrap());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

pub fn head_of(path: &Path) -> Option<Oid> {
    let repo = Repository::open(path).unwrap();
    let head = repo.head().ok()?;
    head.target()
}
