//! Mutating operations run through the engine.

mod common;

use common::{head_of, read_file, write_file, Fixture};
use git2::Repository;
use worksync::{GitOperation, OperationType};

#[test]
fn test_commit_then_status_is_clean() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("team");
    write_file(&workspace.path, "collections.json", "[]\n");
    write_file(&workspace.path, "environments.json", "{}\n");

    let result = fixture
        .engine
        .commit_changes(&workspace.id, "Add data files")
        .unwrap();
    assert!(result.success);
    assert_eq!(result.operation, GitOperation::Commit);
    assert_eq!(
        result.affected_files,
        vec!["collections.json", "environments.json"]
    );

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Commit)
        .unwrap();
    assert!(!check.has_uncommitted_changes);
    assert!(!check.can_commit);

    let refreshed = fixture.engine.get_workspace(&workspace.id).unwrap();
    assert_eq!(
        refreshed.last_commit_id,
        head_of(&workspace.path).map(|oid| oid.to_string())
    );
}

#[test]
fn test_commit_with_clean_tree_fails() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("team");
    let result = fixture
        .engine
        .commit_changes(&workspace.id, "Nothing")
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.message, "Nothing to commit");
}

#[test]
fn test_git_operation_on_local_workspace_fails() {
    let fixture = Fixture::new();
    let default = fixture.engine.active_workspace().unwrap();
    let result = fixture.engine.pull_updates(&default.id).unwrap();
    assert!(!result.success);
    assert!(result.message.contains("not a git workspace"));
}

#[test]
fn test_pull_from_empty_remote_is_a_no_op() {
    let fixture = Fixture::new();
    let workspace = fixture.clone_workspace("fresh");

    let result = fixture.engine.pull_updates(&workspace.id).unwrap();
    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("nothing to pull"));

    let forced = fixture.engine.force_pull_updates(&workspace.id).unwrap();
    assert!(forced.success);
    assert!(forced.message.contains("nothing to pull"));
}

#[test]
fn test_first_push_creates_remote_branch() {
    let fixture = Fixture::new();
    let workspace = fixture.clone_workspace("fresh");
    for i in 0..3 {
        write_file(&workspace.path, &format!("file{}.json", i), "{}\n");
        fixture
            .engine
            .commit_changes(&workspace.id, &format!("commit {}", i))
            .unwrap();
    }

    let result = fixture.engine.push_changes(&workspace.id).unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "Pushed 3 commits to origin/main");
    assert!(result.details.iter().any(|d| d == "Created remote branch"));
    assert_eq!(
        result.affected_files,
        vec!["file0.json", "file1.json", "file2.json"]
    );

    let collaborator = fixture.collaborator();
    assert_eq!(Some(collaborator.head()), head_of(&workspace.path));

    let again = fixture.engine.push_changes(&workspace.id).unwrap();
    assert!(again.success);
    assert_eq!(again.message, "Everything up-to-date");
}

#[test]
fn test_pull_fast_forwards() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    collaborator.write("collections.json", "[\"users\"]\n");
    collaborator.commit("Add users");
    collaborator.push();

    let result = fixture.engine.pull_updates(&workspace.id).unwrap();
    assert!(result.success, "{}", result.message);
    assert!(result.message.starts_with("Fast-forwarded main"));
    assert_eq!(result.affected_files, vec!["collections.json"]);
    assert_eq!(
        read_file(&workspace.path, "collections.json"),
        "[\"users\"]\n"
    );
    assert_eq!(head_of(&workspace.path), Some(collaborator.head()));

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert_eq!(check.remote_commits_behind, 0);
}

#[test]
fn test_pull_merges_diverged_history_then_push_succeeds() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "local.json", "{}\n");
    fixture.engine.commit_changes(&workspace.id, "local").unwrap();
    collaborator.write("remote.json", "{}\n");
    collaborator.commit("remote");
    collaborator.push();

    let rejected = fixture.engine.push_changes(&workspace.id).unwrap();
    assert!(!rejected.success);
    assert!(rejected.message.starts_with("Push rejected"));

    let pulled = fixture.engine.pull_updates(&workspace.id).unwrap();
    assert!(pulled.success, "{}", pulled.message);
    assert_eq!(pulled.message, "Merged origin/main into main");
    assert!(workspace.path.join("remote.json").exists());
    assert!(workspace.path.join("local.json").exists());

    let pushed = fixture.engine.push_changes(&workspace.id).unwrap();
    assert!(pushed.success, "{}", pushed.message);
    assert_eq!(pushed.message, "Pushed 2 commits to origin/main");
}

#[test]
fn test_conflicting_pull_aborts_and_force_pull_takes_remote() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[\"users\"]\n")]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "collections.json", "[\"accounts\"]\n");
    fixture.engine.commit_changes(&workspace.id, "local").unwrap();
    let local_head = head_of(&workspace.path);

    collaborator.write("collections.json", "[\"customers\"]\n");
    collaborator.commit("remote");
    collaborator.push();

    let pulled = fixture.engine.pull_updates(&workspace.id).unwrap();
    assert!(!pulled.success);
    assert!(pulled.message.starts_with("Pull aborted: 1 file conflict"));
    assert_eq!(pulled.affected_files, vec!["collections.json"]);
    assert_eq!(head_of(&workspace.path), local_head);
    assert_eq!(
        read_file(&workspace.path, "collections.json"),
        "[\"accounts\"]\n"
    );

    write_file(&workspace.path, "scratch.txt", "temporary\n");
    let forced = fixture.engine.force_pull_updates(&workspace.id).unwrap();
    assert!(forced.success, "{}", forced.message);
    assert_eq!(forced.affected_files, vec!["scratch.txt"]);
    assert!(forced.details.iter().any(|d| d == "Discarded 1 local commit"));
    assert_eq!(head_of(&workspace.path), Some(collaborator.head()));
    assert_eq!(
        read_file(&workspace.path, "collections.json"),
        "[\"customers\"]\n"
    );
    assert!(!workspace.path.join("scratch.txt").exists());
}

#[test]
fn test_pull_discards_uncommitted_changes() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "collections.json", "[\"dirty\"]\n");
    collaborator.write("environments.json", "{}\n");
    collaborator.commit("remote");
    collaborator.push();

    let pulled = fixture.engine.pull_updates(&workspace.id).unwrap();
    assert!(pulled.success, "{}", pulled.message);
    assert!(pulled
        .details
        .iter()
        .any(|d| d == "Discarded local changes: collections.json"));
    assert_eq!(read_file(&workspace.path, "collections.json"), "[]\n");
    assert!(workspace.path.join("environments.json").exists());
}

#[test]
fn test_force_push_overwrites_remote() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "collections.json", "[\"mine\"]\n");
    fixture.engine.commit_changes(&workspace.id, "mine").unwrap();
    collaborator.write("collections.json", "[\"theirs\"]\n");
    collaborator.commit("theirs");
    collaborator.push();

    let forced = fixture.engine.force_push_changes(&workspace.id).unwrap();
    assert!(forced.success, "{}", forced.message);
    assert_eq!(forced.operation, GitOperation::ForcePush);
    assert!(forced
        .details
        .iter()
        .any(|d| d == "Discarded 1 commit from the remote"));

    collaborator.sync();
    assert_eq!(
        read_file(&collaborator.path, "collections.json"),
        "[\"mine\"]\n"
    );
}

#[test]
fn test_stash_and_pop_through_engine() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("team");
    write_file(&workspace.path, "draft.json", "{}\n");

    let stashed = fixture.engine.stash_changes(&workspace.id).unwrap();
    assert!(stashed.success, "{}", stashed.message);
    assert!(!workspace.path.join("draft.json").exists());

    let popped = fixture.engine.pop_stash_changes(&workspace.id).unwrap();
    assert!(popped.success, "{}", popped.message);
    assert_eq!(popped.affected_files, vec!["draft.json"]);
    assert!(popped.details.iter().any(|d| d == "0 stash entries left"));
}

#[test]
fn test_remote_status_summary() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    let status = fixture.engine.get_remote_status(&workspace.id).unwrap();
    assert!(status.success);
    assert_eq!(status.operation, GitOperation::RemoteStatus);
    assert_eq!(status.message, "Up to date with origin/main");

    collaborator.write("collections.json", "[\"new\"]\n");
    collaborator.commit("new");
    collaborator.push();

    let status = fixture.engine.get_remote_status(&workspace.id).unwrap();
    assert_eq!(status.message, "0 ahead, 1 behind origin/main");
    assert!(status.details.iter().any(|d| d == "behind 1"));

    let local = fixture.init_workspace("local");
    let status = fixture.engine.get_remote_status(&local.id).unwrap();
    assert!(!status.success);
    assert_eq!(status.message, "No remote repository configured");
}

#[test]
fn test_pull_keeps_local_work_when_remote_is_unreachable() {
    let fixture = Fixture::new();
    fixture.seed_remote(&[("collections.json", "[]\n")]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "collections.json", "[\"draft\"]\n");
    write_file(&workspace.path, "notes.txt", "keep me\n");
    let gone = fixture.path("gone.git");
    Repository::open(&workspace.path)
        .unwrap()
        .remote_set_url("origin", &gone.to_string_lossy())
        .unwrap();

    let pulled = fixture.engine.pull_updates(&workspace.id);
    assert!(pulled.map_or(true, |result| !result.success));
    assert_eq!(
        read_file(&workspace.path, "collections.json"),
        "[\"draft\"]\n"
    );
    assert_eq!(read_file(&workspace.path, "notes.txt"), "keep me\n");
}
