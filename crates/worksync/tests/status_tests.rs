//! Pre-flight analysis against a real bare remote.

mod common;

use common::{write_file, Fixture};
use git2::Repository;
use worksync::{GitAuthSettings, GitAuthType, MergeOutcome, OperationType};

const COLLECTIONS: &str = "[\n  \"users\",\n  \"orders\",\n  \"billing\"\n]\n";

#[test]
fn test_workspace_without_remote_never_pulls() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("local-only");

    for operation in [OperationType::Commit, OperationType::Push, OperationType::Pull] {
        let check = fixture
            .engine
            .check_git_status(&workspace.id, operation)
            .unwrap();
        assert!(!check.has_remote_repository);
        assert!(!check.can_pull);
        assert!(!check.is_empty_local_repository);
        assert!(check
            .warnings
            .iter()
            .any(|w| w == "No remote repository configured"));
    }
}

#[test]
fn test_clean_clone_is_up_to_date() {
    let fixture = Fixture::new();
    fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(check.has_upstream_branch);
    assert!(check.can_connect_to_remote);
    assert_eq!(check.remote_branch.as_deref(), Some("origin/main"));
    assert_eq!(check.local_commits_ahead, 0);
    assert_eq!(check.remote_commits_behind, 0);
    assert!(!check.can_pull);
    assert!(!check.can_push);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::UpToDate));
}

#[test]
fn test_remote_ahead_is_fast_forward() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    collaborator.write("environments.json", "{\"dev\": {}}\n");
    collaborator.commit("Add environments");
    collaborator.write("collections.json", "[]\n");
    collaborator.commit("Clear collections");
    collaborator.push();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert_eq!(check.local_commits_ahead, 0);
    assert_eq!(check.remote_commits_behind, 2);
    assert!(check.can_pull);
    assert!(!check.can_push);
    assert!(!check.needs_force_push);
    assert!(!check.has_actual_conflicts);
    assert!(check.can_auto_merge);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::FastForwardPull));
    assert_eq!(check.remote_changes.added, vec!["environments.json"]);
    assert_eq!(check.remote_changes.modified, vec!["collections.json"]);
}

#[test]
fn test_local_commits_ahead_fast_forward_push() {
    let fixture = Fixture::new();
    fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "notes.md", "draft\n");
    let committed = fixture
        .engine
        .commit_changes(&workspace.id, "Add notes")
        .unwrap();
    assert!(committed.success);

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Push)
        .unwrap();
    assert_eq!(check.local_commits_ahead, 1);
    assert_eq!(check.remote_commits_behind, 0);
    assert!(check.can_push);
    assert!(!check.can_pull);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::FastForwardPush));
}

#[test]
fn test_diverged_counts_mirror_between_clones() {
    let fixture = Fixture::new();
    fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let first = fixture.clone_workspace("first");
    let second = fixture.clone_workspace("second");

    write_file(&first.path, "a.json", "{}\n");
    fixture.engine.commit_changes(&first.id, "a").unwrap();
    write_file(&first.path, "b.json", "{}\n");
    fixture.engine.commit_changes(&first.id, "b").unwrap();

    write_file(&second.path, "c.json", "{}\n");
    fixture.engine.commit_changes(&second.id, "c").unwrap();
    assert!(fixture.engine.push_changes(&second.id).unwrap().success);

    let check = fixture
        .engine
        .check_git_status(&first.id, OperationType::Push)
        .unwrap();
    assert_eq!(
        (check.local_commits_ahead, check.remote_commits_behind),
        (2, 1)
    );
    assert!(check.needs_force_push);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::OnlyNewFiles));

    let forced = fixture.engine.force_push_changes(&first.id).unwrap();
    assert!(forced.success, "{}", forced.message);

    let mirrored = fixture
        .engine
        .check_git_status(&second.id, OperationType::Push)
        .unwrap();
    assert_eq!(
        (mirrored.local_commits_ahead, mirrored.remote_commits_behind),
        (1, 2)
    );
}

#[test]
fn test_overlapping_edit_yields_one_conflict_block() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    write_file(
        &workspace.path,
        "collections.json",
        "[\n  \"users\",\n  \"customers\",\n  \"billing\"\n]\n",
    );
    fixture
        .engine
        .commit_changes(&workspace.id, "Rename orders")
        .unwrap();

    collaborator.write(
        "collections.json",
        "[\n  \"users\",\n  \"purchases\",\n  \"billing\"\n]\n",
    );
    collaborator.commit("Rename orders differently");
    collaborator.push();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(check.has_actual_conflicts);
    assert!(!check.can_auto_merge);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::Conflicts));
    assert_eq!(check.conflicting_files(), vec!["collections.json"]);

    let blocks = &check.conflict_details["collections.json"];
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].base_lines, vec!["  \"orders\","]);
    assert_eq!(blocks[0].local_lines, vec!["  \"customers\","]);
    assert_eq!(blocks[0].remote_lines, vec!["  \"purchases\","]);
    assert!(check
        .warnings
        .iter()
        .any(|w| w.contains("conflicting changes: collections.json")));
}

#[test]
fn test_same_file_disjoint_edits_merge_automatically() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    write_file(
        &workspace.path,
        "collections.json",
        "[\n  \"accounts\",\n  \"orders\",\n  \"billing\"\n]\n",
    );
    fixture.engine.commit_changes(&workspace.id, "local").unwrap();

    collaborator.write(
        "collections.json",
        "[\n  \"users\",\n  \"orders\",\n  \"invoices\"\n]\n",
    );
    collaborator.commit("remote");
    collaborator.push();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(!check.has_actual_conflicts);
    assert!(check.can_auto_merge);
    assert_eq!(
        check.merge_outcome,
        Some(MergeOutcome::NonOverlappingChanges)
    );
}

#[test]
fn test_uncommitted_change_and_remote_change_on_other_files() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[
        ("collections.json", COLLECTIONS),
        ("environments.json", "{}\n"),
    ]);
    let workspace = fixture.clone_workspace("team");

    write_file(&workspace.path, "collections.json", "[]\n");

    collaborator.write("environments.json", "{\"prod\": {}}\n");
    collaborator.commit("Add prod");
    collaborator.push();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(check.has_uncommitted_changes);
    assert_eq!(check.local_changes.modified, vec!["collections.json"]);
    assert_eq!(check.remote_commits_behind, 1);
    assert!(check.needs_force_pull);
    assert!(!check.has_actual_conflicts);
    assert!(check.can_auto_merge);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::NonOverlappingFiles));
    assert_eq!(
        check.suggestions[0],
        "Commit or stash your changes first, then pull"
    );
}

#[test]
fn test_first_push_after_three_commits() {
    let fixture = Fixture::new();
    let workspace = fixture.clone_workspace("fresh");
    assert_eq!(workspace.remote_branch.as_deref(), Some("origin/main"));

    for i in 0..3 {
        write_file(&workspace.path, &format!("file{}.json", i), "{}\n");
        let result = fixture
            .engine
            .commit_changes(&workspace.id, &format!("commit {}", i))
            .unwrap();
        assert!(result.success, "{}", result.message);
    }

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Push)
        .unwrap();
    assert!(check.can_connect_to_remote);
    assert!(check.is_remote_repository_empty);
    assert!(check.is_first_push);
    assert_eq!(check.local_commits_ahead, 3);
    assert!(check.can_push);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::FirstPush));
    assert!(check.suggestions[0].contains("safe first push"));
}

#[test]
fn test_unreachable_remote_is_reported_not_raised() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("offline");
    let missing = fixture.path("missing.git");
    let added = fixture
        .engine
        .add_remote_repository(&workspace.id, &missing.to_string_lossy(), None, None)
        .unwrap();
    assert!(added.success, "{}", added.message);

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(check.has_remote_repository);
    assert!(check.has_upstream_branch);
    assert!(!check.can_connect_to_remote);
    assert!(!check.can_pull);
    assert!(check
        .warnings
        .iter()
        .any(|w| w.starts_with("Could not reach remote 'origin'")));

    let pushed = fixture.engine.push_changes(&workspace.id);
    assert!(pushed.map_or(true, |result| !result.success));
}

#[test]
fn test_analysis_leaves_branch_and_tree_untouched() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");
    write_file(&workspace.path, "collections.json", "[\"local\"]\n");

    collaborator.write("collections.json", "[\"remote\"]\n");
    collaborator.commit("remote edit");
    collaborator.push();

    let repo = Repository::open(&workspace.path).unwrap();
    let before = repo.head().unwrap().target();
    fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert_eq!(repo.head().unwrap().target(), before);
    assert_eq!(
        common::read_file(&workspace.path, "collections.json"),
        "[\"local\"]\n"
    );
    assert!(check_local_edit_is_still_uncommitted(&repo));
}

fn check_local_edit_is_still_uncommitted(repo: &Repository) -> bool {
    let statuses = repo.statuses(None).unwrap();
    statuses
        .iter()
        .any(|entry| entry.path() == Some("collections.json") && entry.status().is_wt_modified())
}

#[test]
fn test_bound_workspace_against_empty_remote() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("fresh");
    fixture
        .engine
        .add_remote_repository(&workspace.id, &fixture.remote_url(), None, None)
        .unwrap();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Push)
        .unwrap();
    assert!(check.has_upstream_branch);
    assert!(check.can_connect_to_remote);
    assert!(check.is_remote_repository_empty);
    assert!(check.is_first_push);
    assert_eq!(check.local_commits_ahead, 1);
    assert!(check.can_push);
    assert!(!check.can_pull);
}

#[test]
fn test_untracked_branch_against_absent_remote_branch_is_safe_first_push() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("fresh");
    Repository::open(&workspace.path)
        .unwrap()
        .remote("origin", &fixture.remote_url())
        .unwrap();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Push)
        .unwrap();
    assert!(check.has_remote_repository);
    assert!(!check.has_upstream_branch);
    assert!(check.can_connect_to_remote);
    assert!(check.is_first_push);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::FirstPush));
    assert!(!check.warnings.iter().any(|w| w.contains("may collide")));
}

#[test]
fn test_untracked_branch_against_existing_remote_branch_warns_of_collision() {
    let fixture = Fixture::new();
    fixture.seed_remote(&[("README.md", "# Upstream\n\nShared notes\n")]);
    let workspace = fixture.init_workspace("team");
    Repository::open(&workspace.path)
        .unwrap()
        .remote("origin", &fixture.remote_url())
        .unwrap();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Push)
        .unwrap();
    assert!(!check.has_upstream_branch);
    assert!(check.can_connect_to_remote);
    assert_eq!(check.remote_commits_behind, 1);
    assert!(check
        .warnings
        .iter()
        .any(|w| w.starts_with("Remote branch origin/main already exists; a first push may collide")));
    assert_eq!(check.conflicting_files(), vec!["README.md"]);
    assert_eq!(check.merge_outcome, Some(MergeOutcome::Conflicts));

    let repo = Repository::open(&workspace.path).unwrap();
    assert!(repo.find_reference("refs/remotes/origin/main").is_err());
}

#[test]
fn test_uncommitted_edit_overlapping_remote_commit() {
    let fixture = Fixture::new();
    let collaborator = fixture.seed_remote(&[("collections.json", COLLECTIONS)]);
    let workspace = fixture.clone_workspace("team");

    write_file(
        &workspace.path,
        "collections.json",
        "[\n  \"users\",\n  \"customers\",\n  \"billing\"\n]\n",
    );
    collaborator.write(
        "collections.json",
        "[\n  \"users\",\n  \"purchases\",\n  \"billing\"\n]\n",
    );
    collaborator.commit("Rename orders");
    collaborator.push();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Pull)
        .unwrap();
    assert!(check.has_uncommitted_changes);
    assert!(check.needs_force_pull);
    assert!(check.has_actual_conflicts);

    let blocks = &check.conflict_details["collections.json"];
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].base_lines, vec!["  \"orders\","]);
    assert_eq!(blocks[0].local_lines, vec!["  \"customers\","]);
    assert_eq!(blocks[0].remote_lines, vec!["  \"purchases\","]);
}

#[test]
fn test_unresolvable_credentials_lead_the_warnings() {
    let fixture = Fixture::new();
    let workspace = fixture.init_workspace("team");
    let auth = GitAuthSettings {
        auth_type: GitAuthType::Token,
        username: Some("deploy".to_string()),
        token_env_var: Some("WORKSYNC_STATUS_TOKEN_NEVER_SET".to_string()),
        ..Default::default()
    };
    fixture
        .engine
        .update_git_authentication(&workspace.id, auth)
        .unwrap();

    let check = fixture
        .engine
        .check_git_status(&workspace.id, OperationType::Commit)
        .unwrap();
    assert!(check.warnings[0].starts_with("Credentials could not be resolved"));
    assert!(check
        .warnings
        .iter()
        .any(|w| w == "No remote repository configured"));
}
