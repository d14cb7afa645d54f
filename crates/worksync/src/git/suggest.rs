//! Operation-specific warnings and suggestions derived from a status report.

use super::types::{MergeOutcome, OperationType, StatusCheck};

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Appends warnings and ordered suggestions to `check` from its flags and counts.
pub(crate) fn annotate(check: &mut StatusCheck) {
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    let ahead = check.local_commits_ahead;
    let behind = check.remote_commits_behind;
    let changes = check.local_changes.total();
    let target = check
        .remote_branch
        .clone()
        .unwrap_or_else(|| "the remote".to_string());

    if !check.has_remote_repository {
        warnings.push("No remote repository configured".to_string());
        if check.operation != OperationType::Commit {
            suggestions.push("Add a remote repository to enable push and pull".to_string());
        }
    } else if !check.has_upstream_branch {
        let branch = check.branch.as_deref().unwrap_or("HEAD");
        warnings.push(format!("Branch '{}' has no upstream branch", branch));
        suggestions.push(format!(
            "Bind '{}' to a remote branch before pushing or pulling",
            branch
        ));
        if check.is_first_push && ahead > 0 {
            suggestions.push(format!(
                "The remote branch does not exist yet; binding and pushing {} is a safe first push",
                plural(ahead, "commit")
            ));
        }
    } else if !check.can_connect_to_remote {
        suggestions.push("Check the network connection and credentials, then retry".to_string());
    }

    if check.has_actual_conflicts {
        let files = check.conflicting_files().join(", ");
        warnings.push(format!(
            "{} with conflicting changes: {}",
            plural(check.conflict_details.len(), "file"),
            files
        ));
    }

    if !check.local_changes.conflicting.is_empty() {
        warnings.push(format!(
            "{} still unresolved from a previous merge",
            plural(check.local_changes.conflicting.len(), "conflicted file")
        ));
    }

    match check.operation {
        OperationType::Commit => commit_advice(check, changes, &mut warnings, &mut suggestions),
        OperationType::Push => push_advice(
            check,
            ahead,
            behind,
            &target,
            &mut warnings,
            &mut suggestions,
        ),
        OperationType::Pull => pull_advice(
            check,
            ahead,
            behind,
            changes,
            &target,
            &mut warnings,
            &mut suggestions,
        ),
    }

    if check.can_auto_merge && check.operation != OperationType::Commit {
        match check.merge_outcome {
            Some(MergeOutcome::OnlyNewFiles) => suggestions.push(
                "Both sides only added new files; the changes merge automatically".to_string(),
            ),
            Some(MergeOutcome::NonOverlappingFiles) => suggestions.push(
                "Local and remote changed different files; the changes merge automatically"
                    .to_string(),
            ),
            Some(MergeOutcome::NonOverlappingChanges) => suggestions.push(
                "Some files changed on both sides in separate places; the changes merge automatically"
                    .to_string(),
            ),
            _ => {}
        }
    }

    check.warnings.extend(warnings);
    check.suggestions.extend(suggestions);
}

fn commit_advice(
    check: &StatusCheck,
    changes: usize,
    warnings: &mut Vec<String>,
    suggestions: &mut Vec<String>,
) {
    if !check.has_uncommitted_changes {
        suggestions.push("Nothing to commit; the working tree is clean".to_string());
    } else if check.can_commit {
        suggestions.push(format!("Commit {}", plural(changes, "changed file")));
    } else {
        warnings.push("Resolve conflicted files before committing".to_string());
    }
}

fn push_advice(
    check: &StatusCheck,
    ahead: usize,
    behind: usize,
    target: &str,
    warnings: &mut Vec<String>,
    suggestions: &mut Vec<String>,
) {
    if !check.has_upstream_branch || !check.can_connect_to_remote {
        return;
    }

    if check.is_first_push {
        if ahead > 0 {
            suggestions.push(format!(
                "Remote branch {} does not exist yet; pushing {} creates it (safe first push)",
                target,
                plural(ahead, "commit")
            ));
        } else {
            warnings.push("Nothing to push: the repository has no commits yet".to_string());
            suggestions.push("Commit your changes first, then push".to_string());
        }
        return;
    }

    if check.needs_force_push {
        warnings.push(format!(
            "Local and remote histories have diverged ({} ahead, {} behind)",
            plural(ahead, "local commit"),
            plural(behind, "remote commit")
        ));
        suggestions.push(format!(
            "Pull the {} first, then push your {}",
            plural(behind, "remote commit"),
            plural(ahead, "local commit")
        ));
        suggestions.push(format!(
            "Force-push to overwrite the remote history (discards {} on {})",
            plural(behind, "remote commit"),
            target
        ));
        return;
    }

    if behind > 0 {
        warnings.push(format!("{} has {}", target, plural(behind, "new commit")));
        suggestions.push("Pull before pushing".to_string());
        return;
    }

    if ahead == 0 {
        suggestions.push("Nothing to push; everything is up to date".to_string());
        return;
    }

    if check.has_uncommitted_changes {
        warnings.push("Uncommitted changes are not included in a push".to_string());
        suggestions.push("Commit your changes before pushing".to_string());
    } else {
        suggestions.push(format!("Push {} to {}", plural(ahead, "commit"), target));
    }
}

fn pull_advice(
    check: &StatusCheck,
    ahead: usize,
    behind: usize,
    changes: usize,
    target: &str,
    warnings: &mut Vec<String>,
    suggestions: &mut Vec<String>,
) {
    if !check.has_upstream_branch || !check.can_connect_to_remote {
        return;
    }

    if check.is_remote_repository_empty {
        suggestions.push(format!(
            "Remote branch {} does not exist yet; nothing to pull",
            target
        ));
        return;
    }

    if behind == 0 {
        suggestions.push("Nothing to pull; already up to date".to_string());
        return;
    }

    if check.needs_force_pull {
        warnings.push(format!(
            "You have {} and {} has {}",
            plural(changes, "uncommitted change"),
            target,
            plural(behind, "new commit")
        ));
        suggestions.push("Commit or stash your changes first, then pull".to_string());
        suggestions.push(format!(
            "Force-pull to take the remote version (permanently discards {})",
            plural(changes, "local change")
        ));
        return;
    }

    if ahead > 0 {
        suggestions.push(format!(
            "Pulling merges {} into your {}",
            plural(behind, "remote commit"),
            plural(ahead, "local commit")
        ));
    } else {
        suggestions.push(format!("Pull {} from {}", plural(behind, "commit"), target));
    }
}
