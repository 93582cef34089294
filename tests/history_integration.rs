//! Integration tests for commit history, branching, divergence, and
//! the merge flow over the in-memory object store.

use std::sync::Arc;

use weft::core::state::{can_auto_merge_commit_states, CommitState, TextKv};
use weft::core::types::{BranchName, CommitSha, RepoId};
use weft::diff::merge::MergePreference;
use weft::history::repo::{RepoError, Repository};
use weft::store::MemoryStore;

fn repo() -> Repository {
    Repository::new(RepoId::new(), Arc::new(MemoryStore::new()))
}

fn branch(name: &str) -> BranchName {
    BranchName::new(name).unwrap()
}

/// Stage a plugins list and commit it, returning the new sha.
async fn commit_plugins(
    repo: &Repository,
    pairs: &[(&str, &str)],
    message: &str,
) -> CommitSha {
    let mut next = repo.get_working_state().await.unwrap();
    next.plugins = pairs
        .iter()
        .map(|(name, version)| TextKv::new(*name, *version))
        .collect();
    repo.update_working_state(&next).await.unwrap();
    repo.commit(message, "maintainer").await.unwrap().sha
}

async fn commit_description(repo: &Repository, text: &str, message: &str) -> CommitSha {
    let mut next = repo.get_working_state().await.unwrap();
    next.description = text.to_string();
    repo.update_working_state(&next).await.unwrap();
    repo.commit(message, "maintainer").await.unwrap().sha
}

#[tokio::test]
async fn history_walks_to_the_root() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    let first = commit_plugins(&repo, &[("palette", "0.1.0")], "one").await;
    let second = commit_plugins(&repo, &[("palette", "0.1.0"), ("theme", "0.1.0")], "two").await;

    let history = repo.get_history(&second).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sha, second);
    assert_eq!(history[1].sha, first);
    assert_eq!(history[0].idx, 1);
    assert_eq!(history[1].idx, 0);
}

#[tokio::test]
async fn commit_state_replays_the_chain() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    commit_plugins(&repo, &[("palette", "0.1.0")], "one").await;
    let tip = commit_description(&repo, "a base palette", "two").await;

    let state = repo.get_commit_state(Some(&tip)).await.unwrap();
    assert_eq!(state.description, "a base palette");
    assert_eq!(state.plugins, vec![TextKv::new("palette", "0.1.0")]);

    // The empty sha reconstructs the empty state.
    let empty = repo.get_commit_state(None).await.unwrap();
    assert_eq!(empty, CommitState::default());
}

#[tokio::test]
async fn divergence_origin_is_the_last_shared_commit() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    let shared = commit_plugins(&repo, &[("palette", "0.1.0")], "shared").await;

    repo.create_branch(&branch("feature"), "maintainer").await.unwrap();

    // main advances twice, feature once.
    let main_tip =
        commit_plugins(&repo, &[("palette", "0.1.0"), ("icons", "0.3.0")], "main a").await;
    let main_tip2 = commit_description(&repo, "main moved on", "main b").await;

    repo.switch_branch(&branch("feature")).await.unwrap();
    let feature_tip = commit_description(&repo, "feature work", "feature a").await;

    let origin = repo
        .divergence_origin(&main_tip2, &feature_tip)
        .await
        .unwrap();
    assert_eq!(origin, Some(shared.clone()));

    // Symmetric.
    let origin = repo
        .divergence_origin(&feature_tip, &main_tip2)
        .await
        .unwrap();
    assert_eq!(origin, Some(shared));

    // A tip against its own ancestor diverges at the ancestor.
    let origin = repo.divergence_origin(&main_tip2, &main_tip).await.unwrap();
    assert_eq!(origin, Some(main_tip));
}

#[tokio::test]
async fn merge_flow_composes_both_sides() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    commit_plugins(&repo, &[("palette", "0.1.0")], "shared").await;
    repo.create_branch(&branch("feature"), "maintainer").await.unwrap();

    // main edits plugins; feature edits the description.
    commit_plugins(&repo, &[("palette", "0.1.0"), ("icons", "0.3.0")], "main a").await;

    let main_current = repo.current().await.unwrap();
    let main_tip = main_current.commit.clone().unwrap();

    repo.switch_branch(&branch("feature")).await.unwrap();
    let feature_tip = commit_description(&repo, "feature description", "feature a").await;

    // The two sides edited different fields: auto-mergeable.
    let origin = repo
        .divergence_origin(&main_tip, &feature_tip)
        .await
        .unwrap();
    let origin_state = repo.get_commit_state(origin.as_ref()).await.unwrap();
    let ours = repo.get_commit_state(Some(&feature_tip)).await.unwrap();
    let theirs = repo.get_commit_state(Some(&main_tip)).await.unwrap();
    assert!(can_auto_merge_commit_states(&origin_state, &ours, &theirs));

    // Merge main into feature.
    let staged = repo
        .begin_merge(&main_tip, MergePreference::Ours)
        .await
        .unwrap();
    assert!(staged.is_merge());
    assert!(staged.is_dirty());

    let merge_commit = repo.commit("merge main", "maintainer").await.unwrap();
    assert_eq!(merge_commit.historical_parent, Some(main_tip));
    assert_eq!(merge_commit.parent, Some(feature_tip));

    let merged = repo
        .get_commit_state(Some(&merge_commit.sha))
        .await
        .unwrap();
    assert_eq!(merged.description, "feature description");
    assert_eq!(merged.plugins.len(), 2);

    let current = repo.current().await.unwrap();
    assert!(!current.is_merge());
    assert!(!current.is_dirty());
}

#[tokio::test]
async fn merge_blocks_checkout_until_resolved_or_aborted() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    commit_plugins(&repo, &[("palette", "0.1.0")], "shared").await;
    repo.create_branch(&branch("feature"), "maintainer").await.unwrap();
    let main_tip = commit_description(&repo, "main side", "main a").await;

    repo.switch_branch(&branch("feature")).await.unwrap();
    commit_description(&repo, "feature side", "feature a").await;

    repo.begin_merge(&main_tip, MergePreference::Theirs)
        .await
        .unwrap();

    assert!(matches!(
        repo.switch_branch(&branch("main")).await,
        Err(RepoError::MergeInProgress),
    ));

    let aborted = repo.abort_merge().await.unwrap();
    assert!(!aborted.is_merge());
    assert!(!aborted.is_dirty());
    repo.switch_branch(&branch("main")).await.unwrap();
}

#[tokio::test]
async fn conflicting_merge_follows_preference() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    commit_description(&repo, "origin text", "shared").await;
    repo.create_branch(&branch("feature"), "maintainer").await.unwrap();

    let main_tip = commit_description(&repo, "main text", "main a").await;
    repo.switch_branch(&branch("feature")).await.unwrap();
    commit_description(&repo, "feature text", "feature a").await;

    repo.begin_merge(&main_tip, MergePreference::Theirs)
        .await
        .unwrap();
    let merged = repo.get_working_state().await.unwrap();
    // "theirs" is the merged-in main side; its conflicted token wins
    // the tail position.
    assert!(merged.description.contains("main"));
}

#[tokio::test]
async fn detached_checkout_commits_off_branch() {
    let repo = repo();
    repo.init("maintainer").await.unwrap();

    let first = commit_plugins(&repo, &[("palette", "0.1.0")], "one").await;
    commit_plugins(&repo, &[("palette", "0.1.0"), ("icons", "0.3.0")], "two").await;

    let detached = repo.checkout_commit(&first).await.unwrap();
    assert!(detached.is_detached());

    let sha = commit_description(&repo, "detached work", "off-branch").await;
    let current = repo.current().await.unwrap();
    assert!(current.is_detached());
    assert_eq!(current.commit, Some(sha.clone()));

    // The branch tip was not advanced by the detached commit.
    let branches = repo.list_branches().await.unwrap();
    assert_ne!(branches[0].last_commit, Some(sha));
}
