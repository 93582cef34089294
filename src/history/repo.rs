//! history::repo
//!
//! The repository facade: commits, branches, checkout, merge state,
//! and commit-state reconstruction over the object store.
//!
//! # Concurrency
//!
//! Every method reads and rewrites the repository's mutable pointers,
//! so callers must serialize mutating access per repository id (one
//! lock or actor per repo). The algorithms themselves are pure over
//! explicit snapshots; only the store calls are awaited.
//!
//! # Error normalization
//!
//! Store failures are caught at this boundary and normalized into
//! [`RepoError`]: "not found" stays distinguishable, everything else
//! becomes an operation failure. No retries happen here.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::core::state::{
    apply_state_diff, diff_commit_states, merge_commit_states, CommitState, StateDiff,
};
use crate::core::types::{BranchName, CommitSha, RepoId, UtcTimestamp};
use crate::diff::merge::MergePreference;
use crate::diff::sequence::DiffApplyError;
use crate::store::{ObjectStore, StoreError};

use super::branch::{Branch, Current, MergeInfo};
use super::commit::{Commit, CommitContent, CommitEncodeError};

/// Repository operation failures.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("nothing to commit: the working diff is empty")]
    NothingToCommit,

    #[error("an authenticated user is required")]
    Unauthenticated,

    #[error("a merge is in progress; resolve or abort it first")]
    MergeInProgress,

    #[error("no merge is in progress")]
    NoMergeInProgress,

    #[error("the working state has uncommitted changes")]
    DirtyWorkingState,

    #[error("branch '{0}' already exists")]
    BranchExists(BranchName),

    #[error("cannot delete the checked-out branch '{0}'")]
    BranchCheckedOut(BranchName),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation failed: {0}")]
    OperationFailed(StoreError),

    #[error("corrupted commit diff: {0}")]
    DiffApply(#[from] DiffApplyError),

    #[error("commit encoding failed: {0}")]
    Encode(#[from] CommitEncodeError),
}

impl From<StoreError> for RepoError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => RepoError::NotFound(what),
            other => RepoError::OperationFailed(other),
        }
    }
}

/// A handle to one repository in the object store.
///
/// Cheap to clone; holds no state beyond the id and the store handle.
#[derive(Clone)]
pub struct Repository {
    repo_id: RepoId,
    store: Arc<dyn ObjectStore>,
}

impl Repository {
    /// Create a handle for `repo_id` backed by `store`.
    pub fn new(repo_id: RepoId, store: Arc<dyn ObjectStore>) -> Self {
        Self { repo_id, store }
    }

    /// The repository id.
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }

    /// Initialize the repository: an unborn default branch and a clean
    /// working pointer tracking it.
    pub async fn init(&self, user_id: &str) -> Result<Current, RepoError> {
        if user_id.is_empty() {
            return Err(RepoError::Unauthenticated);
        }
        let settings = self.store.get_repo_settings(&self.repo_id).await?;
        let branch = Branch {
            name: settings.default_branch.clone(),
            first_commit: None,
            last_commit: None,
            created_by: user_id.to_string(),
            created_at: UtcTimestamp::now(),
        };
        self.store.save_branch(&self.repo_id, &branch).await?;

        let current = Current::tracking(settings.default_branch);
        self.store.save_current(&self.repo_id, &current).await?;
        Ok(current)
    }

    /// The repository's working pointer.
    pub async fn current(&self) -> Result<Current, RepoError> {
        Ok(self.store.get_current(&self.repo_id).await?)
    }

    /// Replace the working diff so the working state becomes `next`.
    ///
    /// Returns the new working diff against the checked-out commit.
    pub async fn update_working_state(
        &self,
        next: &CommitState,
    ) -> Result<StateDiff, RepoError> {
        let mut current = self.current().await?;
        let base = self.get_commit_state(current.commit.as_ref()).await?;
        let diff = diff_commit_states(&base, next);
        current.diff = diff.clone();
        self.store.save_current(&self.repo_id, &current).await?;
        Ok(diff)
    }

    /// Drop all uncommitted changes (and any in-progress merge).
    pub async fn discard_working_changes(&self) -> Result<Current, RepoError> {
        let mut current = self.current().await?;
        current.diff = StateDiff::default();
        current.merge = None;
        self.store.save_current(&self.repo_id, &current).await?;
        Ok(current)
    }

    /// The working state: the checked-out commit's state with the
    /// working diff applied.
    pub async fn get_working_state(&self) -> Result<CommitState, RepoError> {
        let current = self.current().await?;
        let base = self.get_commit_state(current.commit.as_ref()).await?;
        Ok(apply_state_diff(&current.diff, &base)?)
    }

    /// Commit the working diff.
    ///
    /// Requires a non-empty working diff and a non-empty user id.
    /// Builds the child commit, persists it, advances the branch tip
    /// (or the detached pointer), and clears the working diff. A
    /// commit made mid-merge resolves the merge; its
    /// `historical_parent` records the merged-in tip.
    pub async fn commit(&self, message: &str, user_id: &str) -> Result<Commit, RepoError> {
        if user_id.is_empty() {
            return Err(RepoError::Unauthenticated);
        }
        let mut current = self.current().await?;
        if current.diff.is_empty() {
            return Err(RepoError::NothingToCommit);
        }

        let parent = current.commit.clone();
        let idx = match &parent {
            Some(sha) => self.store.read_commit(&self.repo_id, sha).await?.idx + 1,
            None => 0,
        };
        let historical_parent = match &current.merge {
            Some(merge) => Some(merge.from_sha.clone()),
            None => parent.clone(),
        };

        let commit = CommitContent {
            parent,
            historical_parent,
            idx,
            diff: std::mem::take(&mut current.diff),
            timestamp: UtcTimestamp::now(),
            user_id: user_id.to_string(),
            message: message.to_string(),
        }
        .seal()?;
        self.store.save_commit(&self.repo_id, &commit).await?;

        if let Some(name) = &current.branch {
            let mut branch = self.store.get_branch(&self.repo_id, name).await?;
            branch.last_commit = Some(commit.sha.clone());
            if branch.first_commit.is_none() {
                branch.first_commit = Some(commit.sha.clone());
            }
            self.store.save_branch(&self.repo_id, &branch).await?;
        }

        current.commit = Some(commit.sha.clone());
        current.merge = None;
        self.store.save_current(&self.repo_id, &current).await?;

        debug!(repo = %self.repo_id, sha = commit.sha.short(12), idx, "created commit");
        Ok(commit)
    }

    /// The commit chain from `sha` back to the root, tip first.
    ///
    /// Walks parent pointers iteratively.
    pub async fn get_history(&self, sha: &CommitSha) -> Result<Vec<Commit>, RepoError> {
        let mut history = Vec::new();
        let mut cursor = Some(sha.clone());
        while let Some(sha) = cursor {
            let commit = self.store.read_commit(&self.repo_id, &sha).await?;
            cursor = commit.parent.clone();
            history.push(commit);
        }
        Ok(history)
    }

    /// The merge base: the first sha, by distance from the longer
    /// history, present in both histories. `None` for disjoint
    /// histories.
    pub async fn divergence_origin(
        &self,
        left: &CommitSha,
        right: &CommitSha,
    ) -> Result<Option<CommitSha>, RepoError> {
        let left_history = self.get_history(left).await?;
        let right_history = self.get_history(right).await?;

        let (walk, other) = if left_history.len() >= right_history.len() {
            (&left_history, &right_history)
        } else {
            (&right_history, &left_history)
        };
        let other: HashSet<&CommitSha> = other.iter().map(|c| &c.sha).collect();

        Ok(walk
            .iter()
            .find(|commit| other.contains(&commit.sha))
            .map(|commit| commit.sha.clone()))
    }

    /// Reconstruct the full state at `sha` by replaying the chain's
    /// diffs from the root. `None` reconstructs the empty state.
    ///
    /// Replay is iterative; deep histories never recurse.
    pub async fn get_commit_state(
        &self,
        sha: Option<&CommitSha>,
    ) -> Result<CommitState, RepoError> {
        let Some(sha) = sha else {
            return Ok(CommitState::default());
        };
        let chain = self.get_history(sha).await?;
        let mut state = CommitState::default();
        for commit in chain.iter().rev() {
            state = apply_state_diff(&commit.diff, &state)?;
        }
        Ok(state)
    }

    /// Create a branch at the current commit without switching to it.
    pub async fn create_branch(
        &self,
        name: &BranchName,
        user_id: &str,
    ) -> Result<Branch, RepoError> {
        if user_id.is_empty() {
            return Err(RepoError::Unauthenticated);
        }
        if self.store.get_branch(&self.repo_id, name).await.is_ok() {
            return Err(RepoError::BranchExists(name.clone()));
        }
        let current = self.current().await?;
        let branch = Branch {
            name: name.clone(),
            first_commit: current.commit.clone(),
            last_commit: current.commit.clone(),
            created_by: user_id.to_string(),
            created_at: UtcTimestamp::now(),
        };
        self.store.save_branch(&self.repo_id, &branch).await?;
        Ok(branch)
    }

    /// Check out a branch tip.
    ///
    /// Refused mid-merge and with uncommitted working changes.
    pub async fn switch_branch(&self, name: &BranchName) -> Result<Current, RepoError> {
        let current = self.current().await?;
        if current.is_merge() {
            return Err(RepoError::MergeInProgress);
        }
        if current.is_dirty() {
            return Err(RepoError::DirtyWorkingState);
        }
        let branch = self.store.get_branch(&self.repo_id, name).await?;

        let next = Current {
            branch: Some(branch.name.clone()),
            commit: branch.last_commit.clone(),
            diff: StateDiff::default(),
            merge: None,
        };
        self.store.save_current(&self.repo_id, &next).await?;
        Ok(next)
    }

    /// Detach the working pointer onto a specific commit.
    pub async fn checkout_commit(&self, sha: &CommitSha) -> Result<Current, RepoError> {
        let current = self.current().await?;
        if current.is_merge() {
            return Err(RepoError::MergeInProgress);
        }
        if current.is_dirty() {
            return Err(RepoError::DirtyWorkingState);
        }
        // Ensure the commit exists before moving the pointer.
        self.store.read_commit(&self.repo_id, sha).await?;

        let next = Current {
            branch: None,
            commit: Some(sha.clone()),
            diff: StateDiff::default(),
            merge: None,
        };
        self.store.save_current(&self.repo_id, &next).await?;
        Ok(next)
    }

    /// Delete a branch pointer. The checked-out branch cannot be
    /// deleted.
    pub async fn delete_branch(&self, name: &BranchName) -> Result<(), RepoError> {
        let current = self.current().await?;
        if current.branch.as_ref() == Some(name) {
            return Err(RepoError::BranchCheckedOut(name.clone()));
        }
        Ok(self.store.delete_branch(&self.repo_id, name).await?)
    }

    /// All branches, sorted by name.
    pub async fn list_branches(&self) -> Result<Vec<Branch>, RepoError> {
        let mut branches = self.store.get_branches(&self.repo_id).await?;
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    /// Start merging `from` into the checked-out commit.
    ///
    /// Computes the three-way merged state and stages it as the
    /// working diff with merge metadata set; [`Repository::commit`]
    /// then seals it as the merge commit, and
    /// [`Repository::abort_merge`] discards it.
    pub async fn begin_merge(
        &self,
        from: &CommitSha,
        preference: MergePreference,
    ) -> Result<Current, RepoError> {
        let mut current = self.current().await?;
        if current.is_merge() {
            return Err(RepoError::MergeInProgress);
        }
        if current.is_dirty() {
            return Err(RepoError::DirtyWorkingState);
        }
        let into = current
            .commit
            .clone()
            .ok_or_else(|| RepoError::NotFound("no commit checked out".to_string()))?;

        let origin = self.divergence_origin(from, &into).await?;
        let origin_state = self.get_commit_state(origin.as_ref()).await?;
        let ours = self.get_commit_state(Some(&into)).await?;
        let theirs = self.get_commit_state(Some(from)).await?;

        let merged = merge_commit_states(&origin_state, &ours, &theirs, preference);
        current.diff = diff_commit_states(&ours, &merged);
        current.merge = Some(MergeInfo {
            origin_sha: origin,
            from_sha: from.clone(),
            into_sha: into,
            preference,
        });
        self.store.save_current(&self.repo_id, &current).await?;
        Ok(current)
    }

    /// Abort an in-progress merge, dropping its staged diff.
    pub async fn abort_merge(&self) -> Result<Current, RepoError> {
        let mut current = self.current().await?;
        if !current.is_merge() {
            return Err(RepoError::NoMergeInProgress);
        }
        current.merge = None;
        current.diff = StateDiff::default();
        self.store.save_current(&self.repo_id, &current).await?;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::TextKv;
    use crate::store::MemoryStore;

    fn repo() -> Repository {
        Repository::new(RepoId::new(), Arc::new(MemoryStore::new()))
    }

    async fn stage_plugins(repo: &Repository, pairs: &[(&str, &str)]) {
        let mut next = repo.get_working_state().await.unwrap();
        next.plugins = pairs
            .iter()
            .map(|(name, version)| TextKv::new(*name, *version))
            .collect();
        repo.update_working_state(&next).await.unwrap();
    }

    #[tokio::test]
    async fn empty_diff_cannot_commit() {
        let repo = repo();
        repo.init("maintainer").await.unwrap();
        assert!(matches!(
            repo.commit("empty", "maintainer").await,
            Err(RepoError::NothingToCommit),
        ));
    }

    #[tokio::test]
    async fn commit_requires_user() {
        let repo = repo();
        repo.init("maintainer").await.unwrap();
        stage_plugins(&repo, &[("palette", "0.1.0")]).await;
        assert!(matches!(
            repo.commit("who", "").await,
            Err(RepoError::Unauthenticated),
        ));
    }

    #[tokio::test]
    async fn commit_advances_branch_and_clears_diff() {
        let repo = repo();
        repo.init("maintainer").await.unwrap();
        stage_plugins(&repo, &[("palette", "0.1.0")]).await;

        let commit = repo.commit("add palette", "maintainer").await.unwrap();
        assert_eq!(commit.idx, 0);
        assert!(commit.verify_sha().unwrap());

        let current = repo.current().await.unwrap();
        assert_eq!(current.commit, Some(commit.sha.clone()));
        assert!(!current.is_dirty());

        let branches = repo.list_branches().await.unwrap();
        assert_eq!(branches[0].last_commit, Some(commit.sha));
    }

    #[tokio::test]
    async fn dirty_checkout_is_refused() {
        let repo = repo();
        repo.init("maintainer").await.unwrap();
        stage_plugins(&repo, &[("palette", "0.1.0")]).await;

        let other = BranchName::new("feature").unwrap();
        repo.create_branch(&other, "maintainer").await.unwrap();
        assert!(matches!(
            repo.switch_branch(&other).await,
            Err(RepoError::DirtyWorkingState),
        ));
    }

    #[tokio::test]
    async fn checked_out_branch_cannot_be_deleted() {
        let repo = repo();
        let current = repo.init("maintainer").await.unwrap();
        let main = current.branch.unwrap();
        assert!(matches!(
            repo.delete_branch(&main).await,
            Err(RepoError::BranchCheckedOut(_)),
        ));
    }

    #[tokio::test]
    async fn store_failure_is_normalized() {
        let store = MemoryStore::new();
        let repo = Repository::new(RepoId::new(), Arc::new(store.clone()));
        repo.init("maintainer").await.unwrap();

        store.fail_next(StoreError::Unavailable("blip".to_string()));
        assert!(matches!(
            repo.current().await,
            Err(RepoError::OperationFailed(_)),
        ));
        // Idempotent retry distinguishes transient failure from absence.
        assert!(repo.current().await.is_ok());
    }
}
