//! history::branch
//!
//! Mutable repository pointers: branches and the working `Current`.
//!
//! Branches and `Current` are the only mutable state in the history
//! model; both are exclusively owned by one repository instance, and
//! concurrent mutation must be serialized per repository by the
//! caller.

use serde::{Deserialize, Serialize};

use crate::core::state::StateDiff;
use crate::core::types::{BranchName, CommitSha, UtcTimestamp};
use crate::diff::merge::MergePreference;

/// A movable branch pointer.
///
/// `last_commit` advances on every commit made while the branch is
/// checked out; `first_commit` records where the branch forked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: BranchName,

    /// Commit the branch was created at; `None` on an unborn history.
    pub first_commit: Option<CommitSha>,

    /// Current tip; `None` on an unborn history.
    pub last_commit: Option<CommitSha>,

    pub created_by: String,
    pub created_at: UtcTimestamp,
}

/// Metadata for an in-progress merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInfo {
    /// Merge base of the two sides.
    pub origin_sha: Option<CommitSha>,

    /// Tip being merged in.
    pub from_sha: CommitSha,

    /// Tip being merged into.
    pub into_sha: CommitSha,

    /// Arbitration preference for conflicted elements.
    pub preference: MergePreference,
}

/// The per-repository working pointer.
///
/// Tracks either a branch tip or a detached commit, plus the
/// uncommitted working diff. Mutated by every state-changing
/// operation; never historical.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Current {
    /// Checked-out branch; `None` when detached.
    pub branch: Option<BranchName>,

    /// The commit the working state is based on.
    pub commit: Option<CommitSha>,

    /// Uncommitted working diff against `commit`.
    pub diff: StateDiff,

    /// In-progress merge, if any. Blocks checkout until resolved or
    /// aborted.
    pub merge: Option<MergeInfo>,
}

impl Current {
    /// A fresh pointer tracking `branch` on an unborn history.
    pub fn tracking(branch: BranchName) -> Self {
        Self {
            branch: Some(branch),
            ..Self::default()
        }
    }

    /// True if a merge is in progress.
    pub fn is_merge(&self) -> bool {
        self.merge.is_some()
    }

    /// True if the pointer tracks a commit rather than a branch tip.
    pub fn is_detached(&self) -> bool {
        self.branch.is_none()
    }

    /// True if there are uncommitted working changes.
    pub fn is_dirty(&self) -> bool {
        !self.diff.is_empty()
    }
}
