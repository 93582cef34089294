//! history::commit
//!
//! Content-addressed commits.
//!
//! A commit's sha is the SHA-256 digest of its canonical JSON
//! serialization: the content fields in fixed declaration order
//! (`parent`, `historical_parent`, `idx`, `diff`, `timestamp`,
//! `user_id`, `message`), maps sorted by key. The encoding is
//! byte-reproducible, so independently built repositories interoperate
//! and tampering is detectable.
//!
//! # Example
//!
//! ```
//! use weft::core::state::StateDiff;
//! use weft::core::types::UtcTimestamp;
//! use weft::history::commit::CommitContent;
//!
//! let content = CommitContent {
//!     parent: None,
//!     historical_parent: None,
//!     idx: 0,
//!     diff: StateDiff::default(),
//!     timestamp: UtcTimestamp::now(),
//!     user_id: "maintainer".to_string(),
//!     message: "initial commit".to_string(),
//! };
//!
//! let commit = content.clone().seal().unwrap();
//! assert!(commit.verify_sha().unwrap());
//! assert_eq!(commit.sha, content.seal().unwrap().sha);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::state::StateDiff;
use crate::core::types::{CommitSha, UtcTimestamp};

/// Failure to serialize commit content for hashing.
#[derive(Debug, Error)]
#[error("failed to serialize commit content: {0}")]
pub struct CommitEncodeError(#[from] serde_json::Error);

/// The hashed portion of a commit.
///
/// Field order here is the canonical serialization order; changing it
/// would change every sha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitContent {
    /// Direct parent in this history, if any.
    pub parent: Option<CommitSha>,

    /// Original parent before a rewrite (merge or revert); equals
    /// `parent` otherwise.
    pub historical_parent: Option<CommitSha>,

    /// Distance from the root commit.
    pub idx: u64,

    /// Delta against the parent state.
    pub diff: StateDiff,

    /// Commit time.
    pub timestamp: UtcTimestamp,

    /// Authenticated author.
    pub user_id: String,

    /// Commit message.
    pub message: String,
}

impl CommitContent {
    /// Compute the content sha.
    pub fn sha(&self) -> Result<CommitSha, CommitEncodeError> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(CommitSha::new(hex::encode(digest)).expect("a sha256 digest is a valid sha"))
    }

    /// Seal the content into an immutable, content-addressed commit.
    pub fn seal(self) -> Result<Commit, CommitEncodeError> {
        let sha = self.sha()?;
        Ok(Commit {
            sha,
            parent: self.parent,
            historical_parent: self.historical_parent,
            idx: self.idx,
            diff: self.diff,
            timestamp: self.timestamp,
            user_id: self.user_id,
            message: self.message,
        })
    }
}

/// An immutable commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Content address over all other fields.
    pub sha: CommitSha,
    pub parent: Option<CommitSha>,
    pub historical_parent: Option<CommitSha>,
    pub idx: u64,
    pub diff: StateDiff,
    pub timestamp: UtcTimestamp,
    pub user_id: String,
    pub message: String,
}

impl Commit {
    /// The hashed portion of this commit.
    pub fn content(&self) -> CommitContent {
        CommitContent {
            parent: self.parent.clone(),
            historical_parent: self.historical_parent.clone(),
            idx: self.idx,
            diff: self.diff.clone(),
            timestamp: self.timestamp.clone(),
            user_id: self.user_id.clone(),
            message: self.message.clone(),
        }
    }

    /// Recompute the content sha and compare; false means the commit
    /// was tampered with or corrupted.
    pub fn verify_sha(&self) -> Result<bool, CommitEncodeError> {
        Ok(self.content().sha()? == self.sha)
    }
}
