//! store::traits
//!
//! Object-store trait consumed by the core.
//!
//! # Design
//!
//! The `ObjectStore` trait is async because the backing store involves
//! I/O. All methods return `Result` so every call site handles
//! failure; the core assumes only that a process's own write to a key
//! is visible to its own subsequent read. No cross-process atomicity
//! or multi-key transactions are assumed, and no retries happen inside
//! the core.
//!
//! Public repository APIs normalize these errors rather than leaking
//! raw transport failures; callers distinguish "not found" from a
//! transient failure only via idempotent retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::manifest::Manifest;
use crate::core::types::{BranchName, CommitSha, PluginName, RepoId};
use crate::history::branch::{Branch, Current};
use crate::history::commit::Commit;

/// Errors from object-store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store could not be reached or failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored object exists but cannot be decoded.
    #[error("corrupt object: {0}")]
    Corrupt(String),
}

/// Per-repository settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSettings {
    /// Branch a fresh checkout lands on.
    pub default_branch: BranchName,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            default_branch: BranchName::new("main").expect("'main' is a valid branch name"),
        }
    }
}

/// The asynchronous key-value collaborator holding manifests,
/// commits, and repository pointers.
///
/// Everything is keyed by repository id; commits additionally by
/// content sha. Manifest lookups resolve a version constraint to a
/// concrete stored manifest.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the best stored manifest for `plugin` satisfying
    /// `constraint`.
    async fn get_manifest(
        &self,
        plugin: &PluginName,
        constraint: &semver::VersionReq,
    ) -> Result<Manifest, StoreError>;

    /// Whether an exact manifest version is stored.
    async fn manifest_exists(
        &self,
        plugin: &PluginName,
        version: &semver::Version,
    ) -> Result<bool, StoreError>;

    /// Repository settings.
    async fn get_repo_settings(&self, repo: &RepoId) -> Result<RepoSettings, StoreError>;

    /// The repository's working pointer.
    async fn get_current(&self, repo: &RepoId) -> Result<Current, StoreError>;

    /// Persist the repository's working pointer.
    async fn save_current(&self, repo: &RepoId, current: &Current) -> Result<(), StoreError>;

    /// A branch by name.
    async fn get_branch(&self, repo: &RepoId, name: &BranchName) -> Result<Branch, StoreError>;

    /// All branches, sorted by name.
    async fn get_branches(&self, repo: &RepoId) -> Result<Vec<Branch>, StoreError>;

    /// Persist a branch pointer.
    async fn save_branch(&self, repo: &RepoId, branch: &Branch) -> Result<(), StoreError>;

    /// Delete a branch pointer.
    async fn delete_branch(&self, repo: &RepoId, name: &BranchName) -> Result<(), StoreError>;

    /// Persist an immutable commit under its sha.
    async fn save_commit(&self, repo: &RepoId, commit: &Commit) -> Result<(), StoreError>;

    /// Read a commit by sha.
    async fn read_commit(&self, repo: &RepoId, sha: &CommitSha) -> Result<Commit, StoreError>;
}
