//! store::memory
//!
//! In-memory object store for deterministic testing.
//!
//! # Design
//!
//! The memory store provides a deterministic implementation of the
//! [`ObjectStore`] trait. It keeps everything behind one mutex and
//! allows injecting a failure for the next call to exercise the
//! "operation failed" normalization path in callers.
//!
//! # Example
//!
//! ```
//! use weft::core::types::RepoId;
//! use weft::history::branch::Current;
//! use weft::store::{MemoryStore, ObjectStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let repo = RepoId::new();
//!
//! store.save_current(&repo, &Current::default()).await.unwrap();
//! let current = store.get_current(&repo).await.unwrap();
//! assert!(!current.is_dirty());
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::manifest::Manifest;
use crate::core::types::{BranchName, CommitSha, PluginName, RepoId};
use crate::history::branch::{Branch, Current};
use crate::history::commit::Commit;

use super::traits::{ObjectStore, RepoSettings, StoreError};

/// In-memory object store.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share
/// state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Stored manifests keyed by (plugin, version).
    manifests: BTreeMap<(PluginName, semver::Version), Manifest>,
    settings: BTreeMap<RepoId, RepoSettings>,
    currents: BTreeMap<RepoId, Current>,
    branches: BTreeMap<(RepoId, BranchName), Branch>,
    commits: BTreeMap<(RepoId, CommitSha), Commit>,
    /// Error to return from the next store call, for testing failure
    /// normalization.
    fail_next: Option<StoreError>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a manifest.
    pub fn put_manifest(&self, manifest: Manifest) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .manifests
            .insert((manifest.name.clone(), manifest.version.clone()), manifest);
    }

    /// Set repository settings.
    pub fn put_repo_settings(&self, repo: RepoId, settings: RepoSettings) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.settings.insert(repo, settings);
    }

    /// Make the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.fail_next = Some(error);
    }

    fn take_failure(inner: &mut Inner) -> Result<(), StoreError> {
        match inner.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_manifest(
        &self,
        plugin: &PluginName,
        constraint: &semver::VersionReq,
    ) -> Result<Manifest, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;

        // Highest stored version satisfying the constraint wins.
        inner
            .manifests
            .iter()
            .filter(|((name, version), _)| name == plugin && constraint.matches(version))
            .max_by(|((_, a), _), ((_, b), _)| a.cmp(b))
            .map(|(_, manifest)| manifest.clone())
            .ok_or_else(|| StoreError::NotFound(format!("manifest {plugin}@{constraint}")))
    }

    async fn manifest_exists(
        &self,
        plugin: &PluginName,
        version: &semver::Version,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        Ok(inner
            .manifests
            .contains_key(&(plugin.clone(), version.clone())))
    }

    async fn get_repo_settings(&self, repo: &RepoId) -> Result<RepoSettings, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        Ok(inner.settings.get(repo).cloned().unwrap_or_default())
    }

    async fn get_current(&self, repo: &RepoId) -> Result<Current, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .currents
            .get(repo)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("current pointer for {repo}")))
    }

    async fn save_current(&self, repo: &RepoId, current: &Current) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner.currents.insert(*repo, current.clone());
        Ok(())
    }

    async fn get_branch(&self, repo: &RepoId, name: &BranchName) -> Result<Branch, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .branches
            .get(&(*repo, name.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("branch {name}")))
    }

    async fn get_branches(&self, repo: &RepoId) -> Result<Vec<Branch>, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        Ok(inner
            .branches
            .iter()
            .filter(|((id, _), _)| id == repo)
            .map(|(_, branch)| branch.clone())
            .collect())
    }

    async fn save_branch(&self, repo: &RepoId, branch: &Branch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .branches
            .insert((*repo, branch.name.clone()), branch.clone());
        Ok(())
    }

    async fn delete_branch(&self, repo: &RepoId, name: &BranchName) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .branches
            .remove(&(*repo, name.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("branch {name}")))
    }

    async fn save_commit(&self, repo: &RepoId, commit: &Commit) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .commits
            .insert((*repo, commit.sha.clone()), commit.clone());
        Ok(())
    }

    async fn read_commit(&self, repo: &RepoId, sha: &CommitSha) -> Result<Commit, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        Self::take_failure(&mut inner)?;
        inner
            .commits
            .get(&(*repo, sha.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("commit {}", sha.short(12))))
    }
}
