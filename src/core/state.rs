//! core::state
//!
//! Commit state: the versioned snapshot shape, its diff mirror, and
//! field-wise diff/apply/merge.
//!
//! # Shape
//!
//! A [`CommitState`] carries everything a commit versions: free-text
//! description, license and plugin KV lists, the per-plugin store of
//! projected records, and binary attachments. A [`StateDiff`] mirrors
//! the shape per field, so commits persist deltas rather than
//! snapshots.
//!
//! # Normalization
//!
//! A store entry with no records is equivalent to an absent entry;
//! diff and apply drop empty entries so the equivalence holds across
//! round trips.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::PluginName;
use crate::diff::merge::{merge_sequence, MergePreference};
use crate::diff::sequence::{self, Diff, DiffApplyError};
use crate::diff::text::{self, TextDiff};

/// One path-addressed unit of projected state; the grain diffs operate
/// on.
///
/// `key` is an encoded record path; `value` maps the record's direct
/// leaf fields to scalars. Keys are unique within a projected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// Build a record from an encoded path and field pairs.
    pub fn new(
        key: impl Into<String>,
        value: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into_iter().collect(),
        }
    }
}

/// A key/value pair in the textual sections of a commit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextKv {
    pub key: String,
    pub value: String,
}

impl TextKv {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A full snapshot of versioned application state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitState {
    /// Free-text description.
    pub description: String,

    /// License list.
    pub licenses: Vec<TextKv>,

    /// Installed plugins (name to version).
    pub plugins: Vec<TextKv>,

    /// Projected records per plugin.
    pub store: BTreeMap<PluginName, Vec<Record>>,

    /// Binary attachments (name to content hash).
    pub binaries: Vec<TextKv>,
}

/// Delta between two commit states, mirroring [`CommitState`] per
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateDiff {
    pub description: TextDiff,
    pub licenses: Diff<TextKv>,
    pub plugins: Diff<TextKv>,
    pub store: BTreeMap<PluginName, Diff<Record>>,
    pub binaries: Diff<TextKv>,
}

impl StateDiff {
    /// True if applying this diff is a no-op.
    pub fn is_empty(&self) -> bool {
        self.description.is_empty()
            && self.licenses.is_empty()
            && self.plugins.is_empty()
            && self.store.values().all(Diff::is_empty)
            && self.binaries.is_empty()
    }
}

/// Compute the field-wise diff transforming `before` into `after`.
pub fn diff_commit_states(before: &CommitState, after: &CommitState) -> StateDiff {
    let mut store = BTreeMap::new();
    let empty = Vec::new();
    for plugin in before.store.keys().chain(after.store.keys()) {
        if store.contains_key(plugin) {
            continue;
        }
        let old = before.store.get(plugin).unwrap_or(&empty);
        let new = after.store.get(plugin).unwrap_or(&empty);
        let diff = sequence::diff(old, new);
        if !diff.is_empty() {
            store.insert(plugin.clone(), diff);
        }
    }

    StateDiff {
        description: text::text_diff(&before.description, &after.description),
        licenses: sequence::diff(&before.licenses, &after.licenses),
        plugins: sequence::diff(&before.plugins, &after.plugins),
        store,
        binaries: sequence::diff(&before.binaries, &after.binaries),
    }
}

/// Apply a state diff to its base state.
///
/// # Errors
///
/// Returns [`DiffApplyError`] if any field diff does not fit `base`.
pub fn apply_state_diff(
    diff: &StateDiff,
    base: &CommitState,
) -> Result<CommitState, DiffApplyError> {
    let mut store = base.store.clone();
    let empty = Vec::new();
    for (plugin, plugin_diff) in &diff.store {
        let old = base.store.get(plugin).unwrap_or(&empty);
        let new = sequence::apply(plugin_diff, old)?;
        if new.is_empty() {
            store.remove(plugin);
        } else {
            store.insert(plugin.clone(), new);
        }
    }

    Ok(CommitState {
        description: text::apply_text_diff(&diff.description, &base.description)?,
        licenses: sequence::apply(&diff.licenses, &base.licenses)?,
        plugins: sequence::apply(&diff.plugins, &base.plugins)?,
        store,
        binaries: sequence::apply(&diff.binaries, &base.binaries)?,
    })
}

/// Three-way merge of two commit states against their common ancestor,
/// field by field.
pub fn merge_commit_states(
    origin: &CommitState,
    ours: &CommitState,
    theirs: &CommitState,
    preference: MergePreference,
) -> CommitState {
    let kv_key = |kv: &TextKv| kv.key.clone();
    let record_key = |record: &Record| record.key.clone();

    let description = merge_sequence(
        &text::tokenize(&origin.description),
        &text::tokenize(&ours.description),
        &text::tokenize(&theirs.description),
        preference,
        |token| token.clone(),
    )
    .concat();

    let mut store = BTreeMap::new();
    let empty = Vec::new();
    let plugins_in_store = origin
        .store
        .keys()
        .chain(ours.store.keys())
        .chain(theirs.store.keys());
    for plugin in plugins_in_store {
        if store.contains_key(plugin) {
            continue;
        }
        let merged = merge_sequence(
            origin.store.get(plugin).unwrap_or(&empty),
            ours.store.get(plugin).unwrap_or(&empty),
            theirs.store.get(plugin).unwrap_or(&empty),
            preference,
            record_key,
        );
        if !merged.is_empty() {
            store.insert(plugin.clone(), merged);
        }
    }

    CommitState {
        description,
        licenses: merge_sequence(&origin.licenses, &ours.licenses, &theirs.licenses, preference, kv_key),
        plugins: merge_sequence(&origin.plugins, &ours.plugins, &theirs.plugins, preference, kv_key),
        store,
        binaries: merge_sequence(&origin.binaries, &ours.binaries, &theirs.binaries, preference, kv_key),
    }
}

/// True iff the merge is preference-independent: no field holds a truly
/// conflicted element.
pub fn can_auto_merge_commit_states(
    origin: &CommitState,
    ours: &CommitState,
    theirs: &CommitState,
) -> bool {
    merge_commit_states(origin, ours, theirs, MergePreference::Ours)
        == merge_commit_states(origin, ours, theirs, MergePreference::Theirs)
}
