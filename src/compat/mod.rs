//! compat
//!
//! Schema and state compatibility checking.
//!
//! # Architecture
//!
//! Three gates of increasing strictness, each consuming resolved
//! schemas (and, for the topological checks, projected states):
//!
//! - [`is_schema_subset`]: every old field still exists with an
//!   identical resolved definition (additions allowed; removal,
//!   retyping, or narrowing break). Gates plugin version upgrades.
//! - [`is_topological_subset`]: schema subset, plus every old record
//!   key still exists (array positional keys excluded as unstable).
//! - [`is_topological_subset_valid`]: additionally re-validates every
//!   surviving new-side record against the *old* schema's
//!   nullability/emptyability constraints — the old schema is the
//!   contract consumers still hold during a staged change. Gates
//!   commit reversion and cherry-picks.
//!
//! Outcomes are values, not exceptions: callers branch on
//! [`Compatibility`].

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::path::decode_path;
use crate::core::types::PluginName;
use crate::projection::{flatten, ProjectionError};
use crate::schema::{resolve_all, ManifestIndex, ResolvedGraph, ResolvedNode, SchemaError};

/// Operational failures while checking (resolution or projection);
/// distinct from an incompatible outcome.
#[derive(Debug, Error)]
pub enum CompatError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("plugin '{0}' missing from the old manifest set")]
    UnknownPlugin(PluginName),
}

/// A compatibility verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible {
        /// Plugin that breaks compatibility.
        plugin: PluginName,
        /// That plugin's version on the new side (old side if it was
        /// dropped).
        version: semver::Version,
        /// Human-readable cause.
        reason: String,
    },
}

impl Compatibility {
    /// True for [`Compatibility::Compatible`].
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible)
    }
}

/// Check that `plugin`'s schema (plus its upstream imports) on the new
/// side is a structural superset of the old side.
pub fn is_schema_subset(
    old: &ManifestIndex,
    new: &ManifestIndex,
    plugin: &PluginName,
) -> Result<Compatibility, CompatError> {
    let old_roots = resolve_all(old)?;
    let new_roots = resolve_all(new)?;

    // The plugin and every upstream import present on the old side
    // must survive with compatible shapes.
    let mut pending = vec![plugin.clone()];
    let mut checked = std::collections::HashSet::new();
    while let Some(current) = pending.pop() {
        if !checked.insert(current.clone()) {
            continue;
        }
        let old_manifest = old
            .get(&current)
            .ok_or_else(|| CompatError::UnknownPlugin(current.clone()))?;
        pending.extend(old_manifest.imports.keys().cloned());

        let old_root = &old_roots[&current];
        let Some(new_root) = new_roots.get(&current) else {
            return Ok(Compatibility::Incompatible {
                plugin: current.clone(),
                version: old_manifest.version.clone(),
                reason: "plugin dropped from the new manifest set".to_string(),
            });
        };

        if let Some(reason) = graph_subset_violation(&old_root.fields, &new_root.fields, "") {
            let version = new
                .get(&current)
                .map(|m| m.version.clone())
                .unwrap_or_else(|| old_manifest.version.clone());
            return Ok(Compatibility::Incompatible {
                plugin: current,
                version,
                reason,
            });
        }
    }

    Ok(Compatibility::Compatible)
}

/// Check schema subset plus record-key preservation for `plugin`'s
/// state.
pub fn is_topological_subset(
    old: &ManifestIndex,
    old_states: &BTreeMap<PluginName, Value>,
    new: &ManifestIndex,
    new_states: &BTreeMap<PluginName, Value>,
    plugin: &PluginName,
) -> Result<Compatibility, CompatError> {
    let schema_verdict = is_schema_subset(old, new, plugin)?;
    if !schema_verdict.is_compatible() {
        return Ok(schema_verdict);
    }

    let old_keys = stable_record_keys(old, old_states, plugin)?;
    let new_keys = stable_record_keys(new, new_states, plugin)?;

    for key in &old_keys {
        if !new_keys.contains(key) {
            return Ok(incompatible_at(new, old, plugin, format!("record '{key}' lost")));
        }
    }

    Ok(Compatibility::Compatible)
}

/// [`is_topological_subset`] plus validation of every surviving
/// new-side record against the old schema's constraints.
pub fn is_topological_subset_valid(
    old: &ManifestIndex,
    old_states: &BTreeMap<PluginName, Value>,
    new: &ManifestIndex,
    new_states: &BTreeMap<PluginName, Value>,
    plugin: &PluginName,
) -> Result<Compatibility, CompatError> {
    let verdict = is_topological_subset(old, old_states, new, new_states, plugin)?;
    if !verdict.is_compatible() {
        return Ok(verdict);
    }

    let old_roots = resolve_all(old)?;
    let old_root = &old_roots[plugin];

    let new_roots = resolve_all(new)?;
    let new_root = new_roots
        .get(plugin)
        .ok_or_else(|| CompatError::UnknownPlugin(plugin.clone()))?;
    let state = new_states.get(plugin).cloned().unwrap_or_else(empty_state);
    let records = flatten(new_root, &state)?;
    let all_keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();

    for record in &records {
        let segments = decode_path(&record.key).map_err(ProjectionError::from)?;
        // Records at paths the old schema does not know are not
        // governed by its constraints.
        let Some(graph) = old_root.node_graph_at(&segments) else {
            continue;
        };

        for (field, node) in graph {
            match node {
                ResolvedNode::Primitive { nullable, .. } | ResolvedNode::Ref { nullable, .. } => {
                    if *nullable {
                        continue;
                    }
                    let missing = match record.value.get(field) {
                        None | Some(Value::Null) => true,
                        Some(_) => false,
                    };
                    if missing {
                        return Ok(incompatible_at(
                            new,
                            old,
                            plugin,
                            format!(
                                "record '{}' violates non-nullable field '{field}'",
                                record.key,
                            ),
                        ));
                    }
                }
                ResolvedNode::Set { emptyable, .. } | ResolvedNode::Array { emptyable, .. } => {
                    if *emptyable {
                        continue;
                    }
                    let prefix = format!("{}.{field}<", record.key);
                    if !all_keys.iter().any(|key| key.starts_with(&prefix)) {
                        return Ok(incompatible_at(
                            new,
                            old,
                            plugin,
                            format!(
                                "record '{}' violates non-emptyable collection '{field}'",
                                record.key,
                            ),
                        ));
                    }
                }
                ResolvedNode::Object { .. } => {}
            }
        }
    }

    Ok(Compatibility::Compatible)
}

fn empty_state() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Record keys of the plugin's projected state, excluding paths that
/// traverse array membership (positional ids are deemed unstable).
fn stable_record_keys(
    index: &ManifestIndex,
    states: &BTreeMap<PluginName, Value>,
    plugin: &PluginName,
) -> Result<Vec<String>, CompatError> {
    let roots = resolve_all(index)?;
    let root = roots
        .get(plugin)
        .ok_or_else(|| CompatError::UnknownPlugin(plugin.clone()))?;
    let state = states.get(plugin).cloned().unwrap_or_else(empty_state);

    let mut keys = Vec::new();
    for record in flatten(root, &state)? {
        let segments = decode_path(&record.key).map_err(ProjectionError::from)?;
        if !root.crosses_array(&segments) {
            keys.push(record.key);
        }
    }
    Ok(keys)
}

fn incompatible_at(
    new: &ManifestIndex,
    old: &ManifestIndex,
    plugin: &PluginName,
    reason: String,
) -> Compatibility {
    let version = new
        .get(plugin)
        .or_else(|| old.get(plugin))
        .map(|m| m.version.clone())
        .unwrap_or_else(|| semver::Version::new(0, 0, 0));
    Compatibility::Incompatible {
        plugin: plugin.clone(),
        version,
        reason,
    }
}

/// First violation of the subset relation between two resolved
/// graphs, or `None`. Comparison is by field name, never position.
fn graph_subset_violation(
    old: &ResolvedGraph,
    new: &ResolvedGraph,
    at: &str,
) -> Option<String> {
    for (field, old_node) in old {
        let here = if at.is_empty() {
            field.clone()
        } else {
            format!("{at}.{field}")
        };
        let Some(new_node) = new.get(field) else {
            return Some(format!("field '{here}' removed"));
        };

        let violation = match (old_node, new_node) {
            (
                ResolvedNode::Object { fields: old_fields },
                ResolvedNode::Object { fields: new_fields },
            ) => graph_subset_violation(old_fields, new_fields, &here),

            (
                ResolvedNode::Set {
                    element: old_element,
                    key_field: old_key,
                    emptyable: old_emptyable,
                },
                ResolvedNode::Set {
                    element: new_element,
                    key_field: new_key,
                    emptyable: new_emptyable,
                },
            ) => {
                if old_key != new_key {
                    Some(format!("field '{here}' changed its key field"))
                } else if old_emptyable != new_emptyable {
                    Some(format!("field '{here}' changed emptyability"))
                } else {
                    graph_subset_violation(old_element, new_element, &here)
                }
            }

            (
                ResolvedNode::Array {
                    element: old_element,
                    emptyable: old_emptyable,
                },
                ResolvedNode::Array {
                    element: new_element,
                    emptyable: new_emptyable,
                },
            ) => {
                if old_emptyable != new_emptyable {
                    Some(format!("field '{here}' changed emptyability"))
                } else {
                    graph_subset_violation(old_element, new_element, &here)
                }
            }

            (old_leaf, new_leaf)
                if old_leaf.is_leaf() && new_leaf.is_leaf() =>
            {
                if old_leaf == new_leaf {
                    None
                } else {
                    Some(format!("field '{here}' was retyped or narrowed"))
                }
            }

            _ => Some(format!("field '{here}' was retyped")),
        };

        if violation.is_some() {
            return violation;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse_manifest;
    use serde_json::json;

    fn plugin(name: &str) -> PluginName {
        PluginName::new(name).unwrap()
    }

    fn index_from(jsons: &[&str]) -> ManifestIndex {
        let mut index = ManifestIndex::new();
        for json in jsons {
            index.insert(parse_manifest(json).unwrap());
        }
        index
    }

    const PALETTE_V1: &str = r#"{
        "name": "palette",
        "version": "0.1.0",
        "store": {
            "colors": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "id": { "kind": "primitive", "primitive": "string", "is_key": true },
                        "hex": { "kind": "primitive", "primitive": "string" }
                    }
                },
                "emptyable": true
            }
        }
    }"#;

    const PALETTE_V2_ADDITIVE: &str = r#"{
        "name": "palette",
        "version": "0.2.0",
        "store": {
            "colors": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "id": { "kind": "primitive", "primitive": "string", "is_key": true },
                        "hex": { "kind": "primitive", "primitive": "string" },
                        "alpha": {
                            "kind": "primitive",
                            "primitive": "float",
                            "nullable": true
                        }
                    }
                },
                "emptyable": true
            },
            "labels": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "tag": { "kind": "primitive", "primitive": "string", "is_key": true }
                    }
                },
                "emptyable": true
            }
        }
    }"#;

    const PALETTE_V2_RETYPED: &str = r#"{
        "name": "palette",
        "version": "0.2.0",
        "store": {
            "colors": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "id": { "kind": "primitive", "primitive": "string", "is_key": true },
                        "hex": { "kind": "primitive", "primitive": "int" }
                    }
                },
                "emptyable": true
            }
        }
    }"#;

    const PALETTE_V2_REMOVED: &str = r#"{
        "name": "palette",
        "version": "0.2.0",
        "store": {
            "colors": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "id": { "kind": "primitive", "primitive": "string", "is_key": true }
                    }
                },
                "emptyable": true
            }
        }
    }"#;

    #[test]
    fn additions_preserve_subset() {
        let verdict = is_schema_subset(
            &index_from(&[PALETTE_V1]),
            &index_from(&[PALETTE_V2_ADDITIVE]),
            &plugin("palette"),
        )
        .unwrap();
        assert!(verdict.is_compatible());
    }

    #[test]
    fn identical_schemas_are_subset() {
        let verdict = is_schema_subset(
            &index_from(&[PALETTE_V1]),
            &index_from(&[PALETTE_V1]),
            &plugin("palette"),
        )
        .unwrap();
        assert!(verdict.is_compatible());
    }

    #[test]
    fn removal_breaks_subset() {
        let verdict = is_schema_subset(
            &index_from(&[PALETTE_V1]),
            &index_from(&[PALETTE_V2_REMOVED]),
            &plugin("palette"),
        )
        .unwrap();
        let Compatibility::Incompatible { plugin: p, reason, .. } = verdict else {
            panic!("expected incompatible");
        };
        assert_eq!(p, plugin("palette"));
        assert!(reason.contains("hex"));
    }

    #[test]
    fn retyping_breaks_subset() {
        let verdict = is_schema_subset(
            &index_from(&[PALETTE_V1]),
            &index_from(&[PALETTE_V2_RETYPED]),
            &plugin("palette"),
        )
        .unwrap();
        assert!(!verdict.is_compatible());
    }

    #[test]
    fn incompatible_reports_new_version() {
        let verdict = is_schema_subset(
            &index_from(&[PALETTE_V1]),
            &index_from(&[PALETTE_V2_RETYPED]),
            &plugin("palette"),
        )
        .unwrap();
        let Compatibility::Incompatible { version, .. } = verdict else {
            panic!("expected incompatible");
        };
        assert_eq!(version.to_string(), "0.2.0");
    }

    #[test]
    fn topological_subset_requires_surviving_keys() {
        let old = index_from(&[PALETTE_V1]);
        let new = index_from(&[PALETTE_V2_ADDITIVE]);
        let old_states = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "red", "hex": "#ff0000" } ] }),
        )]);

        // Key survives: compatible.
        let keeping = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "red", "hex": "#ff0000" },
                                 { "id": "blue", "hex": "#0000ff" } ] }),
        )]);
        assert!(is_topological_subset(&old, &old_states, &new, &keeping, &plugin("palette"))
            .unwrap()
            .is_compatible());

        // Key lost: incompatible.
        let losing = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "blue", "hex": "#0000ff" } ] }),
        )]);
        let verdict =
            is_topological_subset(&old, &old_states, &new, &losing, &plugin("palette")).unwrap();
        assert!(!verdict.is_compatible());
    }

    #[test]
    fn array_positional_keys_are_ignored() {
        let with_array = r#"{
            "name": "notes",
            "version": "0.1.0",
            "store": {
                "lines": {
                    "kind": "array",
                    "values": { "kind": "primitive", "primitive": "string" },
                    "emptyable": true
                }
            }
        }"#;
        let index = index_from(&[with_array]);
        let old_states = BTreeMap::from([(
            plugin("notes"),
            json!({ "lines": ["alpha", "beta"] }),
        )]);
        // Reordered lines shift every positional id; still compatible.
        let new_states = BTreeMap::from([(
            plugin("notes"),
            json!({ "lines": ["beta", "alpha", "gamma"] }),
        )]);

        assert!(is_topological_subset(
            &index,
            &old_states,
            &index,
            &new_states,
            &plugin("notes"),
        )
        .unwrap()
        .is_compatible());
    }

    #[test]
    fn validity_checks_old_nullability() {
        let old = index_from(&[PALETTE_V1]);
        let new = index_from(&[PALETTE_V1]);
        let old_states = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "red", "hex": "#ff0000" } ] }),
        )]);
        // hex is non-nullable under the old schema but absent on the
        // new side's red record.
        let new_states = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "red" } ] }),
        )]);

        let verdict = is_topological_subset_valid(
            &old,
            &old_states,
            &new,
            &new_states,
            &plugin("palette"),
        )
        .unwrap();
        let Compatibility::Incompatible { reason, .. } = verdict else {
            panic!("expected incompatible");
        };
        assert!(reason.contains("hex"));
    }

    #[test]
    fn validity_checks_old_emptyability() {
        let strict = r#"{
            "name": "palette",
            "version": "0.1.0",
            "store": {
                "colors": {
                    "kind": "set",
                    "values": {
                        "kind": "object",
                        "fields": {
                            "id": { "kind": "primitive", "primitive": "string", "is_key": true }
                        }
                    }
                }
            }
        }"#;
        let index = index_from(&[strict]);
        let old_states = BTreeMap::from([(
            plugin("palette"),
            json!({ "colors": [ { "id": "red" } ] }),
        )]);
        let new_states = BTreeMap::from([(plugin("palette"), json!({ "colors": [] }))]);

        // Every old key is gone too, so topological subset fails
        // before validity; use matching keys but empty another way.
        let verdict = is_topological_subset_valid(
            &index,
            &BTreeMap::from([(plugin("palette"), json!({ "colors": [] }))]),
            &index,
            &new_states,
            &plugin("palette"),
        )
        .unwrap();
        let Compatibility::Incompatible { reason, .. } = verdict else {
            panic!("expected incompatible");
        };
        assert!(reason.contains("colors"));

        // And a populated set under the same schema passes.
        assert!(is_topological_subset_valid(
            &index,
            &old_states,
            &index,
            &old_states,
            &plugin("palette"),
        )
        .unwrap()
        .is_compatible());
    }
}
