//! cascade
//!
//! Referential-integrity propagation.
//!
//! # Architecture
//!
//! When a plugin's state mutates, refs elsewhere may dangle. The
//! cascade projects the plugin's state to records, applies each
//! dangling ref's declared `on_delete` semantics (`nullify` nulls the
//! field; `delete` removes the record and, transitively, every record
//! it prefixes), and repeats on the same plugin until a fixed point —
//! each removal can surface new dangling refs. Once stable, every
//! downstream dependent (a plugin importing this one, transitively)
//! cascades in dependency order, memoized per (source, dependent) pair
//! within one invocation so diamond graphs do no redundant work.
//!
//! The cascade runs only on explicit state mutation, not on raw diff
//! application, and its result is idempotent.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::graph::DependencyGraph;
use crate::core::manifest::OnDelete;
use crate::core::path::{decode_path, is_path_prefix, PathSegment};
use crate::core::state::Record;
use crate::core::types::PluginName;
use crate::projection::{flatten, unflatten, ProjectionError};
use crate::schema::{ResolvedNode, RootSchema};

/// Cascade failures.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("no schema for plugin '{0}' in cascade context")]
    MissingSchema(PluginName),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Propagate delete/nullify semantics outward from a mutation to
/// `plugin`'s state.
///
/// `states` maps each plugin to its nested state and is updated in
/// place; `schemas` must cover every plugin in `states`.
///
/// # Errors
///
/// Returns [`CascadeError::MissingSchema`] if a cascading plugin has
/// no schema, or a projection error if state and schema disagree.
pub fn cascade(
    plugin: &PluginName,
    states: &mut BTreeMap<PluginName, Value>,
    schemas: &BTreeMap<PluginName, RootSchema>,
    graph: &DependencyGraph,
) -> Result<(), CascadeError> {
    let mut memo: HashSet<(PluginName, PluginName)> = HashSet::new();

    cascade_fixed_point(plugin, states, schemas)?;

    // Dependents cascade in import order so a diamond's join point
    // runs after every arm that feeds it, exactly once.
    let dependents = graph.transitive_dependents(plugin);
    let order = graph
        .topological_order()
        .expect("resolved schema sets have acyclic imports");
    for dependent in order {
        if !dependents.contains(&dependent) {
            continue;
        }
        if !memo.insert((plugin.clone(), dependent.clone())) {
            continue;
        }
        if states.contains_key(&dependent) {
            cascade_fixed_point(&dependent, states, schemas)?;
        }
    }

    Ok(())
}

/// Re-project and sweep one plugin until no record is removed.
fn cascade_fixed_point(
    plugin: &PluginName,
    states: &mut BTreeMap<PluginName, Value>,
    schemas: &BTreeMap<PluginName, RootSchema>,
) -> Result<(), CascadeError> {
    let schema = schemas
        .get(plugin)
        .ok_or_else(|| CascadeError::MissingSchema(plugin.clone()))?;

    // Other plugins' record keys are stable while this plugin sweeps.
    let mut foreign_keys: HashSet<String> = HashSet::new();
    for (other, state) in states.iter() {
        if other == plugin {
            continue;
        }
        let other_schema = schemas
            .get(other)
            .ok_or_else(|| CascadeError::MissingSchema(other.clone()))?;
        foreign_keys.extend(flatten(other_schema, state)?.into_iter().map(|r| r.key));
    }

    let mut iteration = 0usize;
    loop {
        let Some(state) = states.get(plugin) else {
            return Ok(());
        };
        let records = flatten(schema, state)?;
        let own_keys: HashSet<String> = records.iter().map(|r| r.key.clone()).collect();

        let exists = |target: &str| {
            own_keys.contains(target) || foreign_keys.contains(target)
        };

        let mut swept = Vec::with_capacity(records.len());
        let mut removed_paths: Vec<Vec<PathSegment>> = Vec::new();
        let mut nullified = false;

        for record in records {
            let segments = decode_path(&record.key).map_err(ProjectionError::from)?;
            let Some(node_graph) = schema.node_graph_at(&segments) else {
                return Err(CascadeError::Projection(ProjectionError::SchemaMismatch {
                    path: record.key.clone(),
                    field: "record".to_string(),
                }));
            };

            let mut record = record;
            let mut remove = false;
            for (field, node) in node_graph {
                let ResolvedNode::Ref { on_delete, .. } = node else {
                    continue;
                };
                let Some(Value::String(target)) = record.value.get(field) else {
                    continue;
                };
                if exists(target) {
                    continue;
                }
                match on_delete {
                    OnDelete::Nullify => {
                        record.value.insert(field.clone(), Value::Null);
                        nullified = true;
                    }
                    OnDelete::Delete => {
                        remove = true;
                    }
                }
            }

            if remove {
                removed_paths.push(segments);
            } else {
                swept.push((record, segments));
            }
        }

        if removed_paths.is_empty() && !nullified {
            return Ok(());
        }

        // Transitive child removal: drop every record a removed path
        // prefixes.
        let survivors: Vec<Record> = swept
            .into_iter()
            .filter(|(_, segments)| {
                !removed_paths
                    .iter()
                    .any(|removed| is_path_prefix(removed, segments))
            })
            .map(|(record, _)| record)
            .collect();

        debug!(
            plugin = %plugin,
            iteration,
            removed = removed_paths.len(),
            "cascade sweep",
        );

        let rebuilt = unflatten(schema, &survivors)?;
        states.insert(plugin.clone(), rebuilt);

        if removed_paths.is_empty() {
            // Nullification alone cannot surface new dangling refs.
            return Ok(());
        }
        iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse_manifest;
    use crate::schema::{resolve_all, ManifestIndex};
    use serde_json::json;

    fn plugin(name: &str) -> PluginName {
        PluginName::new(name).unwrap()
    }

    /// palette holds colors; theme rules ref colors (delete) and
    /// accents ref colors (nullify); theme rules also ref other rules
    /// (delete), giving an in-plugin chain.
    fn fixture() -> (
        BTreeMap<PluginName, RootSchema>,
        DependencyGraph,
        BTreeMap<PluginName, Value>,
    ) {
        let palette = parse_manifest(
            r#"{
                "name": "palette",
                "version": "0.1.0",
                "store": {
                    "colors": {
                        "kind": "set",
                        "values": {
                            "kind": "object",
                            "fields": {
                                "id": {
                                    "kind": "primitive",
                                    "primitive": "string",
                                    "is_key": true
                                }
                            }
                        },
                        "emptyable": true
                    }
                }
            }"#,
        )
        .unwrap();

        let theme = parse_manifest(
            r#"{
                "name": "theme",
                "version": "0.1.0",
                "imports": { "palette": "^0.1" },
                "store": {
                    "rules": {
                        "kind": "set",
                        "values": {
                            "kind": "object",
                            "fields": {
                                "name": {
                                    "kind": "primitive",
                                    "primitive": "string",
                                    "is_key": true
                                },
                                "color": { "kind": "ref", "target": "$(palette).colors" },
                                "parent": {
                                    "kind": "ref",
                                    "target": "$(theme).rules",
                                    "nullable": true
                                }
                            }
                        },
                        "emptyable": true
                    },
                    "accent": {
                        "kind": "ref",
                        "target": "$(palette).colors",
                        "nullable": true,
                        "on_delete": "nullify"
                    }
                }
            }"#,
        )
        .unwrap();

        let mut index = ManifestIndex::new();
        index.insert(palette);
        index.insert(theme);
        let schemas = resolve_all(&index).unwrap();

        let graph = {
            let mut graph = DependencyGraph::new();
            graph.add_import(plugin("theme"), plugin("palette"));
            graph
        };

        let states = BTreeMap::from([
            (
                plugin("palette"),
                json!({ "colors": [ { "id": "red" }, { "id": "green" } ] }),
            ),
            (
                plugin("theme"),
                json!({
                    "accent": "$(palette).colors<red>",
                    "rules": [
                        {
                            "name": "base",
                            "color": "$(palette).colors<red>",
                            "parent": null
                        },
                        {
                            "name": "derived",
                            "color": "$(palette).colors<green>",
                            "parent": "$(theme).rules<base>"
                        }
                    ]
                }),
            ),
        ]);

        (schemas, graph, states)
    }

    fn rule_names(state: &Value) -> Vec<&str> {
        state["rules"]
            .as_array()
            .unwrap()
            .iter()
            .map(|rule| rule["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn intact_refs_are_left_alone() {
        let (schemas, graph, mut states) = fixture();
        let before = states.clone();
        cascade(&plugin("palette"), &mut states, &schemas, &graph).unwrap();
        // Normalization aside, nothing should disappear.
        assert_eq!(rule_names(&states[&plugin("theme")]).len(), 2);
        assert_eq!(
            states[&plugin("palette")]["colors"],
            before[&plugin("palette")]["colors"],
        );
    }

    #[test]
    fn delete_cascades_through_dependent_chain_in_one_call() {
        let (schemas, graph, mut states) = fixture();
        // Drop red from the palette: "base" dangles (delete), and then
        // "derived" dangles on its parent ref (delete), all in one
        // cascade call. The nullify accent survives as null.
        states.insert(plugin("palette"), json!({ "colors": [ { "id": "green" } ] }));

        cascade(&plugin("palette"), &mut states, &schemas, &graph).unwrap();

        let theme = &states[&plugin("theme")];
        assert_eq!(rule_names(theme), Vec::<&str>::new());
        assert_eq!(theme["accent"], Value::Null);
    }

    #[test]
    fn nullify_keeps_the_record() {
        let (schemas, graph, mut states) = fixture();
        states.insert(plugin("palette"), json!({ "colors": [ { "id": "green" } ] }));

        cascade(&plugin("palette"), &mut states, &schemas, &graph).unwrap();

        let theme = &states[&plugin("theme")];
        // The theme root record survives with accent nulled.
        assert_eq!(theme["accent"], Value::Null);
    }

    #[test]
    fn cascade_is_idempotent() {
        let (schemas, graph, mut states) = fixture();
        states.insert(plugin("palette"), json!({ "colors": [ { "id": "green" } ] }));

        cascade(&plugin("palette"), &mut states, &schemas, &graph).unwrap();
        let once = states.clone();
        cascade(&plugin("palette"), &mut states, &schemas, &graph).unwrap();
        assert_eq!(states, once);
    }

    #[test]
    fn missing_schema_is_an_error() {
        let (_, graph, mut states) = fixture();
        let schemas = BTreeMap::new();
        assert!(matches!(
            cascade(&plugin("palette"), &mut states, &schemas, &graph),
            Err(CascadeError::MissingSchema(_)),
        ));
    }
}
