//! projection
//!
//! State ↔ record projection: the bridge between nested application
//! state and the flat, path-addressed records diffs operate on.
//!
//! # Architecture
//!
//! [`flatten`] walks nested state depth-first, guided by the resolved
//! schema. Every structured node (the root, each set element, each
//! array element, each nested object) emits one [`Record`] holding
//! only its direct scalar and ref fields; structured children get
//! their own deeper records. [`unflatten`] inverts the walk,
//! find-or-creating containers from decoded paths.
//!
//! Set membership is keyed by the element's declared key field. Array
//! membership is keyed by a synthetic id: a structural hash of the
//! element's content plus an occurrence counter assigned in first-seen
//! order within the parent scope, so duplicate elements stay distinct
//! and re-flattening reconstructed state is stable.
//!
//! # Round trip
//!
//! `unflatten(schema, flatten(schema, state)) == state` for any valid
//! state, modulo array/set ordering normalization.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::manifest::PrimitiveKind;
use crate::core::path::{decode_path, encode_path, PathError, PathSegment};
use crate::core::state::Record;
use crate::schema::{ResolvedGraph, ResolvedNode, RootSchema, ARRAY_ID_FIELD};

/// Projection failures.
///
/// These indicate data/schema version skew; they are surfaced, not
/// retried.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to decode path: {0}")]
    PathDecode(#[from] PathError),

    #[error("path '{path}' does not fit the resolved schema at '{field}'")]
    SchemaMismatch { path: String, field: String },
}

fn mismatch(path: &[PathSegment], field: &str) -> ProjectionError {
    ProjectionError::SchemaMismatch {
        path: encode_path(path),
        field: field.to_string(),
    }
}

/// Project nested state into an ordered list of path-addressed
/// records.
///
/// # Errors
///
/// Returns [`ProjectionError::SchemaMismatch`] when the state's shape
/// contradicts the schema (a collection that is not an array, a set
/// element missing its key field).
pub fn flatten(schema: &RootSchema, state: &Value) -> Result<Vec<Record>, ProjectionError> {
    let mut path = vec![PathSegment::Plugin(schema.plugin.clone())];
    let root = as_object(state, &path, "root")?;
    let mut records = Vec::new();
    flatten_node(&schema.fields, root, &mut path, &mut records)?;
    Ok(records)
}

fn flatten_node(
    graph: &ResolvedGraph,
    value: &Map<String, Value>,
    path: &mut Vec<PathSegment>,
    records: &mut Vec<Record>,
) -> Result<(), ProjectionError> {
    let mut direct = std::collections::BTreeMap::new();
    for (field, node) in graph {
        if node.is_leaf() {
            if let Some(found) = value.get(field) {
                direct.insert(field.clone(), found.clone());
            }
        }
    }
    records.push(Record {
        key: encode_path(path),
        value: direct,
    });

    for (field, node) in graph {
        match node {
            ResolvedNode::Object { fields } => {
                let Some(child) = value.get(field) else { continue };
                let child = as_object(child, path, field)?;
                path.push(PathSegment::Field(field.clone()));
                flatten_node(fields, child, path, records)?;
                path.pop();
            }

            ResolvedNode::Set {
                element, key_field, ..
            } => {
                let Some(members) = value.get(field) else { continue };
                let members = as_array(members, path, field)?;

                // Sets deduplicate by key: first-seen position, last
                // value wins.
                let mut order = Vec::new();
                let mut by_key: HashMap<String, &Map<String, Value>> = HashMap::new();
                for member in members {
                    let member = as_object(member, path, field)?;
                    let key_value = member
                        .get(key_field)
                        .and_then(encode_key_value)
                        .ok_or_else(|| mismatch(path, key_field))?;
                    if !by_key.contains_key(&key_value) {
                        order.push(key_value.clone());
                    }
                    by_key.insert(key_value, member);
                }

                for key_value in order {
                    let member = by_key[&key_value];
                    path.push(PathSegment::Keyed {
                        field: field.clone(),
                        value: key_value,
                    });
                    flatten_node(element, member, path, records)?;
                    path.pop();
                }
            }

            ResolvedNode::Array { element, .. } => {
                let Some(members) = value.get(field) else { continue };
                let members = as_array(members, path, field)?;

                let scalar_element = is_scalar_element(element);
                let mut occurrences: HashMap<String, usize> = HashMap::new();
                for member in members {
                    let id = array_element_id(member, &mut occurrences);
                    let wrapped;
                    let member_object = if scalar_element {
                        wrapped = Map::from_iter([(
                            crate::schema::ARRAY_VALUE_FIELD.to_string(),
                            member.clone(),
                        )]);
                        &wrapped
                    } else {
                        as_object(member, path, field)?
                    };
                    path.push(PathSegment::Keyed {
                        field: field.clone(),
                        value: id,
                    });
                    flatten_node(element, member_object, path, records)?;
                    path.pop();
                }
            }

            ResolvedNode::Primitive { .. } | ResolvedNode::Ref { .. } => {}
        }
    }

    Ok(())
}

/// Synthetic positional identity for an array element: a truncated
/// structural hash of its content, disambiguated by an occurrence
/// counter within this scope.
fn array_element_id(member: &Value, occurrences: &mut HashMap<String, usize>) -> String {
    let canonical = serde_json::to_vec(member).expect("json values always serialize");
    let digest = Sha256::digest(&canonical);
    let hash = hex::encode(&digest[..8]);
    let occurrence = occurrences.entry(hash.clone()).or_insert(0);
    let id = format!("{hash}:{occurrence}");
    *occurrence += 1;
    id
}

/// True for the wrapped form arrays of scalars resolve to.
fn is_scalar_element(element: &ResolvedGraph) -> bool {
    element.len() == 2
        && element.contains_key(ARRAY_ID_FIELD)
        && element
            .get(crate::schema::ARRAY_VALUE_FIELD)
            .is_some_and(ResolvedNode::is_leaf)
}

/// Reconstruct nested state from records.
///
/// Containers are found-or-created by key (sets) or synthetic id
/// (arrays) at each decoded path; synthetic ids are stripped from the
/// result.
///
/// # Errors
///
/// Returns [`ProjectionError::PathDecode`] on a malformed record path
/// and [`ProjectionError::SchemaMismatch`] when a path or field does
/// not exist in the schema.
pub fn unflatten(schema: &RootSchema, records: &[Record]) -> Result<Value, ProjectionError> {
    let mut state = Map::new();

    for record in records {
        let segments = decode_path(&record.key)?;
        let [PathSegment::Plugin(plugin), rest @ ..] = segments.as_slice() else {
            return Err(mismatch(&segments, "plugin root"));
        };
        if *plugin != schema.plugin {
            return Err(mismatch(&segments, plugin.as_str()));
        }

        let mut graph = &schema.fields;
        let mut value: &mut Map<String, Value> = &mut state;
        for segment in rest {
            match segment {
                PathSegment::Plugin(_) => {
                    return Err(mismatch(&segments, "plugin root"));
                }

                PathSegment::Field(name) => {
                    let Some(ResolvedNode::Object { fields }) = graph.get(name) else {
                        return Err(mismatch(&segments, name));
                    };
                    graph = fields;
                    value = entry_object(value, name);
                }

                PathSegment::Keyed { field, value: key } => {
                    let (element, key_field) = match graph.get(field) {
                        Some(ResolvedNode::Set {
                            element, key_field, ..
                        }) => (element, key_field.as_str()),
                        Some(ResolvedNode::Array { element, .. }) => (element, ARRAY_ID_FIELD),
                        _ => return Err(mismatch(&segments, field)),
                    };

                    let key_node = element
                        .get(key_field)
                        .ok_or_else(|| mismatch(&segments, key_field))?;
                    let decoded = decode_key_value(key, key_node)
                        .ok_or_else(|| mismatch(&segments, key_field))?;

                    let members = entry_array(value, field);
                    let position = members.iter().position(|member| {
                        member
                            .as_object()
                            .and_then(|m| m.get(key_field))
                            .is_some_and(|found| *found == decoded)
                    });
                    let position = match position {
                        Some(position) => position,
                        None => {
                            let mut fresh = Map::new();
                            fresh.insert(key_field.to_string(), decoded);
                            members.push(Value::Object(fresh));
                            members.len() - 1
                        }
                    };

                    graph = element;
                    value = members[position]
                        .as_object_mut()
                        .expect("members are created as objects");
                }
            }
        }

        for (field, field_value) in &record.value {
            if !graph.get(field).is_some_and(ResolvedNode::is_leaf) {
                return Err(mismatch(&segments, field));
            }
            value.insert(field.clone(), field_value.clone());
        }
    }

    let mut state = Value::Object(state);
    normalize(schema, &mut state);
    Ok(state)
}

/// Post-reconstruction normalization: strip synthetic array ids,
/// unwrap scalar array elements, and materialize missing collection
/// fields as empty arrays on every present structured node.
///
/// Unflattened state is therefore always in normal form; the
/// round-trip law holds exactly for states in that form.
fn normalize(schema: &RootSchema, state: &mut Value) {
    fn walk(graph: &ResolvedGraph, value: &mut Value) {
        let Some(object) = value.as_object_mut() else { return };
        for (field, node) in graph {
            match node {
                ResolvedNode::Object { fields } => {
                    if let Some(child) = object.get_mut(field) {
                        walk(fields, child);
                    }
                }
                ResolvedNode::Set { element, .. } => {
                    let members = object
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Some(members) = members.as_array_mut() {
                        for member in members {
                            walk(element, member);
                        }
                    }
                }
                ResolvedNode::Array { element, .. } => {
                    let scalar = is_scalar_element(element);
                    let members = object
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Some(members) = members.as_array_mut() {
                        for member in members {
                            if let Some(m) = member.as_object_mut() {
                                m.remove(ARRAY_ID_FIELD);
                            }
                            if scalar {
                                let unwrapped = member
                                    .as_object_mut()
                                    .and_then(|m| m.remove(crate::schema::ARRAY_VALUE_FIELD))
                                    .unwrap_or(Value::Null);
                                *member = unwrapped;
                            } else {
                                walk(element, member);
                            }
                        }
                    }
                }
                ResolvedNode::Primitive { .. } | ResolvedNode::Ref { .. } => {}
            }
        }
    }

    walk(&schema.fields, state);
}

/// Encode a scalar key value into its path form.
pub(crate) fn encode_key_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Decode a path key back into the scalar the key field holds.
fn decode_key_value(key: &str, key_node: &ResolvedNode) -> Option<Value> {
    let kind = match key_node {
        ResolvedNode::Primitive { primitive, .. } => *primitive,
        ResolvedNode::Ref { .. } => PrimitiveKind::String,
        _ => return None,
    };
    match kind {
        PrimitiveKind::String | PrimitiveKind::File => Some(Value::String(key.to_string())),
        PrimitiveKind::Int => key.parse::<i64>().ok().map(Value::from),
        PrimitiveKind::Float => key.parse::<f64>().ok().map(Value::from),
        PrimitiveKind::Boolean => key.parse::<bool>().ok().map(Value::from),
    }
}

fn entry_object<'a>(value: &'a mut Map<String, Value>, field: &str) -> &'a mut Map<String, Value> {
    value
        .entry(field.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("entry created as object")
}

fn entry_array<'a>(value: &'a mut Map<String, Value>, field: &str) -> &'a mut Vec<Value> {
    value
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .expect("entry created as array")
}

fn as_object<'a>(
    value: &'a Value,
    path: &[PathSegment],
    field: &str,
) -> Result<&'a Map<String, Value>, ProjectionError> {
    value.as_object().ok_or_else(|| mismatch(path, field))
}

fn as_array<'a>(
    value: &'a Value,
    path: &[PathSegment],
    field: &str,
) -> Result<&'a Vec<Value>, ProjectionError> {
    value.as_array().ok_or_else(|| mismatch(path, field))
}
