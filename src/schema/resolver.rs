//! schema::resolver
//!
//! Manifest index and the two-pass schema resolution walk.
//!
//! # Passes
//!
//! Pass one ([`resolve`]) expands a single manifest: named types are
//! inlined through the (plugin, type name) index, collection elements
//! are expanded and key-checked, and named ref targets get their key
//! type derived from the referenced type's sole key field. Refs with
//! path-expression targets are recorded as deferred.
//!
//! Pass two (inside [`resolve_all`]) runs once every plugin's root
//! schema exists: each deferred ref is chased through the schema set to
//! the keyed collection it addresses, transitively through ref-typed
//! keys. A chase that revisits a site is a self-referential constraint
//! and is rejected.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::core::graph::DependencyGraph;
use crate::core::manifest::{Manifest, OnDelete, PrimitiveKind, TypeNode};
use crate::core::path::{decode_path, PathSegment};
use crate::core::types::PluginName;
use crate::store::ObjectStore;

use super::{
    RefKey, ResolvedGraph, ResolvedNode, RootSchema, SchemaError, ARRAY_ID_FIELD,
    ARRAY_VALUE_FIELD,
};

/// The set of manifests a resolution runs against: exactly one
/// manifest per plugin name.
#[derive(Debug, Default)]
pub struct ManifestIndex {
    manifests: BTreeMap<PluginName, Manifest>,
}

impl ManifestIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a manifest, replacing any previous version for the same
    /// plugin.
    pub fn insert(&mut self, manifest: Manifest) {
        self.manifests.insert(manifest.name.clone(), manifest);
    }

    /// Get the manifest for a plugin.
    pub fn get(&self, plugin: &PluginName) -> Option<&Manifest> {
        self.manifests.get(plugin)
    }

    /// Iterate all manifests.
    pub fn manifests(&self) -> impl Iterator<Item = &Manifest> {
        self.manifests.values()
    }

    /// Fetch `root` plus its transitive import closure from the object
    /// store.
    ///
    /// The store resolves each import's version constraint to a
    /// concrete stored manifest.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ManifestFetch`] if any manifest in the
    /// closure cannot be fetched.
    pub async fn load(root: Manifest, store: &dyn ObjectStore) -> Result<Self, SchemaError> {
        let mut index = Self::new();
        let mut queue: VecDeque<_> = root.imports.clone().into_iter().collect();
        index.insert(root);

        while let Some((plugin, constraint)) = queue.pop_front() {
            if index.manifests.contains_key(&plugin) {
                continue;
            }
            let manifest = store
                .get_manifest(&plugin, &constraint)
                .await
                .map_err(|source| SchemaError::ManifestFetch {
                    plugin: plugin.clone(),
                    source,
                })?;
            debug!(plugin = %plugin, version = %manifest.version, "loaded manifest");
            queue.extend(manifest.imports.clone());
            index.insert(manifest);
        }

        Ok(index)
    }
}

/// Where a field sits, for key-placement validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Root,
    SetElement,
    ArrayElement,
    Object,
}

/// Resolve a single manifest against the index (pass one).
///
/// Path-expression refs remain [`RefKey::Deferred`]; use
/// [`resolve_all`] to finalize them. Pure and deterministic given the
/// same manifest set.
pub fn resolve(manifest: &Manifest, index: &ManifestIndex) -> Result<RootSchema, SchemaError> {
    let resolver = Resolver { index };
    let mut path = Vec::new();
    let mut stack = Vec::new();
    let fields = resolver.resolve_graph(
        &manifest.name,
        &manifest.store,
        Container::Root,
        &mut path,
        &mut stack,
    )?;
    Ok(RootSchema {
        plugin: manifest.name.clone(),
        fields,
    })
}

/// Resolve every plugin in the index (both passes).
///
/// Plugins are resolved in import topological order; afterwards every
/// deferred path-expression ref is chased to its concrete key type.
///
/// # Errors
///
/// Any [`SchemaError`], including [`SchemaError::ImportCycle`] when
/// the import graph is cyclic.
pub fn resolve_all(
    index: &ManifestIndex,
) -> Result<BTreeMap<PluginName, RootSchema>, SchemaError> {
    let graph = DependencyGraph::from_manifests(index.manifests());
    let order = match graph.topological_order() {
        Some(order) => order,
        None => {
            let plugin = graph
                .find_cycle()
                .expect("unorderable import graph must contain a cycle");
            return Err(SchemaError::ImportCycle(plugin));
        }
    };

    let mut roots = BTreeMap::new();
    for plugin in &order {
        let manifest = index
            .get(plugin)
            .ok_or_else(|| SchemaError::MissingManifest(plugin.clone()))?;
        roots.insert(plugin.clone(), resolve(manifest, index)?);
        debug!(plugin = %plugin, "resolved root schema");
    }

    // Pass two: chase every deferred path-expression ref.
    let mut deferred = BTreeSet::new();
    for root in roots.values() {
        collect_deferred(&root.fields, &mut deferred);
    }

    let mut kinds = BTreeMap::new();
    for expr in &deferred {
        let mut visited = HashSet::new();
        kinds.insert(expr.clone(), chase_expr(expr, &roots, &mut visited)?);
    }

    for root in roots.values_mut() {
        apply_deferred(&mut root.fields, &kinds);
    }

    Ok(roots)
}

fn collect_deferred(graph: &ResolvedGraph, out: &mut BTreeSet<String>) {
    for node in graph.values() {
        match node {
            ResolvedNode::Ref {
                key: RefKey::Deferred(expr),
                ..
            } => {
                out.insert(expr.clone());
            }
            ResolvedNode::Set { element, .. } | ResolvedNode::Array { element, .. } => {
                collect_deferred(element, out);
            }
            ResolvedNode::Object { fields } => collect_deferred(fields, out),
            _ => {}
        }
    }
}

fn apply_deferred(graph: &mut ResolvedGraph, kinds: &BTreeMap<String, PrimitiveKind>) {
    for node in graph.values_mut() {
        match node {
            ResolvedNode::Ref { key, .. } => {
                if let RefKey::Deferred(expr) = key {
                    if let Some(kind) = kinds.get(expr.as_str()) {
                        *key = RefKey::Resolved(*kind);
                    }
                }
            }
            ResolvedNode::Set { element, .. } | ResolvedNode::Array { element, .. } => {
                apply_deferred(element, kinds);
            }
            ResolvedNode::Object { fields } => apply_deferred(fields, kinds),
            _ => {}
        }
    }
}

/// Follow a path-expression ref to the key type of the collection it
/// addresses, transitively through ref-typed keys.
fn chase_expr(
    expr: &str,
    roots: &BTreeMap<PluginName, RootSchema>,
    visited: &mut HashSet<String>,
) -> Result<PrimitiveKind, SchemaError> {
    if !visited.insert(expr.to_string()) {
        return Err(SchemaError::InvalidSelfReference {
            path: expr.to_string(),
        });
    }

    let invalid = || SchemaError::InvalidReference {
        path: expr.to_string(),
        reference: expr.to_string(),
    };

    let segments = decode_path(expr).map_err(|_| invalid())?;
    let [PathSegment::Plugin(plugin), rest @ ..] = segments.as_slice() else {
        return Err(invalid());
    };
    let root = roots.get(plugin).ok_or_else(invalid)?;

    let mut graph = &root.fields;
    let mut node = None;
    for segment in rest {
        let PathSegment::Field(name) = segment else {
            return Err(invalid());
        };
        let found = graph.get(name).ok_or_else(invalid)?;
        graph = match found {
            ResolvedNode::Object { fields } => fields,
            ResolvedNode::Set { element, .. } | ResolvedNode::Array { element, .. } => element,
            _ => graph,
        };
        node = Some(found);
    }

    let Some(ResolvedNode::Set {
        element, key_field, ..
    }) = node
    else {
        return Err(invalid());
    };

    match element.get(key_field) {
        Some(ResolvedNode::Primitive { primitive, .. }) => Ok(*primitive),
        Some(ResolvedNode::Ref {
            key: RefKey::Resolved(kind),
            ..
        }) => Ok(*kind),
        Some(ResolvedNode::Ref {
            key: RefKey::Deferred(next),
            ..
        }) => chase_expr(next, roots, visited),
        _ => Err(invalid()),
    }
}

struct Resolver<'a> {
    index: &'a ManifestIndex,
}

impl Resolver<'_> {
    fn resolve_graph(
        &self,
        plugin: &PluginName,
        graph: &BTreeMap<String, TypeNode>,
        container: Container,
        path: &mut Vec<String>,
        stack: &mut Vec<(PluginName, String)>,
    ) -> Result<ResolvedGraph, SchemaError> {
        let mut resolved = BTreeMap::new();
        for (field, node) in graph {
            path.push(field.clone());
            let value = self.resolve_node(plugin, node, container, path, stack)?;
            path.pop();
            resolved.insert(field.clone(), value);
        }
        Ok(resolved)
    }

    fn resolve_node(
        &self,
        plugin: &PluginName,
        node: &TypeNode,
        container: Container,
        path: &mut Vec<String>,
        stack: &mut Vec<(PluginName, String)>,
    ) -> Result<ResolvedNode, SchemaError> {
        match node {
            TypeNode::Primitive {
                primitive,
                is_key,
                nullable,
            } => {
                self.check_key_placement(*is_key, *nullable, container, plugin, path)?;
                Ok(ResolvedNode::Primitive {
                    primitive: *primitive,
                    is_key: *is_key,
                    nullable: *nullable,
                })
            }

            TypeNode::Named { name } => {
                let (owner, type_name, definition) = self.lookup_named(plugin, name, path)?;
                let frame = (owner.clone(), type_name.clone());
                if stack.contains(&frame) {
                    return Err(SchemaError::CyclicType {
                        path: err_path(plugin, path),
                        type_name,
                    });
                }
                stack.push(frame);
                let resolved = self.resolve_node(&owner, definition, container, path, stack)?;
                stack.pop();
                Ok(resolved)
            }

            TypeNode::Set { values, emptyable } => {
                let element =
                    self.resolve_element(plugin, values, Container::SetElement, path, stack)?;

                let keys: Vec<&String> = element
                    .iter()
                    .filter(|(_, node)| node.is_key())
                    .map(|(name, _)| name)
                    .collect();
                if keys.len() != 1 {
                    return Err(SchemaError::KeyCardinality {
                        path: err_path(plugin, path),
                        found: keys.len(),
                    });
                }

                Ok(ResolvedNode::Set {
                    key_field: keys[0].clone(),
                    element,
                    emptyable: *emptyable,
                })
            }

            TypeNode::Array { values, emptyable } => {
                let mut element =
                    self.resolve_element(plugin, values, Container::ArrayElement, path, stack)?;

                if element.contains_key(ARRAY_ID_FIELD) {
                    return Err(SchemaError::InvalidProp {
                        path: err_path(plugin, path),
                        detail: format!("field name '{ARRAY_ID_FIELD}' is reserved"),
                    });
                }
                element.insert(
                    ARRAY_ID_FIELD.to_string(),
                    ResolvedNode::Primitive {
                        primitive: PrimitiveKind::String,
                        is_key: true,
                        nullable: false,
                    },
                );

                Ok(ResolvedNode::Array {
                    element,
                    emptyable: *emptyable,
                })
            }

            TypeNode::Ref {
                target,
                is_key,
                nullable,
                on_delete,
            } => {
                self.check_key_placement(*is_key, *nullable, container, plugin, path)?;
                if *on_delete == OnDelete::Nullify && !nullable {
                    return Err(SchemaError::InvalidProp {
                        path: err_path(plugin, path),
                        detail: "on_delete=nullify requires a nullable ref".to_string(),
                    });
                }

                let (key, canonical) = if target.starts_with("$(") {
                    (RefKey::Deferred(target.clone()), target.clone())
                } else {
                    let (owner, type_name, definition) =
                        self.lookup_named(plugin, target, path)?;
                    let mut visited = HashSet::new();
                    visited.insert((owner.clone(), type_name.clone()));
                    let key = self.derive_named_ref_key(
                        &owner,
                        definition,
                        plugin,
                        path,
                        &mut visited,
                    )?;
                    (key, format!("{owner}.{type_name}"))
                };

                Ok(ResolvedNode::Ref {
                    key,
                    target: canonical,
                    is_key: *is_key,
                    nullable: *nullable,
                    on_delete: *on_delete,
                })
            }

            TypeNode::Object { fields } => {
                let fields =
                    self.resolve_graph(plugin, fields, Container::Object, path, stack)?;
                Ok(ResolvedNode::Object { fields })
            }
        }
    }

    /// Resolve a collection's `values` declaration into an element
    /// graph. Scalars are legal array elements (wrapped under
    /// [`ARRAY_VALUE_FIELD`]); sets require structured elements.
    fn resolve_element(
        &self,
        plugin: &PluginName,
        values: &TypeNode,
        container: Container,
        path: &mut Vec<String>,
        stack: &mut Vec<(PluginName, String)>,
    ) -> Result<ResolvedGraph, SchemaError> {
        match values {
            TypeNode::Object { fields } => {
                self.resolve_graph(plugin, fields, container, path, stack)
            }

            TypeNode::Named { name } => {
                let (owner, type_name, definition) = self.lookup_named(plugin, name, path)?;
                let frame = (owner.clone(), type_name.clone());
                if stack.contains(&frame) {
                    return Err(SchemaError::CyclicType {
                        path: err_path(plugin, path),
                        type_name,
                    });
                }
                stack.push(frame);
                let element =
                    self.resolve_element(&owner, definition, container, path, stack)?;
                stack.pop();
                Ok(element)
            }

            TypeNode::Primitive { .. } | TypeNode::Ref { .. } => {
                if container == Container::SetElement {
                    return Err(SchemaError::KeyCardinality {
                        path: err_path(plugin, path),
                        found: 0,
                    });
                }
                let resolved = self.resolve_node(plugin, values, container, path, stack)?;
                Ok(BTreeMap::from([(ARRAY_VALUE_FIELD.to_string(), resolved)]))
            }

            TypeNode::Set { .. } | TypeNode::Array { .. } => Err(SchemaError::InvalidProp {
                path: err_path(plugin, path),
                detail: "collections cannot nest directly inside collections".to_string(),
            }),
        }
    }

    /// Derive the key type of a named ref target from the referenced
    /// type's sole key field, chasing ref-typed keys.
    fn derive_named_ref_key(
        &self,
        owner: &PluginName,
        definition: &TypeNode,
        at_plugin: &PluginName,
        path: &mut Vec<String>,
        visited: &mut HashSet<(PluginName, String)>,
    ) -> Result<RefKey, SchemaError> {
        let TypeNode::Object { fields } = definition else {
            return Err(SchemaError::InvalidReference {
                path: err_path(at_plugin, path),
                reference: "ref target must be an object type".to_string(),
            });
        };

        let keys: Vec<(&String, &TypeNode)> = fields
            .iter()
            .filter(|(_, node)| {
                matches!(
                    node,
                    TypeNode::Primitive { is_key: true, .. } | TypeNode::Ref { is_key: true, .. },
                )
            })
            .collect();
        if keys.len() != 1 {
            return Err(SchemaError::KeyCardinality {
                path: err_path(at_plugin, path),
                found: keys.len(),
            });
        }

        match keys[0].1 {
            TypeNode::Primitive { primitive, .. } => Ok(RefKey::Resolved(*primitive)),
            TypeNode::Ref { target, .. } => {
                if target.starts_with("$(") {
                    return Ok(RefKey::Deferred(target.clone()));
                }
                let (next_owner, next_name, next_def) =
                    self.lookup_named(owner, target, path)?;
                if !visited.insert((next_owner.clone(), next_name)) {
                    return Err(SchemaError::InvalidSelfReference {
                        path: err_path(at_plugin, path),
                    });
                }
                self.derive_named_ref_key(&next_owner, next_def, at_plugin, path, visited)
            }
            _ => unreachable!("key filter admits primitives and refs only"),
        }
    }

    /// Resolve a named-type expression to (owner plugin, type name,
    /// definition).
    ///
    /// `"Type"` is local; `"plugin.Type"` must name a declared import.
    fn lookup_named<'a>(
        &'a self,
        plugin: &PluginName,
        expression: &str,
        path: &mut Vec<String>,
    ) -> Result<(PluginName, String, &'a TypeNode), SchemaError> {
        let invalid = |reference: &str| SchemaError::InvalidReference {
            path: err_path(plugin, path),
            reference: reference.to_string(),
        };

        let (owner, type_name) = match expression.split_once('.') {
            Some((prefix, name)) => {
                let owner =
                    PluginName::new(prefix).map_err(|_| invalid(expression))?;
                if owner != *plugin {
                    let manifest = self
                        .index
                        .get(plugin)
                        .ok_or_else(|| SchemaError::MissingManifest(plugin.clone()))?;
                    if !manifest.imports.contains_key(&owner) {
                        return Err(invalid(expression));
                    }
                }
                (owner, name)
            }
            None => (plugin.clone(), expression),
        };

        let manifest = self
            .index
            .get(&owner)
            .ok_or_else(|| SchemaError::MissingManifest(owner.clone()))?;
        let definition = manifest
            .types
            .get(type_name)
            .ok_or_else(|| invalid(expression))?;
        Ok((owner, type_name.to_string(), definition))
    }

    fn check_key_placement(
        &self,
        is_key: bool,
        nullable: bool,
        container: Container,
        plugin: &PluginName,
        path: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        if is_key && container != Container::SetElement {
            return Err(SchemaError::InvalidProp {
                path: err_path(plugin, path),
                detail: "key fields are only valid inside set elements".to_string(),
            });
        }
        if is_key && nullable {
            return Err(SchemaError::InvalidKey {
                path: err_path(plugin, path),
            });
        }
        Ok(())
    }
}

fn err_path(plugin: &PluginName, path: &[String]) -> String {
    if path.is_empty() {
        format!("$({plugin})")
    } else {
        format!("$({plugin}).{}", path.join("."))
    }
}
