//! schema
//!
//! Schema resolution: compiles plugin manifests into fully expanded
//! root schemas.
//!
//! # Modules
//!
//! - [`resolver`] - Manifest index and the two-pass resolution walk
//!
//! # Architecture
//!
//! A [`RootSchema`] is a manifest's `store` graph with every named type
//! inlined, every collection element expanded, and every ref annotated
//! with the concrete scalar type of the key it holds. Named types are
//! resolved through an index keyed by (plugin, type name) rather than
//! live object references, so cycle detection and cross-plugin
//! resolution stay tractable.
//!
//! Resolution is two passes: pass one expands each plugin
//! independently, leaving path-expression refs deferred; pass two
//! chases every deferred ref through the full schema set once all root
//! schemas exist.

pub mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::manifest::{OnDelete, PrimitiveKind};
use crate::core::path::PathSegment;
use crate::core::types::PluginName;
use crate::store::StoreError;

pub use resolver::{resolve, resolve_all, ManifestIndex};

/// Synthetic key field injected into array elements for positional
/// identity. The parentheses keep it out of the manifest field-name
/// space.
pub const ARRAY_ID_FIELD: &str = "(id)";

/// Field name wrapping the payload of arrays of scalars. Reserved,
/// like [`ARRAY_ID_FIELD`].
pub const ARRAY_VALUE_FIELD: &str = "(value)";

/// Schema resolution failures.
///
/// Always surfaced as a rejected operation with a path-qualified
/// message; never silently coerced.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cyclic type '{type_name}' reachable from itself at {path}")]
    CyclicType { path: String, type_name: String },

    #[error("unresolvable reference '{reference}' at {path}")]
    InvalidReference { path: String, reference: String },

    #[error("collection element at {path} must declare exactly one key field, found {found}")]
    KeyCardinality { path: String, found: usize },

    #[error("key field at {path} cannot be nullable")]
    InvalidKey { path: String },

    #[error("invalid property at {path}: {detail}")]
    InvalidProp { path: String, detail: String },

    #[error("self-referential constrained ref at {path}")]
    InvalidSelfReference { path: String },

    #[error("import cycle involving plugin '{0}'")]
    ImportCycle(PluginName),

    #[error("manifest for plugin '{0}' missing from resolution context")]
    MissingManifest(PluginName),

    #[error("failed to fetch manifest for '{plugin}': {source}")]
    ManifestFetch {
        plugin: PluginName,
        #[source]
        source: StoreError,
    },
}

/// The scalar type a ref field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKey {
    /// Concrete key type, known after resolution.
    Resolved(PrimitiveKind),
    /// Path-expression target awaiting the second pass.
    Deferred(String),
}

/// A fully expanded type node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedNode {
    /// A scalar leaf field.
    Primitive {
        primitive: PrimitiveKind,
        is_key: bool,
        nullable: bool,
    },

    /// Key-deduplicated collection; `key_field` names the element
    /// field carrying identity.
    Set {
        element: ResolvedGraph,
        key_field: String,
        emptyable: bool,
    },

    /// Ordered collection; the element graph carries the injected
    /// [`ARRAY_ID_FIELD`].
    Array {
        element: ResolvedGraph,
        emptyable: bool,
    },

    /// A foreign key. `target` is canonical: `"plugin.Type"` for named
    /// targets, the verbatim path expression otherwise.
    Ref {
        key: RefKey,
        target: String,
        is_key: bool,
        nullable: bool,
        on_delete: OnDelete,
    },

    /// A nested structured object with no identity of its own.
    Object { fields: ResolvedGraph },
}

impl ResolvedNode {
    /// True for fields that project into a record directly (scalars
    /// and refs).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            ResolvedNode::Primitive { .. } | ResolvedNode::Ref { .. },
        )
    }

    /// True if this field carries element identity in a set.
    pub fn is_key(&self) -> bool {
        match self {
            ResolvedNode::Primitive { is_key, .. } => *is_key,
            ResolvedNode::Ref { is_key, .. } => *is_key,
            _ => false,
        }
    }
}

/// Field name to resolved node.
pub type ResolvedGraph = BTreeMap<String, ResolvedNode>;

/// A fully expanded root schema for one plugin.
///
/// Invariant after [`resolve_all`]: no unresolved type tokens; every
/// ref key is [`RefKey::Resolved`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSchema {
    /// Owning plugin.
    pub plugin: PluginName,
    /// Expanded store graph.
    pub fields: ResolvedGraph,
}

impl RootSchema {
    /// The direct-field graph of the structured node a record path
    /// addresses, or `None` if the path leaves the schema.
    ///
    /// Keyed segments descend into collection elements; plain field
    /// segments traverse nested objects.
    pub fn node_graph_at(&self, segments: &[PathSegment]) -> Option<&ResolvedGraph> {
        let mut rest = segments;
        match rest.first() {
            Some(PathSegment::Plugin(plugin)) if *plugin == self.plugin => rest = &rest[1..],
            _ => return None,
        }

        let mut graph = &self.fields;
        for segment in rest {
            let node = match segment {
                PathSegment::Plugin(_) => return None,
                PathSegment::Field(name) => graph.get(name)?,
                PathSegment::Keyed { field, .. } => graph.get(field)?,
            };
            graph = match (segment, node) {
                (PathSegment::Field(_), ResolvedNode::Object { fields }) => fields,
                (PathSegment::Keyed { .. }, ResolvedNode::Set { element, .. }) => element,
                (PathSegment::Keyed { .. }, ResolvedNode::Array { element, .. }) => element,
                _ => return None,
            };
        }
        Some(graph)
    }

    /// Whether the path traverses any array membership segment.
    ///
    /// Array positional ids are unstable across edits, so topological
    /// comparisons skip these paths.
    pub fn crosses_array(&self, segments: &[PathSegment]) -> bool {
        let mut rest = segments;
        match rest.first() {
            Some(PathSegment::Plugin(plugin)) if *plugin == self.plugin => rest = &rest[1..],
            _ => return false,
        }

        let mut graph = &self.fields;
        for segment in rest {
            let node = match segment {
                PathSegment::Plugin(_) => return false,
                PathSegment::Field(name) => graph.get(name),
                PathSegment::Keyed { field, .. } => graph.get(field),
            };
            let Some(node) = node else { return false };
            graph = match (segment, node) {
                (PathSegment::Field(_), ResolvedNode::Object { fields }) => fields,
                (PathSegment::Keyed { .. }, ResolvedNode::Set { element, .. }) => element,
                (PathSegment::Keyed { .. }, ResolvedNode::Array { element, .. }) => {
                    return true;
                }
                _ => return false,
            };
        }
        false
    }
}
