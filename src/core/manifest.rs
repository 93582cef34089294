//! core::manifest
//!
//! Plugin manifest schema.
//!
//! # Schema Design
//!
//! A manifest declares a plugin's identity, its imports, a `types`
//! section of named reusable type graphs, and the `store` graph that
//! shapes the plugin's versioned state. Manifests are:
//! - Immutable, identified by (name, version)
//! - Strictly parsed (unknown fields rejected)
//! - Structurally validated after parsing
//!
//! Type nodes are a closed tagged variant, so downstream validation is
//! exhaustive pattern matching rather than field probing.
//!
//! # Example
//!
//! ```
//! use weft::core::manifest::{parse_manifest, TypeNode};
//!
//! let json = r#"{
//!     "name": "palette",
//!     "version": "0.1.0",
//!     "imports": {},
//!     "types": {
//!         "Color": {
//!             "kind": "object",
//!             "fields": {
//!                 "id": { "kind": "primitive", "primitive": "string", "is_key": true },
//!                 "hex": { "kind": "primitive", "primitive": "string" }
//!             }
//!         }
//!     },
//!     "store": {
//!         "colors": { "kind": "set", "values": { "kind": "named", "name": "Color" } }
//!     }
//! }"#;
//!
//! let manifest = parse_manifest(json).unwrap();
//! assert_eq!(manifest.name.as_str(), "palette");
//! assert!(matches!(manifest.store["colors"], TypeNode::Set { .. }));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{PluginName, TypeError};

/// Errors from manifest parsing and structural validation.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    ParseError(String),

    #[error("plugin '{0}' cannot import itself")]
    SelfImport(PluginName),

    #[error("type name '{0}' collides with a primitive keyword")]
    ReservedTypeName(String),

    #[error("field name '{0}' is reserved (parenthesized names are synthetic)")]
    ReservedFieldName(String),

    #[error("type validation failed: {0}")]
    TypeError(#[from] TypeError),
}

/// Scalar kinds a leaf field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Int,
    Float,
    Boolean,
    String,
    File,
}

impl PrimitiveKind {
    /// Keyword as it appears in manifests.
    pub fn keyword(&self) -> &'static str {
        match self {
            PrimitiveKind::Int => "int",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::String => "string",
            PrimitiveKind::File => "file",
        }
    }
}

/// Reference delete semantics.
///
/// Declared on `ref` fields; applied by the integrity cascade when the
/// referenced record disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDelete {
    /// Remove the referencing record (and its children).
    #[default]
    Delete,
    /// Null the referencing field, keep the record.
    Nullify,
}

/// A field type declaration.
///
/// Closed tagged variant; every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeNode {
    /// A scalar leaf field.
    Primitive {
        primitive: PrimitiveKind,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_key: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        nullable: bool,
    },

    /// A reference to a named type from `types` (local `"Type"` or
    /// imported `"plugin.Type"`).
    Named { name: String },

    /// An unordered, key-deduplicated collection. The element type must
    /// declare exactly one key field.
    Set {
        values: Box<TypeNode>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        emptyable: bool,
    },

    /// An ordered collection with positional identity.
    Array {
        values: Box<TypeNode>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        emptyable: bool,
    },

    /// A foreign key onto a keyed collection.
    ///
    /// `target` is either a named-type expression (`"Type"`,
    /// `"plugin.Type"`) or a path expression
    /// (`"$(plugin).path.to.values"`). A ref may itself serve as a set
    /// element's key.
    Ref {
        target: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_key: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        nullable: bool,
        #[serde(default)]
        on_delete: OnDelete,
    },

    /// A nested structured object with no identity of its own.
    Object { fields: TypeGraph },
}

/// A mapping of field name to type declaration.
pub type TypeGraph = BTreeMap<String, TypeNode>;

/// A versioned plugin manifest.
///
/// Identified by (name, version); treated as immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Plugin identity.
    pub name: PluginName,

    /// Plugin version.
    pub version: semver::Version,

    /// Imported plugins and the version constraint each must satisfy.
    #[serde(default)]
    pub imports: BTreeMap<PluginName, semver::VersionReq>,

    /// Named reusable type graphs.
    #[serde(default)]
    pub types: BTreeMap<String, TypeNode>,

    /// The store graph shaping this plugin's versioned state.
    pub store: TypeGraph,
}

impl Manifest {
    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.imports.contains_key(&self.name) {
            return Err(ManifestError::SelfImport(self.name.clone()));
        }
        for type_name in self.types.keys() {
            let reserved = ["int", "float", "boolean", "string", "file"];
            if reserved.contains(&type_name.as_str()) {
                return Err(ManifestError::ReservedTypeName(type_name.clone()));
            }
        }
        for node in self.types.values() {
            check_field_names(node)?;
        }
        check_graph_field_names(&self.store)?;
        Ok(())
    }
}

/// Parenthesized field names are reserved for synthetic fields
/// injected during resolution.
fn check_graph_field_names(graph: &TypeGraph) -> Result<(), ManifestError> {
    for (name, node) in graph {
        if name.starts_with('(') {
            return Err(ManifestError::ReservedFieldName(name.clone()));
        }
        check_field_names(node)?;
    }
    Ok(())
}

fn check_field_names(node: &TypeNode) -> Result<(), ManifestError> {
    match node {
        TypeNode::Object { fields } => check_graph_field_names(fields),
        TypeNode::Set { values, .. } | TypeNode::Array { values, .. } => {
            check_field_names(values)
        }
        TypeNode::Primitive { .. } | TypeNode::Named { .. } | TypeNode::Ref { .. } => Ok(()),
    }
}

/// Parse a manifest from JSON with validation.
///
/// # Errors
///
/// Returns an error if the JSON is malformed, contains unknown fields,
/// or fails structural validation.
///
/// # Example
///
/// ```
/// use weft::core::manifest::parse_manifest;
///
/// let json = r#"{
///     "name": "notes",
///     "version": "1.2.0",
///     "store": {
///         "title": { "kind": "primitive", "primitive": "string" }
///     }
/// }"#;
///
/// let manifest = parse_manifest(json).unwrap();
/// assert_eq!(manifest.version.to_string(), "1.2.0");
/// ```
pub fn parse_manifest(json: &str) -> Result<Manifest, ManifestError> {
    let manifest: Manifest =
        serde_json::from_str(json).map_err(|e| ManifestError::ParseError(e.to_string()))?;
    manifest.validate()?;
    Ok(manifest)
}
