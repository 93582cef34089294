//! Weft - a version-control engine for schema-described plugin state
//!
//! Weft tracks, diffs, branches, merges, and safely upgrades nested
//! structured state the way source control tracks text, at the
//! granularity of typed, keyed records with cross-plugin foreign-key
//! semantics.
//!
//! # Architecture
//!
//! The crate is layered, leaves first:
//!
//! - [`core`] - Domain types, manifest schema, path codec, commit
//!   state, dependency graph
//! - [`schema`] - Compiles plugin manifests into fully expanded root
//!   schemas
//! - [`projection`] - Projects nested state to/from path-addressed
//!   records, the diffable unit
//! - [`diff`] - Myers LCS diff/apply, token text diff, and three-way
//!   merge with deterministic conflict arbitration
//! - [`cascade`] - Propagates delete/nullify reference semantics to a
//!   fixed point across the plugin dependency graph
//! - [`compat`] - Schema/topological subset checks gating upgrades and
//!   reverts
//! - [`history`] - Content-addressed commits, branch pointers,
//!   divergence discovery, state reconstruction
//! - [`store`] - The asynchronous object-store collaborator boundary
//!
//! # Correctness Invariants
//!
//! 1. `apply(diff(a, b), a) == b` for every sequence and state diff
//! 2. `unflatten(schema, flatten(schema, state)) == state` for
//!    normalized state
//! 3. Commit shas are deterministic content hashes; tampering is
//!    detectable
//! 4. Merge output is deterministic for a given preference, and
//!    auto-mergeability implies preference independence

pub mod cascade;
pub mod compat;
pub mod core;
pub mod diff;
pub mod history;
pub mod projection;
pub mod schema;
pub mod store;
