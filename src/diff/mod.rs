//! diff
//!
//! Generic sequence diffing and merging.
//!
//! # Modules
//!
//! - [`sequence`] - Myers LCS diff/apply over keyed sequences
//! - [`text`] - Token-granular diff for free-text fields
//! - [`merge`] - Three-way merge with deterministic conflict arbitration
//!
//! # Design Principles
//!
//! - All algorithms are pure functions over explicit inputs
//! - `apply(diff(a, b), a) == b` always holds
//! - Merge output is deterministic for a given preference

pub mod merge;
pub mod sequence;
pub mod text;

pub use merge::{can_auto_merge, merge_sequence, MergePreference};
pub use sequence::{apply, diff, Diff, DiffApplyError};
pub use text::{apply_text_diff, text_diff, TextDiff};
