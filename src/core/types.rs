//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`PluginName`] - Validated plugin identifier
//! - [`BranchName`] - Validated branch name
//! - [`CommitSha`] - Content-address of a commit (SHA-256)
//! - [`RepoId`] - Repository identifier
//! - [`UtcTimestamp`] - RFC3339 timestamp
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use weft::core::types::{PluginName, BranchName, CommitSha};
//!
//! // Valid constructions
//! let plugin = PluginName::new("palette").unwrap();
//! let branch = BranchName::new("feature/themes").unwrap();
//! let sha = CommitSha::new(
//!     "abc123def4567890abc123def4567890abc123def4567890abc123def456789a",
//! ).unwrap();
//!
//! // Invalid constructions fail at creation time
//! assert!(PluginName::new("Not A Plugin").is_err());
//! assert!(BranchName::new("bad..name").is_err());
//! assert!(CommitSha::new("not-a-sha").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid plugin name: {0}")]
    InvalidPluginName(String),

    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid commit sha: {0}")]
    InvalidSha(String),
}

/// A validated plugin identifier.
///
/// Plugin names key manifests, record paths, and the store map of every
/// commit, so the grammar is deliberately narrow:
/// - Must start with a lowercase letter
/// - May contain lowercase letters, digits, and interior `-`
/// - Cannot end with `-`
///
/// # Example
///
/// ```
/// use weft::core::types::PluginName;
///
/// let name = PluginName::new("icon-theme").unwrap();
/// assert_eq!(name.as_str(), "icon-theme");
///
/// assert!(PluginName::new("").is_err());
/// assert!(PluginName::new("9lives").is_err());
/// assert!(PluginName::new("trailing-").is_err());
/// assert!(PluginName::new("Upper").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginName(String);

impl PluginName {
    /// Create a new validated plugin name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPluginName` if the name violates the
    /// plugin-name grammar.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidPluginName(
                "plugin name cannot be empty".into(),
            ));
        }

        let first = name.chars().next().unwrap();
        if !first.is_ascii_lowercase() {
            return Err(TypeError::InvalidPluginName(
                "plugin name must start with a lowercase letter".into(),
            ));
        }

        if name.ends_with('-') {
            return Err(TypeError::InvalidPluginName(
                "plugin name cannot end with '-'".into(),
            ));
        }

        for c in name.chars() {
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
                return Err(TypeError::InvalidPluginName(format!(
                    "plugin name cannot contain '{c}'"
                )));
            }
        }

        Ok(())
    }

    /// Get the plugin name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PluginName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PluginName> for String {
    fn from(name: PluginName) -> Self {
        name.0
    }
}

impl AsRef<str> for PluginName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PluginName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated branch name.
///
/// Branch names are repository-local pointers; the rules keep them
/// unambiguous in paths and messages:
/// - Cannot be empty
/// - Cannot start with `.` or `-`, cannot end with `/`
/// - Cannot contain `..`, `//`, whitespace, or control characters
///
/// # Example
///
/// ```
/// use weft::core::types::BranchName;
///
/// let name = BranchName::new("feature/palette-v2").unwrap();
/// assert_eq!(name.as_str(), "feature/palette-v2");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new(".hidden").is_err());
/// assert!(BranchName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates the
    /// branch-name rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot start with '.' or '-'".into(),
            ));
        }
        if name.ends_with('/') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot end with '/'".into(),
            ));
        }
        if name.contains("..") || name.contains("//") {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot contain '..' or '//'".into(),
            ));
        }
        for c in name.chars() {
            if c.is_whitespace() || c.is_ascii_control() {
                return Err(TypeError::InvalidBranchName(
                    "branch name cannot contain whitespace or control characters".into(),
                ));
            }
        }
        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The content-address of a commit.
///
/// A `CommitSha` is the SHA-256 digest of the commit's canonical
/// serialization, 64 lowercase hex characters. Input is normalized to
/// lowercase.
///
/// # Example
///
/// ```
/// use weft::core::types::CommitSha;
///
/// let sha = CommitSha::new(
///     "ABC123DEF4567890ABC123DEF4567890ABC123DEF4567890ABC123DEF456789A",
/// ).unwrap();
/// assert!(sha.as_str().starts_with("abc123d"));
/// assert_eq!(sha.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    /// Create a new validated commit sha.
    ///
    /// The sha is normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidSha` if the string is not 64 hex
    /// characters.
    pub fn new(sha: impl Into<String>) -> Result<Self, TypeError> {
        let sha = sha.into().to_ascii_lowercase();
        Self::validate(&sha)?;
        Ok(Self(sha))
    }

    fn validate(sha: &str) -> Result<(), TypeError> {
        if sha.len() != 64 {
            return Err(TypeError::InvalidSha(format!(
                "expected 64 hex characters, got {}",
                sha.len()
            )));
        }
        if !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidSha("sha must be hexadecimal".into()));
        }
        Ok(())
    }

    /// Get an abbreviated form of the sha.
    ///
    /// Returns the first `len` characters, or the full sha if `len`
    /// exceeds it.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    /// Get the sha as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommitSha {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CommitSha> for String {
    fn from(sha: CommitSha) -> Self {
        sha.0
    }
}

impl AsRef<str> for CommitSha {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository identifier.
///
/// Repositories are keyed by UUID in the object store; every store call
/// carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(uuid::Uuid);

impl RepoId {
    /// Generate a fresh repository id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for RepoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A UTC timestamp in RFC3339 format.
///
/// # Example
///
/// ```
/// use weft::core::types::UtcTimestamp;
///
/// let now = UtcTimestamp::now();
/// assert!(now.to_string().contains('T'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Create a timestamp from a chrono DateTime.
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt)
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
