//! core::path
//!
//! Record path codec.
//!
//! Every projected record is addressed by a path string of the form
//! `$(plugin).segment.collection<key>`. Segments are dot-separated; a
//! segment of the form `name<value>` denotes membership in a keyed
//! collection. The key value may itself be an encoded path (a reference
//! value), so decoding matches balanced `<...>` rather than splitting
//! naively.
//!
//! # Example
//!
//! ```
//! use weft::core::path::{decode_path, encode_path, PathSegment};
//!
//! let key = "$(palette).colors<red>.shades<dark>";
//! let segments = decode_path(key).unwrap();
//! assert_eq!(segments.len(), 3);
//! assert_eq!(encode_path(&segments), key);
//!
//! // Key values may embed full paths, including dots and brackets
//! let nested = "$(theme).rules<$(palette).colors<red>>";
//! let segments = decode_path(nested).unwrap();
//! assert_eq!(
//!     segments[1],
//!     PathSegment::Keyed {
//!         field: "rules".to_string(),
//!         value: "$(palette).colors<red>".to_string(),
//!     },
//! );
//! ```

use thiserror::Error;

use crate::core::types::PluginName;

/// Errors from path decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("path must start with a '$(plugin)' segment: {0}")]
    MissingPluginSegment(String),

    #[error("empty segment at offset {0}")]
    EmptySegment(usize),

    #[error("unbalanced '<' in path: {0}")]
    UnbalancedOpen(String),

    #[error("unbalanced '>' in path: {0}")]
    UnbalancedClose(String),

    #[error("trailing characters after '>' in segment: {0}")]
    TrailingAfterClose(String),

    #[error("invalid plugin segment: {0}")]
    InvalidPlugin(String),
}

/// One decoded path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Root segment naming the owning plugin: `$(plugin)`.
    Plugin(PluginName),
    /// A plain field traversal.
    Field(String),
    /// Membership in a keyed collection: `field<value>`.
    ///
    /// `value` is the raw encoded key; it is not unescaped because key
    /// values round-trip verbatim (they may be encoded paths themselves).
    Keyed { field: String, value: String },
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Plugin(name) => write!(f, "$({name})"),
            PathSegment::Field(name) => write!(f, "{name}"),
            PathSegment::Keyed { field, value } => write!(f, "{field}<{value}>"),
        }
    }
}

/// Encode segments back into a path string.
///
/// Inverse of [`decode_path`]; `encode_path(&decode_path(k)?) == k` for
/// every decodable `k`.
pub fn encode_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&segment.to_string());
    }
    out
}

/// Decode a path string into segments.
///
/// Splits on `.` only at bracket depth zero, so key values containing
/// dots or nested `<...>` decode losslessly.
///
/// # Errors
///
/// Returns [`PathError`] on empty paths, a missing or malformed
/// `$(plugin)` root segment, empty segments, or unbalanced brackets.
pub fn decode_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let raw = split_top_level(path)?;
    let mut segments = Vec::with_capacity(raw.len());

    for (i, part) in raw.iter().enumerate() {
        if i == 0 {
            segments.push(parse_plugin_segment(part)?);
        } else {
            segments.push(parse_field_segment(part)?);
        }
    }

    Ok(segments)
}

/// Split a path on dots at bracket depth zero.
fn split_top_level(path: &str) -> Result<Vec<&str>, PathError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in path.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::UnbalancedClose(path.to_string()))?;
            }
            '.' if depth == 0 => {
                if i == start {
                    return Err(PathError::EmptySegment(i));
                }
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(PathError::UnbalancedOpen(path.to_string()));
    }
    if start >= path.len() {
        return Err(PathError::EmptySegment(start));
    }
    parts.push(&path[start..]);
    Ok(parts)
}

fn parse_plugin_segment(part: &str) -> Result<PathSegment, PathError> {
    let inner = part
        .strip_prefix("$(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| PathError::MissingPluginSegment(part.to_string()))?;
    let name =
        PluginName::new(inner).map_err(|_| PathError::InvalidPlugin(part.to_string()))?;
    Ok(PathSegment::Plugin(name))
}

fn parse_field_segment(part: &str) -> Result<PathSegment, PathError> {
    let Some(open) = part.find('<') else {
        if part.contains('>') {
            return Err(PathError::UnbalancedClose(part.to_string()));
        }
        return Ok(PathSegment::Field(part.to_string()));
    };

    let field = &part[..open];
    if field.is_empty() {
        return Err(PathError::EmptySegment(0));
    }

    // Walk the bracketed value; it must close exactly at the segment end.
    // Byte iteration is fine: the delimiters are ASCII.
    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in part.bytes().enumerate().skip(open) {
        match c {
            b'<' => depth += 1,
            b'>' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::UnbalancedClose(part.to_string()))?;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let close = close.ok_or_else(|| PathError::UnbalancedOpen(part.to_string()))?;
    if close + 1 != part.len() {
        return Err(PathError::TrailingAfterClose(part.to_string()));
    }

    Ok(PathSegment::Keyed {
        field: field.to_string(),
        value: part[open + 1..close].to_string(),
    })
}

/// True if `prefix` addresses `path` or one of its ancestors.
///
/// Comparison is segment-wise; string prefixing would misfire on keyed
/// segments whose values embed dots.
pub fn is_path_prefix(prefix: &[PathSegment], path: &[PathSegment]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path.iter()).all(|(a, b)| a == b)
}
