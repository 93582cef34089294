//! diff::text
//!
//! Token-granular diff for free-text fields.
//!
//! Text is split into word and punctuation runs before diffing, so the
//! diff tracks edits at the granularity a human edits at, and token
//! concatenation reproduces the input byte-for-byte.
//!
//! # Example
//!
//! ```
//! use weft::diff::text::{apply_text_diff, text_diff};
//!
//! let d = text_diff("the quick fox", "the very quick fox");
//! assert_eq!(apply_text_diff(&d, "the quick fox").unwrap(), "the very quick fox");
//! ```

use serde::{Deserialize, Serialize};

use super::sequence::{self, Diff, DiffApplyError};

/// A diff over text tokens.
///
/// Same shape as [`Diff`]; the elements are word/whitespace/punctuation
/// runs rather than records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextDiff(pub Diff<String>);

impl TextDiff {
    /// True if applying this diff is a no-op.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split text into tokens: runs of word characters, runs of
/// whitespace, and single punctuation characters.
///
/// Concatenating the tokens reproduces the input exactly.
pub fn tokenize(text: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Class {
        Word,
        Space,
        Other,
    }

    fn class_of(c: char) -> Class {
        if c.is_alphanumeric() || c == '_' {
            Class::Word
        } else if c.is_whitespace() {
            Class::Space
        } else {
            Class::Other
        }
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_class = Class::Other;

    for c in text.chars() {
        let class = class_of(c);
        let breaks = current.is_empty()
            || class != current_class
            // Punctuation never coalesces; "..." is three tokens.
            || class == Class::Other;
        if breaks && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(c);
        current_class = class;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Compute the token diff transforming `before` into `after`.
pub fn text_diff(before: &str, after: &str) -> TextDiff {
    TextDiff(sequence::diff(&tokenize(before), &tokenize(after)))
}

/// Apply a token diff to its base text.
///
/// # Errors
///
/// Returns [`DiffApplyError`] if the diff does not fit `base`.
pub fn apply_text_diff(diff: &TextDiff, base: &str) -> Result<String, DiffApplyError> {
    let tokens = sequence::apply(&diff.0, &tokenize(base))?;
    Ok(tokens.concat())
}
