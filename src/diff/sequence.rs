//! diff::sequence
//!
//! Generic sequence diff over keyed elements.
//!
//! # Algorithm
//!
//! [`diff`] computes a longest-common-subsequence alignment with the
//! Myers greedy algorithm (O(N·D) where D is the edit distance) and
//! records unaligned elements: removals keyed by their index in the
//! base sequence, additions keyed by their index in the target
//! sequence.
//!
//! # Law
//!
//! `apply(&diff(a, b), a) == b` for all sequences `a`, `b`.
//!
//! # Example
//!
//! ```
//! use weft::diff::sequence::{apply, diff};
//!
//! let a: Vec<char> = "ABCDEF".chars().collect();
//! let b: Vec<char> = "XYAYCEFZ".chars().collect();
//!
//! let d = diff(&a, &b);
//! assert_eq!(apply(&d, &a).unwrap(), b);
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from applying a diff to a base it does not fit.
///
/// These only arise from a diff inconsistent with its stated base — a
/// corrupted commit or a programmer error — and are fatal for that
/// commit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffApplyError {
    #[error("remove index {index} out of bounds for base of length {len}")]
    RemoveOutOfBounds { index: usize, len: usize },

    #[error("element at base index {index} does not match the recorded removal")]
    RemoveMismatch { index: usize },

    #[error("add index {index} out of bounds while splicing (length {len})")]
    AddOutOfBounds { index: usize, len: usize },
}

/// A sequence diff.
///
/// `remove` is keyed by base index; `add` is keyed by target index.
/// Applying removals in original relative order and then splicing
/// additions in ascending index order reproduces the target exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff<T> {
    /// Elements present in the target but not aligned to the base,
    /// keyed by their index in the target sequence.
    pub add: BTreeMap<usize, T>,

    /// Elements present in the base but not aligned to the target,
    /// keyed by their index in the base sequence.
    pub remove: BTreeMap<usize, T>,
}

impl<T> Diff<T> {
    /// An empty diff.
    pub fn new() -> Self {
        Self {
            add: BTreeMap::new(),
            remove: BTreeMap::new(),
        }
    }

    /// True if applying this diff is a no-op.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the diff transforming `before` into `after`.
pub fn diff<T: Clone + PartialEq>(before: &[T], after: &[T]) -> Diff<T> {
    let matches = lcs_matches(before, after);
    let matched_before: HashSet<usize> = matches.iter().map(|&(i, _)| i).collect();
    let matched_after: HashSet<usize> = matches.iter().map(|&(_, j)| j).collect();

    let mut out = Diff::new();
    for (i, element) in before.iter().enumerate() {
        if !matched_before.contains(&i) {
            out.remove.insert(i, element.clone());
        }
    }
    for (j, element) in after.iter().enumerate() {
        if !matched_after.contains(&j) {
            out.add.insert(j, element.clone());
        }
    }
    out
}

/// Apply a diff to its base sequence.
///
/// Removals are verified against the base before anything is dropped,
/// so an inconsistent diff fails without producing a half-applied
/// sequence.
///
/// # Errors
///
/// Returns [`DiffApplyError`] if the diff does not fit `base`.
pub fn apply<T: Clone + PartialEq>(diff: &Diff<T>, base: &[T]) -> Result<Vec<T>, DiffApplyError> {
    for (&index, element) in &diff.remove {
        match base.get(index) {
            None => {
                return Err(DiffApplyError::RemoveOutOfBounds {
                    index,
                    len: base.len(),
                })
            }
            Some(found) if found != element => {
                return Err(DiffApplyError::RemoveMismatch { index })
            }
            Some(_) => {}
        }
    }

    let mut out: Vec<T> = base
        .iter()
        .enumerate()
        .filter(|(i, _)| !diff.remove.contains_key(i))
        .map(|(_, element)| element.clone())
        .collect();

    // BTreeMap iteration is ascending, so each splice lands at its
    // final target index.
    for (&index, element) in &diff.add {
        if index > out.len() {
            return Err(DiffApplyError::AddOutOfBounds {
                index,
                len: out.len(),
            });
        }
        out.insert(index, element.clone());
    }

    Ok(out)
}

/// Myers LCS alignment: pairs of (base index, target index) for every
/// element common to both sequences, in sequence order.
pub(crate) fn lcs_matches<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    if n == 0 || m == 0 {
        return Vec::new();
    }

    let max = (n + m) as usize;
    let offset = max as isize;
    let idx = |k: isize| (k + offset) as usize;

    // v[idx(k)] holds the furthest x on diagonal k; trace snapshots v
    // before each edit-distance step for backtracking.
    let mut v = vec![0isize; 2 * max + 1];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    let mut final_d = None;
    'outer: for d in 0..=(max as isize) {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                final_d = Some(d);
                break 'outer;
            }
            k += 2;
        }
    }

    let final_d = final_d.expect("myers search always terminates at d = n + m");

    // Backtrack from (n, m), recording the diagonal runs.
    let mut matches = Vec::new();
    let mut x = n;
    let mut y = m;
    for d in (1..=final_d).rev() {
        let v = &trace[d as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[idx(prev_k)];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            matches.push(((x - 1) as usize, (y - 1) as usize));
            x -= 1;
            y -= 1;
        }
        x = prev_x;
        y = prev_y;
    }
    while x > 0 && y > 0 {
        matches.push(((x - 1) as usize, (y - 1) as usize));
        x -= 1;
        y -= 1;
    }

    matches.reverse();
    matches
}
