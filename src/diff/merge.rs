//! diff::merge
//!
//! Three-way merge over keyed sequences.
//!
//! # Algorithm
//!
//! The skeleton of a merge is the LCS of `ours` and `theirs`: elements
//! both sides agree on, in the single relative order both sides imply.
//! All three sequences are partitioned into the gaps between skeleton
//! elements (the origin greedily, since a skeleton element may have no
//! counterpart there), and each gap merges independently:
//!
//! - both sides equal: take either
//! - one side unchanged from origin: take the other side
//! - both changed: conflict — the non-preferred segment is kept first,
//!   the preferred segment last, and a non-preferred element whose key
//!   collides with a preferred element is dropped (the preferred side
//!   wins that element)
//!
//! Because the skeleton is a longest common subsequence, conflicting
//! gap pairs share no elements, so a single partition level suffices.
//!
//! # Example
//!
//! ```
//! use weft::diff::merge::{can_auto_merge, merge_sequence, MergePreference};
//!
//! let origin: Vec<char> = vec![];
//! let ours: Vec<char> = "DA".chars().collect();
//! let theirs: Vec<char> = "ABC".chars().collect();
//!
//! let merged = merge_sequence(&origin, &ours, &theirs, MergePreference::Ours, |c| *c);
//! assert_eq!(merged.iter().collect::<String>(), "DABC");
//! assert!(can_auto_merge(&origin, &ours, &theirs, |c| *c));
//! ```

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use super::sequence::lcs_matches;

/// Which side wins a truly conflicted element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePreference {
    Ours,
    Theirs,
}

/// Three-way merge of `ours` and `theirs` against their common
/// ancestor `origin`.
///
/// `key_of` extracts the identity used for conflict arbitration: two
/// elements with the same key are the same logical element, and in a
/// conflicted gap only the preferred side's version survives.
pub fn merge_sequence<T, K, F>(
    origin: &[T],
    ours: &[T],
    theirs: &[T],
    preference: MergePreference,
    key_of: F,
) -> Vec<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    if ours == theirs || theirs == origin {
        return ours.to_vec();
    }
    if ours == origin {
        return theirs.to_vec();
    }

    let skeleton = lcs_matches(ours, theirs);
    let our_gaps = partition_at(ours, skeleton.iter().map(|&(i, _)| i));
    let their_gaps = partition_at(theirs, skeleton.iter().map(|&(_, j)| j));
    let origin_gaps = partition_greedy(origin, skeleton.iter().map(|&(i, _)| &ours[i]));

    let mut merged = Vec::new();
    for g in 0..=skeleton.len() {
        merged.extend(merge_gap(
            origin_gaps[g],
            our_gaps[g],
            their_gaps[g],
            preference,
            &key_of,
        ));
        if let Some(&(i, _)) = skeleton.get(g) {
            merged.push(ours[i].clone());
        }
    }
    merged
}

/// True iff no element is truly conflicted: merging under either
/// preference yields the same sequence.
pub fn can_auto_merge<T, K, F>(origin: &[T], ours: &[T], theirs: &[T], key_of: F) -> bool
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    merge_sequence(origin, ours, theirs, MergePreference::Ours, &key_of)
        == merge_sequence(origin, ours, theirs, MergePreference::Theirs, &key_of)
}

/// Split `seq` into the gaps around the given match positions.
///
/// Returns `positions.len() + 1` slices.
fn partition_at<T>(seq: &[T], positions: impl Iterator<Item = usize>) -> Vec<&[T]> {
    let mut gaps = Vec::new();
    let mut start = 0;
    for position in positions {
        gaps.push(&seq[start..position]);
        start = position + 1;
    }
    gaps.push(&seq[start..]);
    gaps
}

/// Split `origin` into gaps around skeleton elements matched greedily
/// in order. A skeleton element absent from the origin contributes an
/// empty gap without advancing.
fn partition_greedy<'a, 'b, T: PartialEq>(
    origin: &'a [T],
    skeleton: impl Iterator<Item = &'b T>,
) -> Vec<&'a [T]>
where
    T: 'b,
{
    let mut gaps = Vec::new();
    let mut start = 0;
    for element in skeleton {
        match origin[start..].iter().position(|e| e == element) {
            Some(found) => {
                let position = start + found;
                gaps.push(&origin[start..position]);
                start = position + 1;
            }
            None => gaps.push(&origin[start..start]),
        }
    }
    gaps.push(&origin[start..]);
    gaps
}

fn merge_gap<T, K, F>(
    origin: &[T],
    ours: &[T],
    theirs: &[T],
    preference: MergePreference,
    key_of: &F,
) -> Vec<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    if ours == theirs || theirs == origin {
        return ours.to_vec();
    }
    if ours == origin {
        return theirs.to_vec();
    }

    // Both sides changed this gap: a real conflict. Keep the
    // non-preferred segment first and the preferred segment last; the
    // preferred side wins any element both sides touched.
    let (preferred, other) = match preference {
        MergePreference::Ours => (ours, theirs),
        MergePreference::Theirs => (theirs, ours),
    };
    let preferred_keys: HashSet<K> = preferred.iter().map(key_of).collect();

    let mut out: Vec<T> = other
        .iter()
        .filter(|element| !preferred_keys.contains(&key_of(element)))
        .cloned()
        .collect();
    out.extend(preferred.iter().cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn merge_str(origin: &str, ours: &str, theirs: &str, preference: MergePreference) -> String {
        merge_sequence(&chars(origin), &chars(ours), &chars(theirs), preference, |c| *c)
            .iter()
            .collect()
    }

    fn auto(origin: &str, ours: &str, theirs: &str) -> bool {
        can_auto_merge(&chars(origin), &chars(ours), &chars(theirs), |c| *c)
    }

    #[test]
    fn disjoint_additions_compose() {
        assert_eq!(merge_str("", "DA", "ABC", MergePreference::Ours), "DABC");
        assert_eq!(merge_str("", "DA", "ABC", MergePreference::Theirs), "DABC");
        assert!(auto("", "DA", "ABC"));
    }

    #[test]
    fn conflicted_merge_is_preference_arbitrated() {
        let origin = "ABCDEF";
        let ours = "RXALDEFSKZ";
        let theirs = "ABCDFSJKL";

        assert_eq!(
            merge_str(origin, ours, theirs, MergePreference::Theirs),
            "RXALDFSJKZL",
        );
        assert_eq!(
            merge_str(origin, ours, theirs, MergePreference::Ours),
            "RXALDFSJKLZ",
        );
        assert!(!auto(origin, ours, theirs));
    }

    #[test]
    fn unchanged_side_yields_other_side() {
        assert_eq!(merge_str("ABC", "ABC", "AXC", MergePreference::Ours), "AXC");
        assert_eq!(merge_str("ABC", "AXC", "ABC", MergePreference::Theirs), "AXC");
        assert!(auto("ABC", "ABC", "AXC"));
    }

    #[test]
    fn identical_edits_merge_cleanly() {
        assert_eq!(merge_str("ABC", "AXC", "AXC", MergePreference::Ours), "AXC");
        assert!(auto("ABC", "AXC", "AXC"));
    }

    #[test]
    fn independent_edits_in_separate_gaps() {
        // ours edits the front, theirs edits the back
        assert_eq!(
            merge_str("ABCDEF", "XBCDEF", "ABCDEY", MergePreference::Ours),
            "XBCDEY",
        );
        assert!(auto("ABCDEF", "XBCDEF", "ABCDEY"));
    }

    #[test]
    fn both_delete_same_element() {
        assert_eq!(merge_str("ABC", "AC", "AC", MergePreference::Ours), "AC");
        assert!(auto("ABC", "AC", "AC"));
    }

    #[test]
    fn delete_versus_keep_is_delete() {
        // ours removed B, theirs untouched
        assert_eq!(merge_str("ABC", "AC", "ABC", MergePreference::Theirs), "AC");
        assert!(auto("ABC", "AC", "ABC"));
    }

    #[test]
    fn same_key_conflict_preferred_wins() {
        // Elements keyed by id; both sides rewrote element 1.
        #[derive(Debug, Clone, PartialEq)]
        struct Item(u32, &'static str);

        let origin = vec![Item(1, "old"), Item(2, "keep")];
        let ours = vec![Item(1, "ours"), Item(2, "keep")];
        let theirs = vec![Item(1, "theirs"), Item(2, "keep")];

        let merged = merge_sequence(&origin, &ours, &theirs, MergePreference::Ours, |i| i.0);
        assert_eq!(merged, vec![Item(1, "ours"), Item(2, "keep")]);

        let merged = merge_sequence(&origin, &ours, &theirs, MergePreference::Theirs, |i| i.0);
        assert_eq!(merged, vec![Item(1, "theirs"), Item(2, "keep")]);

        assert!(!can_auto_merge(&origin, &ours, &theirs, |i| i.0));
    }

    #[test]
    fn empty_everything() {
        assert_eq!(merge_str("", "", "", MergePreference::Ours), "");
        assert!(auto("", "", ""));
    }
}
