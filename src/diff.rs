//! Row-level diff between two ordered lists.
//!
//! Items are matched by [`Diffable::diff_key`] through a hash-bucket index, so
//! matching is linear. Among the matched pairs, those whose old positions form
//! the longest increasing subsequence (in new order) stay put; every other
//! matched pair becomes a [`Change::Move`]. That keeps the move count minimal
//! for the chosen matching and the whole diff at O(n log n).
//!
//! The change set follows the usual batch-update convention: deletes and move
//! sources refer to old indices, inserts and move targets to new indices, and
//! updates are applied in place after everything else. [`apply_changes`]
//! implements exactly that order.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Identity for diffing. Two items with the same key are "the same row";
/// `PartialEq` decides whether the row's content changed.
pub trait Diffable: Clone + PartialEq {
    type Key: Hash + Eq;

    fn diff_key(&self) -> Self::Key;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    Insert {
        item: T,
        new_index: usize,
    },
    Delete {
        item: T,
        old_index: usize,
    },
    /// Same row, same relative position, different content.
    Update {
        item: T,
        old_index: usize,
        new_index: usize,
    },
    /// Carries the new value, so a moved row may also have changed content.
    Move {
        item: T,
        old_index: usize,
        new_index: usize,
    },
}

impl<T> Change<T> {
    pub fn item(&self) -> &T {
        match self {
            Change::Insert { item, .. }
            | Change::Delete { item, .. }
            | Change::Update { item, .. }
            | Change::Move { item, .. } => item,
        }
    }

    pub fn old_index(&self) -> Option<usize> {
        match self {
            Change::Insert { .. } => None,
            Change::Delete { old_index, .. }
            | Change::Update { old_index, .. }
            | Change::Move { old_index, .. } => Some(*old_index),
        }
    }

    pub fn new_index(&self) -> Option<usize> {
        match self {
            Change::Delete { .. } => None,
            Change::Insert { new_index, .. }
            | Change::Update { new_index, .. }
            | Change::Move { new_index, .. } => Some(*new_index),
        }
    }
}

/// Computes the changes turning `old` into `new`.
///
/// Output order: deletes by ascending old index, then inserts, moves and
/// updates, each by ascending new index.
pub fn compute_diff<T: Diffable>(old: &[T], new: &[T]) -> Vec<Change<T>> {
    // FIFO per key: duplicate keys still match deterministically.
    let mut buckets: HashMap<T::Key, VecDeque<usize>> = HashMap::with_capacity(old.len());
    for (i, item) in old.iter().enumerate() {
        buckets.entry(item.diff_key()).or_default().push_back(i);
    }

    let mut matched_old = vec![false; old.len()];
    let mut old_for_new: Vec<Option<usize>> = Vec::with_capacity(new.len());
    for item in new {
        let matched = buckets
            .get_mut(&item.diff_key())
            .and_then(VecDeque::pop_front);
        if let Some(i) = matched {
            matched_old[i] = true;
        }
        old_for_new.push(matched);
    }

    // (old_index, new_index) in new order
    let pairs: Vec<(usize, usize)> = old_for_new
        .iter()
        .enumerate()
        .filter_map(|(j, m)| m.map(|i| (i, j)))
        .collect();
    let old_positions: Vec<usize> = pairs.iter().map(|&(i, _)| i).collect();
    let stable = longest_increasing(&old_positions);

    let mut changes = Vec::new();

    for (i, item) in old.iter().enumerate() {
        if !matched_old[i] {
            changes.push(Change::Delete {
                item: item.clone(),
                old_index: i,
            });
        }
    }

    for (j, matched) in old_for_new.iter().enumerate() {
        if matched.is_none() {
            changes.push(Change::Insert {
                item: new[j].clone(),
                new_index: j,
            });
        }
    }

    let mut updates = Vec::new();
    for (&(i, j), keep) in pairs.iter().zip(stable) {
        if !keep {
            changes.push(Change::Move {
                item: new[j].clone(),
                old_index: i,
                new_index: j,
            });
        } else if old[i] != new[j] {
            updates.push(Change::Update {
                item: new[j].clone(),
                old_index: i,
                new_index: j,
            });
        }
    }
    changes.extend(updates);

    changes
}

/// Applies a change set produced by [`compute_diff`]: removes deletes and move
/// sources (descending old index), inserts inserts and move targets (ascending
/// new index), then overwrites updated rows in place.
pub fn apply_changes<T: Clone>(old: &[T], changes: &[Change<T>]) -> Vec<T> {
    let mut removals: Vec<usize> = Vec::new();
    let mut placements: Vec<(usize, &T)> = Vec::new();
    let mut updates: Vec<(usize, &T)> = Vec::new();

    for change in changes {
        match change {
            Change::Delete { old_index, .. } => removals.push(*old_index),
            Change::Move {
                item,
                old_index,
                new_index,
            } => {
                removals.push(*old_index);
                placements.push((*new_index, item));
            }
            Change::Insert { item, new_index } => placements.push((*new_index, item)),
            Change::Update {
                item, new_index, ..
            } => updates.push((*new_index, item)),
        }
    }

    removals.sort_unstable_by(|a, b| b.cmp(a));
    removals.dedup();
    placements.sort_by_key(|&(j, _)| j);

    let mut result = old.to_vec();
    for i in removals {
        if i < result.len() {
            result.remove(i);
        }
    }
    for (j, item) in placements {
        let at = j.min(result.len());
        result.insert(at, item.clone());
    }
    for (j, item) in updates {
        if let Some(slot) = result.get_mut(j) {
            *slot = item.clone();
        }
    }
    result
}

/// Marks the members of one longest strictly increasing subsequence
/// (patience sorting with back-pointers).
fn longest_increasing(values: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; values.len()];

    for (k, &v) in values.iter().enumerate() {
        let pos = tails.partition_point(|&t| values[t] < v);
        if pos > 0 {
            prev[k] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(k);
        } else {
            tails[pos] = k;
        }
    }

    let mut keep = vec![false; values.len()];
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        keep[k] = true;
        cursor = prev[k];
    }
    keep
}
