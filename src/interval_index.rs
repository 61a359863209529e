/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A sorted map from code-point intervals to values, with overlap queries
//! and bulk erase.  The allocator keeps one per register class, holding the
//! currently committed ranges.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::code_point::{CodePoint, Interval};
use crate::data_structures::AllocError;

/// An ordered interval map.
///
/// Several values may share one interval key: two registers of the same
/// class legally hold ranges with identical extents.  Inserting the same
/// (interval, value) pair twice is the caller's bug and reports
/// `DuplicateRange`.
///
/// Not thread-safe; the allocator is single-threaded throughout.
pub struct IntervalIndex<T> {
  map: BTreeMap<Interval, SmallVec<[T; 2]>>,
  len: usize,
}

impl<T: Copy + PartialEq> IntervalIndex<T> {
  pub fn new() -> Self {
    IntervalIndex { map: BTreeMap::new(), len: 0 }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn insert(&mut self, interval: Interval, value: T) -> Result<(), AllocError> {
    let values = self.map.entry(interval).or_default();
    if values.contains(&value) {
      return Err(AllocError::DuplicateRange);
    }
    values.push(value);
    self.len += 1;
    Ok(())
  }

  pub fn contains(&self, interval: Interval, value: T) -> bool {
    self.map.get(&interval).map_or(false, |values| values.contains(&value))
  }

  /// All entries whose key overlaps `interval`, in key order.
  ///
  /// Every key starting at or before the query's end is a candidate; an
  /// overlapping key can hide behind arbitrarily many non-overlapping ones
  /// with larger `low`, so the scan must not stop at the first miss.
  pub fn overlap(&self, interval: Interval) -> impl Iterator<Item = (Interval, T)> + '_ {
    let upper = Interval::new(interval.high, CodePoint::MAX);
    self
      .map
      .range(..=upper)
      .filter(move |(key, _)| key.overlaps_with(&interval))
      .flat_map(|(&key, values)| values.iter().map(move |&v| (key, v)))
  }

  /// Removes the entry for this exact key and value.  Returns whether
  /// anything was removed.
  pub fn remove(&mut self, interval: Interval, value: T) -> bool {
    match self.map.get_mut(&interval) {
      Some(values) => {
        let before = values.len();
        values.retain(|v| *v != value);
        let removed = values.len() != before;
        if removed {
          self.len -= 1;
        }
        if values.is_empty() {
          self.map.remove(&interval);
        }
        removed
      }
      None => false,
    }
  }

  /// Removes every entry overlapping `interval`.
  pub fn erase_intersecting(&mut self, interval: Interval) {
    let upper = Interval::new(interval.high, CodePoint::MAX);
    let doomed: Vec<Interval> = self
      .map
      .range(..=upper)
      .filter(|(key, _)| key.overlaps_with(&interval))
      .map(|(&key, _)| key)
      .collect();
    for key in doomed {
      if let Some(values) = self.map.remove(&key) {
        self.len -= values.len();
      }
    }
  }

  /// Drains the index, yielding values in key order.
  pub fn extract_all(&mut self) -> Vec<T> {
    let map = std::mem::take(&mut self.map);
    self.len = 0;
    map.into_values().flatten().collect()
  }
}
