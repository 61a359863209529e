/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Code-point arithmetic: positions in the instruction stream, and closed
//! intervals of them.

use std::fmt;

/// Length of an interval that spans exactly one instruction.
pub const MINIMAL_INTERVAL: u32 = 2;

/// A position in the instruction stream.
///
/// Each instruction occupies two consecutive points: an even "early" half at
/// which its operands are read, and an odd "late" half at which its results
/// are written.  `CodePoint::MAX` is reserved to mean "no such point".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodePoint(u32);

impl CodePoint {
  /// The reserved "no such point" sentinel.
  pub const MAX: CodePoint = CodePoint(u32::MAX);

  pub fn new(point: u32) -> Self {
    CodePoint(point)
  }

  pub fn repr(self) -> u32 {
    self.0
  }

  /// The read half of this point's instruction.
  pub fn early(self) -> Self {
    CodePoint(self.0 & !1)
  }

  /// The write half of this point's instruction.
  pub fn late(self) -> Self {
    CodePoint(self.0 | 1)
  }

  pub fn is_late(self) -> bool {
    self.0 & 1 != 0
  }

  /// The early half of the following instruction.
  pub fn next_inst(self) -> Self {
    CodePoint(self.early().0 + 2)
  }

  /// The early half of the preceding instruction.
  pub fn prev_inst(self) -> Self {
    CodePoint(self.early().0 - 2)
  }
}

impl fmt::Debug for CodePoint {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if *self == CodePoint::MAX {
      write!(fmt, "p?")
    } else {
      write!(fmt, "p{}", self.0)
    }
  }
}

/// A closed interval of code points.  Ordering is lexicographic on
/// `(low, high)`, which is what the interval index relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
  pub low: CodePoint,
  pub high: CodePoint,
}

impl Interval {
  pub fn new(low: CodePoint, high: CodePoint) -> Self {
    Interval { low, high }
  }

  pub fn overlaps_with(&self, other: &Interval) -> bool {
    self.low <= other.high && self.high >= other.low
  }

  /// True iff this interval spans exactly one instruction.
  pub fn is_minimal(&self) -> bool {
    self.high.0 - self.low.0 == MINIMAL_INTERVAL
  }

  pub fn fully_within(&self, other: &Interval) -> bool {
    other.low <= self.low && other.high >= self.high
  }
}

impl fmt::Debug for Interval {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "[{:?}..{:?}]", self.low, self.high)
  }
}
