/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A linear-scan register allocator with a second-chance queue.
//!
//! Input is liveness information for one routine: a set of live bundles,
//! each grouping live ranges that must share an allocation.  The allocator
//! assigns every range to a physical register or a spill slot, splitting
//! and evicting bundles along the way, and emits the stitches (moves) that
//! reconcile allocations across split boundaries.
//!
//! The pipeline is `bundles -> allocation loop -> spill slots -> stitches
//! -> output`; see `Allocator::run`.

pub mod allocator;
pub mod code_point;
pub mod data_structures;
pub mod interval_index;
mod stitch;

pub use crate::allocator::Allocator;
pub use crate::code_point::{CodePoint, Interval, MINIMAL_INTERVAL};
pub use crate::data_structures::{
  AllocError, Allocation, AllocatorOptions, Base, BitSize, BundleId,
  LaneCount, LiveBundle, LiveRange, Output, RangeAllocation, RangeId,
  RegClass, Register, SlotAlignment, SpillSlot, Stitch, TargetISA, Type,
  VirtualReg, NUM_REG_CLASSES,
};
pub use crate::interval_index::IntervalIndex;
