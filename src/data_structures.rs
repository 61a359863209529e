/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Core data structures: value types, registers, allocations, live ranges
//! and bundles, the target description, and the result of allocation.

use std::fmt;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::code_point::{CodePoint, Interval};

//=============================================================================
// Typed entity indices
//
// Live ranges and bundles refer to each other through these handles rather
// than through references, so that splitting (which destroys a bundle and
// creates two new ones) can never leave a dangling pointer behind.  A stale
// handle simply fails the table lookup.

/// Implemented by the handle newtypes so `IndexedMap` can mint and sort
/// them.
pub trait EntityIx: Copy + fmt::Debug {
  fn from_raw(raw: u32) -> Self;
  fn raw(self) -> u32;
}

macro_rules! define_index {
  ($Ix:ident, $prefix:expr) => {
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $Ix(u32);

    impl $Ix {
      pub fn invalid() -> Self {
        $Ix(u32::MAX)
      }

      pub fn is_valid(self) -> bool {
        self.0 != u32::MAX
      }
    }

    impl EntityIx for $Ix {
      fn from_raw(raw: u32) -> Self {
        $Ix(raw)
      }

      fn raw(self) -> u32 {
        self.0
      }
    }

    impl fmt::Debug for $Ix {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $prefix, self.0)
      }
    }
  };
}

define_index!(RangeId, "lr");
define_index!(BundleId, "lb");

//=============================================================================
// IndexedMap

/// A map handing out stable integer handles.
///
/// Handles stay valid across insertion and removal of other entries.
/// `extract_all` drains in ascending handle order, which keeps every
/// downstream pass deterministic.
pub struct IndexedMap<Ix, V> {
  map: FxHashMap<u32, V>,
  next: u32,
  ix: PhantomData<Ix>,
}

impl<Ix: EntityIx, V> IndexedMap<Ix, V> {
  pub fn new() -> Self {
    IndexedMap { map: FxHashMap::default(), next: 0, ix: PhantomData }
  }

  pub fn insert(&mut self, value: V) -> Ix {
    let raw = self.next;
    self.next += 1;
    self.map.insert(raw, value);
    Ix::from_raw(raw)
  }

  pub fn contains(&self, ix: Ix) -> bool {
    self.map.contains_key(&ix.raw())
  }

  pub fn get(&self, ix: Ix) -> &V {
    match self.map.get(&ix.raw()) {
      Some(value) => value,
      None => panic!("IndexedMap: stale handle {:?}", ix),
    }
  }

  pub fn get_mut(&mut self, ix: Ix) -> &mut V {
    match self.map.get_mut(&ix.raw()) {
      Some(value) => value,
      None => panic!("IndexedMap: stale handle {:?}", ix),
    }
  }

  pub fn remove(&mut self, ix: Ix) -> Option<V> {
    self.map.remove(&ix.raw())
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  /// Drains the table in ascending handle order.
  pub fn extract_all(&mut self) -> Vec<(Ix, V)> {
    let map = std::mem::take(&mut self.map);
    self.next = 0;
    let mut entries: Vec<(u32, V)> = map.into_iter().collect();
    entries.sort_unstable_by_key(|(raw, _)| *raw);
    entries.into_iter().map(|(raw, value)| (Ix::from_raw(raw), value)).collect()
  }
}

//=============================================================================
// Value types

/// Base kind of the data in a virtual register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Base {
  Void = 0,
  Int = 1,
  Float = 2,
  Ptr = 3,
  Vector = 4,
}

/// Bit-size of a single lane, powers of two from 8 to 1024.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitSize {
  B8 = 0,
  B16 = 1,
  B32 = 2,
  B64 = 3,
  B128 = 4,
  B256 = 5,
  B512 = 6,
  B1024 = 7,
}

/// Lane count, powers of two from 1 to 128.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LaneCount {
  L1 = 0,
  L2 = 1,
  L4 = 2,
  L8 = 3,
  L16 = 4,
  L32 = 5,
  L64 = 6,
  L128 = 7,
}

/// A compact description of the data in a virtual register.
///
/// Packed into 16 bits: base kind in bits 0-2, log2 of the lane bit-size
/// (relative to 8) in bits 3-5, log2 of the lane count in bits 6-8.
/// Equality is bitwise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type(u16);

impl Type {
  pub fn new(base: Base, size: BitSize, lanes: LaneCount) -> Self {
    Type(base as u16 | ((size as u16) << 3) | ((lanes as u16) << 6))
  }

  pub fn scalar(base: Base, size: BitSize) -> Self {
    Type::new(base, size, LaneCount::L1)
  }

  pub fn void() -> Self {
    Type(0)
  }

  pub fn base(self) -> Base {
    match self.0 & 0x7 {
      0 => Base::Void,
      1 => Base::Int,
      2 => Base::Float,
      3 => Base::Ptr,
      4 => Base::Vector,
      b => panic!("Type: invalid base bits {}", b),
    }
  }

  pub fn lane_bits(self) -> usize {
    8 << ((self.0 >> 3) & 0x7)
  }

  pub fn lanes(self) -> usize {
    1 << ((self.0 >> 6) & 0x7)
  }

  /// Total size in bytes, lanes included.
  pub fn size_bytes(self) -> usize {
    (self.lane_bits() / 8) * self.lanes()
  }

  pub fn is_void(self) -> bool {
    self.base() == Base::Void
  }

  pub fn is_int(self) -> bool {
    self.base() == Base::Int
  }

  pub fn is_float(self) -> bool {
    self.base() == Base::Float
  }

  pub fn is_ptr(self) -> bool {
    self.base() == Base::Ptr
  }

  pub fn is_vector(self) -> bool {
    self.base() == Base::Vector
  }

  /// The register class that holds values of this type.  Void values never
  /// reach the allocator; asking for their class is a caller bug.
  pub fn reg_class(self) -> RegClass {
    match self.base() {
      Base::Int | Base::Ptr => RegClass::Int,
      Base::Float => RegClass::Float,
      Base::Vector => RegClass::Vector,
      Base::Void => panic!("Type: no register class for a void value"),
    }
  }
}

impl fmt::Debug for Type {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self.base() {
      Base::Void => write!(fmt, "void"),
      Base::Int => write!(fmt, "i{}", self.lane_bits()),
      Base::Float => write!(fmt, "f{}", self.lane_bits()),
      Base::Ptr => write!(fmt, "ptr"),
      Base::Vector => write!(fmt, "v{}x{}", self.lane_bits(), self.lanes()),
    }
  }
}

//=============================================================================
// Register classes and registers

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RegClass {
  Int = 0,
  Float = 1,
  Vector = 2,
}

pub const NUM_REG_CLASSES: usize = 3;

impl RegClass {
  pub fn rc_to_usize(self) -> usize {
    self as usize
  }

  pub fn rc_from_usize(rc: usize) -> RegClass {
    match rc {
      0 => RegClass::Int,
      1 => RegClass::Float,
      2 => RegClass::Vector,
      _ => panic!("RegClass: invalid class number {}", rc),
    }
  }
}

/// A virtual register: a symbolic storage location in pre-allocation IR.
/// Every live range of one virtual register carries the same type, and so
/// the same register class.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualReg {
  pub index: u32,
  pub ty: Type,
}

impl VirtualReg {
  pub fn new(index: u32, ty: Type) -> Self {
    VirtualReg { index, ty }
  }

  pub fn reg_class(self) -> RegClass {
    self.ty.reg_class()
  }
}

impl fmt::Debug for VirtualReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "v{}:{:?}", self.index, self.ty)
  }
}

/// A physical register in the target ISA.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register {
  pub class: RegClass,
  pub enc: u8,
}

impl Register {
  pub fn new(class: RegClass, enc: u8) -> Self {
    Register { class, enc }
  }
}

impl fmt::Debug for Register {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let prefix = match self.class {
      RegClass::Int => "r",
      RegClass::Float => "f",
      RegClass::Vector => "q",
    };
    write!(fmt, "{}{}", prefix, self.enc)
  }
}

//=============================================================================
// Spill slots and allocations

/// A byte offset into the spill area.  Twelve bits are available; the
/// all-ones value is reserved for "spilled, slot not yet chosen".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpillSlot(u16);

impl SpillSlot {
  pub const INVALID: SpillSlot = SpillSlot(0x0FFF);

  pub fn new(offset: u16) -> Self {
    assert!(offset < 0x0FFF, "spill slot offset {} out of range", offset);
    SpillSlot(offset)
  }

  pub fn get(self) -> u16 {
    self.0
  }

  pub fn is_valid(self) -> bool {
    self.0 != SpillSlot::INVALID.0
  }
}

impl fmt::Debug for SpillSlot {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if self.is_valid() {
      write!(fmt, "S{}", self.0)
    } else {
      write!(fmt, "S?")
    }
  }
}

/// Where a live bundle's value lives.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
  /// No decision yet.
  Null,
  Reg(Register),
  Spill(SpillSlot),
}

impl Allocation {
  pub fn null() -> Self {
    Allocation::Null
  }

  pub fn reg(reg: Register) -> Self {
    Allocation::Reg(reg)
  }

  /// Spilled, slot to be chosen by the post-pass.
  pub fn spill() -> Self {
    Allocation::Spill(SpillSlot::INVALID)
  }

  pub fn spill_at(slot: SpillSlot) -> Self {
    Allocation::Spill(slot)
  }

  pub fn is_null(self) -> bool {
    self == Allocation::Null
  }

  pub fn is_reg(self) -> bool {
    matches!(self, Allocation::Reg(_))
  }

  pub fn is_spill(self) -> bool {
    matches!(self, Allocation::Spill(_))
  }

  pub fn is_unassigned_spill(self) -> bool {
    self == Allocation::Spill(SpillSlot::INVALID)
  }

  pub fn as_reg(self) -> Option<Register> {
    match self {
      Allocation::Reg(reg) => Some(reg),
      _ => None,
    }
  }

  pub fn as_spill(self) -> Option<SpillSlot> {
    match self {
      Allocation::Spill(slot) => Some(slot),
      _ => None,
    }
  }
}

impl fmt::Debug for Allocation {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Allocation::Null => write!(fmt, "none"),
      Allocation::Reg(reg) => write!(fmt, "{:?}", reg),
      Allocation::Spill(slot) => write!(fmt, "{:?}", slot),
    }
  }
}

//=============================================================================
// Live ranges and bundles

/// One contiguous liveness interval for one virtual register.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LiveRange {
  pub start: CodePoint,
  pub end: CodePoint,
  /// Points inside `[start, end]` where the value is read or written,
  /// ascending.
  pub uses: SmallVec<[CodePoint; 4]>,
  /// Eviction weight.  The allocator prefers to evict cheaper ranges.
  pub spill_cost: u32,
  pub vreg: VirtualReg,
  pub(crate) parent: BundleId,
}

impl LiveRange {
  pub fn new(
    vreg: VirtualReg, start: CodePoint, end: CodePoint, uses: &[CodePoint],
    spill_cost: u32,
  ) -> Self {
    LiveRange {
      start,
      end,
      uses: SmallVec::from_slice(uses),
      spill_cost,
      vreg,
      parent: BundleId::invalid(),
    }
  }

  pub fn live_interval(&self) -> Interval {
    Interval::new(self.start, self.end)
  }

  pub fn is_minimal(&self) -> bool {
    self.live_interval().is_minimal()
  }
}

/// A group of non-overlapping live ranges, sorted by start, that share a
/// single allocation decision.
///
/// Bundles hold range handles, not ranges; accessors take the range table
/// as an environment argument.
pub struct LiveBundle {
  pub(crate) ranges: SmallVec<[RangeId; 4]>,
  allocation: Allocation,
}

impl LiveBundle {
  pub(crate) fn new() -> Self {
    LiveBundle { ranges: SmallVec::new(), allocation: Allocation::Null }
  }

  pub fn allocation(&self) -> Allocation {
    self.allocation
  }

  pub(crate) fn set_allocation(&mut self, allocation: Allocation) {
    self.allocation = allocation;
  }

  pub fn num_ranges(&self) -> usize {
    self.ranges.len()
  }

  pub(crate) fn first_range(&self) -> RangeId {
    self.ranges[0]
  }

  pub(crate) fn last_range(&self) -> RangeId {
    self.ranges[self.ranges.len() - 1]
  }

  pub fn start(&self, range_env: &IndexedMap<RangeId, LiveRange>) -> CodePoint {
    range_env.get(self.first_range()).start
  }

  pub fn end(&self, range_env: &IndexedMap<RangeId, LiveRange>) -> CodePoint {
    range_env.get(self.last_range()).end
  }

  /// A bundle is minimal iff it is a single range spanning one instruction.
  /// Minimal bundles can never be split.
  pub fn is_minimal(&self, range_env: &IndexedMap<RangeId, LiveRange>) -> bool {
    self.ranges.len() == 1 && range_env.get(self.ranges[0]).is_minimal()
  }

  /// The part of this bundle lying within `window`: ranges fully inside are
  /// kept by handle, ranges crossing an edge are clamped into fresh
  /// `LiveRange`s (uses outside the clamp dropped), disjoint ranges are
  /// skipped.  `None` iff nothing survives.  The bundle itself is not
  /// modified.
  pub(crate) fn truncated(
    &self, window: Interval, range_env: &IndexedMap<RangeId, LiveRange>,
  ) -> Option<Vec<TruncPart>> {
    let mut parts = Vec::new();
    for &ix in &self.ranges {
      let range = range_env.get(ix);
      let live = range.live_interval();
      if !window.overlaps_with(&live) {
        continue;
      }
      if live.fully_within(&window) {
        parts.push(TruncPart::Keep(ix));
        continue;
      }
      let new_start = range.start.max(window.low);
      let new_end = range.end.min(window.high);
      let mut clamped = range.clone();
      clamped.start = new_start;
      clamped.end = new_end;
      clamped.uses.retain(|u| *u >= new_start && *u <= new_end);
      parts.push(TruncPart::Clamp { replaces: ix, range: clamped });
    }
    if parts.is_empty() {
      None
    } else {
      Some(parts)
    }
  }
}

/// One range's fate under `LiveBundle::truncated`.
pub(crate) enum TruncPart {
  Keep(RangeId),
  Clamp { replaces: RangeId, range: LiveRange },
}

//=============================================================================
// Target description and options

/// The register file: for each class, the allocatable registers in the
/// allocator's preference order.
pub struct TargetISA {
  regs: [Vec<Register>; NUM_REG_CLASSES],
}

impl TargetISA {
  pub fn new() -> Self {
    TargetISA { regs: [Vec::new(), Vec::new(), Vec::new()] }
  }

  pub fn add_reg(&mut self, reg: Register) {
    let file = &mut self.regs[reg.class.rc_to_usize()];
    debug_assert!(!file.contains(&reg), "duplicate register {:?}", reg);
    file.push(reg);
  }

  pub fn regs_in(&self, class: RegClass) -> &[Register] {
    &self.regs[class.rc_to_usize()]
  }
}

impl Default for TargetISA {
  fn default() -> Self {
    TargetISA::new()
  }
}

/// Spill-slot alignment policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotAlignment {
  /// Slots are packed end to end.
  Packed,
  /// Each slot's offset is rounded up to its type's size in bytes.
  TypeAligned,
}

#[derive(Clone, Copy, Debug)]
pub struct AllocatorOptions {
  pub slot_alignment: SlotAlignment,
}

impl Default for AllocatorOptions {
  fn default() -> Self {
    AllocatorOptions { slot_alignment: SlotAlignment::Packed }
  }
}

//=============================================================================
// Errors

/// Errors surfaced by internal bookkeeping.  Well-formed input never
/// produces one; `DuplicateRange` exists so tests can assert on interval
/// index collisions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocError {
  DuplicateRange,
}

impl fmt::Display for AllocError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AllocError::DuplicateRange => write!(fmt, "duplicate live range interval"),
    }
  }
}

impl std::error::Error for AllocError {}

//=============================================================================
// Output

/// A move reconciling two allocations of one virtual register across a
/// split boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Stitch {
  pub vreg: VirtualReg,
  pub from: Allocation,
  pub to: Allocation,
  pub at: CodePoint,
}

/// A live range together with its final allocation.
#[derive(Clone, PartialEq, Debug)]
pub struct RangeAllocation {
  pub range: LiveRange,
  pub allocation: Allocation,
}

/// The result of allocation: every input range with a concrete allocation,
/// in code order, plus the stitches that reconcile splits.
#[derive(Clone, PartialEq, Debug)]
pub struct Output {
  pub allocations: Vec<RangeAllocation>,
  pub stitches: Vec<Stitch>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_sizes() {
    let i32t = Type::scalar(Base::Int, BitSize::B32);
    assert_eq!(i32t.size_bytes(), 4);
    assert_eq!(i32t.lanes(), 1);
    let f64t = Type::scalar(Base::Float, BitSize::B64);
    assert_eq!(f64t.size_bytes(), 8);
    let v4i32 = Type::new(Base::Vector, BitSize::B32, LaneCount::L4);
    assert_eq!(v4i32.size_bytes(), 16);
    assert_eq!(v4i32.lanes(), 4);
  }

  #[test]
  fn type_classification() {
    assert!(Type::void().is_void());
    assert!(Type::scalar(Base::Int, BitSize::B8).is_int());
    assert_eq!(Type::scalar(Base::Ptr, BitSize::B64).reg_class(), RegClass::Int);
    assert_eq!(Type::scalar(Base::Float, BitSize::B32).reg_class(), RegClass::Float);
    assert_eq!(
      Type::new(Base::Vector, BitSize::B8, LaneCount::L16).reg_class(),
      RegClass::Vector
    );
  }

  #[test]
  fn type_equality_is_bitwise() {
    let a = Type::new(Base::Int, BitSize::B32, LaneCount::L1);
    let b = Type::scalar(Base::Int, BitSize::B32);
    assert_eq!(a, b);
    assert_ne!(a, Type::scalar(Base::Int, BitSize::B64));
    assert_ne!(a, Type::new(Base::Int, BitSize::B32, LaneCount::L2));
  }

  #[test]
  fn allocation_accessors() {
    let r0 = Register::new(RegClass::Int, 0);
    assert!(Allocation::null().is_null());
    assert_eq!(Allocation::reg(r0).as_reg(), Some(r0));
    assert!(Allocation::spill().is_unassigned_spill());
    let slot = SpillSlot::new(8);
    assert_eq!(Allocation::spill_at(slot).as_spill(), Some(slot));
    assert_ne!(Allocation::spill(), Allocation::spill_at(slot));
  }

  #[test]
  fn indexed_map_handles_are_stable() {
    let mut map: IndexedMap<RangeId, &str> = IndexedMap::new();
    let a = map.insert("a");
    let b = map.insert("b");
    let c = map.insert("c");
    assert_eq!(map.remove(b), Some("b"));
    assert!(map.contains(a));
    assert!(!map.contains(b));
    assert_eq!(*map.get(c), "c");
  }

  #[test]
  fn indexed_map_extracts_in_handle_order() {
    let mut map: IndexedMap<BundleId, u32> = IndexedMap::new();
    let a = map.insert(10);
    let b = map.insert(20);
    let c = map.insert(30);
    map.remove(b);
    let drained = map.extract_all();
    assert_eq!(drained, vec![(a, 10), (c, 30)]);
    assert!(map.is_empty());
  }

  #[test]
  fn minimal_ranges() {
    let vreg = VirtualReg::new(0, Type::scalar(Base::Int, BitSize::B32));
    let minimal =
      LiveRange::new(vreg, CodePoint::new(4), CodePoint::new(6), &[], 1);
    assert!(minimal.is_minimal());
    let short =
      LiveRange::new(vreg, CodePoint::new(4), CodePoint::new(5), &[], 1);
    assert!(!short.is_minimal());
  }
}
