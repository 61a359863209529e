/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Core of the second-chance allocator: the two-phase priority loop,
//! interference discovery, eviction, and live-bundle splitting.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use log::{debug, trace};
use smallvec::SmallVec;

use crate::code_point::{CodePoint, Interval};
use crate::data_structures::{
  Allocation, AllocatorOptions, BundleId, IndexedMap, LiveBundle, LiveRange,
  Output, RangeId, RegClass, Register, TargetISA, TruncPart, NUM_REG_CLASSES,
};
use crate::interval_index::IntervalIndex;
use crate::stitch::assemble_output;

//=============================================================================
// Priority queues

/// Higher spill cost pops first; equal costs pop in insertion order.
#[derive(Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
  cost: u32,
  seq: u64,
  id: RangeId,
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    self.cost.cmp(&other.cost).then(other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Outcome of one assignment attempt.
enum Attempt {
  Assigned(Register),
  /// The bundle was split; the popped range no longer exists and its
  /// children have been re-queued.
  Split,
  /// No register, no profitable eviction, no viable split.
  Exhausted,
}

//=============================================================================
// Allocator top level

/// The allocator.  Seed it with `add_bundle`, then call `run`.
pub struct Allocator {
  isa: TargetISA,
  opts: AllocatorOptions,
  ranges: IndexedMap<RangeId, LiveRange>,
  bundles: IndexedMap<BundleId, LiveBundle>,
  /// Per register class, the intervals of every range whose bundle
  /// currently holds a register.
  committed: [IntervalIndex<RangeId>; NUM_REG_CLASSES],
  pending: BinaryHeap<QueueEntry>,
  second_chance: BinaryHeap<QueueEntry>,
  next_seq: u64,
}

impl Allocator {
  pub fn new(isa: TargetISA) -> Self {
    Allocator::with_options(isa, AllocatorOptions::default())
  }

  pub fn with_options(isa: TargetISA, opts: AllocatorOptions) -> Self {
    Allocator {
      isa,
      opts,
      ranges: IndexedMap::new(),
      bundles: IndexedMap::new(),
      committed: [IntervalIndex::new(), IntervalIndex::new(), IntervalIndex::new()],
      pending: BinaryHeap::new(),
      second_chance: BinaryHeap::new(),
      next_seq: 0,
    }
  }

  /// Registers one live bundle and queues its ranges for assignment.
  ///
  /// The ranges must be sorted by start and pairwise disjoint; every use
  /// must lie within its range.  Violations are caller bugs and panic.
  pub fn add_bundle(&mut self, ranges: Vec<LiveRange>) -> BundleId {
    assert!(!ranges.is_empty(), "a live bundle must contain at least one range");
    for pair in ranges.windows(2) {
      assert!(
        pair[0].end < pair[1].start,
        "bundle ranges must be sorted by start and disjoint"
      );
    }
    for range in &ranges {
      assert!(range.start <= range.end, "live range ends before it starts");
      assert!(
        range.uses.iter().all(|u| *u >= range.start && *u <= range.end),
        "use outside its live range"
      );
      assert!(
        range.uses.windows(2).all(|w| w[0] <= w[1]),
        "uses must be sorted ascending"
      );
      assert!(
        !self.isa.regs_in(range.vreg.reg_class()).is_empty(),
        "no registers declared for class {:?}",
        range.vreg.reg_class()
      );
    }

    let bundle_id = self.bundles.insert(LiveBundle::new());
    let mut ids: SmallVec<[RangeId; 4]> = SmallVec::new();
    for mut range in ranges {
      range.parent = bundle_id;
      let cost = range.spill_cost;
      let id = self.ranges.insert(range);
      ids.push(id);
      self.push_pending(id, cost);
    }
    self.bundles.get_mut(bundle_id).ranges = ids;
    bundle_id
  }

  /// Runs the allocator to completion.  Every input range comes back with a
  /// concrete allocation; exhaustion is resolved by spilling, never
  /// reported.
  pub fn run(mut self) -> Output {
    debug!("-- MAIN ALLOCATION LOOP:");
    loop {
      self.phase_one();
      self.phase_two();
      // A split during phase 2 re-queues children onto `pending`; they must
      // be processed before the assignment is total.
      if self.pending.is_empty() && self.second_chance.is_empty() {
        break;
      }
    }
    debug!("-- allocation done, patching live ranges");
    let bundles = self.bundles.extract_all();
    assemble_output(bundles, &mut self.ranges, &self.opts)
  }

  fn push_pending(&mut self, id: RangeId, cost: u32) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.pending.push(QueueEntry { cost, seq, id });
  }

  fn push_second_chance(&mut self, id: RangeId, cost: u32) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.second_chance.push(QueueEntry { cost, seq, id });
  }

  fn phase_one(&mut self) {
    while let Some(entry) = self.pending.pop() {
      if !self.is_live_entry(entry.id) {
        continue;
      }
      match self.run_once(entry.id) {
        Attempt::Assigned(reg) => self.commit(entry.id, reg),
        Attempt::Split => {}
        Attempt::Exhausted => {
          debug!("--   second chance for {:?}", entry.id);
          self.push_second_chance(entry.id, entry.cost);
        }
      }
    }
  }

  fn phase_two(&mut self) {
    while let Some(entry) = self.second_chance.pop() {
      if !self.is_live_entry(entry.id) {
        continue;
      }
      match self.run_once(entry.id) {
        Attempt::Assigned(reg) => self.commit(entry.id, reg),
        Attempt::Split => {}
        Attempt::Exhausted => {
          let parent = self.ranges.get(entry.id).parent;
          debug!("--   spill {:?}", parent);
          self.bundles.get_mut(parent).set_allocation(Allocation::spill());
        }
      }
    }
  }

  /// Queue entries go stale: a split drops replaced ranges, eviction
  /// re-queues ranges that may since have been committed again, and a
  /// phase-2 failure finalizes a whole bundle at once.
  fn is_live_entry(&self, id: RangeId) -> bool {
    if !self.ranges.contains(id) {
      return false;
    }
    let range = self.ranges.get(id);
    match self.bundles.get(range.parent).allocation() {
      Allocation::Null => true,
      Allocation::Spill(_) => false,
      Allocation::Reg(_) => {
        let rc = range.vreg.reg_class().rc_to_usize();
        !self.committed[rc].contains(range.live_interval(), id)
      }
    }
  }

  fn commit(&mut self, id: RangeId, reg: Register) {
    let (interval, parent, class) = {
      let range = self.ranges.get(id);
      (range.live_interval(), range.parent, range.vreg.reg_class())
    };
    debug_assert!(reg.class == class, "register class mismatch for {:?}", id);
    self.bundles.get_mut(parent).set_allocation(Allocation::reg(reg));
    if let Err(err) = self.committed[class.rc_to_usize()].insert(interval, id) {
      panic!("committing {:?} at {:?}: {}", id, interval, err);
    }
    debug!("--   assigned {:?} to {:?}", id, reg);
  }

  /// One assignment attempt for `id`: direct assignment, then eviction,
  /// then splitting.
  fn run_once(&mut self, id: RangeId) -> Attempt {
    let (interval, class) = {
      let range = self.ranges.get(id);
      debug!(
        "-- considering        {:?}:  {:?} {:?} cost {}",
        id,
        range.vreg,
        range.live_interval(),
        range.spill_cost
      );
      (range.live_interval(), range.vreg.reg_class())
    };

    let interferences: Vec<RangeId> = self.committed[class.rc_to_usize()]
      .overlap(interval)
      .map(|(_, ix)| ix)
      .collect();
    trace!("--   interferences: {:?}", interferences);

    if let Some(reg) = self.try_assign_might_evict(id, &interferences) {
      return Attempt::Assigned(reg);
    }

    match self.find_split_spot(id, &interferences) {
      Some(at) if self.try_split(id, at) => Attempt::Split,
      _ => Attempt::Exhausted,
    }
  }

  /// The first register of `class`, in ISA preference order, not held by
  /// any interferer whose bundle currently owns a register.
  fn get_unused_preg(
    &self, class: RegClass, interferences: &[RangeId],
  ) -> Option<Register> {
    let file = self.isa.regs_in(class);
    let mut used = vec![false; file.len()];
    for &ix in interferences {
      let parent = self.ranges.get(ix).parent;
      if let Some(reg) = self.bundles.get(parent).allocation().as_reg() {
        if let Some(pos) = file.iter().position(|r| *r == reg) {
          used[pos] = true;
        }
      }
    }
    file.iter().zip(&used).find(|(_, used)| !**used).map(|(reg, _)| *reg)
  }

  /// Per register, the total spill cost of the interferers holding it.
  /// The map is ordered, so ties later resolve to the lowest-encoded
  /// register.
  fn calculate_eviction_costs(
    &self, interferences: &[RangeId],
  ) -> BTreeMap<Register, u64> {
    let mut costs = BTreeMap::new();
    for &ix in interferences {
      let range = self.ranges.get(ix);
      if let Some(reg) = self.bundles.get(range.parent).allocation().as_reg() {
        *costs.entry(reg).or_insert(0u64) += u64::from(range.spill_cost);
      }
    }
    costs
  }

  /// Assigns a free register if there is one; otherwise evicts the cheapest
  /// register's holders when that is strictly cheaper than spilling `id`.
  fn try_assign_might_evict(
    &mut self, id: RangeId, interferences: &[RangeId],
  ) -> Option<Register> {
    let (class, cost) = {
      let range = self.ranges.get(id);
      (range.vreg.reg_class(), range.spill_cost)
    };

    if let Some(reg) = self.get_unused_preg(class, interferences) {
      return Some(reg);
    }

    let mut best: Option<(Register, u64)> = None;
    for (reg, total) in self.calculate_eviction_costs(interferences) {
      match best {
        Some((_, best_total)) if best_total <= total => {}
        _ => best = Some((reg, total)),
      }
    }
    let (reg, total) = best?;

    if total < u64::from(cost) {
      debug!("--   evict holders of {:?} (cost {} < {})", reg, total, cost);
      self.evict_for(reg, interferences);
      Some(reg)
    } else {
      None
    }
  }

  /// Clears `reg` by evicting every bundle an interferer maps to it: the
  /// bundle's ranges leave the index, its allocation reverts to null, and
  /// every one of its ranges is re-queued for a second chance.
  fn evict_for(&mut self, reg: Register, interferences: &[RangeId]) {
    let mut victims: Vec<BundleId> = interferences
      .iter()
      .map(|&ix| self.ranges.get(ix).parent)
      .filter(|&parent| {
        self.bundles.get(parent).allocation() == Allocation::reg(reg)
      })
      .collect();
    victims.sort_unstable();
    victims.dedup();

    let rc = reg.class.rc_to_usize();
    for bundle_id in victims {
      debug!("--   evict            {:?}", bundle_id);
      let ids = self.bundles.get(bundle_id).ranges.clone();
      for ix in ids {
        let (interval, cost) = {
          let range = self.ranges.get(ix);
          (range.live_interval(), range.spill_cost)
        };
        self.committed[rc].remove(interval, ix);
        self.push_second_chance(ix, cost);
      }
      self.bundles.get_mut(bundle_id).set_allocation(Allocation::null());
    }
  }

  /// The earliest point at which some interference begins inside the range,
  /// or a fallback just past the range's start when interference begins at
  /// or before it.  `None` when there is no interference at all.
  fn find_split_spot(
    &self, id: RangeId, interferences: &[RangeId],
  ) -> Option<CodePoint> {
    let range = self.ranges.get(id);
    let mut initial = CodePoint::MAX;
    for &ix in interferences {
      let start = self.ranges.get(ix).start;
      initial = initial.min(start.max(range.start));
    }
    if initial == CodePoint::MAX {
      return None;
    }
    if initial != range.start {
      return Some(initial);
    }
    match range.uses.first() {
      None => Some(range.start.next_inst()),
      Some(&first) if first == range.start || first == range.end => {
        Some(range.start.next_inst())
      }
      Some(&first) => Some(first),
    }
  }

  /// Splits `id`'s bundle at `at`: the left child ends just before `at`,
  /// the right child starts there.  Returns false, with no mutation, when
  /// the bundle is minimal or either side would be empty.
  fn try_split(&mut self, id: RangeId, at: CodePoint) -> bool {
    // Splits happen at instruction granularity.  A late split point would
    // leave the early half of its instruction in neither child.
    let at = at.early();

    let bundle_id = self.ranges.get(id).parent;
    let bundle = self.bundles.get(bundle_id);
    if bundle.is_minimal(&self.ranges) {
      return false;
    }
    let bundle_start = bundle.start(&self.ranges);
    let bundle_end = bundle.end(&self.ranges);
    if at <= bundle_start {
      return false;
    }

    let left_window = Interval::new(bundle_start, at.prev_inst().late());
    let right_window = Interval::new(at, bundle_end);
    let left = bundle.truncated(left_window, &self.ranges);
    let right = bundle.truncated(right_window, &self.ranges);
    let (left, right) = match (left, right) {
      (Some(left), Some(right)) => (left, right),
      _ => return false,
    };

    debug!("--   split            {:?} at {:?}", bundle_id, at);

    let num_before = bundle.num_ranges();
    let boundary_created = left.len() + right.len() != num_before;
    let allocation = bundle.allocation();

    self.bundles.remove(bundle_id);
    let mut replaced: Vec<RangeId> = Vec::new();
    let left_id = self.intern_child(left, allocation, &mut replaced);
    let right_id = self.intern_child(right, allocation, &mut replaced);

    // Drop the originals that were clamped away, from the range table and
    // from the committed index alike.
    replaced.sort_unstable();
    replaced.dedup();
    for ix in replaced {
      if let Some(range) = self.ranges.remove(ix) {
        let rc = range.vreg.reg_class().rc_to_usize();
        self.committed[rc].remove(range.live_interval(), ix);
      }
    }

    if boundary_created {
      // The cut went through a range; the two halves flanking it have new
      // boundaries and need attention.
      let last_of_left = self.bundles.get(left_id).last_range();
      let first_of_right = self.bundles.get(right_id).first_range();
      let cost = self.ranges.get(last_of_left).spill_cost;
      self.push_pending(last_of_left, cost);
      let cost = self.ranges.get(first_of_right).spill_cost;
      self.push_pending(first_of_right, cost);
    }
    true
  }

  fn intern_child(
    &mut self, parts: Vec<TruncPart>, allocation: Allocation,
    replaced: &mut Vec<RangeId>,
  ) -> BundleId {
    let bundle_id = self.bundles.insert(LiveBundle::new());
    let mut ids: SmallVec<[RangeId; 4]> = SmallVec::new();
    for part in parts {
      let ix = match part {
        TruncPart::Keep(ix) => ix,
        TruncPart::Clamp { replaces, mut range } => {
          replaced.push(replaces);
          range.parent = bundle_id;
          self.ranges.insert(range)
        }
      };
      self.ranges.get_mut(ix).parent = bundle_id;
      ids.push(ix);
    }
    let bundle = self.bundles.get_mut(bundle_id);
    bundle.ranges = ids;
    bundle.set_allocation(allocation);
    bundle_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data_structures::{Base, BitSize, Type, VirtualReg};

  fn isa_int(n: u8) -> TargetISA {
    let mut isa = TargetISA::new();
    for enc in 0..n {
      isa.add_reg(Register::new(RegClass::Int, enc));
    }
    isa
  }

  fn vreg(index: u32) -> VirtualReg {
    VirtualReg::new(index, Type::scalar(Base::Int, BitSize::B32))
  }

  fn p(n: u32) -> CodePoint {
    CodePoint::new(n)
  }

  fn range(v: VirtualReg, start: u32, end: u32, uses: &[u32], cost: u32) -> LiveRange {
    let uses: Vec<CodePoint> = uses.iter().map(|&u| p(u)).collect();
    LiveRange::new(v, p(start), p(end), &uses, cost)
  }

  fn sole_range(a: &Allocator, b: BundleId) -> RangeId {
    a.bundles.get(b).first_range()
  }

  #[test]
  fn unused_preg_search_follows_isa_order() {
    let mut a = Allocator::new(isa_int(2));
    let b = a.add_bundle(vec![range(vreg(0), 0, 5, &[], 1)]);
    let id = sole_range(&a, b);
    assert_eq!(
      a.get_unused_preg(RegClass::Int, &[]),
      Some(Register::new(RegClass::Int, 0))
    );
    a.commit(id, Register::new(RegClass::Int, 0));
    assert_eq!(
      a.get_unused_preg(RegClass::Int, &[id]),
      Some(Register::new(RegClass::Int, 1))
    );
  }

  #[test]
  fn no_unused_preg_when_all_held() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![range(vreg(0), 0, 5, &[], 1)]);
    let id = sole_range(&a, b);
    a.commit(id, Register::new(RegClass::Int, 0));
    assert_eq!(a.get_unused_preg(RegClass::Int, &[id]), None);
  }

  #[test]
  fn eviction_clears_the_cheaper_holder() {
    let mut a = Allocator::new(isa_int(1));
    let cheap = a.add_bundle(vec![range(vreg(0), 2, 5, &[], 1)]);
    let cheap_id = sole_range(&a, cheap);
    a.commit(cheap_id, Register::new(RegClass::Int, 0));

    let pricey = a.add_bundle(vec![range(vreg(1), 0, 9, &[], 10)]);
    let pricey_id = sole_range(&a, pricey);
    match a.run_once(pricey_id) {
      Attempt::Assigned(reg) => assert_eq!(reg, Register::new(RegClass::Int, 0)),
      _ => panic!("expected assignment by eviction"),
    }

    assert!(a.bundles.get(cheap).allocation().is_null());
    assert!(!a.committed[0].contains(Interval::new(p(2), p(5)), cheap_id));
    assert!(a.second_chance.iter().any(|entry| entry.id == cheap_id));
  }

  #[test]
  fn eviction_refused_when_not_strictly_cheaper() {
    let mut a = Allocator::new(isa_int(1));
    let holder = a.add_bundle(vec![range(vreg(0), 2, 5, &[], 7)]);
    let holder_id = sole_range(&a, holder);
    a.commit(holder_id, Register::new(RegClass::Int, 0));

    let other = a.add_bundle(vec![range(vreg(1), 0, 9, &[], 7)]);
    let other_id = sole_range(&a, other);
    assert!(a.try_assign_might_evict(other_id, &[holder_id]).is_none());
    assert!(a.bundles.get(holder).allocation().is_reg());
  }

  #[test]
  fn eviction_cost_ties_resolve_to_lowest_encoding() {
    let mut a = Allocator::new(isa_int(2));
    let on_r1 = a.add_bundle(vec![range(vreg(0), 0, 9, &[], 3)]);
    let on_r1_id = sole_range(&a, on_r1);
    a.commit(on_r1_id, Register::new(RegClass::Int, 1));
    let on_r0 = a.add_bundle(vec![range(vreg(1), 0, 9, &[], 3)]);
    let on_r0_id = sole_range(&a, on_r0);
    a.commit(on_r0_id, Register::new(RegClass::Int, 0));

    let pricey = a.add_bundle(vec![range(vreg(2), 0, 9, &[], 10)]);
    let pricey_id = sole_range(&a, pricey);
    let reg = a
      .try_assign_might_evict(pricey_id, &[on_r1_id, on_r0_id])
      .expect("eviction should succeed");
    assert_eq!(reg, Register::new(RegClass::Int, 0));
  }

  #[test]
  fn split_spot_is_the_first_interference_point() {
    let mut a = Allocator::new(isa_int(1));
    let main = a.add_bundle(vec![range(vreg(0), 0, 9, &[], 5)]);
    let main_id = sole_range(&a, main);
    let other = a.add_bundle(vec![range(vreg(1), 4, 5, &[], 1)]);
    let other_id = sole_range(&a, other);
    assert_eq!(a.find_split_spot(main_id, &[other_id]), Some(p(4)));
    assert_eq!(a.find_split_spot(main_id, &[]), None);
  }

  #[test]
  fn split_spot_fallbacks_when_interference_reaches_the_start() {
    let mut a = Allocator::new(isa_int(1));
    let cover = a.add_bundle(vec![range(vreg(9), 0, 19, &[], 1)]);
    let cover_id = sole_range(&a, cover);

    let no_uses = a.add_bundle(vec![range(vreg(0), 4, 9, &[], 5)]);
    assert_eq!(
      a.find_split_spot(sole_range(&a, no_uses), &[cover_id]),
      Some(p(6))
    );

    let use_at_start = a.add_bundle(vec![range(vreg(1), 4, 9, &[4], 5)]);
    assert_eq!(
      a.find_split_spot(sole_range(&a, use_at_start), &[cover_id]),
      Some(p(6))
    );

    let use_at_end = a.add_bundle(vec![range(vreg(2), 4, 9, &[9], 5)]);
    assert_eq!(
      a.find_split_spot(sole_range(&a, use_at_end), &[cover_id]),
      Some(p(6))
    );

    let interior_use = a.add_bundle(vec![range(vreg(3), 4, 9, &[8], 5)]);
    assert_eq!(
      a.find_split_spot(sole_range(&a, interior_use), &[cover_id]),
      Some(p(8))
    );
  }

  #[test]
  fn split_distributes_ranges_and_uses() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![range(vreg(0), 0, 9, &[0, 3, 5, 9], 5)]);
    let id = sole_range(&a, b);
    assert!(a.try_split(id, p(4)));

    assert!(!a.ranges.contains(id));
    assert!(!a.bundles.contains(b));

    let mut survivors: Vec<LiveRange> = Vec::new();
    for (_, bundle) in a.bundles.extract_all() {
      for ix in bundle.ranges {
        survivors.push(a.ranges.get(ix).clone());
      }
    }
    survivors.sort_by_key(|r| r.start);
    assert_eq!(survivors.len(), 2);
    assert_eq!(survivors[0].live_interval(), Interval::new(p(0), p(3)));
    assert_eq!(survivors[0].uses.as_slice(), &[p(0), p(3)]);
    assert_eq!(survivors[1].live_interval(), Interval::new(p(4), p(9)));
    assert_eq!(survivors[1].uses.as_slice(), &[p(5), p(9)]);
    assert_ne!(survivors[0].parent, survivors[1].parent);
  }

  #[test]
  fn split_requeues_the_ranges_flanking_the_cut() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![range(vreg(0), 0, 9, &[], 5)]);
    let id = sole_range(&a, b);
    assert!(a.try_split(id, p(4)));
    let live_queued: Vec<RangeId> = a
      .pending
      .iter()
      .map(|entry| entry.id)
      .filter(|&ix| a.ranges.contains(ix))
      .collect();
    assert_eq!(live_queued.len(), 2);
  }

  #[test]
  fn minimal_bundle_split_fails_without_mutation() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![range(vreg(0), 0, 2, &[0], 5)]);
    let id = sole_range(&a, b);
    assert!(!a.try_split(id, p(2)));
    assert!(a.ranges.contains(id));
    assert!(a.bundles.contains(b));
    assert_eq!(a.bundles.get(b).num_ranges(), 1);
    assert_eq!(a.ranges.get(id).parent, b);
  }

  #[test]
  fn split_with_an_empty_side_fails_without_mutation() {
    let mut a = Allocator::new(isa_int(1));
    // Not minimal, but a cut past the end leaves the right side empty.
    let b = a.add_bundle(vec![range(vreg(0), 4, 5, &[], 5)]);
    let id = sole_range(&a, b);
    assert!(!a.try_split(id, p(6)));
    assert!(a.ranges.contains(id));
    assert!(a.bundles.contains(b));
  }

  #[test]
  fn split_in_a_gap_keeps_every_range() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![
      range(vreg(0), 0, 3, &[1], 5),
      range(vreg(0), 8, 11, &[9], 5),
    ]);
    let first = a.bundles.get(b).first_range();
    let last = a.bundles.get(b).last_range();
    assert!(a.try_split(first, p(6)));
    // Both ranges survive under new parents, unclamped.
    assert!(a.ranges.contains(first));
    assert!(a.ranges.contains(last));
    assert_eq!(a.ranges.get(first).live_interval(), Interval::new(p(0), p(3)));
    assert_eq!(a.ranges.get(last).live_interval(), Interval::new(p(8), p(11)));
    assert_ne!(a.ranges.get(first).parent, a.ranges.get(last).parent);
  }

  #[test]
  fn truncation_keeps_clamps_and_skips() {
    let mut a = Allocator::new(isa_int(1));
    let b = a.add_bundle(vec![
      range(vreg(0), 0, 3, &[1], 5),
      range(vreg(0), 6, 9, &[7, 9], 5),
    ]);
    let bundle = a.bundles.get(b);

    let parts = bundle
      .truncated(Interval::new(p(2), p(7)), &a.ranges)
      .expect("window covers both ranges");
    assert_eq!(parts.len(), 2);
    match &parts[0] {
      TruncPart::Clamp { range, .. } => {
        assert_eq!(range.live_interval(), Interval::new(p(2), p(3)));
        assert!(range.uses.is_empty());
      }
      TruncPart::Keep(_) => panic!("left range crosses the window edge"),
    }
    match &parts[1] {
      TruncPart::Clamp { range, .. } => {
        assert_eq!(range.live_interval(), Interval::new(p(6), p(7)));
        assert_eq!(range.uses.as_slice(), &[p(7)]);
      }
      TruncPart::Keep(_) => panic!("right range crosses the window edge"),
    }

    assert!(bundle.truncated(Interval::new(p(4), p(5)), &a.ranges).is_none());
  }
}
