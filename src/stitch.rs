/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The patch pass that runs after the allocation loop: assigns spill-slot
//! offsets, then discovers the stitches that reconcile allocations across
//! split boundaries.

use log::debug;
use rustc_hash::FxHashMap;

use crate::code_point::CodePoint;
use crate::data_structures::{
  Allocation, AllocatorOptions, BundleId, IndexedMap, LiveBundle, LiveRange,
  Output, RangeAllocation, RangeId, SlotAlignment, SpillSlot, Stitch,
  VirtualReg,
};

/// Drains the surviving bundles into per-range allocations, resolves spill
/// slots, and emits stitches.  The result is in code order.
pub(crate) fn assemble_output(
  bundles: Vec<(BundleId, LiveBundle)>,
  range_env: &mut IndexedMap<RangeId, LiveRange>,
  opts: &AllocatorOptions,
) -> Output {
  let mut items: Vec<RangeAllocation> = Vec::new();
  for (bundle_id, bundle) in bundles {
    let allocation = bundle.allocation();
    debug_assert!(
      !allocation.is_null(),
      "bundle {:?} left the loop unallocated",
      bundle_id
    );
    for ix in bundle.ranges {
      let range = match range_env.remove(ix) {
        Some(range) => range,
        None => panic!("{:?} references dead range {:?}", bundle_id, ix),
      };
      items.push(RangeAllocation { range, allocation });
    }
  }

  items.sort_by(|a, b| {
    (a.range.live_interval(), a.range.vreg)
      .cmp(&(b.range.live_interval(), b.range.vreg))
  });

  // Slots first, so that stitches compare and carry resolved spill slots
  // rather than the unassigned sentinel.
  assign_spill_slots(&mut items, opts);
  let stitches = discover_stitches(&items);

  Output { allocations: items, stitches }
}

/// Walks the ranges in code order handing out stack offsets to spilled
/// ranges.  A virtual register's slot stays associated with it until some
/// other allocation intervenes, so its consecutive spilled ranges land in
/// one slot; concurrent spilled vregs get distinct offsets.
fn assign_spill_slots(items: &mut [RangeAllocation], opts: &AllocatorOptions) {
  let mut slots: FxHashMap<VirtualReg, SpillSlot> = FxHashMap::default();
  let mut next_offset: u32 = 0;

  for item in items.iter_mut() {
    let vreg = item.range.vreg;
    if !item.allocation.is_spill() {
      slots.remove(&vreg);
      continue;
    }
    let slot = match slots.get(&vreg) {
      Some(&slot) => slot,
      None => {
        let size = vreg.ty.size_bytes() as u32;
        if opts.slot_alignment == SlotAlignment::TypeAligned {
          next_offset = (next_offset + size - 1) & !(size - 1);
        }
        assert!(
          next_offset < 0x0FFF,
          "spill area exceeds the 12-bit slot space"
        );
        let slot = SpillSlot::new(next_offset as u16);
        next_offset += size;
        slots.insert(vreg, slot);
        debug!("--   {:?} spills to {:?}", vreg, slot);
        slot
      }
    };
    item.allocation = Allocation::spill_at(slot);
  }
}

/// Emits a stitch at every boundary where consecutive ranges of one virtual
/// register carry different allocations.
fn discover_stitches(items: &[RangeAllocation]) -> Vec<Stitch> {
  let mut last: FxHashMap<VirtualReg, (CodePoint, Allocation)> =
    FxHashMap::default();
  let mut stitches = Vec::new();

  for item in items {
    let vreg = item.range.vreg;
    if let Some(&(prev_end, prev_alloc)) = last.get(&vreg) {
      if prev_alloc != item.allocation {
        let stitch = Stitch {
          vreg,
          from: prev_alloc,
          to: item.allocation,
          at: prev_end.next_inst(),
        };
        debug!("--   stitch {:?}", stitch);
        stitches.push(stitch);
      }
    }
    last.insert(vreg, (item.range.end, item.allocation));
  }
  stitches
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::code_point::Interval;
  use crate::data_structures::{Base, BitSize, RegClass, Register, Type};

  fn p(n: u32) -> CodePoint {
    CodePoint::new(n)
  }

  fn vreg(index: u32) -> VirtualReg {
    VirtualReg::new(index, Type::scalar(Base::Int, BitSize::B32))
  }

  fn item(v: VirtualReg, start: u32, end: u32, allocation: Allocation) -> RangeAllocation {
    RangeAllocation {
      range: LiveRange::new(v, p(start), p(end), &[], 1),
      allocation,
    }
  }

  #[test]
  fn equal_consecutive_allocations_emit_nothing() {
    let r0 = Allocation::reg(Register::new(RegClass::Int, 0));
    let items = vec![item(vreg(0), 0, 3, r0), item(vreg(0), 6, 9, r0)];
    assert!(discover_stitches(&items).is_empty());
  }

  #[test]
  fn changed_allocation_emits_one_stitch_at_the_boundary() {
    let r0 = Allocation::reg(Register::new(RegClass::Int, 0));
    let r1 = Allocation::reg(Register::new(RegClass::Int, 1));
    let items = vec![item(vreg(0), 0, 3, r0), item(vreg(0), 4, 9, r1)];
    let stitches = discover_stitches(&items);
    assert_eq!(
      stitches,
      vec![Stitch { vreg: vreg(0), from: r0, to: r1, at: p(4) }]
    );
  }

  #[test]
  fn distinct_vregs_never_stitch() {
    let r0 = Allocation::reg(Register::new(RegClass::Int, 0));
    let r1 = Allocation::reg(Register::new(RegClass::Int, 1));
    let items = vec![item(vreg(0), 0, 3, r0), item(vreg(1), 4, 9, r1)];
    assert!(discover_stitches(&items).is_empty());
  }

  #[test]
  fn spill_slots_are_reused_until_another_allocation_intervenes() {
    let r0 = Allocation::reg(Register::new(RegClass::Int, 0));
    let mut items = vec![
      item(vreg(0), 0, 3, Allocation::spill()),
      item(vreg(0), 6, 9, Allocation::spill()),
      item(vreg(0), 10, 11, r0),
      item(vreg(0), 14, 15, Allocation::spill()),
    ];
    assign_spill_slots(&mut items, &AllocatorOptions::default());
    let s0 = Allocation::spill_at(SpillSlot::new(0));
    assert_eq!(items[0].allocation, s0);
    assert_eq!(items[1].allocation, s0);
    assert_eq!(items[2].allocation, r0);
    // The register allocation in between retired the old slot.
    assert_eq!(items[3].allocation, Allocation::spill_at(SpillSlot::new(4)));
  }

  #[test]
  fn concurrent_spilled_vregs_get_distinct_offsets() {
    let mut items = vec![
      item(vreg(0), 0, 9, Allocation::spill()),
      item(vreg(1), 2, 7, Allocation::spill()),
    ];
    assign_spill_slots(&mut items, &AllocatorOptions::default());
    assert_eq!(items[0].allocation, Allocation::spill_at(SpillSlot::new(0)));
    assert_eq!(items[1].allocation, Allocation::spill_at(SpillSlot::new(4)));
  }

  #[test]
  fn type_aligned_slots_round_up() {
    let i8_vreg = VirtualReg::new(0, Type::scalar(Base::Int, BitSize::B8));
    let f64_vreg = VirtualReg::new(1, Type::scalar(Base::Float, BitSize::B64));
    let mut items = vec![
      item(i8_vreg, 0, 9, Allocation::spill()),
      item(f64_vreg, 2, 7, Allocation::spill()),
    ];
    let opts = AllocatorOptions { slot_alignment: SlotAlignment::TypeAligned };
    assign_spill_slots(&mut items, &opts);
    assert_eq!(items[0].allocation, Allocation::spill_at(SpillSlot::new(0)));
    assert_eq!(items[1].allocation, Allocation::spill_at(SpillSlot::new(8)));
  }

  #[test]
  fn interval_sort_keys_are_lexicographic() {
    // The assembly sort relies on Interval's (low, high) ordering.
    assert!(Interval::new(p(0), p(1)) < Interval::new(p(0), p(9)));
    assert!(Interval::new(p(0), p(9)) < Interval::new(p(2), p(3)));
  }
}
