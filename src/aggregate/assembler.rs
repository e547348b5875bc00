//! Stripe assembler: folds the per-akey stream of visible data extents
//! (sorted by start offset) into per-stripe snapshots, cf. spec.md §4.2.
//!
//! The assembler is pure bookkeeping; it never touches the store or the
//! network. Each call to [`AkeyState::observe`] may hand back zero, one, or
//! two finished [`AssembledStripe`]s for the driver to classify, encode and
//! commit — "two" only when a carry-over extent alone fills an entire
//! intermediate stripe that nothing else touches (the "held-over stripe"
//! case).

use smallvec::SmallVec;

use crate::ec_class::EcClass;
use crate::types::Epoch;

use super::state::{AkeyState, DataExtent};

/// A stripe's worth of assembled extent state, ready for the parity probe,
/// classifier, codec and committer, cf. spec.md §4.1-4.2.
#[derive(Debug, Clone)]
pub struct AssembledStripe {
    pub stripe_num: u64,
    pub hi_epoch: Epoch,
    pub data_extents: Vec<DataExtent>,
    pub stripe_fill: u64,
    pub offset: u64,
    pub has_holes: bool,
}

impl AssembledStripe {
    pub fn is_empty(&self) -> bool {
        self.data_extents.is_empty()
    }
}

impl AkeyState {
    /// Feed one incoming extent into the assembler. Returns the stripes that
    /// are now finished and ready for processing, in traversal order.
    pub fn observe(
        &mut self,
        entry: DataExtent,
        class: &EcClass,
    ) -> SmallVec<[AssembledStripe; 2]> {
        let stripe_records = class.stripe_records();
        let mut finished: SmallVec<[AssembledStripe; 2]> = SmallVec::new();
        let this_stripe = entry.recx.stripe_of(stripe_records);

        if this_stripe != self.cur_stripe_num {
            if !self.is_empty() {
                finished.push(self.finish_and_advance(stripe_records));
            }
            if self.cur_stripe_num != this_stripe {
                if !self.is_empty() {
                    // The carry-over seeded an intermediate stripe that
                    // nothing else touches; it is its own, second finished
                    // stripe.
                    finished.push(self.finish_and_advance_to(this_stripe, stripe_records));
                } else {
                    // Nothing carried into the gap between the stripe just
                    // finished and `this_stripe`: jump straight there. No
                    // snapshot is emitted for the untouched stripes in
                    // between — there is nothing in them to process.
                    self.reset_for_stripe(this_stripe);
                }
            }
        }

        self.append(entry, stripe_records);
        finished
    }

    /// Snapshot the current stripe, then advance to `cur_stripe_num + 1`,
    /// seeding it with any carry-over suffix.
    fn finish_and_advance(&mut self, stripe_records: u64) -> AssembledStripe {
        let next = self.cur_stripe_num + 1;
        self.finish_and_advance_to(next, stripe_records)
    }

    fn finish_and_advance_to(&mut self, next_stripe_num: u64, stripe_records: u64) -> AssembledStripe {
        let snapshot = AssembledStripe {
            stripe_num: self.cur_stripe_num,
            hi_epoch: self.hi_epoch,
            data_extents: std::mem::take(&mut self.data_extents),
            stripe_fill: self.stripe_fill,
            offset: self.offset,
            has_holes: self.has_holes,
        };

        self.cur_stripe_num = next_stripe_num;
        self.hi_epoch = 0;
        self.stripe_fill = 0;
        self.offset = 0;
        self.has_holes = false;
        self.parity_probe = super::state::ParityProbe::Absent;

        if let Some(carry) = self.pending_carry.take() {
            self.append(carry, stripe_records);
        }

        snapshot
    }

    /// Append one (already stripe-local) extent to the stripe currently being
    /// assembled, splitting it at the trailing boundary if it crosses, and
    /// migrating the trimmed-but-not-yet-terminal piece into
    /// `hold_over_extents`, cf. spec.md §4.2.
    fn append(&mut self, mut entry: DataExtent, stripe_records: u64) {
        let boundary = (self.cur_stripe_num + 1) * stripe_records;

        if entry.recx.end() > boundary {
            let (prefix, suffix) = entry.recx.split_at(boundary);
            let suffix_extent = DataExtent {
                recx: suffix,
                orig_recx: entry.orig_recx,
                epoch: entry.epoch,
                is_hole: entry.is_hole,
            };
            debug_assert!(self.pending_carry.is_none(), "at most one extent may cross a boundary at a time");
            self.pending_carry = Some(suffix_extent);
            entry.recx = prefix;
        }

        let is_first = self.data_extents.is_empty();
        if is_first {
            self.offset = entry.recx.start;
        }
        if entry.is_hole {
            self.has_holes = true;
        } else {
            self.stripe_fill += entry.recx.len;
        }
        self.hi_epoch = self.hi_epoch.max(entry.epoch);

        if entry.orig_recx.end() > boundary && entry.recx.end() <= boundary {
            self.hold_over_extents.push(entry.clone());
        }

        self.data_extents.push(entry);
    }

    /// Flush whatever is currently assembling, for use at akey-traversal end
    /// (there is no "next" entry to trigger the usual boundary check). A
    /// trailing carry-over extent (the suffix of one that crossed a stripe
    /// boundary, cf. spec.md §4.2 and §8 scenario 6) has nothing further to
    /// merge with either, so it is finished as its own one-extent stripe
    /// rather than left stranded in `pending_carry` — at most two stripes
    /// can ever be outstanding at once, matching [`AkeyState::observe`]'s
    /// "held-over stripe" case.
    pub fn flush(&mut self, class: &EcClass) -> SmallVec<[AssembledStripe; 2]> {
        let stripe_records = class.stripe_records();
        let mut out: SmallVec<[AssembledStripe; 2]> = SmallVec::new();
        if self.is_empty() {
            return out;
        }
        out.push(self.finish_and_advance(stripe_records));
        if !self.is_empty() {
            out.push(self.finish_and_advance(stripe_records));
        }
        out
    }

    /// Drop hold-over bookkeeping for extents whose terminal stripe is the
    /// one just committed, cf. spec.md §4.7.
    pub fn retire_hold_overs(&mut self, stripe_start: u64, stripe_end: u64) -> Vec<DataExtent> {
        let (retired, remaining): (Vec<_>, Vec<_>) = self
            .hold_over_extents
            .drain(..)
            .partition(|e| e.orig_recx.end() > stripe_start && e.orig_recx.end() <= stripe_end);
        self.hold_over_extents = remaining;
        retired
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::recx::Recx;

    fn class() -> EcClass {
        // K=4, P=2, L=2, stripe_records = 8.
        EcClass::new(
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(8).unwrap(),
        )
    }

    fn extent(start: u64, len: u64, epoch: Epoch) -> DataExtent {
        let recx = Recx::new(start, len);
        DataExtent {
            recx,
            orig_recx: recx,
            epoch,
            is_hole: false,
        }
    }

    #[test]
    fn single_stripe_accumulates_without_finishing() {
        let class = class();
        let mut state = AkeyState::new(0);
        let finished = state.observe(extent(0, 4, 1), &class);
        assert!(finished.is_empty());
        let finished = state.observe(extent(4, 4, 1), &class);
        assert!(finished.is_empty());
        assert_eq!(state.stripe_fill, 8);
    }

    #[test]
    fn crossing_extent_splits_and_holds_over() {
        let class = class();
        let mut state = AkeyState::new(0);
        // stripe_records = 8; this extent spans stripe 0 (end 8) into stripe 1.
        let finished = state.observe(extent(0, 10, 1), &class);
        assert!(finished.is_empty(), "no boundary crossed yet by a later entry");

        // A later entry starting in stripe 1 forces stripe 0 to finish.
        let finished = state.observe(extent(10, 2, 1), &class);
        assert_eq!(finished.len(), 1);
        let s0 = &finished[0];
        assert_eq!(s0.stripe_num, 0);
        assert_eq!(s0.data_extents.len(), 1);
        assert_eq!(s0.data_extents[0].recx, Recx::new(0, 8));
        assert_eq!(s0.data_extents[0].orig_recx, Recx::new(0, 10));

        assert_eq!(state.cur_stripe_num, 1);
        assert_eq!(state.hold_over_extents.len(), 1);
        assert_eq!(state.hold_over_extents[0].orig_recx, Recx::new(0, 10));
    }

    #[test]
    fn held_over_stripe_emitted_when_next_entry_jumps_further() {
        let class = class();
        let mut state = AkeyState::new(0);
        state.observe(extent(0, 10, 1), &class);
        // jump straight to stripe 3 (stripe_records=8 -> stripe 3 starts at 24)
        let finished = state.observe(extent(24, 4, 2), &class);
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].stripe_num, 0);
        assert_eq!(finished[1].stripe_num, 1);
        assert_eq!(finished[1].data_extents[0].recx, Recx::new(8, 2));
        assert_eq!(state.cur_stripe_num, 3);
    }

    #[test]
    fn non_crossing_extent_then_multi_stripe_jump_emits_no_phantom_stripe() {
        let class = class();
        let mut state = AkeyState::new(0);
        // This extent stays inside stripe 0 and never crosses a boundary,
        // so finishing it leaves no carry-over to seed stripe 1.
        let finished = state.observe(extent(0, 4, 1), &class);
        assert!(finished.is_empty());

        // Jump straight to stripe 2 (stripe_records=8 -> stripe 2 starts at
        // 16), skipping stripe 1 entirely.
        let finished = state.observe(extent(16, 4, 2), &class);
        assert_eq!(finished.len(), 1, "stripe 1 was never touched and must not surface as an empty stripe");
        assert_eq!(finished[0].stripe_num, 0);
        assert_eq!(finished[0].data_extents.len(), 1);
        assert_eq!(finished[0].data_extents[0].recx, Recx::new(0, 4));
        assert_eq!(state.cur_stripe_num, 2);
    }

    #[test]
    fn flush_surfaces_trailing_carry_as_its_own_stripe() {
        let class = class();
        let mut state = AkeyState::new(0);
        // A single extent spanning [0, 10) is the only write in the akey;
        // nothing follows to trigger observe()'s usual boundary detection.
        let finished = state.observe(extent(0, 10, 3), &class);
        assert!(finished.is_empty());

        let flushed = state.flush(&class);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].stripe_num, 0);
        assert_eq!(flushed[0].data_extents[0].recx, Recx::new(0, 8));
        assert_eq!(flushed[0].data_extents[0].orig_recx, Recx::new(0, 10));
        assert_eq!(flushed[1].stripe_num, 1);
        assert_eq!(flushed[1].data_extents[0].recx, Recx::new(8, 2));
        assert_eq!(flushed[1].data_extents[0].epoch, 3);
        assert_eq!(flushed[1].data_extents[0].orig_recx, Recx::new(0, 10));
    }

    #[test]
    fn retire_hold_over_on_terminal_stripe() {
        let class = class();
        let mut state = AkeyState::new(0);
        state.observe(extent(0, 10, 1), &class);
        state.observe(extent(10, 2, 1), &class);
        assert_eq!(state.hold_over_extents.len(), 1);
        let retired = state.retire_hold_overs(8, 16);
        assert_eq!(retired.len(), 1);
        assert!(state.hold_over_extents.is_empty());
    }
}
