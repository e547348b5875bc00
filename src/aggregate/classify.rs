//! Stripe classifier: decides what a finished stripe needs, cf. spec.md §4.4.

use crate::ec_class::EcClass;
use crate::recx::Recx;

use super::assembler::AssembledStripe;
use super::state::ParityProbe;

/// What the codec/peer/commit stages must do for one finished stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// All-hole stripe with no parity to reconcile; nothing to encode, but
    /// any contained replicas are still eligible for removal.
    Drop,
    /// No parity cell exists yet and every data cell is fully present:
    /// encode fresh parity from the local stripe.
    FullEncode,
    /// Parity exists and only a minority of cells changed: apply an
    /// incremental Galois-field delta instead of a full recompute.
    PartialUpdate { touched_cells: Vec<usize> },
    /// Parity exists but a majority of cells changed, or not every cell is
    /// locally present: fetch the missing cells from peers and recompute
    /// the stripe's parity from scratch.
    FullRecalc,
    /// A hole appears inside a stripe that already has parity: parity cannot
    /// represent a hole, so replicate the valid data to peers verbatim and
    /// have them drop their stale parity.
    HoleFill,
    /// Not enough data to act on yet; wait for more writes to land before
    /// revisiting this stripe.
    NoOp,
}

/// Per-cell coverage counts within one stripe, used to pick between
/// [`Action::PartialUpdate`] and [`Action::FullRecalc`].
#[derive(Debug, Clone, Default)]
pub struct CellCoverage {
    pub full_cells: Vec<usize>,
    pub touched_cells: Vec<usize>,
}

/// Scan `stripe`'s (already sorted, non-overlapping) data extents and bucket
/// each of the `K` data cells as fully covered, partially touched, or
/// untouched, cf. spec.md §4.4's "contiguous-run" cell accounting.
pub fn cell_coverage(stripe: &AssembledStripe, class: &EcClass, stripe_num: u64) -> CellCoverage {
    let stripe_start = stripe_num * class.stripe_records();
    let cell_records = class.cell_records();
    let mut out = CellCoverage::default();

    for cell in 0..class.k() {
        let cell_recx = Recx::new(stripe_start + cell as u64 * cell_records, cell_records);
        let mut covered = 0u64;
        for extent in &stripe.data_extents {
            if extent.is_hole {
                continue;
            }
            if let Some(overlap) = extent.recx.intersect(&cell_recx) {
                covered += overlap.len;
            }
        }
        if covered > 0 {
            out.touched_cells.push(cell);
        }
        if covered == cell_records {
            out.full_cells.push(cell);
        }
    }
    out
}

/// Classify a finished stripe, cf. spec.md §4.4's decision table.
pub fn classify(
    class: &EcClass,
    stripe: &AssembledStripe,
    probe: &ParityProbe,
    stripe_num: u64,
) -> Action {
    if stripe.has_holes {
        return if probe.is_present() {
            Action::HoleFill
        } else {
            Action::Drop
        };
    }

    let coverage = cell_coverage(stripe, class, stripe_num);
    let k = class.k();

    let action = match probe {
        ParityProbe::Absent => {
            if coverage.full_cells.len() == k {
                Action::FullEncode
            } else {
                Action::NoOp
            }
        }
        ParityProbe::Present { epoch: parity_epoch, .. } => {
            if stripe.hi_epoch <= *parity_epoch {
                // Every replica in this stripe is no newer than the parity
                // already covering it: nothing to reconcile, cf. spec.md
                // §4.4 branch 1.
                Action::Drop
            } else if coverage.full_cells.len() * 2 >= k
                || stripe.data_extents.iter().any(|e| !e.is_hole && e.epoch < *parity_epoch)
            {
                // spec.md §4.4 branch 5: `full_cell_count >= K/2` routes to
                // full-recalc independent of how many cells are merely
                // touched (an exact K/2-full, K/2-untouched split would
                // otherwise also satisfy branch 6's `touched * 2 <= k`).
                // Likewise, any replica older than the existing parity
                // forces a full-recalc: an incremental delta only accounts
                // for the cells it touches, so a mix of pre-parity and
                // post-parity replicas can't be reconciled by XOR-ing in
                // just the newer ones.
                Action::FullRecalc
            } else if coverage.touched_cells.len() * 2 <= k {
                Action::PartialUpdate {
                    touched_cells: coverage.touched_cells,
                }
            } else {
                Action::FullRecalc
            }
        }
    };
    log::debug!("stripe {stripe_num} (hi_epoch {}) classified as {action:?}", stripe.hi_epoch);
    action
}

#[cfg(test)]
mod test {
    use std::num::NonZeroUsize;

    use super::super::state::DataExtent;
    use super::*;
    use crate::types::Epoch;

    fn class() -> EcClass {
        EcClass::new(
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(8).unwrap(),
        )
    }

    fn full_stripe(epoch: Epoch) -> AssembledStripe {
        let recx = Recx::new(0, 8);
        AssembledStripe {
            stripe_num: 0,
            hi_epoch: epoch,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch,
                is_hole: false,
            }],
            stripe_fill: 8,
            offset: 0,
            has_holes: false,
        }
    }

    #[test]
    fn full_stripe_without_parity_encodes() {
        let class = class();
        let stripe = full_stripe(1);
        assert_eq!(classify(&class, &stripe, &ParityProbe::Absent, 0), Action::FullEncode);
    }

    #[test]
    fn full_stripe_with_parity_recalcs() {
        let class = class();
        let stripe = full_stripe(2);
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 1,
        };
        assert_eq!(classify(&class, &stripe, &probe, 0), Action::FullRecalc);
    }

    #[test]
    fn exactly_half_full_cells_recalcs_even_though_touched_is_also_half() {
        // K=4, L=2: cells 0 and 1 fully rewritten, cells 2 and 3 untouched.
        // full_cell_count (2) >= K/2 (2) must win over the touched-cell
        // fallback branch 6 would otherwise take (touched_cells.len()*2 ==
        // k), cf. spec.md §4.4 branch 5.
        let class = class();
        let recx = Recx::new(0, 4);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 2,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 2,
                is_hole: false,
            }],
            stripe_fill: 4,
            offset: 0,
            has_holes: false,
        };
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 1,
        };
        assert_eq!(classify(&class, &stripe, &probe, 0), Action::FullRecalc);
    }

    #[test]
    fn sparse_update_with_parity_is_partial() {
        let class = class();
        let recx = Recx::new(0, 2); // touches only cell 0 of 4
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 2,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 2,
                is_hole: false,
            }],
            stripe_fill: 2,
            offset: 0,
            has_holes: false,
        };
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 1,
        };
        match classify(&class, &stripe, &probe, 0) {
            Action::PartialUpdate { touched_cells } => assert_eq!(touched_cells, vec![0]),
            other => panic!("expected PartialUpdate, got {other:?}"),
        }
    }

    #[test]
    fn mixed_age_replicas_under_minority_coverage_still_recalcs() {
        // Cell 0 carries a replica older than parity, cell 1 a replica newer
        // than parity; neither full_cells nor touched_cells reaches K/2, so
        // without the older-than-parity disjunct this would wrongly route
        // to PartialUpdate.
        let class = class();
        let old_recx = Recx::new(0, 1);
        let new_recx = Recx::new(2, 1);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 7,
            data_extents: vec![
                DataExtent { recx: old_recx, orig_recx: old_recx, epoch: 3, is_hole: false },
                DataExtent { recx: new_recx, orig_recx: new_recx, epoch: 7, is_hole: false },
            ],
            stripe_fill: 2,
            offset: 0,
            has_holes: false,
        };
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 5,
        };
        assert_eq!(classify(&class, &stripe, &probe, 0), Action::FullRecalc);
    }

    #[test]
    fn stale_replica_under_newer_parity_drops() {
        let class = class();
        let recx = Recx::new(0, 2);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 5,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 5,
                is_hole: false,
            }],
            stripe_fill: 2,
            offset: 0,
            has_holes: false,
        };
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 10,
        };
        assert_eq!(classify(&class, &stripe, &probe, 0), Action::Drop);
    }

    #[test]
    fn incomplete_stripe_without_parity_is_noop() {
        let class = class();
        let recx = Recx::new(0, 2);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 1,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 1,
                is_hole: false,
            }],
            stripe_fill: 2,
            offset: 0,
            has_holes: false,
        };
        assert_eq!(classify(&class, &stripe, &ParityProbe::Absent, 0), Action::NoOp);
    }

    #[test]
    fn hole_without_parity_drops() {
        let class = class();
        let recx = Recx::new(0, 8);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 1,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 1,
                is_hole: true,
            }],
            stripe_fill: 0,
            offset: 0,
            has_holes: true,
        };
        assert_eq!(classify(&class, &stripe, &ParityProbe::Absent, 0), Action::Drop);
    }

    #[test]
    fn hole_with_parity_fills() {
        let class = class();
        let recx = Recx::new(0, 8);
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 1,
            data_extents: vec![DataExtent {
                recx,
                orig_recx: recx,
                epoch: 1,
                is_hole: true,
            }],
            stripe_fill: 0,
            offset: 0,
            has_holes: true,
        };
        let probe = ParityProbe::Present {
            recx: class.parity_recx(0),
            epoch: 1,
        };
        assert_eq!(classify(&class, &stripe, &probe, 0), Action::HoleFill);
    }
}
