//! Local committer: writes new parity and range-removes superseded replicas
//! on the local store, cf. spec.md §4.7.

use crate::ec_class::EcClass;
use crate::recx::Recx;
use crate::store::ExtentStore;
use crate::types::{AKey, ContainerId, DKey, Epoch, MapVersion, Oid};
use crate::AggResult;

use super::assembler::AssembledStripe;
use super::state::DataExtent;

/// `update(oid, hi_epoch, dkey, akey, recx=PARITY_FLAG|(s·L), len=L,
/// sgl=parity_buf[pidx])`, cf. spec.md §4.7.
pub fn commit_parity(
    store: &impl ExtentStore,
    container: ContainerId,
    oid: Oid,
    hi_epoch: Epoch,
    map_version: MapVersion,
    dkey: &DKey,
    akey: &AKey,
    class: &EcClass,
    stripe_num: u64,
    parity_cell: &[u8],
) -> AggResult<()> {
    let recx = class.parity_recx(stripe_num);
    store.update(
        container,
        oid,
        hi_epoch,
        map_version,
        dkey,
        akey,
        recx,
        parity_cell,
    )
}

/// Range-remove the parity cell at `stripe_num`, used by the drop branch and
/// after a successful hole-fill re-replication, cf. spec.md §4.4's branches
/// 1 and 4.
pub fn remove_parity(
    store: &impl ExtentStore,
    container: ContainerId,
    oid: Oid,
    epoch_range: (Epoch, Epoch),
    dkey: &DKey,
    akey: &AKey,
    class: &EcClass,
    stripe_num: u64,
) -> AggResult<()> {
    store.range_remove(
        container,
        oid,
        epoch_range,
        dkey,
        akey,
        class.parity_recx(stripe_num),
    )
}

/// Remove the replicas a successfully processed stripe has superseded, cf.
/// spec.md §4.7's two removal strategies.
///
/// `hold_overs_pending` is true when this akey still carries hold-over
/// extents whose terminal stripe is not this one — in that case the
/// "contained" single-range-remove shortcut cannot be used even if every
/// extent *in this stripe's snapshot* is contained, because a hold-over from
/// an earlier stripe still straddles this one.
pub fn remove_replicas(
    store: &impl ExtentStore,
    container: ContainerId,
    oid: Oid,
    epoch_range: (Epoch, Epoch),
    dkey: &DKey,
    akey: &AKey,
    class: &EcClass,
    stripe: &AssembledStripe,
    hold_overs_pending: bool,
) -> AggResult<()> {
    let stripe_start = stripe.stripe_num * class.stripe_records();
    let stripe_end = stripe_start + class.stripe_records();

    let all_contained = !hold_overs_pending
        && stripe
            .data_extents
            .iter()
            .all(|e| e.is_contained_in(stripe_start, stripe_end));

    if all_contained {
        let whole = Recx::new(stripe_start, class.stripe_records());
        store.range_remove(container, oid, epoch_range, dkey, akey, whole)
    } else {
        for extent in terminal_extents(&stripe.data_extents, stripe_end) {
            store.range_remove(
                container,
                oid,
                (extent.epoch, extent.epoch),
                dkey,
                akey,
                extent.orig_recx,
            )?;
        }
        Ok(())
    }
}

/// Remove hold-over extents whose terminal stripe was just committed, cf.
/// spec.md §4.7: "Hold-overs are removed only after their own terminal
/// stripe has been processed successfully."
pub fn remove_retired_hold_overs(
    store: &impl ExtentStore,
    container: ContainerId,
    oid: Oid,
    dkey: &DKey,
    akey: &AKey,
    retired: &[DataExtent],
) -> AggResult<()> {
    for extent in retired {
        store.range_remove(
            container,
            oid,
            (extent.epoch, extent.epoch),
            dkey,
            akey,
            extent.orig_recx,
        )?;
    }
    Ok(())
}

fn terminal_extents(extents: &[DataExtent], stripe_end: u64) -> impl Iterator<Item = &DataExtent> {
    extents.iter().filter(move |e| e.orig_recx.end() <= stripe_end)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::num::NonZeroUsize;

    use super::*;
    use crate::store::ExtentEntry;
    use crate::types::{EcClassAttrs, PoolId};

    #[derive(Default)]
    struct FakeStore {
        removed: RefCell<Vec<(Recx, Epoch, Epoch)>>,
        updates: RefCell<HashMap<Recx, (Epoch, Vec<u8>)>>,
    }

    impl ExtentStore for FakeStore {
        fn objects(&self, _container: ContainerId) -> AggResult<Vec<Oid>> {
            unimplemented!()
        }
        fn dkeys(&self, _container: ContainerId, _oid: Oid) -> AggResult<Vec<DKey>> {
            unimplemented!()
        }
        fn akeys(&self, _container: ContainerId, _oid: Oid, _dkey: &DKey) -> AggResult<Vec<AKey>> {
            unimplemented!()
        }
        fn data_extents(
            &self,
            _container: ContainerId,
            _oid: Oid,
            _dkey: &DKey,
            _akey: &AKey,
            _epoch_range: (Epoch, Epoch),
        ) -> AggResult<Vec<ExtentEntry>> {
            unimplemented!()
        }
        fn parity_extent(
            &self,
            _container: ContainerId,
            _oid: Oid,
            _dkey: &DKey,
            _akey: &AKey,
            _parity_recx: Recx,
        ) -> AggResult<Option<(Recx, Epoch)>> {
            unimplemented!()
        }
        fn fetch(
            &self,
            _container: ContainerId,
            _oid: Oid,
            _epoch: Epoch,
            _dkey: &DKey,
            _akey: &AKey,
            _recx: Recx,
        ) -> AggResult<Vec<u8>> {
            unimplemented!()
        }
        fn update(
            &self,
            _container: ContainerId,
            _oid: Oid,
            epoch: Epoch,
            _map_version: MapVersion,
            _dkey: &DKey,
            _akey: &AKey,
            recx: Recx,
            data: &[u8],
        ) -> AggResult<()> {
            self.updates.borrow_mut().insert(recx, (epoch, data.to_vec()));
            Ok(())
        }
        fn range_remove(
            &self,
            _container: ContainerId,
            _oid: Oid,
            epoch_range: (Epoch, Epoch),
            _dkey: &DKey,
            _akey: &AKey,
            recx: Recx,
        ) -> AggResult<()> {
            self.removed.borrow_mut().push((recx, epoch_range.0, epoch_range.1));
            Ok(())
        }
        fn oclass_attrs(&self, _oid: Oid) -> AggResult<EcClassAttrs> {
            unimplemented!()
        }
        fn is_leader(&self, _pool: PoolId, _oid: Oid, _map_version: MapVersion) -> bool {
            true
        }
        fn last_aggregated_epoch(&self, _container: ContainerId) -> AggResult<Epoch> {
            Ok(0)
        }
        fn advance_watermark(&self, _container: ContainerId, _epoch: Epoch) -> AggResult<()> {
            Ok(())
        }
    }

    fn class() -> EcClass {
        EcClass::new(NonZeroUsize::new(4).unwrap(), NonZeroUsize::new(2).unwrap(), NonZeroUsize::new(2).unwrap(), NonZeroUsize::new(8).unwrap())
    }

    fn extent(start: u64, len: u64, epoch: Epoch) -> DataExtent {
        let recx = Recx::new(start, len);
        DataExtent { recx, orig_recx: recx, epoch, is_hole: false }
    }

    #[test]
    fn contained_stripe_uses_single_range_remove() {
        let store = FakeStore::default();
        let class = class();
        let stripe = AssembledStripe {
            stripe_num: 0,
            hi_epoch: 5,
            data_extents: vec![extent(0, 4, 5), extent(4, 4, 5)],
            stripe_fill: 8,
            offset: 0,
            has_holes: false,
        };
        remove_replicas(&store, ContainerId(0), 0, (0, 5), &vec![], &vec![], &class, &stripe, false).unwrap();
        let removed = store.removed.borrow();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Recx::new(0, 8));
    }

    #[test]
    fn hold_over_forces_per_extent_removal() {
        let store = FakeStore::default();
        let class = class();
        let stripe = AssembledStripe {
            stripe_num: 1,
            hi_epoch: 5,
            data_extents: vec![extent(8, 2, 1)],
            stripe_fill: 2,
            offset: 8,
            has_holes: false,
        };
        remove_replicas(&store, ContainerId(0), 0, (0, 5), &vec![], &vec![], &class, &stripe, true).unwrap();
        let removed = store.removed.borrow();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Recx::new(8, 2));
        assert_eq!(removed[0].1, 1);
        assert_eq!(removed[0].2, 1);
    }
}
