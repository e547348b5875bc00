//! An in-memory stand-in for the versioned extent store, cf. spec.md §1, §6.
//! Sufficient to drive the boundary scenarios of spec.md §8 end-to-end
//! without a real container, the way the teacher's `HDDStorage`/`SSDStorage`
//! (`src/storage/{hdd_storage,ssd_storage}.rs`) back `BlockStorage` with a
//! real device for its own tests.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::ec_class::EcClass;
use crate::recx::Recx;
use crate::store::{ExtentEntry, ExtentStore};
use crate::types::{AKey, ContainerId, DKey, EcClassAttrs, Epoch, MapVersion, Oid, PoolId};
use crate::{AggError, AggResult};

#[derive(Debug, Clone)]
struct StoredExtent {
    recx: Recx,
    orig_recx: Recx,
    epoch: Epoch,
    is_hole: bool,
    data: Vec<u8>,
}

type AkeyKey = (Oid, DKey, AKey);

#[derive(Default)]
struct Inner {
    log: HashMap<AkeyKey, Vec<StoredExtent>>,
    classes: HashMap<Oid, EcClassAttrs>,
    watermark: HashMap<ContainerId, Epoch>,
    leader: bool,
}

/// A single parity shard's local extent store, all state behind interior
/// mutability so the [`ExtentStore`] trait's `&self` methods can still
/// mutate it — this crate's one collaborator that genuinely needs shared,
/// process-wide state (spec.md §9's watermark).
pub struct InMemoryExtentStore {
    inner: RefCell<Inner>,
}

impl Default for InMemoryExtentStore {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Inner { leader: true, ..Default::default() }),
        }
    }
}

impl InMemoryExtentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leader(&self, leader: bool) {
        self.inner.borrow_mut().leader = leader;
    }

    pub fn set_class(&self, oid: Oid, class: EcClassAttrs) {
        self.inner.borrow_mut().classes.insert(oid, class);
    }

    /// Seed a replica extent directly, bypassing `update`'s normal
    /// append-only write path — used to set up boundary-scenario fixtures.
    pub fn seed_replica(
        &self,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
        epoch: Epoch,
        is_hole: bool,
        data: &[u8],
    ) {
        self.inner
            .borrow_mut()
            .log
            .entry((oid, dkey.clone(), akey.clone()))
            .or_default()
            .push(StoredExtent { recx, orig_recx: recx, epoch, is_hole, data: data.to_vec() });
    }

    pub fn seed_parity(&self, oid: Oid, dkey: &DKey, akey: &AKey, class: &EcClass, stripe_num: u64, epoch: Epoch, data: &[u8]) {
        let recx = class.parity_recx(stripe_num);
        self.seed_replica(oid, dkey, akey, recx, epoch, false, data);
    }

    /// All extents currently logged for one akey, data and parity alike, in
    /// insertion order — used by tests to assert on final state.
    pub fn dump(&self, oid: Oid, dkey: &DKey, akey: &AKey) -> Vec<(Recx, Epoch, bool)> {
        self.inner
            .borrow()
            .log
            .get(&(oid, dkey.clone(), akey.clone()))
            .map(|v| v.iter().map(|e| (e.recx, e.epoch, e.is_hole)).collect())
            .unwrap_or_default()
    }

    pub fn watermark(&self, container: ContainerId) -> Epoch {
        self.inner.borrow().watermark.get(&container).copied().unwrap_or(0)
    }
}

impl ExtentStore for InMemoryExtentStore {
    fn objects(&self, _container: ContainerId) -> AggResult<Vec<Oid>> {
        Ok(self.inner.borrow().classes.keys().copied().collect())
    }

    fn dkeys(&self, _container: ContainerId, oid: Oid) -> AggResult<Vec<DKey>> {
        let inner = self.inner.borrow();
        let mut out: Vec<DKey> = inner
            .log
            .keys()
            .filter(|(o, ..)| *o == oid)
            .map(|(_, d, _)| d.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn akeys(&self, _container: ContainerId, oid: Oid, dkey: &DKey) -> AggResult<Vec<AKey>> {
        let inner = self.inner.borrow();
        let mut out: Vec<AKey> = inner
            .log
            .keys()
            .filter(|(o, d, _)| *o == oid && d == dkey)
            .map(|(_, _, a)| a.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn data_extents(
        &self,
        _container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        epoch_range: (Epoch, Epoch),
    ) -> AggResult<Vec<ExtentEntry>> {
        let inner = self.inner.borrow();
        let mut out: Vec<ExtentEntry> = inner
            .log
            .get(&(oid, dkey.clone(), akey.clone()))
            .into_iter()
            .flatten()
            .filter(|e| !e.recx.is_parity() && e.epoch >= epoch_range.0 && e.epoch <= epoch_range.1)
            .map(|e| ExtentEntry {
                recx: e.recx,
                orig_recx: e.orig_recx,
                epoch: e.epoch,
                is_hole: e.is_hole,
                has_checksum: false,
            })
            .collect();
        out.sort_by_key(|e| (e.recx.start, e.epoch));
        Ok(out)
    }

    fn parity_extent(
        &self,
        _container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        parity_recx: Recx,
    ) -> AggResult<Option<(Recx, Epoch)>> {
        let inner = self.inner.borrow();
        Ok(inner
            .log
            .get(&(oid, dkey.clone(), akey.clone()))
            .into_iter()
            .flatten()
            .filter(|e| e.recx.is_parity() && e.recx.start == parity_recx.start)
            .max_by_key(|e| e.epoch)
            .map(|e| (e.recx, e.epoch)))
    }

    fn fetch(
        &self,
        _container: ContainerId,
        oid: Oid,
        epoch: Epoch,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
    ) -> AggResult<Vec<u8>> {
        let inner = self.inner.borrow();
        let entries = inner.log.get(&(oid, dkey.clone(), akey.clone()));
        let Some(entries) = entries else {
            return Err(AggError::Range(format!("no extents logged for recx {recx:?}")));
        };
        // Assemble the requested range record-by-record, preferring the
        // highest epoch not exceeding `epoch` that covers each record.
        let record_bytes = {
            let candidates: Vec<_> = entries.iter().filter(|e| e.recx.len > 0).collect();
            candidates
                .first()
                .map(|e| e.data.len() as u64 / e.recx.len)
                .unwrap_or(1)
        };
        let mut out = vec![0u8; (recx.len * record_bytes) as usize];
        for record in recx.start..recx.end() {
            let point_recx = Recx::new(record, 1);
            if let Some(best) = entries
                .iter()
                .filter(|e| !e.is_hole && e.epoch <= epoch && e.recx.overlaps(&point_recx))
                .max_by_key(|e| e.epoch)
            {
                let local_record_bytes = best.data.len() as u64 / best.recx.len.max(1);
                let offset_in_extent = (record - best.recx.start) * local_record_bytes;
                let dst_offset = ((record - recx.start) * record_bytes) as usize;
                let src = &best.data[offset_in_extent as usize..(offset_in_extent + local_record_bytes) as usize];
                out[dst_offset..dst_offset + local_record_bytes as usize].copy_from_slice(src);
            }
        }
        Ok(out)
    }

    fn update(
        &self,
        _container: ContainerId,
        oid: Oid,
        epoch: Epoch,
        _map_version: MapVersion,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
        data: &[u8],
    ) -> AggResult<()> {
        self.inner
            .borrow_mut()
            .log
            .entry((oid, dkey.clone(), akey.clone()))
            .or_default()
            .push(StoredExtent { recx, orig_recx: recx, epoch, is_hole: false, data: data.to_vec() });
        Ok(())
    }

    fn range_remove(
        &self,
        _container: ContainerId,
        oid: Oid,
        epoch_range: (Epoch, Epoch),
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
    ) -> AggResult<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(entries) = inner.log.get_mut(&(oid, dkey.clone(), akey.clone())) {
            entries.retain(|e| {
                let contained = e.recx.start >= recx.start && e.recx.end() <= recx.end();
                let in_range = e.epoch >= epoch_range.0 && e.epoch <= epoch_range.1;
                !(contained && in_range)
            });
        }
        Ok(())
    }

    fn oclass_attrs(&self, oid: Oid) -> AggResult<EcClassAttrs> {
        self.inner
            .borrow()
            .classes
            .get(&oid)
            .copied()
            .ok_or_else(|| AggError::InvalidArg(format!("oid {oid:#x} has no registered EC class")))
    }

    fn is_leader(&self, _pool: PoolId, _oid: Oid, _map_version: MapVersion) -> bool {
        self.inner.borrow().leader
    }

    fn last_aggregated_epoch(&self, container: ContainerId) -> AggResult<Epoch> {
        Ok(self.watermark(container))
    }

    fn advance_watermark(&self, container: ContainerId, epoch: Epoch) -> AggResult<()> {
        self.inner.borrow_mut().watermark.insert(container, epoch);
        Ok(())
    }
}
