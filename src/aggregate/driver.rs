//! Iteration driver: the top-level `aggregate` operation, cf. spec.md §4.1.
//!
//! Walks the extent store in object → dkey → akey → recx order, assembling
//! stripes (§4.2), probing existing parity (§4.3), classifying each stripe
//! (§4.4), running the codec and peer RPC (§4.5-4.6) and committing locally
//! (§4.7) — yielding cooperatively every `credits_max` entries, cf. spec.md
//! §4.1 and §5's suspension-points list. The codec/RPC steps run inline on
//! this thread; see [`super::offload`] for the standalone offload-bridge
//! primitive spec.md §4.8 describes for a caller that wants to dispatch
//! those steps on a separate worker and yield while awaiting them.

use crate::dtx::{DtxHandle, DtxOutcome};
use crate::ec_class::EcClass;
use crate::membership::Membership;
use crate::object_client::{ObjectClient, ObjectHandle};
use crate::recx::Recx;
use crate::rpc::RpcTransport;
use crate::store::ExtentStore;
use crate::types::{AKey, ContainerId, DKey, Epoch, MapVersion, Oid, PoolId};
use crate::{AggError, AggResult};

use super::assembler::AssembledStripe;
use super::classify::{classify, Action};
use super::codec_ops;
use super::coordinator::{self, AggregateRpcCtx, Peer};
use super::parity_probe::probe_parity;
use super::state::{AkeyState, DataExtent, ParityProbe};

/// Per-action tallies and overall outcome of one `aggregate` run, cf.
/// spec.md §4.1 and SPEC_FULL.md's "(added)" note on a usable return type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateReport {
    pub dropped: usize,
    pub full_encoded: usize,
    pub partial_updated: usize,
    pub full_recalced: usize,
    pub hole_filled: usize,
    pub no_op: usize,
    pub stripes_errored: usize,
    pub watermark_advanced: bool,
}

impl AggregateReport {
    fn record(&mut self, action: &Action) {
        match action {
            Action::Drop => self.dropped += 1,
            Action::FullEncode => self.full_encoded += 1,
            Action::PartialUpdate { .. } => self.partial_updated += 1,
            Action::FullRecalc => self.full_recalced += 1,
            Action::HoleFill => self.hole_filled += 1,
            Action::NoOp => self.no_op += 1,
        }
    }
}

/// A cooperative-yield callback, cf. spec.md §4.1: returning `true` requests
/// a soft abort at the next stripe boundary.
pub trait CooperativeYield: FnMut() -> bool {}
impl<F: FnMut() -> bool> CooperativeYield for F {}

/// The aggregation engine, parameterized over its external collaborators
/// (spec.md §1's "out of scope" list, expressed as traits in
/// [`crate::store`], [`crate::object_client`], [`crate::rpc`],
/// [`crate::membership`], [`crate::dtx`]).
pub struct AggregateEngine<'a, S, O, R, M, D> {
    pub store: &'a S,
    pub object_client: &'a O,
    pub transport: &'a R,
    pub membership: &'a M,
    pub dtx: &'a D,
    pub pool: PoolId,
    pub shard_index: usize,
    pub credits_max: usize,
}

impl<'a, S, O, R, M, D> AggregateEngine<'a, S, O, R, M, D>
where
    S: ExtentStore,
    O: ObjectClient,
    R: RpcTransport,
    M: Membership,
    D: DtxHandle,
{
    pub fn new(
        store: &'a S,
        object_client: &'a O,
        transport: &'a R,
        membership: &'a M,
        dtx: &'a D,
        pool: PoolId,
        shard_index: usize,
        credits_max: usize,
    ) -> Self {
        Self {
            store,
            object_client,
            transport,
            membership,
            dtx,
            pool,
            shard_index,
            credits_max,
        }
    }

    /// `aggregate(container, [lo, hi], yield_fn, is_current)`, cf. spec.md
    /// §4.1. The `yield_arg` of spec.md's C-style callback collapses into
    /// whatever state `yield_fn`'s closure captures — there is no separate
    /// parameter in an idiomatic Rust signature.
    pub fn aggregate(
        &self,
        container: ContainerId,
        epoch_range: (Epoch, Epoch),
        mut yield_fn: impl FnMut() -> bool,
        is_current: bool,
    ) -> AggResult<AggregateReport> {
        loop {
            match self.aggregate_once(container, epoch_range, &mut yield_fn, is_current) {
                Err(e) if e.is_needs_refresh() => continue,
                other => return other,
            }
        }
    }

    fn aggregate_once(
        &self,
        container: ContainerId,
        epoch_range: (Epoch, Epoch),
        yield_fn: &mut impl FnMut() -> bool,
        is_current: bool,
    ) -> AggResult<AggregateReport> {
        let mut report = AggregateReport::default();
        let mut credits = 0usize;
        let mut aborted = false;

        'objects: for oid in self.store.objects(container)? {
            let map_version = self.membership.current_map_version(self.pool);
            if !self.membership.is_leader(self.pool, oid, map_version) {
                continue;
            }
            let class_attrs = match self.store.oclass_attrs(oid) {
                Ok(a) => a,
                Err(_) => continue, // not an EC-class object
            };
            let class = EcClass::new(
                class_attrs.k,
                class_attrs.p,
                class_attrs.l,
                class_attrs.record_size,
            );
            let Some(pidx) = class.pidx(self.shard_index) else {
                continue; // this is a data shard, not a parity shard
            };
            let peers = self.peer_locations(container, oid, &class, pidx)?;

            for dkey in self.store.dkeys(container, oid)? {
                for akey in self.store.akeys(container, oid, &dkey)? {
                    self.dtx.begin()?;
                    let outcome = self.aggregate_akey(
                        container,
                        oid,
                        &dkey,
                        &akey,
                        &class,
                        &peers,
                        map_version,
                        epoch_range,
                        yield_fn,
                        &mut credits,
                        &mut report,
                        &mut aborted,
                    );
                    match outcome {
                        Ok(()) => match self.dtx.commit()? {
                            DtxOutcome::Committed => {}
                            DtxOutcome::NeedsRefresh => {
                                return Err(AggError::NeedsRefresh(
                                    "concurrency conflict committing akey".into(),
                                ))
                            }
                        },
                        Err(e) if e.is_stripe_abort() => {
                            self.dtx.abort();
                            log::warn!(
                                "ec-aggregate: akey {:x?} of oid {oid:#x} aborted: {e}",
                                akey
                            );
                            report.stripes_errored += 1;
                        }
                        Err(e) => {
                            self.dtx.abort();
                            if e.is_fatal() {
                                log::error!("ec-aggregate: fatal error on oid {oid:#x}: {e}");
                            }
                            return Err(e);
                        }
                    }
                    if aborted {
                        break 'objects;
                    }
                }
            }
        }

        if is_current && report.stripes_errored == 0 {
            self.store.advance_watermark(container, epoch_range.1)?;
            report.watermark_advanced = true;
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate_akey(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        class: &EcClass,
        peers: &[Peer],
        map_version: MapVersion,
        epoch_range: (Epoch, Epoch),
        yield_fn: &mut impl FnMut() -> bool,
        credits: &mut usize,
        report: &mut AggregateReport,
        aborted: &mut bool,
    ) -> AggResult<()> {
        let entries = self
            .store
            .data_extents(container, oid, dkey, akey, epoch_range)?;
        if entries.is_empty() {
            return Ok(());
        }

        let first_stripe = entries[0].recx.stripe_of(class.stripe_records());
        let mut state = AkeyState::new(first_stripe);

        for entry in entries {
            let finished = state.observe(DataExtent::from(entry), class);
            for stripe in finished {
                self.process_stripe(
                    container, oid, dkey, akey, class, peers, map_version, epoch_range, &mut state,
                    stripe, report,
                )?;
            }

            *credits += 1;
            if *credits >= self.credits_max {
                *credits = 0;
                if yield_fn() {
                    *aborted = true;
                    return Ok(());
                }
            }
        }

        for stripe in state.flush(class) {
            self.process_stripe(
                container, oid, dkey, akey, class, peers, map_version, epoch_range, &mut state,
                stripe, report,
            )?;
        }
        Ok(())
    }

    /// Probe, classify and dispatch one finished stripe, cf. spec.md §4.4.
    #[allow(clippy::too_many_arguments)]
    fn process_stripe(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        class: &EcClass,
        peers: &[Peer],
        map_version: MapVersion,
        epoch_range: (Epoch, Epoch),
        state: &mut AkeyState,
        stripe: AssembledStripe,
        report: &mut AggregateReport,
    ) -> AggResult<()> {
        let probe = probe_parity(self.store, container, oid, dkey, akey, class, stripe.stripe_num)?;
        let action = classify(class, &stripe, &probe, stripe.stripe_num);
        report.record(&action);

        let stripe_start = stripe.stripe_num * class.stripe_records();
        let stripe_end = stripe_start + class.stripe_records();
        let hold_overs_pending = !state.hold_over_extents.is_empty();

        match &action {
            Action::NoOp => return Ok(()),
            Action::Drop => {
                self.run_removal_only(container, oid, dkey, akey, map_version, epoch_range, peers, &stripe)?;
            }
            Action::FullEncode | Action::FullRecalc => {
                self.run_full_encode_like(
                    container, oid, dkey, akey, class, peers, map_version, epoch_range, &stripe,
                    matches!(action, Action::FullRecalc),
                )?;
            }
            Action::PartialUpdate { touched_cells } => {
                self.run_partial_update(
                    container, oid, dkey, akey, class, peers, map_version, epoch_range, &stripe,
                    &probe, touched_cells,
                )?;
            }
            Action::HoleFill => {
                self.run_hole_fill(container, oid, dkey, akey, class, peers, map_version, &stripe)?;
            }
        }

        super::committer::remove_replicas(
            self.store, container, oid, epoch_range, dkey, akey, class, &stripe, hold_overs_pending,
        )?;
        let retired = state.retire_hold_overs(stripe_start, stripe_end);
        super::committer::remove_retired_hold_overs(self.store, container, oid, dkey, akey, &retired)?;
        Ok(())
    }

    fn run_removal_only(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        map_version: MapVersion,
        epoch_range: (Epoch, Epoch),
        peers: &[Peer],
        stripe: &AssembledStripe,
    ) -> AggResult<()> {
        let remove: Vec<(Recx, Epoch)> = stripe
            .data_extents
            .iter()
            .map(|e| (e.orig_recx, e.epoch))
            .collect();
        let ctx = AggregateRpcCtx {
            pool: self.pool,
            container,
            oid,
            dkey,
            akey,
            epoch_range,
            stripe_num: stripe.stripe_num,
            map_version,
            remove,
        };
        coordinator::send_aggregate(self.transport, self.membership, peers, &ctx, None)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_full_encode_like(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        class: &EcClass,
        peers: &[Peer],
        map_version: MapVersion,
        epoch_range: (Epoch, Epoch),
        stripe: &AssembledStripe,
        needs_remote_fetch: bool,
    ) -> AggResult<()> {
        let stripe_start = stripe.stripe_num * class.stripe_records();
        let mut data_cells = Vec::with_capacity(class.k());
        for cell in 0..class.k() {
            let cell_recx = Recx::new(stripe_start + cell as u64 * class.cell_records(), class.cell_records());
            let locally_full = stripe
                .data_extents
                .iter()
                .any(|e| !e.is_hole && e.recx.contains(cell_recx.start) && e.recx.end() >= cell_recx.end());
            let bytes = if locally_full {
                self.store.fetch(container, oid, stripe.hi_epoch, dkey, akey, cell_recx)?
            } else if needs_remote_fetch {
                self.fetch_remote_cell(oid, dkey, akey, cell_recx, stripe.hi_epoch)?
            } else {
                return Err(AggError::Invariant(format!(
                    "cell {cell} missing locally but full-encode does not allow remote fetch"
                )));
            };
            data_cells.push(bytes);
        }

        let rs = codec_ops::reed_solomon_for(class);
        let encoded = if needs_remote_fetch {
            codec_ops::recalc(class, &rs, data_cells)?
        } else {
            codec_ops::encode_full(class, &rs, data_cells)?
        };
        let parity_cells: Vec<Vec<u8>> = encoded.as_parity().iter().map(|c| c.as_ref().to_vec()).collect();

        // Abort before any local mutation if a peer is down, cf. spec.md
        // §4.6: `send_aggregate` below re-checks this itself, but by then
        // `commit_parity` would already have landed.
        coordinator::check_peers_healthy(self.membership, self.pool, map_version, peers)?;

        super::committer::commit_parity(
            self.store, container, oid, stripe.hi_epoch, map_version, dkey, akey, class,
            stripe.stripe_num, &parity_cells[class.pidx(self.shard_index).expect("parity shard")],
        )?;

        let remove: Vec<(Recx, Epoch)> = stripe.data_extents.iter().map(|e| (e.orig_recx, e.epoch)).collect();
        let ctx = AggregateRpcCtx {
            pool: self.pool,
            container,
            oid,
            dkey,
            akey,
            epoch_range,
            stripe_num: stripe.stripe_num,
            map_version,
            remove,
        };
        coordinator::send_aggregate(self.transport, self.membership, peers, &ctx, Some(&parity_cells))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_partial_update(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        class: &EcClass,
        peers: &[Peer],
        map_version: MapVersion,
        epoch_range: (Epoch, Epoch),
        stripe: &AssembledStripe,
        probe: &ParityProbe,
        touched_cells: &[usize],
    ) -> AggResult<()> {
        let ParityProbe::Present { epoch: parity_epoch, .. } = *probe else {
            return Err(AggError::Invariant("partial-update with no parity present".into()));
        };
        let stripe_start = stripe.stripe_num * class.stripe_records();
        let rs = codec_ops::reed_solomon_for(class);

        let mut old_cells = Vec::with_capacity(touched_cells.len());
        let mut updates = Vec::with_capacity(touched_cells.len());
        for &cell in touched_cells {
            let cell_recx = Recx::new(stripe_start + cell as u64 * class.cell_records(), class.cell_records());
            let old = self.store.fetch(container, oid, parity_epoch, dkey, akey, cell_recx)?;
            let new = self.store.fetch(container, oid, stripe.hi_epoch, dkey, akey, cell_recx)?;
            let mut diff = vec![0u8; old.len()];
            codec_ops_xor_diff(&old, &new, &mut diff);
            zero_diff_outside_spans(&mut diff, cell_recx, &stripe.data_extents);
            // `ReedSolomon::delta_update` computes `old ^ update_slice`
            // itself and then overwrites the stored source cell with
            // `update_slice`, so it must be fed the reconstructed new-cell
            // image (old outside the written spans, new inside them), not
            // the pre-computed diff — passing the diff would both corrupt
            // parity for every untouched byte and corrupt the stored cell.
            let new_image: Vec<u8> = old.iter().zip(diff.iter()).map(|(o, d)| o ^ d).collect();
            old_cells.push((cell, old));
            updates.push((cell, 0usize, new_image));
        }

        // Each parity shard only ever holds its own parity cell locally;
        // `incremental_update`'s per-cell delta math is independent across
        // `p`, so the other P-1 slots are zero-filled placeholders the
        // codec computes but this shard discards — only `parity_cells[pidx]`
        // is read back below.
        let pidx = class.pidx(self.shard_index).expect("parity shard");
        let local_parity = self.store.fetch(
            container, oid, parity_epoch, dkey, akey, class.parity_recx(stripe.stripe_num),
        )?;
        let mut parity_cells = vec![vec![0u8; local_parity.len()]; class.p()];
        parity_cells[pidx] = local_parity;

        let updated = codec_ops::incremental_update(class, &rs, old_cells, parity_cells, updates)?;

        coordinator::check_peers_healthy(self.membership, self.pool, map_version, peers)?;

        super::committer::commit_parity(
            self.store, container, oid, stripe.hi_epoch, map_version, dkey, akey, class,
            stripe.stripe_num, &updated[class.pidx(self.shard_index).expect("parity shard")],
        )?;

        let remove: Vec<(Recx, Epoch)> = stripe.data_extents.iter().map(|e| (e.orig_recx, e.epoch)).collect();
        let ctx = AggregateRpcCtx {
            pool: self.pool,
            container,
            oid,
            dkey,
            akey,
            epoch_range,
            stripe_num: stripe.stripe_num,
            map_version,
            remove,
        };
        coordinator::send_aggregate(self.transport, self.membership, peers, &ctx, Some(&updated))
    }

    fn run_hole_fill(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        class: &EcClass,
        peers: &[Peer],
        map_version: MapVersion,
        stripe: &AssembledStripe,
    ) -> AggResult<()> {
        let handle = self.object_client.obj_open(container, oid)?;
        let mut ranges = Vec::new();
        let mut data = Vec::new();
        for extent in &stripe.data_extents {
            if extent.is_hole {
                continue;
            }
            let bytes = self.object_client.obj_fetch(
                handle, stripe.hi_epoch, dkey, akey, extent.recx, None,
            )?;
            data.extend_from_slice(&bytes);
            ranges.push(extent.recx);
        }
        // Valid ranges pulled from data shards are written locally as
        // replicas (no parity for a stripe with an unrepaired hole).
        self.store.update(
            container, oid, stripe.hi_epoch, map_version, dkey, akey,
            combined_recx(&ranges), &data,
        )?;
        // Peer coordination must precede the local parity removal below, cf.
        // spec.md §5: a crash between the two must leave peer state at worst
        // equal to local, never ahead of it.
        coordinator::send_replicate(
            self.transport, self.membership, peers, self.pool, container, oid, dkey, akey,
            stripe.stripe_num, stripe.hi_epoch, map_version, data, ranges, Vec::new(),
        )?;

        // The existing parity cell (if any) was necessarily committed at an
        // epoch <= hi_epoch; (hi_epoch, hi_epoch) would miss it entirely,
        // cf. the wide (0, epoch) range the peer RPC handler uses for the
        // same removal in `testkit::cluster::ClusterRpcTransport::ec_replicate`.
        super::committer::remove_parity(
            self.store, container, oid, (0, stripe.hi_epoch), dkey, akey, class, stripe.stripe_num,
        )
    }

    fn fetch_remote_cell(
        &self,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        cell_recx: Recx,
        epoch: Epoch,
    ) -> AggResult<Vec<u8>> {
        let handle = ObjectHandle(oid);
        self.object_client
            .obj_fetch(handle, epoch, dkey, akey, cell_recx, None)
    }

    fn peer_locations(&self, container: ContainerId, oid: Oid, class: &EcClass, pidx: usize) -> AggResult<Vec<Peer>> {
        let handle = self.object_client.obj_open(container, oid)?;
        let layout = self.object_client.obj_layout(handle)?;
        let mut peers = Vec::with_capacity(class.p().saturating_sub(1));
        for p in 0..class.p() {
            if p == pidx {
                continue;
            }
            if let Some(&location) = layout.get(class.k() + p) {
                peers.push(Peer { pidx: p, location });
            }
        }
        Ok(peers)
    }
}

/// Byte-wise XOR diff, cf. spec.md §4.5.
fn codec_ops_xor_diff(old: &[u8], new: &[u8], diff: &mut [u8]) {
    for ((o, n), d) in old.iter().zip(new.iter()).zip(diff.iter_mut()) {
        *d = o ^ n;
    }
}

/// Zero bytes of `diff` outside the spans a replica newer than parity
/// actually covers, cf. spec.md §4.5's "diff pre-process": holes-within-a
/// cell must not corrupt parity.
fn zero_diff_outside_spans(diff: &mut [u8], cell_recx: Recx, extents: &[DataExtent]) {
    let record_bytes = diff.len() as u64 / cell_recx.len.max(1);
    let mut covered = vec![false; diff.len()];
    for e in extents {
        if e.is_hole {
            continue;
        }
        if let Some(overlap) = e.recx.intersect(&cell_recx) {
            let start = (overlap.start - cell_recx.start) * record_bytes;
            let end = (overlap.end() - cell_recx.start) * record_bytes;
            for byte in covered.iter_mut().take(end as usize).skip(start as usize) {
                *byte = true;
            }
        }
    }
    for (byte, is_covered) in diff.iter_mut().zip(covered.iter()) {
        if !*is_covered {
            *byte = 0;
        }
    }
}

/// The smallest recx spanning a set of (assumed contiguous once sorted)
/// fetched ranges, used to write the hole-fill replicate payload in one
/// `update` call.
fn combined_recx(ranges: &[Recx]) -> Recx {
    let start = ranges.iter().map(|r| r.start).min().unwrap_or(0);
    let end = ranges.iter().map(|r| r.end()).max().unwrap_or(0);
    Recx::new(start, end - start)
}
