//! The extent-store API this engine consumes, cf. spec.md §1, §6. The real
//! collaborator is a versioned key-value / extent store ("VOS" in the
//! original system); this crate only needs the operations below, modeled on
//! the teacher's `BlockStorage`/`SliceStorage` traits
//! (`storage::{BlockStorage, SliceStorage}`) generalized from fixed-size
//! blocks to versioned, epoch-ranged, variable-length recxs.

use crate::recx::Recx;
use crate::types::{AKey, ContainerId, DKey, EcClassAttrs, Epoch, MapVersion, Oid, PoolId};
use crate::AggResult;

/// One visible data extent surfaced by iteration, cf. spec.md §3's
/// `data_extents` and §4.1's recx traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentEntry {
    /// The extent's footprint as currently visible (after any prior trims).
    pub recx: Recx,
    /// The extent's footprint as originally written, before any trimming by
    /// this or a previous aggregation run — needed to decide whether a
    /// replica is fully contained in the stripe being processed, cf.
    /// spec.md §3's containment invariant.
    pub orig_recx: Recx,
    pub epoch: Epoch,
    pub is_hole: bool,
    /// Present only when the container has checksums enabled, cf. spec.md §6.
    pub has_checksum: bool,
}

/// The akeys (and their extent population) under one dkey, returned in
/// traversal order. The driver iterates objects, then dkeys, then akeys, then
/// recxs within an akey, cf. spec.md §4.1.
pub trait ExtentStore {
    /// Objects visible under this container in the epoch range, in a stable
    /// order (object-id order is sufficient, cf. spec.md §4.1).
    fn objects(&self, container: ContainerId) -> AggResult<Vec<Oid>>;

    fn dkeys(&self, container: ContainerId, oid: Oid) -> AggResult<Vec<DKey>>;

    fn akeys(&self, container: ContainerId, oid: Oid, dkey: &DKey) -> AggResult<Vec<AKey>>;

    /// Visible, non-parity extents in `[lo, hi]` for one akey, ordered by
    /// start offset then epoch, cf. spec.md §4.1's "visible-extents mode".
    fn data_extents(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        epoch_range: (Epoch, Epoch),
    ) -> AggResult<Vec<ExtentEntry>>;

    /// Probe the reserved parity address range for one stripe, cf. spec.md
    /// §4.3. `Ok(None)` encodes the "no parity" sentinel.
    fn parity_extent(
        &self,
        container: ContainerId,
        oid: Oid,
        dkey: &DKey,
        akey: &AKey,
        parity_recx: Recx,
    ) -> AggResult<Option<(Recx, Epoch)>>;

    /// Fetch the bytes backing one recx at a given epoch.
    fn fetch(
        &self,
        container: ContainerId,
        oid: Oid,
        epoch: Epoch,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
    ) -> AggResult<Vec<u8>>;

    /// Write (create or overwrite) one recx at `epoch`.
    fn update(
        &self,
        container: ContainerId,
        oid: Oid,
        epoch: Epoch,
        pool_map_version: MapVersion,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
        data: &[u8],
    ) -> AggResult<()>;

    /// Remove a recx, bounded by an epoch range. Idempotent over empty
    /// ranges, cf. spec.md §5's at-most-once reasoning.
    fn range_remove(
        &self,
        container: ContainerId,
        oid: Oid,
        epoch_range: (Epoch, Epoch),
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
    ) -> AggResult<()>;

    fn oclass_attrs(&self, oid: Oid) -> AggResult<EcClassAttrs>;

    fn is_leader(&self, pool: PoolId, oid: Oid, map_version: MapVersion) -> bool;

    /// The container's "last aggregated epoch" watermark, process-wide state
    /// cf. spec.md §9: advanced only on a fully successful run, under the
    /// caller's transaction discipline.
    fn last_aggregated_epoch(&self, container: ContainerId) -> AggResult<Epoch>;

    fn advance_watermark(&self, container: ContainerId, epoch: Epoch) -> AggResult<()>;
}
