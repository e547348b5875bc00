//! The RPC surface exchanged with peer parity shards, cf. spec.md §4.6, §6.
//!
//! Wire-shape follows the teacher's `cluster::messages` design
//! (`cluster::messages::{coordinator_request, payload}`): a `bincode`
//! envelope carrying a `uuid` v7 correlation id, with the bulk payload (the
//! parity cell, or the re-replicated ranges) referenced out-of-band from the
//! control envelope rather than inlined — the teacher ships that payload
//! through a Redis `SET`/`GET`; this crate generalizes the split into a
//! `BulkHandle` the transport resolves however it likes (a registered
//! in-process buffer for `testkit`, a real RDMA/bulk handle in a production
//! deployment).

use crate::recx::Recx;
use crate::types::{AKey, ContainerId, DKey, Epoch, MapVersion, Oid, PoolId, ShardLocation};
use crate::AggResult;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TaskId(#[serde(with = "uuid::serde::compact")] uuid::Uuid);

impl TaskId {
    pub fn assign() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

/// A handle to bulk memory (the parity cell being shipped, or the ranges
/// being re-replicated) registered with the transport for zero-copy
/// transfer, cf. spec.md §3's "Peer RPC request buffers are owned by the
/// coordinator until reply."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkHandle(pub u64);

/// `EC_AGGREGATE(pool, cont, oid, dkey, akey, [epr_lo, epr_hi], stripe_num,
/// map_ver, optional parity_bulk, remove_recxs[], remove_epochs[])`, cf.
/// spec.md §6.
#[derive(Debug, Clone)]
pub struct EcAggregateRequest {
    pub task_id: TaskId,
    pub pool: PoolId,
    pub container: ContainerId,
    pub oid: Oid,
    pub dkey: DKey,
    pub akey: AKey,
    pub epoch_range: (Epoch, Epoch),
    pub stripe_num: u64,
    pub map_version: MapVersion,
    /// `None` for a removal-only invocation, cf. spec.md §9's open question
    /// on the held-over path: write_parity=false is modeled as omitting the
    /// bulk handle rather than overloading the parity-write RPC with a
    /// sentinel.
    pub parity_bulk: Option<BulkHandle>,
    pub remove: Vec<(Recx, Epoch)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NeedsRefresh,
    PeerFailed,
}

#[derive(Debug, Clone)]
pub struct EcAggregateResponse {
    pub task_id: TaskId,
    pub status: Status,
}

/// `EC_REPLICATE(pool, cont, oid, dkey, iod, stripe_num, epoch, map_ver,
/// data_bulk)`, cf. spec.md §6. Sent instead of `EC_AGGREGATE` for the
/// hole-fill branch: the receiver writes the shipped ranges as replicas and
/// range-removes its own parity.
#[derive(Debug, Clone)]
pub struct EcReplicateRequest {
    pub task_id: TaskId,
    pub pool: PoolId,
    pub container: ContainerId,
    pub oid: Oid,
    pub dkey: DKey,
    pub akey: AKey,
    pub stripe_num: u64,
    pub epoch: Epoch,
    pub map_version: MapVersion,
    pub data_bulk: BulkHandle,
    /// The spans within the stripe the bulk data actually covers (the
    /// non-hole valid ranges pulled from data shards), cf. spec.md §4.6.
    pub ranges: Vec<Recx>,
    /// Checksums for the shipped ranges, present only when
    /// `checksums_enabled`, cf. spec.md §6.
    pub checksums: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct EcReplicateResponse {
    pub task_id: TaskId,
    pub status: Status,
}

/// The transport to peer parity shards, cf. spec.md §1, §6.
pub trait RpcTransport {
    fn resolve_bulk(&self, handle: BulkHandle) -> AggResult<Vec<u8>>;
    fn register_bulk(&self, data: Vec<u8>) -> BulkHandle;

    fn ec_aggregate(
        &self,
        peer: ShardLocation,
        req: EcAggregateRequest,
    ) -> AggResult<EcAggregateResponse>;

    fn ec_replicate(
        &self,
        peer: ShardLocation,
        req: EcReplicateRequest,
    ) -> AggResult<EcReplicateResponse>;
}
