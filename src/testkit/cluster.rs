//! Ties together one in-process "cluster" of [`InMemoryExtentStore`]s (one
//! per object shard, data and parity alike) behind the [`ObjectClient`] and
//! [`RpcTransport`] collaborators, simulating cross-shard fetch and peer RPC
//! as direct calls into a sibling shard's store rather than real network
//! hops — cf. the teacher's `cluster::worker` talking to a shared Redis
//! instance in its own integration tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ec_class::EcClass;
use crate::membership::Membership;
use crate::object_client::{ObjectClient, ObjectHandle};
use crate::recx::Recx;
use crate::rpc::{
    BulkHandle, EcAggregateRequest, EcAggregateResponse, EcReplicateRequest, EcReplicateResponse,
    RpcTransport, Status,
};
use crate::types::{AKey, ContainerId, DKey, Epoch, MapVersion, Oid, PoolId, ShardLocation};
use crate::AggResult;

use super::store::InMemoryExtentStore;

/// `K+P` per-shard stores plus the object layout, addressable by shard index.
pub struct Cluster {
    pub container: ContainerId,
    shards: Vec<Rc<InMemoryExtentStore>>,
    failed: RefCell<Vec<ShardLocation>>,
}

impl Cluster {
    pub fn new(num_shards: usize) -> Self {
        Self {
            container: ContainerId(1),
            shards: (0..num_shards).map(|_| Rc::new(InMemoryExtentStore::new())).collect(),
            failed: RefCell::new(Vec::new()),
        }
    }

    pub fn shard(&self, index: usize) -> Rc<InMemoryExtentStore> {
        Rc::clone(&self.shards[index])
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn location(&self, shard_index: usize) -> ShardLocation {
        ShardLocation { rank: 0, target_index: shard_index as u32 }
    }

    pub fn mark_failed(&self, shard_index: usize) {
        self.failed.borrow_mut().push(self.location(shard_index));
    }

    /// Build an [`ObjectClient`]/[`RpcTransport`] pair scoped to this
    /// cluster — both just borrow it, so they're cheap to construct once
    /// per shard's [`crate::aggregate::AggregateEngine`].
    pub fn client(&self) -> ClusterObjectClient<'_> {
        ClusterObjectClient { cluster: self }
    }

    pub fn transport(&self) -> ClusterRpcTransport<'_> {
        ClusterRpcTransport { cluster: self, bulk: RefCell::new(HashMap::new()), next_handle: RefCell::new(0) }
    }

    pub fn membership(&self) -> ClusterMembership<'_> {
        ClusterMembership { cluster: self }
    }
}

pub struct ClusterObjectClient<'a> {
    cluster: &'a Cluster,
}

impl ObjectClient for ClusterObjectClient<'_> {
    fn obj_open(&self, _container: ContainerId, oid: Oid) -> AggResult<ObjectHandle> {
        Ok(ObjectHandle(oid))
    }

    fn obj_layout(&self, _handle: ObjectHandle) -> AggResult<Vec<ShardLocation>> {
        Ok((0..self.cluster.num_shards()).map(|i| self.cluster.location(i)).collect())
    }

    fn obj_fetch(
        &self,
        handle: ObjectHandle,
        epoch: Epoch,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
        peer_shard: Option<usize>,
    ) -> AggResult<Vec<u8>> {
        use crate::store::ExtentStore;
        if let Some(shard) = peer_shard {
            return self.cluster.shard(shard).fetch(self.cluster.container, handle.0, epoch, dkey, akey, recx);
        }
        let mut last_err = None;
        for i in 0..self.cluster.num_shards() {
            match self.cluster.shard(i).fetch(self.cluster.container, handle.0, epoch, dkey, akey, recx) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.expect("at least one shard in a non-empty cluster"))
    }
}

pub struct ClusterRpcTransport<'a> {
    cluster: &'a Cluster,
    bulk: RefCell<HashMap<u64, Vec<u8>>>,
    next_handle: RefCell<u64>,
}

impl RpcTransport for ClusterRpcTransport<'_> {
    fn resolve_bulk(&self, handle: BulkHandle) -> AggResult<Vec<u8>> {
        self.bulk
            .borrow()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| crate::AggError::Other("unknown bulk handle".into()))
    }

    fn register_bulk(&self, data: Vec<u8>) -> BulkHandle {
        let mut next = self.next_handle.borrow_mut();
        let handle = BulkHandle(*next);
        *next += 1;
        self.bulk.borrow_mut().insert(handle.0, data);
        handle
    }

    /// Apply the request directly to the addressed peer's store, the way a
    /// real `EC_AGGREGATE` handler would on receipt: write the shipped
    /// parity cell (if any) and then run the removal list.
    fn ec_aggregate(
        &self,
        peer: ShardLocation,
        req: EcAggregateRequest,
    ) -> AggResult<EcAggregateResponse> {
        use crate::store::ExtentStore;
        let task_id = req.task_id;
        let shard = self.cluster.shard(peer.target_index as usize);

        if let Some(bulk) = req.parity_bulk {
            let attrs = shard.oclass_attrs(req.oid)?;
            let class = EcClass::new(attrs.k, attrs.p, attrs.l, attrs.record_size);
            let bytes = self.resolve_bulk(bulk)?;
            shard.update(
                req.container,
                req.oid,
                req.epoch_range.1,
                req.map_version,
                &req.dkey,
                &req.akey,
                class.parity_recx(req.stripe_num),
                &bytes,
            )?;
        }
        for (recx, epoch) in &req.remove {
            shard.range_remove(req.container, req.oid, (*epoch, *epoch), &req.dkey, &req.akey, *recx)?;
        }
        Ok(EcAggregateResponse { task_id, status: Status::Ok })
    }

    /// Apply a hole-fill replicate directly: write the shipped ranges as
    /// replicas and drop the peer's own parity for that stripe.
    fn ec_replicate(
        &self,
        peer: ShardLocation,
        req: EcReplicateRequest,
    ) -> AggResult<EcReplicateResponse> {
        use crate::store::ExtentStore;
        let task_id = req.task_id;
        let shard = self.cluster.shard(peer.target_index as usize);
        let bytes = self.resolve_bulk(req.data_bulk)?;
        let combined = combined_recx(&req.ranges);
        shard.update(req.container, req.oid, req.epoch, req.map_version, &req.dkey, &req.akey, combined, &bytes)?;

        let attrs = shard.oclass_attrs(req.oid)?;
        let class = EcClass::new(attrs.k, attrs.p, attrs.l, attrs.record_size);
        shard.range_remove(
            req.container,
            req.oid,
            (0, req.epoch),
            &req.dkey,
            &req.akey,
            class.parity_recx(req.stripe_num),
        )?;
        Ok(EcReplicateResponse { task_id, status: Status::Ok })
    }
}

fn combined_recx(ranges: &[Recx]) -> Recx {
    let start = ranges.iter().map(|r| r.start).min().unwrap_or(0);
    let end = ranges.iter().map(|r| r.end()).max().unwrap_or(0);
    Recx::new(start, end - start)
}

pub struct ClusterMembership<'a> {
    cluster: &'a Cluster,
}

impl Membership for ClusterMembership<'_> {
    fn is_leader(&self, _pool: PoolId, _oid: Oid, _map_version: MapVersion) -> bool {
        true
    }

    fn failed_targets(&self, _pool: PoolId, _map_version: MapVersion) -> Vec<ShardLocation> {
        self.cluster.failed.borrow().clone()
    }

    fn current_map_version(&self, _pool: PoolId) -> MapVersion {
        0
    }
}
