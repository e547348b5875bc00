//! Peer coordinator: ships generated parity (or re-replicated data) and a
//! removal list to the other parity shards of the object, cf. spec.md §4.6.

use crate::membership::Membership;
use crate::recx::Recx;
use crate::rpc::{
    BulkHandle, EcAggregateRequest, EcReplicateRequest, RpcTransport, Status, TaskId,
};
use crate::types::{AKey, ContainerId, DKey, Epoch, MapVersion, Oid, PoolId, ShardLocation};
use crate::AggError;
use crate::AggResult;

/// One other parity shard of the object, addressed by its `pidx` (`[0, P)`,
/// excluding this shard's own index) and its current network location.
#[derive(Debug, Clone, Copy)]
pub struct Peer {
    pub pidx: usize,
    pub location: ShardLocation,
}

/// Abort the stripe before any RPC is sent if any peer in `peers` is on the
/// pool map's failed-targets list, cf. spec.md §4.6: "Before sending,
/// consult the failed-targets list from the current pool map; if any peer
/// is failed, abort the stripe (without partial commit)."
pub fn check_peers_healthy(
    membership: &impl Membership,
    pool: PoolId,
    map_version: MapVersion,
    peers: &[Peer],
) -> AggResult<()> {
    let failed = membership.failed_targets(pool, map_version);
    if peers.iter().any(|p| failed.contains(&p.location)) {
        return Err(AggError::PeerFailed(
            "one or more peer parity targets are on the failed-targets list".into(),
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub struct AggregateRpcCtx<'a> {
    pub pool: PoolId,
    pub container: ContainerId,
    pub oid: Oid,
    pub dkey: &'a DKey,
    pub akey: &'a AKey,
    pub epoch_range: (Epoch, Epoch),
    pub stripe_num: u64,
    pub map_version: MapVersion,
    pub remove: Vec<(Recx, Epoch)>,
}

/// Send `EC_AGGREGATE` to every peer, carrying `parity_cells[peer.pidx]` (or
/// no bulk handle when `write_parity` is false — the held-over, "removal
/// only" invocation noted in spec.md §9) plus the removal list.
pub fn send_aggregate(
    transport: &impl RpcTransport,
    membership: &impl Membership,
    peers: &[Peer],
    ctx: &AggregateRpcCtx,
    parity_cells: Option<&[Vec<u8>]>,
) -> AggResult<()> {
    check_peers_healthy(membership, ctx.pool, ctx.map_version, peers)?;

    for peer in peers {
        let parity_bulk: Option<BulkHandle> = parity_cells
            .map(|cells| transport.register_bulk(cells[peer.pidx].clone()));
        let req = EcAggregateRequest {
            task_id: TaskId::assign(),
            pool: ctx.pool,
            container: ctx.container,
            oid: ctx.oid,
            dkey: ctx.dkey.clone(),
            akey: ctx.akey.clone(),
            epoch_range: ctx.epoch_range,
            stripe_num: ctx.stripe_num,
            map_version: ctx.map_version,
            parity_bulk,
            remove: ctx.remove.clone(),
        };
        let resp = transport.ec_aggregate(peer.location, req)?;
        check_status(resp.status)?;
    }
    Ok(())
}

/// Send `EC_REPLICATE` to every peer (including our own parity index's
/// counterparts on other shards — the hole-fill branch has no "self" to
/// skip since every parity shard independently drops its stale parity and
/// gains the replicated ranges), cf. spec.md §4.4's hole-fill action and
/// §4.6.
#[allow(clippy::too_many_arguments)]
pub fn send_replicate(
    transport: &impl RpcTransport,
    membership: &impl Membership,
    peers: &[Peer],
    pool: PoolId,
    container: ContainerId,
    oid: Oid,
    dkey: &DKey,
    akey: &AKey,
    stripe_num: u64,
    epoch: Epoch,
    map_version: MapVersion,
    data: Vec<u8>,
    ranges: Vec<Recx>,
    checksums: Vec<Vec<u8>>,
) -> AggResult<()> {
    check_peers_healthy(membership, pool, map_version, peers)?;

    for peer in peers {
        let data_bulk = transport.register_bulk(data.clone());
        let req = EcReplicateRequest {
            task_id: TaskId::assign(),
            pool,
            container,
            oid,
            dkey: dkey.clone(),
            akey: akey.clone(),
            stripe_num,
            epoch,
            map_version,
            data_bulk,
            ranges: ranges.clone(),
            checksums: checksums.clone(),
        };
        let resp = transport.ec_replicate(peer.location, req)?;
        check_status(resp.status)?;
    }
    Ok(())
}

fn check_status(status: Status) -> AggResult<()> {
    match status {
        Status::Ok => Ok(()),
        Status::NeedsRefresh => Err(AggError::NeedsRefresh("peer reported needs-refresh".into())),
        Status::PeerFailed => Err(AggError::PeerFailed("peer reported failure".into())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rpc::{EcAggregateResponse, EcReplicateResponse};
    use std::cell::RefCell;

    struct FakeMembership {
        failed: Vec<ShardLocation>,
    }
    impl Membership for FakeMembership {
        fn is_leader(&self, _pool: PoolId, _oid: Oid, _map_version: MapVersion) -> bool {
            true
        }
        fn failed_targets(&self, _pool: PoolId, _map_version: MapVersion) -> Vec<ShardLocation> {
            self.failed.clone()
        }
        fn current_map_version(&self, _pool: PoolId) -> MapVersion {
            0
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: RefCell<Vec<EcAggregateRequest>>,
    }
    impl RpcTransport for FakeTransport {
        fn resolve_bulk(&self, _handle: BulkHandle) -> AggResult<Vec<u8>> {
            unimplemented!()
        }
        fn register_bulk(&self, _data: Vec<u8>) -> BulkHandle {
            BulkHandle(0)
        }
        fn ec_aggregate(
            &self,
            _peer: ShardLocation,
            req: EcAggregateRequest,
        ) -> AggResult<EcAggregateResponse> {
            let task_id = req.task_id;
            self.sent.borrow_mut().push(req);
            Ok(EcAggregateResponse { task_id, status: Status::Ok })
        }
        fn ec_replicate(
            &self,
            _peer: ShardLocation,
            req: EcReplicateRequest,
        ) -> AggResult<EcReplicateResponse> {
            Ok(EcReplicateResponse { task_id: req.task_id, status: Status::Ok })
        }
    }

    fn loc(n: u32) -> ShardLocation {
        ShardLocation { rank: n, target_index: n }
    }

    #[test]
    fn aborts_when_peer_failed() {
        let transport = FakeTransport::default();
        let membership = FakeMembership { failed: vec![loc(1)] };
        let peers = [Peer { pidx: 0, location: loc(1) }];
        let ctx = AggregateRpcCtx {
            pool: PoolId(0),
            container: ContainerId(0),
            oid: 0,
            dkey: &vec![],
            akey: &vec![],
            epoch_range: (0, 5),
            stripe_num: 0,
            map_version: 0,
            remove: vec![],
        };
        let err = send_aggregate(&transport, &membership, &peers, &ctx, None).unwrap_err();
        assert!(matches!(err, AggError::PeerFailed(_)));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn sends_one_request_per_healthy_peer() {
        let transport = FakeTransport::default();
        let membership = FakeMembership { failed: vec![] };
        let peers = [
            Peer { pidx: 0, location: loc(1) },
            Peer { pidx: 1, location: loc(2) },
        ];
        let ctx = AggregateRpcCtx {
            pool: PoolId(0),
            container: ContainerId(0),
            oid: 0,
            dkey: &vec![],
            akey: &vec![],
            epoch_range: (0, 5),
            stripe_num: 0,
            map_version: 0,
            remove: vec![],
        };
        let cells = vec![vec![1u8; 4], vec![2u8; 4]];
        send_aggregate(&transport, &membership, &peers, &ctx, Some(&cells)).unwrap();
        assert_eq!(transport.sent.borrow().len(), 2);
    }
}
