//! The object-client API consumed for cross-shard data pulls, cf. spec.md
//! §1, §6. Used by full-recalc to fetch the complementary data cells from
//! remote data shards at `hi_epoch`.

use crate::recx::Recx;
use crate::types::{AKey, ContainerId, DKey, Epoch, Oid, ShardLocation};
use crate::AggResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle(pub Oid);

pub trait ObjectClient {
    fn obj_open(&self, container: ContainerId, oid: Oid) -> AggResult<ObjectHandle>;

    /// The shard locations of an object, indexed by shard index `[0, K+P)`.
    fn obj_layout(&self, handle: ObjectHandle) -> AggResult<Vec<ShardLocation>>;

    /// Fetch `recx` of `(dkey, akey)` at `epoch`, from a specific data shard
    /// when `peer_shard` is given, otherwise from any shard holding it.
    fn obj_fetch(
        &self,
        handle: ObjectHandle,
        epoch: Epoch,
        dkey: &DKey,
        akey: &AKey,
        recx: Recx,
        peer_shard: Option<usize>,
    ) -> AggResult<Vec<u8>>;
}
