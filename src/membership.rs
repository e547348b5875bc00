//! Pool/container membership and leader election, cf. spec.md §1, §6.

use crate::types::{MapVersion, Oid, PoolId, ShardLocation};

pub trait Membership {
    fn is_leader(&self, pool: PoolId, oid: Oid, map_version: MapVersion) -> bool;

    /// Shard locations currently marked failed in the pool map at
    /// `map_version`, cf. spec.md §4.6: "Before sending, consult the
    /// failed-targets list from the current pool map."
    fn failed_targets(&self, pool: PoolId, map_version: MapVersion) -> Vec<ShardLocation>;

    fn current_map_version(&self, pool: PoolId) -> MapVersion;
}
