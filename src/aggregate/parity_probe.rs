//! Parity probe: looks up whatever parity already exists for a stripe, cf.
//! spec.md §4.3.

use crate::ec_class::EcClass;
use crate::store::ExtentStore;
use crate::types::{AKey, ContainerId, DKey, Oid};
use crate::AggResult;

use super::state::ParityProbe;

/// Probe the reserved parity range for `stripe_num`. `Absent` is the
/// sentinel for "no parity yet", cf. spec.md §4.3.
pub fn probe_parity(
    store: &impl ExtentStore,
    container: ContainerId,
    oid: Oid,
    dkey: &DKey,
    akey: &AKey,
    class: &EcClass,
    stripe_num: u64,
) -> AggResult<ParityProbe> {
    let parity_recx = class.parity_recx(stripe_num);
    let found = store.parity_extent(container, oid, dkey, akey, parity_recx)?;
    Ok(match found {
        Some((recx, epoch)) => ParityProbe::Present { recx, epoch },
        None => ParityProbe::Absent,
    })
}
