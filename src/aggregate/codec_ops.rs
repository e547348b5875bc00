//! Parity codec operations built on top of [`crate::erasure_code`], cf.
//! spec.md §4.5. The driver is responsible for getting the right bytes in
//! front of these functions (via [`crate::store::ExtentStore`] or
//! [`crate::object_client::ObjectClient`]); this module only runs the
//! Galois-field arithmetic.

use std::num::NonZeroUsize;

use crate::ec_class::EcClass;
use crate::erasure_code::{Cell, ErasureCode, PartialStripe, ReedSolomon, Stripe};
use crate::AggResult;

fn nz(v: usize) -> NonZeroUsize {
    NonZeroUsize::new(v).expect("ec class dimension is always non-zero")
}

/// Build a `ReedSolomon` codec sharing the precomputed tables of an
/// [`EcClass`], instead of rebuilding the Galois-field matrix per stripe, cf.
/// spec.md §4.5.
pub fn reed_solomon_for(class: &EcClass) -> ReedSolomon {
    let tables = class.gftbls();
    ReedSolomon::from_tables(
        class.k(),
        class.p(),
        tables.encode_mat.clone(),
        tables.encode_parity_table.clone(),
    )
}

/// Encode fresh parity from a fully-present set of data cells, cf. spec.md
/// §4.4's full-encode branch.
pub fn encode_full(class: &EcClass, rs: &ReedSolomon, data_cells: Vec<Vec<u8>>) -> AggResult<Stripe> {
    debug_assert_eq!(data_cells.len(), class.k());
    let mut stripe = Stripe::zero(nz(class.k()), nz(class.p()), nz(class.cell_bytes()));
    for (cell, bytes) in stripe.iter_mut_source().zip(data_cells) {
        cell.as_mut().copy_from_slice(&bytes);
    }
    rs.encode_stripe(&mut stripe)?;
    Ok(stripe)
}

/// Recompute parity from scratch once every data cell is locally present
/// again (after pulling the missing ones from peers), cf. spec.md §4.4's
/// full-recalc branch. Mechanically identical to [`encode_full`]; kept as a
/// separate name because the classifier reaches it by a different history
/// (stale or absent local parity), not a different algorithm.
pub fn recalc(class: &EcClass, rs: &ReedSolomon, data_cells: Vec<Vec<u8>>) -> AggResult<Stripe> {
    encode_full(class, rs, data_cells)
}

/// Apply an incremental delta update to existing parity cells, cf. spec.md
/// §4.4's partial-update branch and §4.5's "XOR diff" description: each
/// touched source cell contributes `old ^ new` over only the written span,
/// multiplied into the parity cells via the coding table.
///
/// `old_source_cells` must carry the pre-update bytes for every touched
/// source index; `parity_cells` the current bytes of every parity cell, in
/// `pidx` order. `updates` carries `(source_idx, offset, new_bytes)` —
/// `new_bytes` is the new raw content to land at `offset`, not a
/// pre-computed diff; [`crate::erasure_code::ErasureCode::delta_update`]
/// computes `old ^ new` itself from the seeded source cell. Returns the
/// updated parity cells in the same order.
pub fn incremental_update(
    class: &EcClass,
    rs: &ReedSolomon,
    old_source_cells: Vec<(usize, Vec<u8>)>,
    parity_cells: Vec<Vec<u8>>,
    updates: Vec<(usize, usize, Vec<u8>)>,
) -> AggResult<Vec<Vec<u8>>> {
    debug_assert_eq!(parity_cells.len(), class.p());
    let mut partial = PartialStripe::absent_from_k_p(nz(class.k()), nz(class.p()), nz(class.cell_bytes()));
    for (idx, bytes) in old_source_cells {
        partial.set_cell(idx, Some(Cell::from_slice(&bytes)));
    }
    for (i, bytes) in parity_cells.into_iter().enumerate() {
        partial.set_cell(class.k() + i, Some(Cell::from_slice(&bytes)));
    }
    for (source_idx, offset, data) in updates {
        rs.delta_update(&data, source_idx, offset, &mut partial)?;
    }
    let (_, parity) = partial.split_source_parity();
    Ok(parity
        .iter()
        .map(|cell| cell.as_ref().expect("parity cells were all seeded present").as_ref().to_vec())
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    fn class() -> EcClass {
        EcClass::new(nz(4), nz(2), nz(1), nz(16))
    }

    #[test]
    fn incremental_update_matches_full_recalc() {
        let class = class();
        let rs = reed_solomon_for(&class);
        let data_cells: Vec<Vec<u8>> = (0..class.k())
            .map(|i| vec![i as u8; class.cell_bytes()])
            .collect();
        let encoded = encode_full(&class, &rs, data_cells.clone()).unwrap();
        let old_parity: Vec<Vec<u8>> = encoded.as_parity().iter().map(|c| c.as_ref().to_vec()).collect();

        let mut updated_data = data_cells.clone();
        updated_data[1] = vec![0xAB; class.cell_bytes()];
        let expect = encode_full(&class, &rs, updated_data.clone()).unwrap();

        let new_parity = incremental_update(
            &class,
            &rs,
            vec![(1, data_cells[1].clone())],
            old_parity,
            vec![(1, 0, updated_data[1].clone())],
        )
        .unwrap();

        for (got, want) in new_parity.iter().zip(expect.as_parity()) {
            assert_eq!(got.as_slice(), want.as_ref());
        }
    }
}
