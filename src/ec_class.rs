//! EC class parameters: `K` data cells, `P` parity cells, `L` records per
//! cell, cf. spec.md §3.

use std::num::NonZeroUsize;

use crate::recx::{Recx, PARITY_FLAG};

/// The Galois-field coding tables for one `(K, P)` erasure code, built once
/// and shared by every stripe of every object in the class. Mirrors the
/// teacher's `ReedSolomon` (`erasure_code::reed_solomon::ReedSolomon`), which
/// builds the same tables at construction time but hard-codes a single block
/// size; here the tables are detached from any particular stripe size so one
/// `EcClass` can serve every akey of an object.
pub struct GfTables {
    pub(crate) k: usize,
    pub(crate) p: usize,
    pub(crate) encode_mat: Vec<u8>,
    pub(crate) encode_parity_table: Vec<u8>,
}

impl GfTables {
    fn build(k: usize, p: usize) -> Self {
        let m = k + p;
        let encode_mat = isa_l::gf_gen_rs_matrix(k, m);
        let encode_parity_table = isa_l::ec_init_tables_owned(k, p, &encode_mat[(k * k)..]);
        Self {
            k,
            p,
            encode_mat,
            encode_parity_table,
        }
    }
}

impl std::fmt::Debug for GfTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfTables")
            .field("k", &self.k)
            .field("p", &self.p)
            .finish_non_exhaustive()
    }
}

/// `(K, P, L, record_size)` as fetched from `oclass_attrs`, cf. spec.md §6.
#[derive(Debug)]
pub struct EcClass {
    k: NonZeroUsize,
    p: NonZeroUsize,
    l: NonZeroUsize,
    record_size: NonZeroUsize,
    gftbls: GfTables,
}

impl EcClass {
    pub fn new(k: NonZeroUsize, p: NonZeroUsize, l: NonZeroUsize, record_size: NonZeroUsize) -> Self {
        let gftbls = GfTables::build(k.get(), p.get());
        Self {
            k,
            p,
            l,
            record_size,
            gftbls,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k.get()
    }

    #[inline]
    pub fn p(&self) -> usize {
        self.p.get()
    }

    #[inline]
    pub fn l(&self) -> usize {
        self.l.get()
    }

    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size.get()
    }

    /// Stripe size in records, `K·L`.
    #[inline]
    pub fn stripe_records(&self) -> u64 {
        (self.k() * self.l()) as u64
    }

    /// Cell size in records, `L`.
    #[inline]
    pub fn cell_records(&self) -> u64 {
        self.l() as u64
    }

    /// Cell byte size, `L · record_size`.
    #[inline]
    pub fn cell_bytes(&self) -> usize {
        self.l() * self.record_size()
    }

    /// Stripe byte size for one cell-role (data or parity), `K · L · record_size`
    /// or `P · L · record_size` respectively — callers pick the dimension.
    #[inline]
    pub fn stripe_bytes(&self, cells: usize) -> usize {
        cells * self.cell_bytes()
    }

    pub(crate) fn gftbls(&self) -> &GfTables {
        &self.gftbls
    }

    /// Parity index for a shard within `[K, K+P)`, cf. spec.md §3:
    /// `pidx = (shard_index − K) mod P`.
    pub fn pidx(&self, shard_index: usize) -> Option<usize> {
        if shard_index < self.k() || shard_index >= self.k() + self.p() {
            None
        } else {
            Some((shard_index - self.k()) % self.p())
        }
    }

    pub fn is_parity_shard(&self, shard_index: usize) -> bool {
        shard_index >= self.k() && shard_index < self.k() + self.p()
    }

    /// Parity-reserved recx for stripe `s`: `PARITY_FLAG | (s·L)`, length `L`.
    pub fn parity_recx(&self, stripe_num: u64) -> Recx {
        Recx::new(PARITY_FLAG | (stripe_num * self.cell_records()), self.cell_records())
    }

    /// Stripe ordinal containing record index `start`.
    pub fn stripe_of(&self, start: u64) -> u64 {
        start / self.stripe_records()
    }

    /// Cell index `[0, K)` containing record index `start`, relative to the
    /// start of its stripe.
    pub fn cell_of(&self, stripe_relative_start: u64) -> usize {
        (stripe_relative_start / self.cell_records()) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn class() -> EcClass {
        EcClass::new(
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(8).unwrap(),
        )
    }

    #[test]
    fn stripe_and_cell_sizing() {
        let c = class();
        assert_eq!(c.stripe_records(), 16);
        assert_eq!(c.cell_bytes(), 32);
    }

    #[test]
    fn pidx_mapping() {
        let c = class();
        assert_eq!(c.pidx(0), None);
        assert_eq!(c.pidx(4), Some(0));
        assert_eq!(c.pidx(5), Some(1));
        assert_eq!(c.pidx(6), None);
    }

    #[test]
    fn parity_recx_is_flagged() {
        let c = class();
        let recx = c.parity_recx(3);
        assert!(recx.is_parity());
        assert_eq!(recx.len, 4);
    }
}
