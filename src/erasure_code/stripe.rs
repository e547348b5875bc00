use std::num::NonZeroUsize;

use crate::AggError;

use super::Cell;

/// `K` data cells followed by `P` parity cells, all present. Generalizes the
/// teacher's `Stripe` (`erasure_code::stripe::Stripe`) from fixed-size
/// `Block`s to 32-byte aligned `Cell`s.
#[derive(Debug, PartialEq, Eq)]
pub struct Stripe {
    k: u8,
    p: u8,
    cells: Vec<Cell>,
}

impl Stripe {
    #[inline]
    pub fn k(&self) -> usize {
        self.k.into()
    }

    #[inline]
    pub fn p(&self) -> usize {
        self.p.into()
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.k() + self.p()
    }

    #[inline]
    pub fn cell_bytes(&self) -> usize {
        self.cells.first().map(Cell::len).unwrap_or(0)
    }

    pub fn from_vec(vec: Vec<Cell>, k: NonZeroUsize, p: NonZeroUsize) -> Self {
        let k = k.get();
        let p = p.get();
        assert_eq!(vec.len(), k + p);
        let cell_bytes = vec.first().unwrap().len();
        assert!(vec.iter().all(|cell| cell.len() == cell_bytes));
        Self {
            k: k.try_into().unwrap(),
            p: p.try_into().unwrap(),
            cells: vec,
        }
    }

    pub fn zero(k: NonZeroUsize, p: NonZeroUsize, cell_bytes: NonZeroUsize) -> Self {
        let k = k.get();
        let p = p.get();
        let cell_bytes = cell_bytes.get();
        Self {
            k: k.try_into().unwrap(),
            p: p.try_into().unwrap(),
            cells: Cell::zero_n(k + p, cell_bytes),
        }
    }

    pub fn split_source_parity(&self) -> (&[Cell], &[Cell]) {
        self.cells.split_at(self.k())
    }

    pub fn split_mut_source_parity(&mut self) -> (&mut [Cell], &mut [Cell]) {
        let k = self.k();
        self.cells.split_at_mut(k)
    }

    pub fn as_source(&self) -> &[Cell] {
        let k = self.k();
        &self.cells[0..k]
    }

    pub fn as_mut_source(&mut self) -> &mut [Cell] {
        let k = self.k();
        &mut self.cells[0..k]
    }

    pub fn as_parity(&self) -> &[Cell] {
        let k = self.k();
        let m = self.m();
        &self.cells[k..m]
    }

    pub fn as_mut_parity(&mut self) -> &mut [Cell] {
        let k = self.k();
        let m = self.m();
        &mut self.cells[k..m]
    }

    pub fn iter_source(&self) -> impl ExactSizeIterator<Item = &Cell> {
        let k = self.k();
        self.cells[0..k].iter()
    }

    pub fn iter_mut_source(&mut self) -> impl ExactSizeIterator<Item = &mut Cell> {
        let k = self.k();
        self.cells[0..k].iter_mut()
    }
}

impl Clone for Stripe {
    fn clone(&self) -> Self {
        Self {
            k: self.k,
            p: self.p,
            cells: self.cells.clone(),
        }
    }
}

impl TryFrom<PartialStripe> for Stripe {
    type Error = AggError;

    fn try_from(value: PartialStripe) -> Result<Self, Self::Error> {
        if !value.is_all_present() {
            return Err(Self::Error::erasure_code(
                (file!(), line!(), column!()),
                "not all the cells are present",
            ));
        }
        let k = value.k;
        let p = value.p;
        let cells = value.cells.into_iter().map(Option::unwrap).collect();
        Ok(Self { k, p, cells })
    }
}

/// A stripe in which some cells may be absent, used while decoding or while
/// assembling the operands of a partial-update / full-recalc, cf. spec.md
/// §4.4-4.5.
#[derive(Debug, PartialEq, Eq)]
pub struct PartialStripe {
    cell_bytes: usize,
    cells: Vec<Option<Cell>>,
    k: u8,
    p: u8,
}

type PartialStripeSplit<'a> = (
    Vec<(usize, &'a Option<Cell>)>,
    Vec<(usize, &'a Option<Cell>)>,
);

type PartialStripeSplitMut<'a> = (
    Vec<(usize, &'a mut Option<Cell>)>,
    Vec<(usize, &'a mut Option<Cell>)>,
);

impl PartialStripe {
    #[inline]
    pub fn k(&self) -> usize {
        self.k.into()
    }

    #[inline]
    pub fn p(&self) -> usize {
        self.p.into()
    }

    #[inline]
    pub fn m(&self) -> usize {
        self.k() + self.p()
    }

    #[inline]
    pub fn cell_bytes(&self) -> usize {
        self.cell_bytes
    }

    pub fn is_all_present(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn is_all_absent(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    pub fn set_cell(&mut self, cell_idx: usize, cell: Option<Cell>) -> Option<Cell> {
        let m = self.m();
        std::mem::replace(
            self.cells
                .get_mut(cell_idx)
                .unwrap_or_else(|| panic!("cell index({cell_idx}) is greater than m({})", m)),
            cell,
        )
    }

    pub fn absent_from_k_p(k: NonZeroUsize, p: NonZeroUsize, cell_bytes: NonZeroUsize) -> Self {
        let k = k.get();
        let p = p.get();
        Self {
            k: k.try_into().unwrap(),
            p: p.try_into().unwrap(),
            cells: vec![None; k + p],
            cell_bytes: cell_bytes.get(),
        }
    }

    /// Split the partial stripe by present / absent.
    pub fn split(&self) -> PartialStripeSplit {
        let mut absent = Vec::with_capacity(self.absent_cell_index().len());
        let mut present = Vec::with_capacity(self.m() - absent.len());
        for (idx, cell_opt) in self.cells.iter().enumerate() {
            match cell_opt {
                Some(_) => present.push((idx, cell_opt)),
                None => absent.push((idx, cell_opt)),
            };
        }
        (present, absent)
    }

    pub fn split_source_parity(&self) -> (&[Option<Cell>], &[Option<Cell>]) {
        let k = self.k();
        self.cells.split_at(k)
    }

    pub fn split_mut_source_parity(&mut self) -> (&mut [Option<Cell>], &mut [Option<Cell>]) {
        let k = self.k();
        self.cells.split_at_mut(k)
    }

    /// Split the partial stripe by present / absent, mutably.
    pub fn split_mut(&mut self) -> PartialStripeSplitMut {
        let mut absent = Vec::with_capacity(self.absent_cell_index().len());
        let mut present = Vec::with_capacity(self.m() - absent.len());
        for (idx, cell_opt) in self.cells.iter_mut().enumerate() {
            match cell_opt {
                Some(_) => present.push((idx, cell_opt)),
                None => absent.push((idx, cell_opt)),
            };
        }
        (present, absent)
    }

    pub fn present_cell_index(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell_opt)| cell_opt.is_some().then_some(idx))
            .collect()
    }

    pub fn absent_cell_index(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell_opt)| cell_opt.is_none().then_some(idx))
            .collect()
    }

    pub fn iter_present(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell_opt)| cell_opt.as_ref().map(|cell| (idx, cell)))
    }
}

impl From<&Stripe> for PartialStripe {
    fn from(value: &Stripe) -> Self {
        let cell_bytes = value.cell_bytes();
        let k = value.k();
        let p = value.p();
        Self {
            cell_bytes,
            cells: value.cells.iter().cloned().map(Some).collect(),
            k: k.try_into().unwrap(),
            p: p.try_into().unwrap(),
        }
    }
}

impl From<Stripe> for PartialStripe {
    fn from(value: Stripe) -> Self {
        let cell_bytes = value.cell_bytes();
        let k = value.k();
        let p = value.p();
        Self {
            cell_bytes,
            cells: value.cells.into_iter().map(Some).collect(),
            k: k.try_into().unwrap(),
            p: p.try_into().unwrap(),
        }
    }
}
