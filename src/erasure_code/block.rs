use bytemuck::{Pod, Zeroable};

/// Alignment the data-path codec wants for SIMD table-driven GF multiply,
/// cf. spec.md §4.5.
const CELL_ALIGN: usize = 32;

/// One `CELL_ALIGN`-byte, naturally aligned chunk. `Vec<AlignedChunk>`
/// guarantees every element (and so the whole backing allocation) starts on
/// a `CELL_ALIGN`-byte boundary, which a plain `Vec<u8>` does not.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AlignedChunk([u8; CELL_ALIGN]);

/// One parity or data cell's worth of bytes (`L` records), 32-byte aligned.
///
/// Backed by a `Vec` of 32-byte aligned chunks reinterpreted as bytes via
/// `bytemuck`'s checked casts, rather than a hand-rolled allocator: no
/// `unsafe` in this module. Generalizes the teacher's `Block`
/// (`erasure_code::block::Block`, a thin `BytesMut` wrapper with no
/// alignment guarantee) to the alignment spec.md §4.5 calls for.
#[derive(Debug, Clone)]
pub struct Cell {
    buf: Vec<AlignedChunk>,
    len: usize,
}

impl Cell {
    fn chunks_for(len: usize) -> usize {
        (len + CELL_ALIGN - 1) / CELL_ALIGN
    }

    pub fn zero(len: usize) -> Self {
        let buf = vec![AlignedChunk([0u8; CELL_ALIGN]); Self::chunks_for(len)];
        Self { buf, len }
    }

    pub fn zero_n(n: usize, len: usize) -> Vec<Self> {
        (0..n).map(|_| Self::zero(len)).collect()
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut cell = Self::zero(data.len());
        cell.as_mut().copy_from_slice(data);
        cell
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}
impl Eq for Cell {}

impl AsRef<[u8]> for Cell {
    fn as_ref(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.buf)[..self.len]
    }
}

impl AsMut<[u8]> for Cell {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.buf)[..self.len]
    }
}

impl std::ops::Deref for Cell {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl std::ops::DerefMut for Cell {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zeroed_then_written() {
        let mut cell = Cell::zero(16);
        assert!(cell.iter().all(|&b| b == 0));
        cell.as_mut()[0] = 7;
        assert_eq!(cell[0], 7);
    }

    #[test]
    fn alignment_holds() {
        let cell = Cell::zero(64);
        assert_eq!(cell.as_ref().as_ptr() as usize % CELL_ALIGN, 0);
    }

    #[test]
    fn len_not_multiple_of_align_round_trips() {
        let data = vec![9u8; 40];
        let cell = Cell::from_slice(&data);
        assert_eq!(cell.as_ref(), data.as_slice());
    }
}
