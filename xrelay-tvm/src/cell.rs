//! TVM cells and their representation hash.
//!
//! A cell holds up to 1023 data bits and up to four references to other
//! cells. Only ordinary (non-exotic, level 0) cells are produced or accepted.
//!
//! The representation hash is
//! `sha256(d1 ‖ d2 ‖ data ‖ depth(ref)* ‖ hash(ref)*)` where
//! `d1 = refs`, `d2 = floor(bits / 8) + ceil(bits / 8)` and `data` is padded
//! with a single `1` bit followed by zeros when not byte-aligned.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::B256;
use sha2::{Digest, Sha256};
use xrelay::RelayError;

use crate::address::TvmAddress;

/// Maximum data bits in a cell.
pub const MAX_BITS: usize = 1023;

/// Maximum references in a cell.
pub const MAX_REFS: usize = 4;

/// Errors raised while building or decoding cells.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CellError {
    /// More than [`MAX_BITS`] data bits.
    #[error("cell data overflow: {0} bits")]
    BitOverflow(usize),
    /// More than [`MAX_REFS`] references.
    #[error("cell reference overflow")]
    RefOverflow,
    /// A value does not fit the requested width.
    #[error("value does not fit in {0} bits")]
    ValueTooWide(usize),
    /// Exotic cells are not supported.
    #[error("exotic cells are not supported")]
    Exotic,
    /// Malformed bag of cells.
    #[error("invalid bag of cells: {0}")]
    Boc(String),
}

impl From<CellError> for RelayError {
    fn from(err: CellError) -> Self {
        Self::internal(err.to_string())
    }
}

/// An immutable ordinary cell with a cached hash and depth.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: B256,
    depth: u16,
}

impl Cell {
    /// Creates a cell from raw parts. Bits past `bit_len` in `data` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] or [`CellError::RefOverflow`] when
    /// the limits are exceeded.
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Self>>) -> Result<Self, CellError> {
        if bit_len > MAX_BITS || data.len() * 8 < bit_len {
            return Err(CellError::BitOverflow(bit_len));
        }
        if refs.len() > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        data.truncate(bit_len.div_ceil(8));
        if bit_len % 8 != 0 {
            let last = data.len() - 1;
            data[last] &= 0xff << (8 - bit_len % 8);
        }
        let depth = refs.iter().map(|r| r.depth + 1).max().unwrap_or(0);
        let mut cell = Self {
            data,
            bit_len,
            refs,
            hash: B256::ZERO,
            depth,
        };
        cell.hash = cell.compute_hash();
        Ok(cell)
    }

    /// The cell with no bits and no references.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            bit_len: 0,
            refs: Vec::new(),
            hash: B256::new(EMPTY_CELL_HASH),
            depth: 0,
        }
    }

    /// Representation hash.
    #[must_use]
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Depth: zero for leaves, otherwise one more than the deepest reference.
    #[must_use]
    pub const fn depth(&self) -> u16 {
        self.depth
    }

    /// Number of data bits.
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Data bytes, zero-padded to a byte boundary.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Referenced cells.
    #[must_use]
    pub fn refs(&self) -> &[Arc<Self>] {
        &self.refs
    }

    pub(crate) fn descriptors(&self) -> [u8; 2] {
        // refs <= 4 and bits <= 1023, so both fit in a byte.
        #[allow(clippy::cast_possible_truncation)]
        [
            self.refs.len() as u8,
            (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8,
        ]
    }

    /// Data with the completion tag applied when not byte-aligned.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        if self.bit_len % 8 != 0 {
            let last = out.len() - 1;
            out[last] |= 0x80 >> (self.bit_len % 8);
        }
        out
    }

    fn compute_hash(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth.to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash);
        }
        B256::from_slice(&hasher.finalize())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("refs", &self.refs.len())
            .field("hash", &self.hash)
            .finish()
    }
}

const EMPTY_CELL_HASH: [u8; 32] = [
    0x96, 0xa2, 0x96, 0xd2, 0x24, 0xf2, 0x85, 0xc6, 0x7b, 0xee, 0x93, 0xc3, 0x0f, 0x8a, 0x30,
    0x91, 0x57, 0xf0, 0xda, 0xa3, 0x5d, 0xc5, 0xb8, 0x7e, 0x41, 0x0b, 0x78, 0x63, 0x0a, 0x09,
    0xcf, 0xc7,
];

/// Incremental cell writer. Values are stored big-endian, most significant bit first.
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits written so far.
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_len
    }

    fn ensure(&self, extra: usize) -> Result<(), CellError> {
        if self.bit_len + extra > MAX_BITS {
            return Err(CellError::BitOverflow(self.bit_len + extra));
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Appends one bit.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] when the cell is full.
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        self.ensure(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Appends the low `bits` bits of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::ValueTooWide`] if `value` needs more than `bits`
    /// bits, or [`CellError::BitOverflow`] when the cell is full.
    pub fn store_uint(&mut self, value: u128, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 128 || (bits < 128 && value >> bits != 0) {
            return Err(CellError::ValueTooWide(bits));
        }
        self.ensure(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Appends `value` as a two's-complement integer of `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::ValueTooWide`] if `value` is out of range.
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, CellError> {
        if bits == 0 || bits > 64 {
            return Err(CellError::ValueTooWide(bits));
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        if !(min..=max).contains(&i128::from(value)) {
            return Err(CellError::ValueTooWide(bits));
        }
        #[allow(clippy::cast_sign_loss)]
        let raw = (value as u64 as u128) & ((1u128 << bits) - 1);
        self.store_uint(raw, bits)
    }

    /// Appends every bit of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] when the cell is full.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        self.ensure(bytes.len() * 8)?;
        if self.bit_len % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for byte in bytes {
                for i in (0..8).rev() {
                    self.push_bit((byte >> i) & 1 == 1);
                }
            }
        }
        Ok(self)
    }

    /// Appends `addr_std$10 anycast:0 workchain:int8 hash:bits256` (267 bits).
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] when the cell is full.
    pub fn store_address(&mut self, address: &TvmAddress) -> Result<&mut Self, CellError> {
        self.ensure(267)?;
        self.store_uint(0b100, 3)?
            .store_int(i64::from(address.workchain), 8)?
            .store_bytes(address.hash.as_slice())
    }

    /// Appends `addr_none$00`.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] when the cell is full.
    pub fn store_address_none(&mut self) -> Result<&mut Self, CellError> {
        self.store_uint(0, 2)
    }

    /// Appends a `VarUInteger 16` amount: 4-bit byte length, then the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::BitOverflow`] when the cell is full.
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self, CellError> {
        let bytes = amount.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let len = 16 - skip;
        if len > 15 {
            return Err(CellError::ValueTooWide(120));
        }
        self.store_uint(len as u128, 4)?.store_bytes(&bytes[skip..])
    }

    /// Appends a reference.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::RefOverflow`] when four references are already stored.
    pub fn store_ref(&mut self, cell: impl Into<Arc<Cell>>) -> Result<&mut Self, CellError> {
        if self.refs.len() == MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell.into());
        Ok(self)
    }

    /// Finishes the cell.
    ///
    /// # Errors
    ///
    /// Never fails for a builder that only used the `store_*` methods; the
    /// limits are re-checked by [`Cell::new`].
    pub fn build(&self) -> Result<Cell, CellError> {
        Cell::new(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::b256;

    use super::*;

    #[test]
    fn test_empty_cell_hash() {
        let built = CellBuilder::new().build().unwrap();
        assert_eq!(
            built.hash(),
            b256!("96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7")
        );
        assert_eq!(built, Cell::empty());
    }

    #[test]
    fn test_bit_packing() {
        let mut b = CellBuilder::new();
        b.store_uint(0b101, 3).unwrap().store_uint(0xff, 8).unwrap();
        let cell = b.build().unwrap();
        assert_eq!(cell.bit_len(), 11);
        assert_eq!(cell.data(), &[0b1011_1111, 0b1110_0000]);
        assert_eq!(cell.padded_data(), vec![0b1011_1111, 0b1111_0000]);
        assert_eq!(cell.descriptors(), [0, 3]);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut b = CellBuilder::new();
        b.store_bit(true).unwrap().store_bytes(&[0xab, 0xcd]).unwrap();
        let cell = b.build().unwrap();
        assert_eq!(cell.bit_len(), 17);
        assert_eq!(cell.data(), &[0xd5, 0xe6, 0x80]);
    }

    #[test]
    fn test_int_twos_complement() {
        let mut b = CellBuilder::new();
        b.store_int(-1, 8).unwrap();
        assert_eq!(b.build().unwrap().data(), &[0xff]);
        assert!(CellBuilder::new().store_int(128, 8).is_err());
        assert!(CellBuilder::new().store_int(-129, 8).is_err());
    }

    #[test]
    fn test_limits() {
        assert_eq!(
            CellBuilder::new().store_uint(4, 2).unwrap_err(),
            CellError::ValueTooWide(2)
        );
        let mut b = CellBuilder::new();
        for _ in 0..127 {
            b.store_uint(0, 8).unwrap();
        }
        b.store_uint(0, 7).unwrap();
        assert_eq!(b.bit_len(), MAX_BITS);
        assert!(b.store_bit(false).is_err());

        let mut b = CellBuilder::new();
        for _ in 0..MAX_REFS {
            b.store_ref(Cell::empty()).unwrap();
        }
        assert_eq!(b.store_ref(Cell::empty()).unwrap_err(), CellError::RefOverflow);
    }

    #[test]
    fn test_depth_and_ref_hash() {
        let leaf = Arc::new(Cell::empty());
        let mut mid = CellBuilder::new();
        mid.store_ref(leaf.clone()).unwrap();
        let mid = Arc::new(mid.build().unwrap());
        let mut root = CellBuilder::new();
        root.store_ref(mid.clone()).unwrap().store_ref(leaf).unwrap();
        let root = root.build().unwrap();
        assert_eq!(mid.depth(), 1);
        assert_eq!(root.depth(), 2);

        let mut changed = CellBuilder::new();
        changed.store_uint(1, 1).unwrap();
        let mut other = CellBuilder::new();
        other
            .store_ref(mid)
            .unwrap()
            .store_ref(changed.build().unwrap())
            .unwrap();
        assert_ne!(root.hash(), other.build().unwrap().hash());
    }

    #[test]
    fn test_coins() {
        let mut b = CellBuilder::new();
        b.store_coins(0).unwrap();
        assert_eq!(b.bit_len(), 4);
        let mut b = CellBuilder::new();
        b.store_coins(1_000_000_000).unwrap();
        // 4 bytes of length prefix value then 32 bits
        assert_eq!(b.bit_len(), 4 + 32);
        assert_eq!(b.build().unwrap().data()[0] >> 4, 4);
    }
}
