//! Bag-of-cells serialization.
//!
//! Only the `b5ee9c72` layout is handled: a header with size and offset
//! widths, the root list, an optional index, the cells in topological order
//! (every reference points to a later cell) and an optional CRC32C trailer.
//! Output is written with a single root, no index and a CRC32C trailer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{B256, hex};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::cell::{Cell, CellError};

const MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

/// CRC32C (Castagnoli, reflected poly `0x82F63B78`).
#[must_use]
pub fn crc32c(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82f6_3b78
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

fn boc_err(msg: impl Into<String>) -> CellError {
    CellError::Boc(msg.into())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| boc_err("unexpected end of data"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.bytes(1)?[0])
    }

    fn uint(&mut self, width: usize) -> Result<usize, CellError> {
        Ok(self
            .bytes(width)?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
    }
}

struct RawCell<'a> {
    d2: u8,
    data: &'a [u8],
    refs: Vec<usize>,
}

/// Parses a serialized bag of cells and returns its first root.
///
/// # Errors
///
/// Returns [`CellError::Boc`] on a malformed layout or checksum mismatch and
/// [`CellError::Exotic`] if any cell is exotic.
pub fn deserialize(bytes: &[u8]) -> Result<Arc<Cell>, CellError> {
    let mut r = Reader {
        data: bytes,
        pos: 0,
    };
    if r.bytes(4)? != MAGIC {
        return Err(boc_err("unknown magic"));
    }
    let flags = r.byte()?;
    let has_idx = flags & 0x80 != 0;
    let has_crc = flags & 0x40 != 0;
    let size = usize::from(flags & 0x07);
    if size == 0 || size > 4 {
        return Err(boc_err(format!("invalid ref size {size}")));
    }
    let off_bytes = usize::from(r.byte()?);
    if off_bytes == 0 || off_bytes > 8 {
        return Err(boc_err(format!("invalid offset size {off_bytes}")));
    }
    let cell_count = r.uint(size)?;
    let root_count = r.uint(size)?;
    let _absent = r.uint(size)?;
    let _total_size = r.uint(off_bytes)?;
    if root_count == 0 {
        return Err(boc_err("no roots"));
    }
    // every cell takes at least its two descriptor bytes
    let remaining = bytes.len() - r.pos;
    if cell_count > remaining / 2 {
        return Err(boc_err(format!(
            "{cell_count} cells declared in {remaining} bytes"
        )));
    }
    if root_count > cell_count {
        return Err(boc_err(format!("{root_count} roots for {cell_count} cells")));
    }
    let mut roots = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        roots.push(r.uint(size)?);
    }
    if has_idx {
        r.bytes(cell_count.saturating_mul(off_bytes))?;
    }

    let mut raw = Vec::with_capacity(cell_count);
    for _ in 0..cell_count {
        let d1 = r.byte()?;
        let d2 = r.byte()?;
        if d1 & 0x08 != 0 {
            return Err(CellError::Exotic);
        }
        let data = r.bytes(usize::from(d2).div_ceil(2))?;
        let mut refs = Vec::with_capacity(usize::from(d1 & 0x07));
        for _ in 0..(d1 & 0x07) {
            refs.push(r.uint(size)?);
        }
        raw.push(RawCell { d2, data, refs });
    }

    if has_crc {
        let body_end = r.pos;
        let trailer = r.bytes(4)?;
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32c(&bytes[..body_end]) != expected {
            return Err(boc_err("crc32c mismatch"));
        }
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for (index, cell) in raw.iter().enumerate().rev() {
        let mut refs = Vec::with_capacity(cell.refs.len());
        for &child in &cell.refs {
            if child <= index {
                return Err(boc_err("reference to an earlier cell"));
            }
            let child = built
                .get(child)
                .and_then(Option::clone)
                .ok_or_else(|| boc_err("reference out of range"))?;
            refs.push(child);
        }
        let bit_len = data_bit_len(cell.d2, cell.data)?;
        built[index] = Some(Arc::new(Cell::new(cell.data.to_vec(), bit_len, refs)?));
    }

    built
        .get(roots[0])
        .and_then(Option::clone)
        .ok_or_else(|| boc_err("root out of range"))
}

/// Bit length from `d2` and the completion tag.
fn data_bit_len(d2: u8, data: &[u8]) -> Result<usize, CellError> {
    let full = usize::from(d2 / 2) * 8;
    if d2 % 2 == 0 {
        return Ok(full);
    }
    let last = *data.last().ok_or_else(|| boc_err("missing data byte"))?;
    if last == 0 {
        return Err(boc_err("missing completion tag"));
    }
    let trailing = last.trailing_zeros() as usize;
    Ok(full + 7 - trailing)
}

/// Parses a hex-encoded bag of cells.
///
/// # Errors
///
/// Returns [`CellError::Boc`] on invalid hex or layout.
pub fn from_hex(s: &str) -> Result<Arc<Cell>, CellError> {
    let bytes = hex::decode(s.trim()).map_err(|e| boc_err(format!("invalid hex: {e}")))?;
    deserialize(&bytes)
}

/// Parses a base64-encoded bag of cells.
///
/// # Errors
///
/// Returns [`CellError::Boc`] on invalid base64 or layout.
pub fn from_base64(s: &str) -> Result<Arc<Cell>, CellError> {
    let bytes = STANDARD
        .decode(s.trim())
        .map_err(|e| boc_err(format!("invalid base64: {e}")))?;
    deserialize(&bytes)
}

/// Orders the tree so that every cell precedes the cells it references.
fn topological_order(root: &Arc<Cell>) -> Vec<Arc<Cell>> {
    fn visit(cell: &Arc<Cell>, seen: &mut HashSet<B256>, post: &mut Vec<Arc<Cell>>) {
        if !seen.insert(cell.hash()) {
            return;
        }
        for child in cell.refs() {
            visit(child, seen, post);
        }
        post.push(cell.clone());
    }
    let mut seen = HashSet::new();
    let mut post = Vec::new();
    visit(root, &mut seen, &mut post);
    post.reverse();
    post
}

const fn width(value: usize) -> usize {
    let mut n = 1;
    while n < 8 && value >> (8 * n) != 0 {
        n += 1;
    }
    n
}

fn push_uint(out: &mut Vec<u8>, value: usize, width: usize) {
    let bytes = (value as u64).to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

/// Serializes `root` as a single-root bag of cells with a CRC32C trailer.
#[must_use]
pub fn serialize(root: &Arc<Cell>) -> Vec<u8> {
    let cells = topological_order(root);
    let index: HashMap<B256, usize> = cells
        .iter()
        .enumerate()
        .map(|(i, c)| (c.hash(), i))
        .collect();
    let size = width(cells.len());

    let mut body = Vec::new();
    for cell in &cells {
        body.extend_from_slice(&cell.descriptors());
        body.extend_from_slice(&cell.padded_data());
        for child in cell.refs() {
            push_uint(&mut body, index[&child.hash()], size);
        }
    }
    let off_bytes = width(body.len());

    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(&MAGIC);
    // has_crc32c, ref size
    #[allow(clippy::cast_possible_truncation)]
    out.push(0x40 | size as u8);
    #[allow(clippy::cast_possible_truncation)]
    out.push(off_bytes as u8);
    push_uint(&mut out, cells.len(), size);
    push_uint(&mut out, 1, size);
    push_uint(&mut out, 0, size);
    push_uint(&mut out, body.len(), off_bytes);
    push_uint(&mut out, 0, size);
    out.extend_from_slice(&body);
    let crc = crc32c(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// [`serialize`] as standard base64.
#[must_use]
pub fn to_base64(root: &Arc<Cell>) -> String {
    STANDARD.encode(serialize(root))
}

/// [`serialize`] as lowercase hex without prefix.
#[must_use]
pub fn to_hex(root: &Arc<Cell>) -> String {
    hex::encode(serialize(root))
}
