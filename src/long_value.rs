/*
Long values.

Column values too large to live inline in a record overflow into the
table's long-values tree, a second B-tree whose leaves are byte fragments.
Each leaf key is 12 bytes, big endian:

    column id (4) | long value id (4) | segment offset (4)

so all segments of one logical value sort together under an 8-byte prefix,
in segment offset order. Reassembly scans exactly that contiguous range and
concatenates. Segments normally arrive in offset order and are appended;
out-of-order segments fall back to a sort, and either way the result must
tile [0, total) with no gap and no overlap.
*/

use log::debug;

use crate::btree::{derive_definition, BtreeRange, TreeKind, TreeWalker};
use crate::error::{Error, Result};
use crate::page::PageStore;
use crate::record::read_definition_bytes;
use crate::stack::AbortFlag;

pub const LONG_VALUE_KEY_SIZE: usize = 12;

/// Builds the 8-byte key prefix shared by every segment of one long value.
pub fn long_value_key_prefix(column_id: u32, long_value_id: u32) -> [u8; 8] {
    let mut prefix = [0u8; 8];
    prefix[0..4].copy_from_slice(&column_id.to_be_bytes());
    prefix[4..8].copy_from_slice(&long_value_id.to_be_bytes());
    prefix
}

/// Walks the long-values tree and returns the reassembled bytes of one
/// long value. The walk starts at the first leaf whose key reaches the
/// prefix (subtrees sorting below it are pruned) and stops at the first
/// leaf beyond it.
pub(crate) fn assemble_long_value(
    store: &mut PageStore,
    root: &BtreeRange,
    column_id: u32,
    long_value_id: u32,
    abort: &AbortFlag,
) -> Result<Vec<u8>> {
    let page_size = store.page_size();
    let prefix = long_value_key_prefix(column_id, long_value_id);
    let mut walker = TreeWalker::new(root, TreeKind::LongValue, Some(prefix.to_vec()))?;

    let mut buffer: Vec<u8> = Vec::new();
    let mut spilled: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut segments = 0usize;

    while let Some(leaf) = walker.next_leaf(store, abort)? {
        if leaf.key.len() != LONG_VALUE_KEY_SIZE {
            let page_number = leaf.page_number(page_size);
            return Err(Error::corrupt_node(
                page_number,
                format!("long value key is {} bytes, expected 12", leaf.key.len()),
            ));
        }
        match leaf.key[0..8].cmp(&prefix) {
            std::cmp::Ordering::Less => continue,
            std::cmp::Ordering::Greater => break,
            std::cmp::Ordering::Equal => {}
        }

        let segment_offset = u32::from_be_bytes(leaf.key[8..12].try_into().unwrap());
        let definition = derive_definition(&leaf, page_size)?;
        let bytes = read_definition_bytes(store, &definition)?;
        segments += 1;

        if spilled.is_empty() && segment_offset as usize == buffer.len() {
            // the common case: keys are offset ordered, so segments append
            buffer
                .try_reserve(bytes.len())
                .map_err(|_| Error::out_of_memory("growing long value buffer", bytes.len()))?;
            buffer.extend_from_slice(&bytes);
        } else {
            spilled.push((segment_offset, bytes));
        }
    }

    debug!(
        "long value {column_id}/{long_value_id:#010x}: {segments} segments, {} appended bytes, {} spilled",
        buffer.len(),
        spilled.len()
    );

    if spilled.is_empty() {
        return Ok(buffer);
    }
    scatter_merge(buffer, spilled, long_value_id)
}

/// Slow path: some segment arrived out of offset order. Re-sorts everything
/// and verifies the tiling while rebuilding the buffer.
fn scatter_merge(
    buffer: Vec<u8>,
    spilled: Vec<(u32, Vec<u8>)>,
    long_value_id: u32,
) -> Result<Vec<u8>> {
    let mut segments: Vec<(u32, Vec<u8>)> = Vec::with_capacity(spilled.len() + 1);
    if !buffer.is_empty() {
        segments.push((0, buffer));
    }
    segments.extend(spilled);
    segments.sort_by_key(|(offset, _)| *offset);

    let total: usize = segments.iter().map(|(_, bytes)| bytes.len()).sum();
    let mut out = Vec::new();
    out.try_reserve_exact(total)
        .map_err(|_| Error::out_of_memory("assembling long value", total))?;

    for (offset, bytes) in segments {
        if offset as usize != out.len() {
            return Err(Error::LongValueGap {
                long_value_id,
                offset: out.len() as u64,
            });
        }
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}
