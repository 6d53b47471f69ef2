/*
B-tree traversal core.

Every table is a B+-tree of pages. A branch page's tags point at child
pages; a leaf page's tags carry the record bytes themselves. The reader
never walks root-down per record: a single depth-first forward scan over
two explicit stacks (pending node ranges, pending leaf descriptors) yields
leaves in ascending key order while holding at most one node in memory.

Ranges popped from a stack must outlive the node they came from, so a node
read deep-copies everything out of the page buffer, and nodes are dropped
at the end of each expansion. Node reads bypass the page cache entirely
(NO_CACHE so the transient page does not evict pages siblings still need,
IGNORE_CACHE so a stale cached page cannot shadow the tree on re-entry).
*/

use itertools::Itertools;
use log::debug;

use crate::error::{Error, Result};
use crate::page::{PageFlags, PageStore, ReadFlags, PAGE_HEADER_SIZE};
use crate::stack::{AbortFlag, SearchStack};

/// Which tree a walker is scanning. Long-value pages carry a dedicated page
/// flag; reading a page whose flag disagrees with the expectation is
/// corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Table,
    LongValue,
}

/// Self-contained descriptor of a child node or a leaf value: where its
/// bytes live in the file, which value slot it came from, and an owned copy
/// of its key. Safe to hold after the node that produced it is gone.
#[derive(Debug)]
pub struct BtreeRange {
    /// Value-slot index in the page this range was read from.
    pub file_index: u16,
    /// Absolute file offset of the target bytes.
    pub offset: u64,
    pub size: u64,
    /// Tag flags of the source slot, carried through unchanged.
    pub flags: u16,
    pub key: Vec<u8>,
    /// Rank bookkeeping, populated on leaf ranges when their node is read.
    pub mapped_first_leaf_index: u32,
    pub mapped_number_of_leaves: u32,
}

impl BtreeRange {
    /// Range covering a whole page, used for tree roots.
    pub fn for_page(page_number: u32, page_size: u64) -> Result<Self> {
        if page_number == 0 {
            return Err(Error::corrupt_pointer("tree root at page number 0"));
        }
        Ok(BtreeRange {
            file_index: 0,
            offset: (page_number as u64 - 1) * page_size,
            size: page_size,
            flags: 0,
            key: Vec::new(),
            mapped_first_leaf_index: 0,
            mapped_number_of_leaves: 0,
        })
    }

    /// Deep copy. Key bytes get their own allocation so the clone does not
    /// share storage with the source; allocation failure is a scan error.
    pub fn clone_range(&self) -> Result<Self> {
        let mut key = Vec::new();
        key.try_reserve_exact(self.key.len())
            .map_err(|_| Error::out_of_memory("cloning range key", self.key.len()))?;
        key.extend_from_slice(&self.key);
        Ok(BtreeRange {
            file_index: self.file_index,
            offset: self.offset,
            size: self.size,
            flags: self.flags,
            key,
            mapped_first_leaf_index: self.mapped_first_leaf_index,
            mapped_number_of_leaves: self.mapped_number_of_leaves,
        })
    }

    /// Page number this range points into.
    pub fn page_number(&self, page_size: u64) -> u32 {
        (self.offset / page_size) as u32 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Branch,
    Leaf,
}

/// Decoded form of one B-tree page. Owns its ranges outright; nothing in a
/// `Node` borrows from the page buffer it was decoded from.
#[derive(Debug)]
pub struct Node {
    pub page_number: u32,
    pub kind: NodeKind,
    pub ranges: Vec<BtreeRange>,
    pub mapped_ranges_valid: bool,
}

/// Reads and decodes the node a range points at.
pub fn read_node(
    store: &mut PageStore,
    range: &BtreeRange,
    tree_kind: TreeKind,
    flags: ReadFlags,
) -> Result<Node> {
    let page_size = store.page_size();
    if range.offset % page_size != 0 || range.size != page_size {
        return Err(Error::corrupt_pointer(format!(
            "node range at offset {} size {} is not page aligned",
            range.offset, range.size
        )));
    }

    let page_number_wide = range.offset / page_size + 1;
    if page_number_wide > u32::MAX as u64 {
        return Err(Error::corrupt_pointer(format!(
            "node page number {page_number_wide} exceeds maximum"
        )));
    }
    let page_number = page_number_wide as u32;

    let page = store.read_page(page_number, flags)?;

    let is_long_value = page.flags.contains(PageFlags::LONG_VALUE);
    if is_long_value != (tree_kind == TreeKind::LongValue) {
        return Err(Error::corrupt_node(
            page_number,
            format!("page flags {:?} do not match the tree being walked", page.flags),
        ));
    }

    let kind = if page.is_leaf() {
        NodeKind::Leaf
    } else {
        NodeKind::Branch
    };

    if page.tag_count() == 0 {
        return Err(Error::corrupt_node(page_number, "page has no value slots"));
    }

    let page_file_offset = (page_number as u64 - 1) * page_size;
    let mut ranges = Vec::new();

    for index in 0..page.tag_count() {
        let tag = page.tag(index).unwrap().clone();
        let value = page.tag_value(index)?;
        if value.len() < 2 {
            return Err(Error::corrupt_node(
                page_number,
                format!("tag {index} too small for a key size field"),
            ));
        }
        let key_size = u16::from_le_bytes([value[0], value[1]]) as usize;
        if 2 + key_size > value.len() {
            return Err(Error::corrupt_node(
                page_number,
                format!("tag {index} key size {key_size} exceeds the value"),
            ));
        }
        let key = value[2..2 + key_size].to_vec();
        let payload_len = value.len() - 2 - key_size;

        let range = match kind {
            NodeKind::Branch => {
                if payload_len != 4 {
                    return Err(Error::corrupt_node(
                        page_number,
                        format!("branch tag {index} payload is {payload_len} bytes"),
                    ));
                }
                let child = u32::from_le_bytes(
                    value[2 + key_size..2 + key_size + 4].try_into().unwrap(),
                );
                if child == 0 {
                    return Err(Error::corrupt_pointer(format!(
                        "branch tag {index} in page {page_number} points at page 0"
                    )));
                }
                BtreeRange {
                    file_index: index as u16,
                    offset: (child as u64 - 1) * page_size,
                    size: page_size,
                    flags: tag.flags,
                    key,
                    mapped_first_leaf_index: 0,
                    mapped_number_of_leaves: 0,
                }
            }
            NodeKind::Leaf => {
                let value_start =
                    page_file_offset + PAGE_HEADER_SIZE as u64 + tag.value_offset as u64;
                BtreeRange {
                    file_index: index as u16,
                    offset: value_start + 2 + key_size as u64,
                    size: payload_len as u64,
                    flags: tag.flags,
                    key,
                    mapped_first_leaf_index: index as u32,
                    mapped_number_of_leaves: 1,
                }
            }
        };
        ranges.push(range);
    }

    if ranges.iter().tuple_windows().any(|(a, b)| a.key > b.key) {
        return Err(Error::corrupt_node(page_number, "keys out of order"));
    }

    Ok(Node {
        page_number,
        kind,
        ranges,
        mapped_ranges_valid: false,
    })
}

/// Leaf-level locator derived from a leaf range: the page holding the value
/// bytes and where inside it they sit.
#[derive(Debug, Clone)]
pub struct DataDefinition {
    pub page_number: u32,
    pub page_offset: u64,
    pub data_offset: u16,
    pub data_size: u16,
    pub page_value_index: u16,
}

pub fn derive_definition(range: &BtreeRange, page_size: u64) -> Result<DataDefinition> {
    if range.size > u16::MAX as u64 {
        return Err(Error::corrupt_pointer(format!(
            "leaf value size {} exceeds maximum",
            range.size
        )));
    }
    let page_offset = range.offset / page_size * page_size;
    let page_number_wide = page_offset / page_size + 1;
    if page_number_wide > u32::MAX as u64 {
        return Err(Error::corrupt_pointer(format!(
            "leaf value page number {page_number_wide} exceeds maximum"
        )));
    }
    let data_offset = range.offset - page_offset;
    if data_offset + range.size > page_size {
        return Err(Error::corrupt_pointer(format!(
            "leaf value at page offset {data_offset} size {} crosses the page end",
            range.size
        )));
    }

    Ok(DataDefinition {
        page_number: page_number_wide as u32,
        page_offset,
        data_offset: data_offset as u16,
        data_size: range.size as u16,
        page_value_index: range.file_index,
    })
}

/// Depth-first B-tree scanner. One stack of node ranges awaiting expansion,
/// one stack of leaf ranges already discovered but not yet delivered.
/// Children and leaves are pushed in reverse slot order so pops come out in
/// ascending key order.
#[derive(Debug)]
pub struct TreeWalker {
    kind: TreeKind,
    pending_nodes: SearchStack<BtreeRange>,
    pending_leaves: SearchStack<BtreeRange>,
    /// When set, subtrees and leaves whose keys sort below this bound are
    /// skipped. Branch keys are subtree upper bounds, so a branch keyed
    /// below the bound holds nothing of interest.
    lower_bound: Option<Vec<u8>>,
}

impl TreeWalker {
    pub fn new(root: &BtreeRange, kind: TreeKind, lower_bound: Option<Vec<u8>>) -> Result<Self> {
        let mut pending_nodes = SearchStack::new();
        pending_nodes.push(root.clone_range()?)?;
        Ok(TreeWalker {
            kind,
            pending_nodes,
            pending_leaves: SearchStack::new(),
            lower_bound,
        })
    }

    /// Advances the scan to the next leaf value. Ok(None) is end of tree.
    /// Checks the abort flag once per iteration, so cancellation costs at
    /// most one node expansion.
    pub fn next_leaf(
        &mut self,
        store: &mut PageStore,
        abort: &AbortFlag,
    ) -> Result<Option<BtreeRange>> {
        loop {
            if abort.is_raised() {
                return Err(Error::Aborted);
            }

            if let Some(leaf) = self.pending_leaves.pop_or_empty() {
                return Ok(Some(leaf));
            }

            let range = match self.pending_nodes.pop_or_empty() {
                Some(range) => range,
                None => return Ok(None),
            };

            let node = read_node(
                store,
                &range,
                self.kind,
                ReadFlags::NO_CACHE | ReadFlags::IGNORE_CACHE,
            )?;
            debug!(
                "expanded {:?} node in page {} with {} ranges",
                node.kind,
                node.page_number,
                node.ranges.len()
            );

            match node.kind {
                NodeKind::Leaf => {
                    for leaf in node.ranges.into_iter().rev() {
                        if self.below_bound(&leaf.key) {
                            continue;
                        }
                        self.pending_leaves.push(leaf)?;
                    }
                }
                NodeKind::Branch => {
                    for child in node.ranges.into_iter().rev() {
                        if !child.key.is_empty() && self.below_bound(&child.key) {
                            continue;
                        }
                        self.pending_nodes.push(child)?;
                    }
                }
            }
            // the node (and the bypassed page behind it) is dropped here
        }
    }

    fn below_bound(&self, key: &[u8]) -> bool {
        match &self.lower_bound {
            Some(bound) => key < bound.as_slice(),
            None => false,
        }
    }

    pub fn stack_sizes(&self) -> (usize, usize) {
        (self.pending_nodes.len(), self.pending_leaves.len())
    }
}
