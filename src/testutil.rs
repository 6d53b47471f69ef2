//! Test-only helpers: a builder that synthesizes database files by
//! inverting the reader's layout rules, plus an independent breadth-first
//! page walker used as ground truth by the traversal tests.

use std::collections::VecDeque;
use std::convert::TryInto;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::catalog::{
    CATALOG_COLUMN_EXTRA, CATALOG_COLUMN_KIND, CATALOG_COLUMN_NAME, CATALOG_COLUMN_OBJECT_ID,
    CATALOG_COLUMN_OWNER, CATALOG_COLUMN_ROOT_PAGE, CATALOG_KIND_COLUMN, CATALOG_KIND_TABLE,
    CATALOG_ROOT_PAGE,
};
use crate::data_types::ColumnType;
use crate::database::{FILE_HEADER_SIZE, FILE_MAGIC};
use crate::page::{xor_checksum, PageFlags, PageStore, ReadFlags, PAGE_HEADER_SIZE, TAG_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    pub max_leaf_slots: usize,
    pub max_branch_slots: usize,
}

impl Default for TreeShape {
    fn default() -> Self {
        TreeShape {
            max_leaf_slots: 16,
            max_branch_slots: 16,
        }
    }
}

/// Recomputes and stores the page checksum of a raw page buffer.
pub fn fix_checksum(mut buffer: Vec<u8>) -> Vec<u8> {
    let checksum = xor_checksum(&buffer);
    buffer[0..4].copy_from_slice(&checksum.to_le_bytes());
    buffer
}

/// Builds one raw page from (key, payload) entries. Tag flags are written
/// as zero.
pub fn build_page(
    page_size: usize,
    page_number: u32,
    flags: PageFlags,
    entries: &[(Vec<u8>, Vec<u8>)],
) -> Vec<u8> {
    let mut buffer = vec![0u8; page_size];
    buffer[4..8].copy_from_slice(&page_number.to_le_bytes());
    buffer[8..12].copy_from_slice(&flags.bits().to_le_bytes());
    buffer[12..14].copy_from_slice(&(entries.len() as u16).to_le_bytes());

    let tag_area_start = page_size - entries.len() * TAG_SIZE;
    let mut cursor = PAGE_HEADER_SIZE;
    for (i, (key, payload)) in entries.iter().enumerate() {
        let value_size = 2 + key.len() + payload.len();
        assert!(
            cursor + value_size <= tag_area_start,
            "page {page_number} overflows: {} entries do not fit {page_size} bytes",
            entries.len()
        );

        buffer[cursor..cursor + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        buffer[cursor + 2..cursor + 2 + key.len()].copy_from_slice(key);
        buffer[cursor + 2 + key.len()..cursor + value_size].copy_from_slice(payload);

        let tag_start = page_size - (i + 1) * TAG_SIZE;
        buffer[tag_start..tag_start + 2]
            .copy_from_slice(&((cursor - PAGE_HEADER_SIZE) as u16).to_le_bytes());
        buffer[tag_start + 2..tag_start + 4].copy_from_slice(&(value_size as u16).to_le_bytes());
        buffer[tag_start + 4..tag_start + 6].copy_from_slice(&0u16.to_le_bytes());

        cursor += value_size;
    }

    fix_checksum(buffer)
}

/// Encodes a record payload from (column id, type tag, flags, data) tuples.
pub fn encode_record(columns: &[(u32, u8, u8, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    for (column_id, type_tag, flags, data) in columns {
        out.extend_from_slice(&column_id.to_le_bytes());
        out.push(*type_tag);
        out.push(*flags);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Page allocator shared by the tree builders. Pages are 1-based; index
/// `n - 1` of `pages` holds page n, `None` meaning reserved-and-unwritten.
struct PageArena {
    page_size: usize,
    pages: Vec<Option<Vec<u8>>>,
}

impl PageArena {
    fn new(page_size: usize, reserved: u32) -> Self {
        PageArena {
            page_size,
            pages: (0..reserved).map(|_| None).collect(),
        }
    }

    fn alloc(&mut self) -> u32 {
        self.pages.push(None);
        self.pages.len() as u32
    }

    fn put(&mut self, page_number: u32, bytes: Vec<u8>) {
        self.pages[page_number as usize - 1] = Some(bytes);
    }

    /// Builds a B-tree bottom-up and returns its root page. Entries are
    /// sorted by key first; branch keys are subtree maxima. When
    /// `pinned_root` is set, the root lands on that pre-reserved page.
    fn build_tree(
        &mut self,
        entries: &[(Vec<u8>, Vec<u8>)],
        base_flags: PageFlags,
        shape: TreeShape,
        pinned_root: Option<u32>,
    ) -> u32 {
        assert!(!entries.is_empty(), "cannot build an empty tree");
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let chunks: Vec<&[(Vec<u8>, Vec<u8>)]> = sorted.chunks(shape.max_leaf_slots).collect();
        let leaf_is_root = chunks.len() == 1;
        let mut level: Vec<(Vec<u8>, u32)> = Vec::new();
        for chunk in chunks {
            let page_number = match (leaf_is_root, pinned_root) {
                (true, Some(pinned)) => pinned,
                _ => self.alloc(),
            };
            let mut flags = base_flags | PageFlags::LEAF;
            if leaf_is_root {
                flags |= PageFlags::ROOT;
            }
            self.put(
                page_number,
                build_page(self.page_size, page_number, flags, chunk),
            );
            level.push((chunk.last().unwrap().0.clone(), page_number));
        }

        let mut parent_of_leaf = true;
        while level.len() > 1 {
            let groups: Vec<&[(Vec<u8>, u32)]> = level.chunks(shape.max_branch_slots).collect();
            let branch_is_root = groups.len() == 1;
            let mut next = Vec::new();
            for group in groups {
                let page_number = match (branch_is_root, pinned_root) {
                    (true, Some(pinned)) => pinned,
                    _ => self.alloc(),
                };
                let mut flags = base_flags;
                if parent_of_leaf {
                    flags |= PageFlags::PARENT_OF_LEAF;
                }
                if branch_is_root {
                    flags |= PageFlags::ROOT;
                }
                let branch_entries: Vec<(Vec<u8>, Vec<u8>)> = group
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_le_bytes().to_vec()))
                    .collect();
                self.put(
                    page_number,
                    build_page(self.page_size, page_number, flags, &branch_entries),
                );
                next.push((group.last().unwrap().0.clone(), page_number));
            }
            level = next;
            parent_of_leaf = false;
        }

        level[0].1
    }

    fn into_bytes(self) -> Vec<u8> {
        let page_size = self.page_size;
        let mut out = Vec::with_capacity(self.pages.len() * page_size);
        for page in self.pages {
            match page {
                Some(bytes) => out.extend_from_slice(&bytes),
                None => out.extend_from_slice(&vec![0u8; page_size]),
            }
        }
        out
    }
}

struct BuiltTable {
    name: String,
    object_id: u32,
    root_page: u32,
    long_value_root_page: u32,
    columns: Vec<(u32, ColumnType, u32, String)>,
}

/// Synthesizes a whole database file: header, catalog at the fixed root
/// page, data trees and long-value trees.
pub struct DbBuilder {
    arena: PageArena,
    tables: Vec<BuiltTable>,
}

impl DbBuilder {
    pub fn new(page_size: usize) -> Self {
        DbBuilder {
            // pages 1..3 reserved for header material, page 4 for the catalog
            arena: PageArena::new(page_size, CATALOG_ROOT_PAGE),
            tables: Vec::new(),
        }
    }

    pub fn add_table(
        &mut self,
        name: &str,
        object_id: u32,
        columns: &[(u32, ColumnType, u32, &str)],
        records: Vec<(Vec<u8>, Vec<u8>)>,
        long_values: Vec<(Vec<u8>, Vec<u8>)>,
    ) {
        self.add_table_shaped(
            name,
            object_id,
            columns,
            records,
            long_values,
            TreeShape::default(),
        );
    }

    /// `records` are (key, record payload) pairs; `long_values` are
    /// (12-byte key, segment bytes) pairs for the table's long-values tree.
    pub fn add_table_shaped(
        &mut self,
        name: &str,
        object_id: u32,
        columns: &[(u32, ColumnType, u32, &str)],
        records: Vec<(Vec<u8>, Vec<u8>)>,
        long_values: Vec<(Vec<u8>, Vec<u8>)>,
        shape: TreeShape,
    ) {
        let root_page = self
            .arena
            .build_tree(&records, PageFlags::empty(), shape, None);
        let long_value_root_page = if long_values.is_empty() {
            0
        } else {
            self.arena
                .build_tree(&long_values, PageFlags::LONG_VALUE, shape, None)
        };
        self.tables.push(BuiltTable {
            name: name.to_string(),
            object_id,
            root_page,
            long_value_root_page,
            columns: columns
                .iter()
                .map(|(id, ty, codepage, name)| (*id, *ty, *codepage, name.to_string()))
                .collect(),
        });
    }

    pub fn write_to(&mut self, path: impl AsRef<Path>) {
        let mut catalog_entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for table in &self.tables {
            let mut key = table.object_id.to_be_bytes().to_vec();
            key.push(CATALOG_KIND_TABLE);
            catalog_entries.push((key, catalog_table_record(table)));

            for (column_id, column_type, codepage, name) in &table.columns {
                let mut key = table.object_id.to_be_bytes().to_vec();
                key.push(CATALOG_KIND_COLUMN);
                key.extend_from_slice(&column_id.to_be_bytes());
                catalog_entries.push((
                    key,
                    catalog_column_record(table.object_id, *column_id, *column_type, *codepage, name),
                ));
            }
        }
        self.arena.build_tree(
            &catalog_entries,
            PageFlags::empty(),
            TreeShape::default(),
            Some(CATALOG_ROOT_PAGE),
        );

        let page_size = self.arena.page_size;
        let mut header = vec![0u8; FILE_HEADER_SIZE];
        header[4..8].copy_from_slice(&FILE_MAGIC.to_le_bytes());
        header[8..12].copy_from_slice(&0x620u32.to_le_bytes());
        header[12..16].copy_from_slice(&(page_size as u32).to_le_bytes());
        let mut checksum = FILE_MAGIC;
        for word in header[4..].chunks_exact(4) {
            checksum ^= u32::from_le_bytes(word.try_into().unwrap());
        }
        header[0..4].copy_from_slice(&checksum.to_le_bytes());

        let mut header_page = vec![0u8; page_size];
        header_page[..FILE_HEADER_SIZE].copy_from_slice(&header);
        self.arena.put(1, header_page);

        let arena = std::mem::replace(&mut self.arena, PageArena::new(page_size, 0));
        let mut file = File::create(path).unwrap();
        file.write_all(&arena.into_bytes()).unwrap();
        file.flush().unwrap();
    }
}

fn catalog_table_record(table: &BuiltTable) -> Vec<u8> {
    encode_record(&[
        (
            CATALOG_COLUMN_KIND,
            ColumnType::UnsignedByte.as_u8(),
            0,
            &[CATALOG_KIND_TABLE],
        ),
        (
            CATALOG_COLUMN_NAME,
            ColumnType::Text.as_u8(),
            0,
            table.name.as_bytes(),
        ),
        (
            CATALOG_COLUMN_OBJECT_ID,
            ColumnType::Long.as_u8(),
            0,
            &table.object_id.to_le_bytes(),
        ),
        (CATALOG_COLUMN_OWNER, ColumnType::Long.as_u8(), 0, &[0, 0, 0, 0]),
        (
            CATALOG_COLUMN_ROOT_PAGE,
            ColumnType::Long.as_u8(),
            0,
            &table.root_page.to_le_bytes(),
        ),
        (
            CATALOG_COLUMN_EXTRA,
            ColumnType::Long.as_u8(),
            0,
            &table.long_value_root_page.to_le_bytes(),
        ),
    ])
}

fn catalog_column_record(
    owner: u32,
    column_id: u32,
    column_type: ColumnType,
    codepage: u32,
    name: &str,
) -> Vec<u8> {
    encode_record(&[
        (
            CATALOG_COLUMN_KIND,
            ColumnType::UnsignedByte.as_u8(),
            0,
            &[CATALOG_KIND_COLUMN],
        ),
        (CATALOG_COLUMN_NAME, ColumnType::Text.as_u8(), 0, name.as_bytes()),
        (
            CATALOG_COLUMN_OBJECT_ID,
            ColumnType::Long.as_u8(),
            0,
            &column_id.to_le_bytes(),
        ),
        (
            CATALOG_COLUMN_OWNER,
            ColumnType::Long.as_u8(),
            0,
            &owner.to_le_bytes(),
        ),
        (
            CATALOG_COLUMN_ROOT_PAGE,
            ColumnType::UnsignedByte.as_u8(),
            0,
            &[column_type.as_u8()],
        ),
        (
            CATALOG_COLUMN_EXTRA,
            ColumnType::Long.as_u8(),
            0,
            &codepage.to_le_bytes(),
        ),
    ])
}

fn store_from_pages(page_size: usize, pages: Vec<Vec<u8>>) -> PageStore {
    let mut file = tempfile::tempfile().unwrap();
    for page in &pages {
        file.write_all(page).unwrap();
    }
    file.flush().unwrap();
    PageStore::new(file, page_size as u64, 16).unwrap()
}

pub fn open_store(path: &Path, page_size: u64, cache_limit: usize) -> PageStore {
    let file = File::open(path).unwrap();
    PageStore::new(file, page_size, cache_limit).unwrap()
}

/// One root leaf page at page 1, no catalog or header around it.
pub fn single_page_tree(page_size: usize, entries: &[(Vec<u8>, Vec<u8>)]) -> (PageStore, u32) {
    let page = build_page(page_size, 1, PageFlags::ROOT | PageFlags::LEAF, entries);
    (store_from_pages(page_size, vec![page]), 1)
}

/// A bare multi-level tree in a scratch file, pages from 1 up.
pub fn multi_level_tree(
    page_size: usize,
    entries: &[(Vec<u8>, Vec<u8>)],
    shape: TreeShape,
) -> (PageStore, u32) {
    let mut arena = PageArena::new(page_size, 0);
    let root = arena.build_tree(entries, PageFlags::empty(), shape, None);
    let pages: Vec<Vec<u8>> = arena
        .pages
        .into_iter()
        .map(|p| p.expect("tree builder leaves no holes"))
        .collect();
    (store_from_pages(page_size, pages), root)
}

/// Independent breadth-first walk of a tree, used as ground truth: returns
/// (total leaf slots, height, maximum fanout of any node).
pub fn bfs_stats(store: &mut PageStore, root_page: u32) -> (u64, usize, usize) {
    let mut queue = VecDeque::from([(root_page, 1usize)]);
    let mut leaf_slots = 0u64;
    let mut height = 0usize;
    let mut max_fanout = 0usize;

    while let Some((page_number, depth)) = queue.pop_front() {
        let page = store.read_page(page_number, ReadFlags::empty()).unwrap();
        height = height.max(depth);
        max_fanout = max_fanout.max(page.tag_count());

        if page.is_leaf() {
            leaf_slots += page.tag_count() as u64;
        } else {
            for i in 0..page.tag_count() {
                let value = page.tag_value(i).unwrap();
                let key_size = u16::from_le_bytes(value[0..2].try_into().unwrap()) as usize;
                let child = u32::from_le_bytes(
                    value[2 + key_size..2 + key_size + 4].try_into().unwrap(),
                );
                queue.push_back((child, depth + 1));
            }
        }
    }

    (leaf_slots, height, max_fanout)
}
