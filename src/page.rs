/*
Page layout

A page is a fixed-size block whose size is a power of two between 1024 and
32768 bytes, established from the file header. Page N lives at file offset
(N - 1) * page_size; the region of page 1 is reserved header material and is
never read as a tree page.

Offset  Size  Description
0       4     Page checksum: XOR of every little-endian u32 word from byte 4
              to the end of the page, seeded with 0x89ABCDEF.
4       4     Page number (self reference).
8       4     Page flags (root 0x1, leaf 0x2, parent-of-leaf 0x4, empty 0x8,
              long value 0x80).
12      2     Tag count.
14      2     Reserved, zero.
16      ..    Value bytes, growing up.

The tag array grows down from the end of the page. Tag i occupies the 6
bytes at page_size - 6 * (i + 1) and holds three 16-bit fields: value
offset (relative to byte 16), value size, and tag flags. Tag 0 names the
lowest-keyed entry on the page. Tag flags have no assigned meaning here;
they are carried through to the ranges decoded from the tag.

Each tag's value bytes start with a 16-bit key size and the key itself,
followed by the payload: record bytes on leaf pages (or a long-value
segment's bytes in the long-values tree), a 32-bit child page number on
branch pages.
*/

use std::collections::{HashMap, VecDeque};
use std::convert::TryInto;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::error::{Error, Result};

pub const PAGE_HEADER_SIZE: usize = 16;
pub const TAG_SIZE: usize = 6;

/// Seed of the page checksum, doubling as the file magic.
pub const CHECKSUM_SEED: u32 = 0x89AB_CDEF;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const ROOT = 0x01;
        const LEAF = 0x02;
        const PARENT_OF_LEAF = 0x04;
        const EMPTY = 0x08;
        const LONG_VALUE = 0x80;
    }
}

bitflags! {
    /// Cache behavior of a single read. NO_CACHE skips insertion so a
    /// transient read does not evict pages that are still hot; IGNORE_CACHE
    /// additionally skips lookup so a stale entry cannot shadow the file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadFlags: u8 {
        const NO_CACHE = 0x01;
        const IGNORE_CACHE = 0x02;
    }
}

#[derive(Debug, Clone)]
pub struct PageTag {
    pub value_offset: u16,
    pub value_size: u16,
    /// Opaque tag flags, passed through as-is.
    pub flags: u16,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub page_number: u32,
    pub flags: PageFlags,
    tags: Vec<PageTag>,
    buffer: Vec<u8>,
}

impl Page {
    /// Decodes a raw page buffer, validating the checksum, the self page
    /// number and the tag array bounds.
    pub fn parse(page_number: u32, buffer: Vec<u8>) -> Result<Self> {
        let page_size = buffer.len();

        let stored = u32::from_le_bytes(buffer[0..4].try_into().unwrap());
        let computed = xor_checksum(&buffer);
        if stored != computed {
            return Err(Error::BadChecksum {
                page_number,
                stored,
                computed,
            });
        }

        let self_number = u32::from_le_bytes(buffer[4..8].try_into().unwrap());
        if self_number != page_number {
            return Err(Error::corrupt_node(
                page_number,
                format!("self page number field is {self_number}"),
            ));
        }

        let flags = PageFlags::from_bits_retain(u32::from_le_bytes(buffer[8..12].try_into().unwrap()));
        let tag_count = u16::from_le_bytes(buffer[12..14].try_into().unwrap()) as usize;

        if PAGE_HEADER_SIZE + tag_count * TAG_SIZE > page_size {
            return Err(Error::corrupt_node(
                page_number,
                format!("tag count {tag_count} does not fit the page"),
            ));
        }

        let value_area_end = page_size - tag_count * TAG_SIZE;
        let mut tags = Vec::with_capacity(tag_count);
        for i in 0..tag_count {
            let tag_start = page_size - (i + 1) * TAG_SIZE;
            let value_offset =
                u16::from_le_bytes(buffer[tag_start..tag_start + 2].try_into().unwrap());
            let value_size =
                u16::from_le_bytes(buffer[tag_start + 2..tag_start + 4].try_into().unwrap());
            let tag_flags =
                u16::from_le_bytes(buffer[tag_start + 4..tag_start + 6].try_into().unwrap());

            let value_end = PAGE_HEADER_SIZE + value_offset as usize + value_size as usize;
            if value_end > value_area_end {
                return Err(Error::corrupt_node(
                    page_number,
                    format!("tag {i} value range runs into the tag array"),
                ));
            }

            tags.push(PageTag {
                value_offset,
                value_size,
                flags: tag_flags,
            });
        }

        Ok(Page {
            page_number,
            flags,
            tags,
            buffer,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(PageFlags::LEAF)
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tag(&self, index: usize) -> Option<&PageTag> {
        self.tags.get(index)
    }

    /// The value bytes a tag points at (key size prefix included).
    pub fn tag_value(&self, index: usize) -> Result<&[u8]> {
        let tag = self.tags.get(index).ok_or_else(|| {
            Error::corrupt_node(self.page_number, format!("no tag at index {index}"))
        })?;
        let start = PAGE_HEADER_SIZE + tag.value_offset as usize;
        Ok(&self.buffer[start..start + tag.value_size as usize])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// XOR checksum over all little-endian u32 words from byte 4 onward.
pub(crate) fn xor_checksum(buffer: &[u8]) -> u32 {
    let mut checksum = CHECKSUM_SEED;
    for word in buffer[4..].chunks_exact(4) {
        checksum ^= u32::from_le_bytes(word.try_into().unwrap());
    }
    checksum
}

/// Entry limits for the per-iterator page caches.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub pages: usize,
    pub long_value_pages: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            pages: 64,
            long_value_pages: 128,
        }
    }
}

/// Bounded page cache: capacity-limited, approximate LRU (hits move the
/// entry to the back, the front is evicted on overflow).
#[derive(Debug)]
struct PageCache {
    limit: usize,
    entries: HashMap<u32, Arc<Page>>,
    order: VecDeque<u32>,
}

impl PageCache {
    fn new(limit: usize) -> Self {
        PageCache {
            limit,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, page_number: u32) -> Option<Arc<Page>> {
        let page = self.entries.get(&page_number).cloned()?;
        if let Some(pos) = self.order.iter().position(|&n| n == page_number) {
            self.order.remove(pos);
            self.order.push_back(page_number);
        }
        Some(page)
    }

    fn insert(&mut self, page: Arc<Page>) {
        if self.limit == 0 {
            return;
        }
        let page_number = page.page_number;
        if self.entries.insert(page_number, page).is_none() {
            self.order.push_back(page_number);
        }
        while self.entries.len() > self.limit {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Owns one file handle and one bounded page cache. Resolves page numbers
/// to file offsets and hands out decoded pages.
#[derive(Debug)]
pub struct PageStore {
    file: File,
    file_len: u64,
    page_size: u64,
    cache: PageCache,
}

impl PageStore {
    pub fn new(file: File, page_size: u64, cache_limit: usize) -> Result<Self> {
        let file_len = file
            .metadata()
            .map_err(|e| Error::io("reading database file metadata", e))?
            .len();
        Ok(PageStore {
            file,
            file_len,
            page_size,
            cache: PageCache::new(cache_limit),
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn read_page(&mut self, page_number: u32, flags: ReadFlags) -> Result<Arc<Page>> {
        if page_number == 0 {
            return Err(Error::corrupt_pointer("page number 0"));
        }

        if !flags.contains(ReadFlags::IGNORE_CACHE) {
            if let Some(page) = self.cache.get(page_number) {
                return Ok(page);
            }
        }

        let offset = (page_number as u64 - 1) * self.page_size;
        if offset + self.page_size > self.file_len {
            return Err(Error::ShortRead {
                page_number,
                expected: self.page_size,
                available: self.file_len.saturating_sub(offset),
            });
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seeking to page", e))?;
        let mut buffer = vec![0u8; self.page_size as usize];
        self.file.read_exact(&mut buffer).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ShortRead {
                    page_number,
                    expected: self.page_size,
                    available: 0,
                }
            } else {
                Error::io("reading page", e)
            }
        })?;

        debug!("read page {page_number} at offset {offset}");

        let page = Arc::new(Page::parse(page_number, buffer)?);
        if !flags.contains(ReadFlags::NO_CACHE) {
            self.cache.insert(Arc::clone(&page));
        }
        Ok(page)
    }

    pub(crate) fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
