/*
File header
Offset  Size  Description
0       4     Header checksum: XOR of the little-endian u32 words of bytes
              4..64, seeded with 0x89ABCDEF.
4       4     Magic, 0x89ABCDEF.
8       4     Format version.
12      4     Page size in bytes. Must be a power of two between 1024 and
              32768 inclusive.
16      48    Reserved, zero.

The header sits at offset 0, inside the region of page 1; pages 1 through 3
are reserved and never read as tree pages. The catalog tree root is fixed
at page 4 and names the root (and long-values root) of every other table.
*/

use std::cell::RefCell;
use std::convert::TryInto;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::catalog::{load_catalog, TableDefinition};
use crate::error::{Error, Result};
use crate::page::{CacheConfig, PageStore, CHECKSUM_SEED};
use crate::stack::AbortFlag;
use crate::table::Table;

pub const FILE_MAGIC: u32 = CHECKSUM_SEED;
pub const FILE_HEADER_SIZE: usize = 64;

pub const MIN_PAGE_SIZE: u32 = 1 << 10;
pub const MAX_PAGE_SIZE: u32 = 1 << 15;

#[derive(Debug, Clone)]
pub struct FileHeader {
    // 0 - 4
    pub checksum: u32,
    // 4 - 8
    pub magic: u32,
    // 8 - 12
    pub format_version: u32,
    // 12 - 16
    pub page_size: u32,
}

impl FileHeader {
    pub fn read_from_file(file: &mut File) -> Result<FileHeader> {
        let mut buffer = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut buffer).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ShortRead {
                    page_number: 1,
                    expected: FILE_HEADER_SIZE as u64,
                    available: 0,
                }
            } else {
                Error::io("reading file header", e)
            }
        })?;

        let checksum = u32::from_le_bytes(buffer[0..4].try_into().unwrap());
        let magic = u32::from_le_bytes(buffer[4..8].try_into().unwrap());
        let format_version = u32::from_le_bytes(buffer[8..12].try_into().unwrap());
        let page_size = u32::from_le_bytes(buffer[12..16].try_into().unwrap());

        if magic != FILE_MAGIC {
            return Err(Error::Unsupported(format!(
                "bad file magic {magic:#010x}, not an ese database"
            )));
        }

        let mut computed = CHECKSUM_SEED;
        for word in buffer[4..].chunks_exact(4) {
            computed ^= u32::from_le_bytes(word.try_into().unwrap());
        }
        if checksum != computed {
            return Err(Error::BadChecksum {
                page_number: 1,
                stored: checksum,
                computed,
            });
        }

        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(Error::Unsupported(format!("page size {page_size}")));
        }

        debug!("file header: format version {format_version:#x}, page size {page_size}");

        Ok(FileHeader {
            checksum,
            magic,
            format_version,
            page_size,
        })
    }
}

/// Summary of one catalog table entry, as listed by `Database::tables`.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub root_page: u32,
    pub long_value_root_page: Option<u32>,
    pub column_count: usize,
}

/// An opened database: the decoded header plus the loaded catalog. Handing
/// out a `Table` opens fresh file handles, so every iterator gets a private
/// store and cache and iterators never serialize against each other.
pub struct Database {
    path: PathBuf,
    header: FileHeader,
    cache_config: CacheConfig,
    tables: Vec<Rc<TableDefinition>>,
    abort: AbortFlag,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        Database::open_with_cache(path, CacheConfig::default())
    }

    pub fn open_with_cache(path: impl AsRef<Path>, cache_config: CacheConfig) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| Error::io("opening database file", e))?;
        let header = FileHeader::read_from_file(&mut file)?;

        let abort = AbortFlag::new();
        let mut store = PageStore::new(file, header.page_size as u64, cache_config.pages)?;
        let tables = load_catalog(&mut store, &abort)?
            .into_iter()
            .map(Rc::new)
            .collect();

        Ok(Database {
            path,
            header,
            cache_config,
            tables,
            abort,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The abort flag shared by every table handed out by this database.
    pub fn abort_handle(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn tables(&self) -> Vec<TableInfo> {
        self.tables
            .iter()
            .map(|t| TableInfo {
                name: t.name.clone(),
                root_page: t.root_page,
                long_value_root_page: match t.long_value_root_page {
                    0 => None,
                    page => Some(page),
                },
                column_count: t.columns.len(),
            })
            .collect()
    }

    /// Opens an iterator over the named table.
    pub fn table(&self, name: &str) -> Result<Table> {
        let definition = self
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let store = Rc::new(RefCell::new(self.open_store(self.cache_config.pages)?));
        let long_value_store = Rc::new(RefCell::new(
            self.open_store(self.cache_config.long_value_pages)?,
        ));

        Table::new(
            Rc::clone(definition),
            store,
            long_value_store,
            self.abort.clone(),
        )
    }

    fn open_store(&self, cache_limit: usize) -> Result<PageStore> {
        let file = File::open(&self.path).map_err(|e| Error::io("opening database file", e))?;
        PageStore::new(file, self.header.page_size as u64, cache_limit)
    }
}
