/*
Catalog.

The catalog is an ordinary table whose B-tree root sits at the fixed page 4,
which is how the reader bootstraps: it walks the catalog with the same
depth-first scanner it uses for data, then interprets the records.

Every catalog record describes one object through fixed well-known column
ids. Keys are object id (big endian), a kind byte, and for column entries
the column id (big endian), so a table's column entries group right after
the table entry in key order.

column id  table entry                column entry
1          kind = 1 (u8)              kind = 2 (u8)
2          table name (utf-8)         column name (utf-8)
3          table object id (u32)      column id (u32)
4          0                          owning table object id (u32)
5          root page number (u32)     type tag (u8)
6          long-values root page      codepage (u32, 0 = none)
           number (u32, 0 = none)
*/

use log::{debug, warn};

use crate::btree::{derive_definition, BtreeRange, TreeWalker, TreeKind};
use crate::data_types::ColumnType;
use crate::error::{Error, Result};
use crate::page::PageStore;
use crate::record::{read_definition_bytes, RawColumn, RecordData};
use crate::stack::AbortFlag;

pub const CATALOG_ROOT_PAGE: u32 = 4;

pub const CATALOG_COLUMN_KIND: u32 = 1;
pub const CATALOG_COLUMN_NAME: u32 = 2;
pub const CATALOG_COLUMN_OBJECT_ID: u32 = 3;
pub const CATALOG_COLUMN_OWNER: u32 = 4;
pub const CATALOG_COLUMN_ROOT_PAGE: u32 = 5;
pub const CATALOG_COLUMN_EXTRA: u32 = 6;

pub const CATALOG_KIND_TABLE: u8 = 1;
pub const CATALOG_KIND_COLUMN: u8 = 2;

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub column_id: u32,
    pub name: String,
    pub column_type: ColumnType,
    /// Raw codepage field; 0 means none recorded. Interpreted lazily so a
    /// single odd column does not block the whole catalog.
    pub codepage: u32,
}

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub object_id: u32,
    pub name: String,
    pub root_page: u32,
    /// Root page of the table's long-values tree, 0 if it has none.
    pub long_value_root_page: u32,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn column_by_id(&self, column_id: u32) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }
}

/// Walks the catalog tree and builds the table definitions.
pub(crate) fn load_catalog(
    store: &mut PageStore,
    abort: &AbortFlag,
) -> Result<Vec<TableDefinition>> {
    let page_size = store.page_size();
    let root = BtreeRange::for_page(CATALOG_ROOT_PAGE, page_size)?;
    let mut walker = TreeWalker::new(&root, TreeKind::Table, None)?;

    let mut tables: Vec<TableDefinition> = Vec::new();
    let mut columns: Vec<(u32, ColumnDefinition)> = Vec::new();

    while let Some(leaf) = walker.next_leaf(store, abort)? {
        let definition = derive_definition(&leaf, page_size)?;
        let bytes = read_definition_bytes(store, &definition)?;
        let (record, _) = RecordData::parse(&bytes, definition.page_number)?;

        let kind = required_bytes(&record, CATALOG_COLUMN_KIND, definition.page_number)?;
        match kind {
            [CATALOG_KIND_TABLE] => {
                tables.push(decode_table_entry(&record, definition.page_number)?)
            }
            [CATALOG_KIND_COLUMN] => {
                let (owner, column) = decode_column_entry(&record, definition.page_number)?;
                columns.push((owner, column));
            }
            other => {
                return Err(Error::corrupt_node(
                    definition.page_number,
                    format!("catalog entry kind {other:?}"),
                ));
            }
        }
    }

    for (owner, column) in columns {
        match tables.iter_mut().find(|t| t.object_id == owner) {
            Some(table) => table.columns.push(column),
            None => warn!(
                "catalog column {} ({}) references unknown table object {owner}",
                column.column_id, column.name
            ),
        }
    }
    for table in &mut tables {
        table.columns.sort_by_key(|c| c.column_id);
        debug!(
            "catalog table {} root {} long-values root {} with {} columns",
            table.name,
            table.root_page,
            table.long_value_root_page,
            table.columns.len()
        );
    }

    Ok(tables)
}

fn decode_table_entry(record: &RecordData, page_number: u32) -> Result<TableDefinition> {
    Ok(TableDefinition {
        object_id: required_u32(record, CATALOG_COLUMN_OBJECT_ID, page_number)?,
        name: required_text(record, CATALOG_COLUMN_NAME, page_number)?,
        root_page: required_u32(record, CATALOG_COLUMN_ROOT_PAGE, page_number)?,
        long_value_root_page: required_u32(record, CATALOG_COLUMN_EXTRA, page_number)?,
        columns: Vec::new(),
    })
}

fn decode_column_entry(record: &RecordData, page_number: u32) -> Result<(u32, ColumnDefinition)> {
    let type_tag = required_bytes(record, CATALOG_COLUMN_ROOT_PAGE, page_number)?;
    let [type_tag] = type_tag else {
        return Err(Error::corrupt_node(
            page_number,
            format!("catalog column type field is {} bytes", type_tag.len()),
        ));
    };
    let column_type = ColumnType::from_u8(*type_tag)
        .ok_or_else(|| Error::Unsupported(format!("column type tag {type_tag}")))?;

    let owner = required_u32(record, CATALOG_COLUMN_OWNER, page_number)?;
    let column = ColumnDefinition {
        column_id: required_u32(record, CATALOG_COLUMN_OBJECT_ID, page_number)?,
        name: required_text(record, CATALOG_COLUMN_NAME, page_number)?,
        column_type,
        codepage: required_u32(record, CATALOG_COLUMN_EXTRA, page_number)?,
    };
    Ok((owner, column))
}

fn required_column<'a>(
    record: &'a RecordData,
    column_id: u32,
    page_number: u32,
) -> Result<&'a RawColumn> {
    record.column_by_id(column_id).ok_or_else(|| {
        Error::corrupt_node(
            page_number,
            format!("catalog record is missing column {column_id}"),
        )
    })
}

fn required_bytes<'a>(record: &'a RecordData, column_id: u32, page_number: u32) -> Result<&'a [u8]> {
    Ok(required_column(record, column_id, page_number)?.data.as_slice())
}

fn required_u32(record: &RecordData, column_id: u32, page_number: u32) -> Result<u32> {
    let data = required_bytes(record, column_id, page_number)?;
    let data: [u8; 4] = data.try_into().map_err(|_| {
        Error::corrupt_node(
            page_number,
            format!("catalog column {column_id} is not a u32"),
        )
    })?;
    Ok(u32::from_le_bytes(data))
}

fn required_text(record: &RecordData, column_id: u32, page_number: u32) -> Result<String> {
    let data = required_bytes(record, column_id, page_number)?;
    String::from_utf8(data.to_vec()).map_err(|_| {
        Error::corrupt_node(
            page_number,
            format!("catalog column {column_id} is not valid utf-8"),
        )
    })
}
