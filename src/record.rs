/*
Record payload format.

A leaf tag's payload in a data table is a record: a tagged sequence of
column values. The layout is a 16-bit column count followed by one entry
per column:

    u32 column id | u8 type tag | u8 column flags | u16 data size | data

A column flagged LONG_VALUE does not store its data inline; its 4 data
bytes are a big-endian long-value id. Together with the column id it forms
the 8-byte key prefix under which the value's segments live in the table's
long-values tree.
*/

use std::cell::RefCell;
use std::convert::TryInto;
use std::rc::Rc;

use log::debug;

use crate::btree::{BtreeRange, DataDefinition};
use crate::catalog::TableDefinition;
use crate::data_types::{Codepage, ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::long_value::assemble_long_value;
use crate::page::{PageStore, ReadFlags};
use crate::stack::AbortFlag;

/// One column entry as stored in a record payload.
#[derive(Debug, Clone)]
pub struct RawColumn {
    pub column_id: u32,
    pub type_tag: u8,
    pub flags: ColumnFlags,
    pub data: Vec<u8>,
}

/// Decoded record payload.
#[derive(Debug, Clone)]
pub struct RecordData {
    pub columns: Vec<RawColumn>,
}

impl RecordData {
    /// Decodes a record payload. Returns the record and the number of bytes
    /// consumed; `page_number` is only carried for error context.
    pub fn parse(bytes: &[u8], page_number: u32) -> Result<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(Error::corrupt_node(
                page_number,
                "record payload too small for a column count",
            ));
        }
        let column_count = u16::from_le_bytes(bytes[0..2].try_into().unwrap()) as usize;
        let mut offset = 2;

        let mut columns = Vec::with_capacity(column_count);
        for index in 0..column_count {
            if offset + 8 > bytes.len() {
                return Err(Error::corrupt_node(
                    page_number,
                    format!("record truncated in column entry {index}"),
                ));
            }
            let column_id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
            let type_tag = bytes[offset + 4];
            let flags = ColumnFlags::from_bits_retain(bytes[offset + 5]);
            let data_size =
                u16::from_le_bytes(bytes[offset + 6..offset + 8].try_into().unwrap()) as usize;
            offset += 8;

            if offset + data_size > bytes.len() {
                return Err(Error::corrupt_node(
                    page_number,
                    format!("column {column_id} data size {data_size} exceeds the record"),
                ));
            }
            columns.push(RawColumn {
                column_id,
                type_tag,
                flags,
                data: bytes[offset..offset + data_size].to_vec(),
            });
            offset += data_size;
        }

        Ok((RecordData { columns }, offset))
    }

    pub fn column_by_id(&self, column_id: u32) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }
}

/// Copies the bytes a data definition points at out of its page. Goes
/// through the cache: record pages are revisited by neighboring records.
pub fn read_definition_bytes(store: &mut PageStore, def: &DataDefinition) -> Result<Vec<u8>> {
    let page = store.read_page(def.page_number, ReadFlags::empty())?;
    let start = def.data_offset as usize;
    let end = start + def.data_size as usize;
    if end > page.bytes().len() {
        return Err(Error::corrupt_pointer(format!(
            "data definition {start}..{end} exceeds page {}",
            def.page_number
        )));
    }
    Ok(page.bytes()[start..end].to_vec())
}

/// One decoded column value: raw bytes plus the hints a downstream decoder
/// needs (type tag and codepage). The core does not interpret the bytes.
#[derive(Debug, Clone)]
pub struct ColumnValue {
    pub data: Vec<u8>,
    pub codepage: Option<Codepage>,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
}

/// A row of a table. Holds the locator of its bytes plus handles into the
/// owning table's stores; the column array is materialized from the record
/// page on first access.
pub struct Record {
    definition: DataDefinition,
    store: Rc<RefCell<PageStore>>,
    long_value_store: Rc<RefCell<PageStore>>,
    table: Rc<TableDefinition>,
    long_value_root: Option<BtreeRange>,
    abort: AbortFlag,
    columns: RefCell<Option<RecordData>>,
}

impl Record {
    pub(crate) fn new(
        definition: DataDefinition,
        store: Rc<RefCell<PageStore>>,
        long_value_store: Rc<RefCell<PageStore>>,
        table: Rc<TableDefinition>,
        long_value_root: Option<BtreeRange>,
        abort: AbortFlag,
    ) -> Self {
        Record {
            definition,
            store,
            long_value_store,
            table,
            long_value_root,
            abort,
            columns: RefCell::new(None),
        }
    }

    pub fn definition(&self) -> &DataDefinition {
        &self.definition
    }

    fn materialize(&self) -> Result<()> {
        if self.columns.borrow().is_some() {
            return Ok(());
        }
        let bytes = read_definition_bytes(&mut self.store.borrow_mut(), &self.definition)?;
        let (data, consumed) = RecordData::parse(&bytes, self.definition.page_number)?;
        if consumed != bytes.len() {
            debug!(
                "record in page {} slot {} has {} trailing bytes",
                self.definition.page_number,
                self.definition.page_value_index,
                bytes.len() - consumed
            );
        }
        *self.columns.borrow_mut() = Some(data);
        Ok(())
    }

    pub fn column_count(&self) -> Result<usize> {
        self.materialize()?;
        Ok(self.columns.borrow().as_ref().unwrap().columns.len())
    }

    /// Returns the value of the column at `index` (record entry order).
    pub fn column(&self, index: usize) -> Result<ColumnValue> {
        self.materialize()?;
        let columns = self.columns.borrow();
        let raw = columns
            .as_ref()
            .unwrap()
            .columns
            .get(index)
            .ok_or_else(|| {
                Error::corrupt_pointer(format!(
                    "column index {index} out of range for record in page {}",
                    self.definition.page_number
                ))
            })?;

        // the catalog is authoritative for type and codepage where it knows
        // the column; the record's own tag covers columns it does not. The
        // codepage field only means anything for text columns, so it is not
        // validated for other types.
        let (column_type, codepage) = match self.table.column_by_id(raw.column_id) {
            Some(def) => {
                let codepage = if def.column_type.is_text() {
                    Codepage::from_u32(def.codepage)?
                } else {
                    None
                };
                (def.column_type, codepage)
            }
            None => {
                let column_type = ColumnType::from_u8(raw.type_tag).ok_or_else(|| {
                    Error::Unsupported(format!("column type tag {}", raw.type_tag))
                })?;
                (column_type, None)
            }
        };

        Ok(ColumnValue {
            data: raw.data.clone(),
            codepage,
            column_type,
            flags: raw.flags,
        })
    }

    /// Resolves the long value referenced by the column at `index`: walks
    /// the table's long-values tree and concatenates every segment filed
    /// under the column's 8-byte key prefix.
    pub fn long_value(&self, index: usize) -> Result<Vec<u8>> {
        self.materialize()?;
        let (column_id, long_value_id) = {
            let columns = self.columns.borrow();
            let raw = columns
                .as_ref()
                .unwrap()
                .columns
                .get(index)
                .ok_or_else(|| {
                    Error::corrupt_pointer(format!(
                        "column index {index} out of range for record in page {}",
                        self.definition.page_number
                    ))
                })?;

            if !raw.flags.contains(ColumnFlags::LONG_VALUE) {
                return Err(Error::Unsupported(format!(
                    "column {} is not a long value",
                    raw.column_id
                )));
            }
            if raw.flags.contains(ColumnFlags::MULTI_VALUE) {
                return Err(Error::Unsupported(format!(
                    "column {} is a multi-valued long value",
                    raw.column_id
                )));
            }
            if raw.data.len() != 4 {
                return Err(Error::corrupt_pointer(format!(
                    "long value reference in column {} is {} bytes, expected 4",
                    raw.column_id,
                    raw.data.len()
                )));
            }
            let long_value_id = u32::from_be_bytes(raw.data.as_slice().try_into().unwrap());
            (raw.column_id, long_value_id)
        };

        let root = self.long_value_root.as_ref().ok_or_else(|| {
            Error::corrupt_pointer(format!(
                "table {} has no long-values tree",
                self.table.name
            ))
        })?;

        assemble_long_value(
            &mut self.long_value_store.borrow_mut(),
            root,
            column_id,
            long_value_id,
            &self.abort,
        )
    }
}
