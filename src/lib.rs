//! Read-only reader for ESE (Extensible Storage Engine) database files.
//! Opens a database, walks table B-trees depth first, and streams records
//! with their long values reassembled.

pub mod btree;
pub mod catalog;
pub mod data_types;
pub mod database;
pub mod error;
pub mod export;
pub mod long_value;
pub mod page;
pub mod record;
pub mod stack;
pub mod table;

#[cfg(test)]
pub(crate) mod testutil;

pub use data_types::{Codepage, ColumnFlags, ColumnType};
pub use database::{Database, TableInfo};
pub use error::{Error, Result};
pub use record::{ColumnValue, Record};
pub use stack::AbortFlag;
pub use table::Table;
