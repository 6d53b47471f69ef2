use bitflags::bitflags;

use crate::error::{Error, Result};

/// Column type tags as stored in catalog entries and record payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bit,
    UnsignedByte,
    Short,
    Long,
    Currency,
    Single,
    Double,
    DateTime,
    Binary,
    Text,
    LongBinary,
    LongText,
    UnsignedLong,
    LongLong,
    Guid,
    UnsignedShort,
}

impl ColumnType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(ColumnType::Bit),
            2 => Some(ColumnType::UnsignedByte),
            3 => Some(ColumnType::Short),
            4 => Some(ColumnType::Long),
            5 => Some(ColumnType::Currency),
            6 => Some(ColumnType::Single),
            7 => Some(ColumnType::Double),
            8 => Some(ColumnType::DateTime),
            9 => Some(ColumnType::Binary),
            10 => Some(ColumnType::Text),
            11 => Some(ColumnType::LongBinary),
            12 => Some(ColumnType::LongText),
            14 => Some(ColumnType::UnsignedLong),
            15 => Some(ColumnType::LongLong),
            16 => Some(ColumnType::Guid),
            17 => Some(ColumnType::UnsignedShort),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ColumnType::Bit => 1,
            ColumnType::UnsignedByte => 2,
            ColumnType::Short => 3,
            ColumnType::Long => 4,
            ColumnType::Currency => 5,
            ColumnType::Single => 6,
            ColumnType::Double => 7,
            ColumnType::DateTime => 8,
            ColumnType::Binary => 9,
            ColumnType::Text => 10,
            ColumnType::LongBinary => 11,
            ColumnType::LongText => 12,
            ColumnType::UnsignedLong => 14,
            ColumnType::LongLong => 15,
            ColumnType::Guid => 16,
            ColumnType::UnsignedShort => 17,
        }
    }

    /// True for the column types whose bytes carry codepage-encoded text.
    pub fn is_text(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::LongText)
    }
}

bitflags! {
    /// Per-column flags stored in each record payload entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ColumnFlags: u8 {
        const LONG_VALUE = 0x01;
        const MULTI_VALUE = 0x02;
    }
}

/// The codepages the reader recognizes. The core treats the codepage as an
/// opaque hint attached to text column bytes; only the CLI interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    Windows1252,
    Utf16Le,
    Utf8,
}

impl Codepage {
    /// Decodes the catalog's codepage field. Zero means "none recorded".
    pub fn from_u32(val: u32) -> Result<Option<Self>> {
        match val {
            0 => Ok(None),
            1252 => Ok(Some(Codepage::Windows1252)),
            1200 => Ok(Some(Codepage::Utf16Le)),
            65001 => Ok(Some(Codepage::Utf8)),
            other => Err(Error::Unsupported(format!("codepage {other}"))),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Codepage::Windows1252 => 1252,
            Codepage::Utf16Le => 1200,
            Codepage::Utf8 => 65001,
        }
    }
}
