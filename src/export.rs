//! Value formatting for the export front-end: text columns come out as
//! escaped text in their codepage, everything else as hex.

use crate::data_types::Codepage;
use crate::record::ColumnValue;

/// Renders column bytes as one tab-separated field.
pub fn format_field(value: &ColumnValue, bytes: &[u8], default_codepage: Codepage) -> String {
    if value.column_type.is_text() {
        let codepage = value.codepage.unwrap_or(default_codepage);
        escape_text(bytes, codepage)
    } else {
        hex_string(bytes)
    }
}

pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decodes text bytes in the given codepage, escaping separators, control
/// characters and anything the codepage cannot represent as \xNN.
pub fn escape_text(bytes: &[u8], codepage: Codepage) -> String {
    match codepage {
        Codepage::Windows1252 => bytes.iter().map(|&b| escape_byte_1252(b)).collect(),
        Codepage::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => text.chars().map(escape_char).collect(),
            Err(_) => hex_string(bytes),
        },
        Codepage::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return hex_string(bytes);
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            match String::from_utf16(&units) {
                Ok(text) => text.chars().map(escape_char).collect(),
                Err(_) => hex_string(bytes),
            }
        }
    }
}

fn escape_byte_1252(byte: u8) -> String {
    match byte {
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        b'\\' => "\\\\".to_string(),
        0x20..=0x7e => (byte as char).to_string(),
        // the latin-1 range maps straight to code points
        0xa0..=0xff => (byte as char).to_string(),
        other => format!("\\x{other:02x}"),
    }
}

fn escape_char(c: char) -> String {
    match c {
        '\t' => "\\t".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\\' => "\\\\".to_string(),
        c if c.is_control() => format!("\\x{:02x}", c as u32),
        c => c.to_string(),
    }
}
