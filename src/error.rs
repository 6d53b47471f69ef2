use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the reader can fail with. The iterators latch the first error
/// they hit and keep returning it, so the whole enum stays cheap to clone
/// (io sources are wrapped in an Arc).
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("i/o error while {context}")]
    Io {
        context: &'static str,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("file ends before page {page_number}: expected {expected} bytes, {available} available")]
    ShortRead {
        page_number: u32,
        expected: u64,
        available: u64,
    },

    #[error("page {page_number} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BadChecksum {
        page_number: u32,
        stored: u32,
        computed: u32,
    },

    #[error("corrupt node in page {page_number}: {reason}")]
    CorruptNode { page_number: u32, reason: String },

    #[error("corrupt pointer: {reason}")]
    CorruptPointer { reason: String },

    #[error("no such table: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("long value {long_value_id:#010x}: segments do not tile, first uncovered offset {offset}")]
    LongValueGap { long_value_id: u32, offset: u64 },

    #[error("allocation of {bytes} bytes failed while {context}")]
    OutOfMemory { context: &'static str, bytes: usize },

    #[error("aborted by caller")]
    Aborted,
}

impl Error {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Error::Io {
            context,
            source: Arc::new(source),
        }
    }

    pub(crate) fn corrupt_node(page_number: u32, reason: impl Into<String>) -> Self {
        Error::CorruptNode {
            page_number,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_pointer(reason: impl Into<String>) -> Self {
        Error::CorruptPointer {
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_memory(context: &'static str, bytes: usize) -> Self {
        Error::OutOfMemory { context, bytes }
    }
}
