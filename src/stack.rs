use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// LIFO stack used by the depth-first traversal for pending node ranges and
/// pending leaf descriptors. Entries are owned; whatever is still on the
/// stack when an iterator is dropped goes with it.
#[derive(Debug)]
pub struct SearchStack<T> {
    items: Vec<T>,
}

impl<T> SearchStack<T> {
    pub fn new() -> Self {
        SearchStack { items: Vec::new() }
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        // a failed grow is terminal for the scan, not a panic
        self.items
            .try_reserve(1)
            .map_err(|_| Error::out_of_memory("growing search stack", std::mem::size_of::<T>()))?;
        self.items.push(value);
        Ok(())
    }

    pub fn pop_or_empty(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<T> Default for SearchStack<T> {
    fn default() -> Self {
        SearchStack::new()
    }
}

/// Caller-owned cancellation flag, observed by iterators between node
/// expansions. Cloning shares the flag; raising is idempotent and safe from
/// any thread.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
