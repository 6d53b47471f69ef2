use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::btree::{derive_definition, BtreeRange, TreeKind, TreeWalker};
use crate::catalog::TableDefinition;
use crate::error::{Error, Result};
use crate::page::PageStore;
use crate::record::Record;
use crate::stack::AbortFlag;

enum CursorState {
    Active,
    Done,
    /// First error the scan hit; replayed on every later call.
    Failed(Error),
}

/// A sequential reader over one table. `next_record` drives a single
/// depth-first scan of the table's B-tree, producing records in ascending
/// key order. Each table holds its own file handles and page caches, so
/// iterators on the same database never contend.
pub struct Table {
    definition: Rc<TableDefinition>,
    store: Rc<RefCell<PageStore>>,
    long_value_store: Rc<RefCell<PageStore>>,
    walker: TreeWalker,
    long_value_root: Option<BtreeRange>,
    abort: AbortFlag,
    state: CursorState,
}

impl Table {
    pub(crate) fn new(
        definition: Rc<TableDefinition>,
        store: Rc<RefCell<PageStore>>,
        long_value_store: Rc<RefCell<PageStore>>,
        abort: AbortFlag,
    ) -> Result<Self> {
        let page_size = store.borrow().page_size();
        let root = BtreeRange::for_page(definition.root_page, page_size)?;
        let walker = TreeWalker::new(&root, TreeKind::Table, None)?;

        let long_value_root = if definition.long_value_root_page != 0 {
            Some(BtreeRange::for_page(
                definition.long_value_root_page,
                page_size,
            )?)
        } else {
            None
        };

        debug!(
            "opened table {} (root page {}, long-values root {})",
            definition.name, definition.root_page, definition.long_value_root_page
        );

        Ok(Table {
            definition,
            store,
            long_value_store,
            walker,
            long_value_root,
            abort,
            state: CursorState::Active,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// Raises the shared abort flag. Idempotent and safe to call from any
    /// thread; the scan observes it at its next iteration boundary.
    pub fn abort(&self) {
        self.abort.raise();
    }

    pub fn abort_handle(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Produces the next record, or Ok(None) at end of table. Any error is
    /// terminal: the scan is dead and the same error comes back on every
    /// subsequent call.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match &self.state {
            CursorState::Failed(error) => return Err(error.clone()),
            CursorState::Done => return Ok(None),
            CursorState::Active => {}
        }

        let step = self.advance();
        match &step {
            Err(error) => self.state = CursorState::Failed(error.clone()),
            Ok(None) => self.state = CursorState::Done,
            Ok(Some(_)) => {}
        }
        step
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        let leaf = {
            let mut store = self.store.borrow_mut();
            self.walker.next_leaf(&mut store, &self.abort)?
        };
        let leaf = match leaf {
            Some(leaf) => leaf,
            None => return Ok(None),
        };

        let page_size = self.store.borrow().page_size();
        let definition = derive_definition(&leaf, page_size)?;

        let long_value_root = match &self.long_value_root {
            Some(root) => Some(root.clone_range()?),
            None => None,
        };

        Ok(Some(Record::new(
            definition,
            Rc::clone(&self.store),
            Rc::clone(&self.long_value_store),
            Rc::clone(&self.definition),
            long_value_root,
            self.abort.clone(),
        )))
    }

    #[cfg(test)]
    pub(crate) fn stack_sizes(&self) -> (usize, usize) {
        self.walker.stack_sizes()
    }

    #[cfg(test)]
    pub(crate) fn clear_caches(&self) {
        self.store.borrow_mut().clear_cache();
        self.long_value_store.borrow_mut().clear_cache();
    }
}
