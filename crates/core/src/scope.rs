//! Scoped evaluation context.
//!
//! Formula functions ask "which table and cell am I evaluating in" through
//! the current [`ScopeFrame`] instead of taking that state as arguments.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::host::VarTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope stack is empty: pop without a matching push")]
    Empty,
}

/// Opaque host data handed to the engine by the embedder.
#[derive(Clone)]
pub struct DataSource {
    name: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl DataSource {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, handle: T) -> Self {
        Self { name: name.into(), handle: Arc::new(handle) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub row: usize,
    pub col: usize,
}

/// One entry of the scope stack.
#[derive(Debug, Clone, Default)]
pub struct ScopeFrame {
    pub data_source: Option<DataSource>,
    pub cell: Option<CellLocation>,
    pub lexical_scope: Arc<VarTable>,
}

impl ScopeFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn at_cell(mut self, row: usize, col: usize) -> Self {
        self.cell = Some(CellLocation { row, col });
        self
    }

    pub fn with_scope(mut self, scope: VarTable) -> Self {
        self.lexical_scope = Arc::new(scope);
        self
    }
}

/// LIFO stack of scope frames owned by one worker.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<ScopeFrame, ScopeError> {
        self.frames.pop().ok_or(ScopeError::Empty)
    }

    pub fn current(&self) -> Option<&ScopeFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Pops the frame it pushed when dropped.
pub struct ScopeGuard<'a> {
    stack: &'a RefCell<ScopeStack>,
}

impl<'a> ScopeGuard<'a> {
    pub fn push(stack: &'a RefCell<ScopeStack>, frame: ScopeFrame) -> Self {
        stack.borrow_mut().push(frame);
        Self { stack }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.borrow_mut().pop();
        debug_assert!(popped.is_ok(), "scope guard dropped on an empty stack");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_of(stack: &ScopeStack) -> Option<CellLocation> {
        stack.current().and_then(|f| f.cell)
    }

    #[test]
    fn test_pop_on_empty_fails() {
        let mut stack = ScopeStack::new();
        assert_eq!(stack.pop().unwrap_err(), ScopeError::Empty);

        stack.push(ScopeFrame::new());
        assert!(stack.pop().is_ok());
        assert_eq!(stack.pop().unwrap_err(), ScopeError::Empty);
    }

    #[test]
    fn test_balanced_push_pop_restores_current() {
        let mut stack = ScopeStack::new();
        stack.push(ScopeFrame::new().at_cell(0, 0));
        let before = cell_of(&stack);

        for i in 1..=5 {
            stack.push(ScopeFrame::new().at_cell(i, i * 2));
            assert_eq!(cell_of(&stack), Some(CellLocation { row: i, col: i * 2 }));
        }
        for _ in 1..=5 {
            stack.pop().unwrap();
        }

        assert_eq!(cell_of(&stack), before);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let stack = RefCell::new(ScopeStack::new());
        {
            let _outer = ScopeGuard::push(&stack, ScopeFrame::new().at_cell(1, 1));
            {
                let _inner = ScopeGuard::push(&stack, ScopeFrame::new().at_cell(2, 2));
                assert_eq!(stack.borrow().depth(), 2);
            }
            assert_eq!(cell_of(&stack.borrow()), Some(CellLocation { row: 1, col: 1 }));
        }
        assert!(stack.borrow().current().is_none());
    }

    #[test]
    fn test_data_source_downcast() {
        let frame = ScopeFrame::new().with_data_source(DataSource::new("sales", vec![1u32, 2, 3]));
        let source = frame.data_source.as_ref().unwrap();
        assert_eq!(source.name(), "sales");
        assert_eq!(source.downcast_ref::<Vec<u32>>().map(Vec::len), Some(3));
        assert!(source.downcast_ref::<String>().is_none());
    }
}
