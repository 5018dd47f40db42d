// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::libc::EAGAIN;
use ::std::{
    cell::RefCell,
    rc::Rc,
    task::Waker,
};

//==============================================================================
// Structures
//==============================================================================

/// State of a result cell.
enum ResultState<T> {
    /// No value yet. Holds the continuation of the task awaiting this result,
    /// if any.
    Pending { waiter: Option<Waker> },
    /// The task completed with a value.
    Value(T),
    /// The task completed with a stored failure.
    Failed(Fail),
    /// The value was read out.
    Consumed,
}

/// One-shot slot for the value produced by a task. Written exactly once when
/// the task completes and read at most once by the awaiter.
pub struct ResultCell<T>(Rc<RefCell<ResultState<T>>>);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Result Cells
impl<T> ResultCell<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ResultState::Pending { waiter: None })))
    }

    /// Checks whether the cell holds a value or a failure.
    pub fn is_set(&self) -> bool {
        matches!(*self.0.borrow(), ResultState::Value(_) | ResultState::Failed(_))
    }

    /// Stores the continuation to wake when the cell is written.
    pub fn set_waiter(&self, waker: Waker) {
        if let ResultState::Pending { ref mut waiter } = *self.0.borrow_mut() {
            *waiter = Some(waker);
        }
    }

    /// Completes the cell with a value and wakes the continuation.
    pub fn return_value(&self, value: T) {
        self.complete(ResultState::Value(value));
    }

    /// Completes the cell with a failure and wakes the continuation.
    pub fn set_failure(&self, fail: Fail) {
        self.complete(ResultState::Failed(fail));
    }

    /// Reads the cell. Reading before completion fails with "result not set";
    /// a stored failure is surfaced to the reader.
    pub fn take(&self) -> Result<T, Fail> {
        let mut state = self.0.borrow_mut();
        match ::std::mem::replace(&mut *state, ResultState::Consumed) {
            ResultState::Value(value) => Ok(value),
            ResultState::Failed(fail) => Err(fail),
            ResultState::Pending { waiter } => {
                *state = ResultState::Pending { waiter };
                Err(Fail::new(EAGAIN, "result not set"))
            },
            ResultState::Consumed => Err(Fail::new(EAGAIN, "result already consumed")),
        }
    }

    fn complete(&self, next: ResultState<T>) {
        let waiter: Option<Waker> = {
            let mut state = self.0.borrow_mut();
            match ::std::mem::replace(&mut *state, next) {
                ResultState::Pending { waiter } => waiter,
                previous => {
                    // A task completes exactly once.
                    warn!("complete(): result already set, overwriting");
                    *state = previous;
                    return;
                },
            }
        };
        if let Some(waker) = waiter {
            waker.wake();
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<T> Clone for ResultCell<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::ResultCell;
    use crate::runtime::fail::Fail;
    use ::anyhow::Result;
    use ::libc::EINVAL;

    #[test]
    fn result_cell_read_before_set_fails() -> Result<()> {
        let cell: ResultCell<u32> = ResultCell::new();
        match cell.take() {
            Err(fail) => assert_eq!(fail.errno, ::libc::EAGAIN),
            Ok(_) => anyhow::bail!("read of an empty cell should fail"),
        }
        Ok(())
    }

    #[test]
    fn result_cell_value_roundtrip() -> Result<()> {
        let cell: ResultCell<u32> = ResultCell::new();
        cell.return_value(42);
        assert!(cell.is_set());
        assert_eq!(cell.take().unwrap(), 42);
        Ok(())
    }

    #[test]
    fn result_cell_failure_surfaces() -> Result<()> {
        let cell: ResultCell<u32> = ResultCell::new();
        cell.set_failure(Fail::new(EINVAL, "bad argument"));
        match cell.take() {
            Err(fail) => assert_eq!(fail.errno, EINVAL),
            Ok(_) => anyhow::bail!("failure should surface to the reader"),
        }
        Ok(())
    }
}
