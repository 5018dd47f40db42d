// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    cell::Cell,
    fmt,
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct TaskId(pub u64);

/// Scheduling state of a task. A handle is in exactly one scheduler queue at
/// any instant and this field reflects which: Scheduled means the handle sits
/// in the ready queue or in the timer heap, Suspended means it waits on an
/// external event, Unscheduled means it is being dispatched or idle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandleState {
    Unscheduled,
    Scheduled,
    Suspended,
}

/// Shared scheduling state of a single task.
struct Handle {
    /// Unique identifier.
    id: TaskId,
    /// Current scheduling state. Mutated only from the loop thread.
    state: Cell<HandleState>,
}

/// Reference to the scheduling state of a task. Cheap to clone; queues and
/// operation contexts hold copies of this.
#[derive(Clone)]
pub struct TaskHandle(Rc<Handle>);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Task Handles
impl TaskHandle {
    /// Creates a handle in the Unscheduled state.
    pub fn new(id: TaskId) -> Self {
        Self(Rc::new(Handle {
            id,
            state: Cell::new(HandleState::Unscheduled),
        }))
    }

    /// Returns the identifier of the associated task.
    pub fn id(&self) -> TaskId {
        self.0.id
    }

    /// Returns the current scheduling state.
    pub fn state(&self) -> HandleState {
        self.0.state.get()
    }

    /// Sets the scheduling state.
    pub fn set_state(&self, state: HandleState) {
        self.0.state.set(state);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle {{ id: {:?}, state: {:?} }}", self.id(), self.state())
    }
}
