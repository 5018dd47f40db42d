// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Hand-rolled waker for the single-threaded scheduler. Waking a task is
//! exactly the scheduler's `call` operation: mark the handle Scheduled and
//! append it to the ready queue. The waker holds a weak reference so that a
//! timer or completion firing after the loop is gone is a no-op.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::scheduler::{
    handle::{
        HandleState,
        TaskHandle,
    },
    scheduler::Inner,
};
use ::std::{
    cell::RefCell,
    mem::ManuallyDrop,
    rc::{
        Rc,
        Weak,
    },
    task::{
        RawWaker,
        RawWakerVTable,
        Waker,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Waker state for one task. Not Send: this never leaves the loop thread.
pub struct LoopWaker {
    /// The scheduler's core state.
    inner: Weak<RefCell<Inner>>,
    /// The task to schedule on wake.
    handle: TaskHandle,
}

//==============================================================================
// Constants
//==============================================================================

static VTABLE: RawWakerVTable = RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Loop Wakers
impl LoopWaker {
    pub fn new(inner: Weak<RefCell<Inner>>, handle: TaskHandle) -> Rc<Self> {
        Rc::new(Self { inner, handle })
    }

    /// Schedules the task for the next tick. Idempotent when the handle is
    /// already scheduled.
    fn wake(&self) {
        if self.handle.state() == HandleState::Scheduled {
            return;
        }
        let inner: Rc<RefCell<Inner>> = match self.inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        self.handle.set_state(HandleState::Scheduled);
        inner.borrow_mut().push_ready(self.handle.clone());
    }

    /// Converts this waker into a standard task waker.
    pub fn into_waker(self: Rc<Self>) -> Waker {
        let data: *const () = Rc::into_raw(self) as *const ();
        unsafe { Waker::from_raw(RawWaker::new(data, &VTABLE)) }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

unsafe fn waker_clone(data: *const ()) -> RawWaker {
    let waker: ManuallyDrop<Rc<LoopWaker>> = ManuallyDrop::new(Rc::from_raw(data as *const LoopWaker));
    let cloned: Rc<LoopWaker> = Rc::clone(&waker);
    RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
}

unsafe fn waker_wake(data: *const ()) {
    let waker: Rc<LoopWaker> = Rc::from_raw(data as *const LoopWaker);
    waker.wake();
}

unsafe fn waker_wake_by_ref(data: *const ()) {
    let waker: ManuallyDrop<Rc<LoopWaker>> = ManuallyDrop::new(Rc::from_raw(data as *const LoopWaker));
    waker.wake();
}

unsafe fn waker_drop(data: *const ()) {
    drop(Rc::from_raw(data as *const LoopWaker));
}
