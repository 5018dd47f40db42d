// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::result::ResultCell,
};
use ::futures::future::FusedFuture;
use ::std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{
        Context,
        Poll,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Task runs a single coroutine to completion and stores the result for later.
/// Thus, it implements Future but never directly returns anything.
pub trait Task: FusedFuture<Output = ()> + Unpin + 'static {
    fn get_name(&self) -> String;
}

/// Sink for failures of tasks that nobody awaits. Shared with the scheduler,
/// which surfaces them when the loop exits.
#[derive(Clone, Default)]
pub struct FailureSink(Rc<RefCell<Vec<Fail>>>);

/// Awaitable task frame producing a result of type `R`. Completion writes the
/// result cell, which wakes the continuation of the awaiting task.
pub struct TaskWithResult<R: 'static> {
    /// Task name.
    name: String,
    /// Underlying coroutine to run.
    coroutine: Pin<Box<dyn Future<Output = Result<R, Fail>>>>,
    /// Output cell of the underlying coroutine.
    result: ResultCell<R>,
    /// Set once the coroutine has returned.
    done: bool,
}

/// Fire-and-forget task frame. Starts immediately, has no continuation, and
/// drops its result; failures are recorded with the scheduler.
pub struct BackgroundTask {
    /// Task name.
    name: String,
    /// Underlying coroutine to run.
    coroutine: Pin<Box<dyn Future<Output = Result<(), Fail>>>>,
    /// Where unobserved failures go.
    failures: FailureSink,
    /// Set once the coroutine has returned.
    done: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl FailureSink {
    /// Records an unobserved failure.
    pub fn push(&self, fail: Fail) {
        self.0.borrow_mut().push(fail);
    }

    /// Takes the earliest recorded failure, if any.
    pub fn take_first(&self) -> Option<Fail> {
        let mut failures = self.0.borrow_mut();
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }
}

/// Associate Functions for TaskWithResults.
impl<R: 'static> TaskWithResult<R> {
    /// Instantiates a new Task.
    pub fn new(name: String, coroutine: Pin<Box<dyn Future<Output = Result<R, Fail>>>>, result: ResultCell<R>) -> Self {
        Self {
            name,
            coroutine,
            result,
            done: false,
        }
    }
}

/// Associate Functions for Background Tasks.
impl BackgroundTask {
    /// Instantiates a new background task.
    pub fn new(name: String, coroutine: Pin<Box<dyn Future<Output = Result<(), Fail>>>>, failures: FailureSink) -> Self {
        Self {
            name,
            coroutine,
            failures,
            done: false,
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<R: 'static> Task for TaskWithResult<R> {
    fn get_name(&self) -> String {
        self.name.clone()
    }
}

/// The Future trait for tasks.
impl<R: 'static> Future for TaskWithResult<R> {
    type Output = ();

    /// Polls the coroutine.
    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        if self_.done {
            return Poll::Ready(());
        }
        match Future::poll(self_.coroutine.as_mut(), ctx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(value)) => {
                self_.done = true;
                self_.result.return_value(value);
                Poll::Ready(())
            },
            Poll::Ready(Err(fail)) => {
                self_.done = true;
                self_.result.set_failure(fail);
                Poll::Ready(())
            },
        }
    }
}

impl<R: 'static> FusedFuture for TaskWithResult<R> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Task for BackgroundTask {
    fn get_name(&self) -> String {
        self.name.clone()
    }
}

impl Future for BackgroundTask {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        if self_.done {
            return Poll::Ready(());
        }
        match Future::poll(self_.coroutine.as_mut(), ctx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                self_.done = true;
                Poll::Ready(())
            },
            Poll::Ready(Err(fail)) => {
                warn!("background task failed: name={:?} error={:?}", self_.name, fail);
                self_.failures.push(fail);
                self_.done = true;
                Poll::Ready(())
            },
        }
    }
}

impl FusedFuture for BackgroundTask {
    fn is_terminated(&self) -> bool {
        self.done
    }
}
