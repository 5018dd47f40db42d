// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        handle::TaskHandle,
        result::ResultCell,
        scheduler::Scheduler,
        task::{
            BackgroundTask,
            TaskWithResult,
        },
    },
};
use ::std::{
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Owner of a spawned task. Constructing one schedules the task; awaiting it
/// yields the task's result once it completes; dropping it destroys the task
/// frame. Callers must keep this alive while the task has a fabric operation
/// in flight.
pub struct TaskFuture<R: 'static> {
    scheduler: Scheduler,
    handle: TaskHandle,
    result: ResultCell<R>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Schedulers
impl Scheduler {
    /// Spawns an awaitable task. The task is scheduled immediately and its
    /// result is retrieved by awaiting (or reading) the returned future.
    pub fn spawn<F, R>(&self, name: &str, coroutine: F) -> TaskFuture<R>
    where
        F: Future<Output = Result<R, Fail>> + 'static,
        R: 'static,
    {
        let result: ResultCell<R> = ResultCell::new();
        let task: TaskWithResult<R> = TaskWithResult::new(name.to_string(), Box::pin(coroutine), result.clone());
        let handle: TaskHandle = self.insert(Box::new(task));
        self.call(&handle);
        TaskFuture {
            scheduler: self.clone(),
            handle,
            result,
        }
    }

    /// Spawns a fire-and-forget task. The task starts immediately, has no
    /// continuation, and drops its result; a failure is recorded and surfaced
    /// when the loop exits.
    pub fn spawn_background<F>(&self, name: &str, coroutine: F)
    where
        F: Future<Output = Result<(), Fail>> + 'static,
    {
        let task: BackgroundTask = BackgroundTask::new(name.to_string(), Box::pin(coroutine), self.failures());
        let handle: TaskHandle = self.insert(Box::new(task));
        self.call(&handle);
    }
}

/// Associate Functions for Task Futures
impl<R: 'static> TaskFuture<R> {
    /// Checks whether the task has completed.
    pub fn has_completed(&self) -> bool {
        self.result.is_set()
    }

    /// Reads the task's result. Fails with "result not set" if the task has
    /// not completed yet.
    pub fn try_result(&self) -> Result<R, Fail> {
        self.result.take()
    }

    /// Returns the handle of the owned task.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Runs a coroutine to completion using the calling thread's event loop and
/// returns its result. Failures of tasks that nobody awaited are surfaced
/// here once the loop drains.
pub fn run<F, R>(coroutine: F) -> Result<R, Fail>
where
    F: Future<Output = Result<R, Fail>> + 'static,
    R: 'static,
{
    let scheduler: Scheduler = Scheduler::get();
    let future: TaskFuture<R> = scheduler.spawn("main", coroutine);
    scheduler.run()?;
    let result: Result<R, Fail> = future.try_result();
    if result.is_ok() {
        if let Some(fail) = scheduler.take_failure() {
            return Err(fail);
        }
    }
    result
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<R: 'static> Future for TaskFuture<R> {
    type Output = Result<R, Fail>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.result.is_set() {
            return Poll::Ready(self_.result.take());
        }
        // Link awaitee to awaiter: completing the task wakes us.
        self_.result.set_waiter(ctx.waker().clone());
        Poll::Pending
    }
}

impl<R: 'static> Drop for TaskFuture<R> {
    fn drop(&mut self) {
        // Destroy the frame if the loop has not already reaped it.
        if self.scheduler.remove(&self.handle) {
            trace!("drop(): destroyed task id={:?}", self.handle.id());
        }
    }
}
