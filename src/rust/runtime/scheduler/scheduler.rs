// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded cooperative I/O event loop. The loop
//! combines a min-heap of timed tasks, a FIFO of ready tasks, and non-blocking
//! polling of fabric completion queues. Each tick drains only the ready set
//! observed at its start, so tasks scheduled during a tick wait for the next
//! one; due timers are promoted before the drain so that a busy ready queue
//! cannot starve them.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::{
        selector::{
            Event,
            Selector,
        },
        types::{
            CqDataEntry,
            CqId,
            OpToken,
        },
    },
    runtime::{
        clock::LoopClock,
        fail::Fail,
        scheduler::{
            handle::{
                HandleState,
                TaskHandle,
                TaskId,
            },
            task::{
                FailureSink,
                Task,
            },
            waker::LoopWaker,
        },
    },
};
use crate::fabric::provider::CompletionQueue;
use ::slab::Slab;
use ::std::{
    cell::RefCell,
    cmp::Reverse,
    collections::{
        BinaryHeap,
        HashMap,
        VecDeque,
    },
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{
        Context,
        Poll,
        Waker,
    },
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// A timed task: fires at `deadline` milliseconds of loop time. `seq` is a
/// strictly increasing insertion counter that breaks ties between equal
/// deadlines, so resumptions within one deadline happen in submission order.
struct TimerEntry {
    deadline: u64,
    seq: u64,
    handle: TaskHandle,
}

/// A task frame held by the scheduler. The frame is taken out of its slot
/// while it runs so that the task may re-enter the scheduler.
struct TaskSlot {
    handle: TaskHandle,
    task: Option<Box<dyn Task>>,
}

/// Actual data used by [Scheduler].
pub(crate) struct Inner {
    /// Monotonic time origin sampled at loop construction.
    clock: LoopClock,
    /// Maps task identifiers to slots.
    ids: HashMap<TaskId, usize>,
    /// Stores all the tasks that are held by the scheduler.
    tasks: Slab<TaskSlot>,
    /// Timed tasks, ordered by (deadline, seq).
    timers: BinaryHeap<Reverse<TimerEntry>>,
    /// Tasks due to run on the next tick.
    ready: VecDeque<TaskHandle>,
    /// Completion sources and the immediate-data table.
    selector: Selector,
    /// Task currently being dispatched.
    current: Option<TaskHandle>,
    /// Failures of tasks that nobody awaits.
    failures: FailureSink,
    /// Next task identifier.
    next_task_id: u64,
    /// Next timer insertion sequence number.
    next_timer_seq: u64,
    /// Set by stop() to force the loop to exit.
    stop: bool,
}

/// Single-threaded cooperative scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

/// Delay awaitable: parks the awaiting task until a deadline in loop time.
pub struct SleepFuture {
    scheduler: Scheduler,
    delay: Duration,
    deadline: Option<u64>,
}

//==============================================================================
// Thread-Local Variables
//==============================================================================

::std::thread_local! {
    /// Per-thread scheduler instance. All mutation happens on the thread that
    /// runs the loop.
    static SCHEDULER: Scheduler = Scheduler::new();
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Inner
impl Inner {
    /// Appends a handle to the ready queue. Callers must have set the handle's
    /// state to Scheduled beforehand.
    pub(crate) fn push_ready(&mut self, handle: TaskHandle) {
        self.ready.push_back(handle);
    }

    /// Checks whether all event sources are drained.
    fn stopped(&self) -> bool {
        self.timers.is_empty() && self.ready.is_empty() && self.selector.stopped()
    }
}

/// Associate Functions for Scheduler
impl Scheduler {
    /// Creates a scheduler with an empty loop.
    pub fn new() -> Self {
        let inner: Inner = Inner {
            clock: LoopClock::new(),
            ids: HashMap::new(),
            tasks: Slab::new(),
            timers: BinaryHeap::new(),
            ready: VecDeque::new(),
            selector: Selector::new(),
            current: None,
            failures: FailureSink::default(),
            next_task_id: 0,
            next_timer_seq: 0,
            stop: false,
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Returns the scheduler of the calling thread.
    pub fn get() -> Self {
        SCHEDULER.with(|scheduler| scheduler.clone())
    }

    /// Returns the number of milliseconds elapsed since loop construction.
    pub fn time(&self) -> u64 {
        self.inner.borrow().clock.time()
    }

    /// Schedules a handle for execution on the next tick. Idempotent when the
    /// handle is already scheduled.
    pub fn call(&self, handle: &TaskHandle) {
        if handle.state() == HandleState::Scheduled {
            return;
        }
        handle.set_state(HandleState::Scheduled);
        self.inner.borrow_mut().push_ready(handle.clone());
    }

    /// Schedules a handle for execution after `delay`. Returns the absolute
    /// deadline in loop time.
    pub fn call_later(&self, delay: Duration, handle: &TaskHandle) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let deadline: u64 = inner.clock.deadline(delay);
        let seq: u64 = inner.next_timer_seq;
        inner.next_timer_seq += 1;
        handle.set_state(HandleState::Scheduled);
        inner.timers.push(Reverse(TimerEntry {
            deadline,
            seq,
            handle: handle.clone(),
        }));
        deadline
    }

    /// Best-effort cancellation: marks the handle unscheduled. Queue entries
    /// referring to it are skipped at dispatch rather than removed eagerly.
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.set_state(HandleState::Unscheduled);
    }

    /// Returns the handle of the task currently being dispatched.
    pub fn current_handle(&self) -> Option<TaskHandle> {
        self.inner.borrow().current.clone()
    }

    /// Returns a delay awaitable that resumes the awaiting task once `delay`
    /// has elapsed.
    pub fn sleep(&self, delay: Duration) -> SleepFuture {
        SleepFuture {
            scheduler: self.clone(),
            delay,
            deadline: None,
        }
    }

    /// Inserts a new task into our scheduler returning a handle corresponding
    /// to it. The task is not scheduled yet.
    pub(crate) fn insert(&self, task: Box<dyn Task>) -> TaskHandle {
        let mut inner = self.inner.borrow_mut();
        let id: TaskId = TaskId(inner.next_task_id);
        inner.next_task_id += 1;
        let handle: TaskHandle = TaskHandle::new(id);
        let name: String = task.get_name();
        let key: usize = inner.tasks.insert(TaskSlot {
            handle: handle.clone(),
            task: Some(task),
        });
        inner.ids.insert(id, key);
        trace!("insert(): name={:?} id={:?} key={:?}", name, id, key);
        handle
    }

    /// Removes a task frame from the scheduler. Returns false if the task
    /// already completed and was reaped by the loop.
    pub(crate) fn remove(&self, handle: &TaskHandle) -> bool {
        // The frame must drop outside the borrow: its destructors may re-enter
        // the scheduler (releasing contexts, unregistering queues).
        let slot: Option<TaskSlot> = {
            let mut inner = self.inner.borrow_mut();
            match inner.ids.remove(&handle.id()) {
                Some(key) => Some(inner.tasks.remove(key)),
                None => None,
            }
        };
        match slot {
            Some(_) => {
                handle.set_state(HandleState::Unscheduled);
                trace!("remove(): id={:?}", handle.id());
                true
            },
            None => false,
        }
    }

    /// Returns the sink for failures of tasks that nobody awaits.
    pub(crate) fn failures(&self) -> FailureSink {
        self.inner.borrow().failures.clone()
    }

    /// Takes the earliest failure recorded by a task that nobody awaited.
    pub fn take_failure(&self) -> Option<Fail> {
        self.failures().take_first()
    }

    /// Forces the loop to exit even if event sources remain registered.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop = true;
    }

    /// Checks whether all event sources are drained.
    pub fn stopped(&self) -> bool {
        self.inner.borrow().stopped()
    }

    /// Runs the loop until all timers, ready tasks, and completion sources are
    /// drained, or until stop() is called. Fatal completion-queue errors abort
    /// the loop.
    pub fn run(&self) -> Result<(), Fail> {
        loop {
            {
                let mut inner = self.inner.borrow_mut();
                if inner.stop {
                    inner.stop = false;
                    return Ok(());
                }
                if inner.stopped() {
                    return Ok(());
                }
            }

            // Poll completion sources once and mark their waiters ready.
            let events: Vec<Event> = self.inner.borrow_mut().selector.poll()?;
            for event in events {
                event.waker.wake();
            }

            // Promote due timers, preserving heap order.
            {
                let mut inner = self.inner.borrow_mut();
                let now: u64 = inner.clock.time();
                while let Some(Reverse(entry)) = inner.timers.peek() {
                    if entry.deadline > now {
                        break;
                    }
                    let entry: TimerEntry = inner.timers.pop().expect("peeked entry must exist").0;
                    // A timer whose task was cancelled or destroyed fires
                    // benignly: dispatch skips it.
                    if entry.handle.state() != HandleState::Unscheduled {
                        inner.push_ready(entry.handle);
                    }
                }
            }

            // Drain a snapshot of the ready queue.
            let snapshot: usize = self.inner.borrow().ready.len();
            for _ in 0..snapshot {
                let handle: TaskHandle = match self.inner.borrow_mut().ready.pop_front() {
                    Some(handle) => handle,
                    None => break,
                };
                if handle.state() == HandleState::Unscheduled {
                    // Cancelled before dispatch.
                    continue;
                }
                handle.set_state(HandleState::Unscheduled);
                self.dispatch(handle);
            }
        }
    }

    /// Runs a single task to its next suspension point.
    fn dispatch(&self, handle: TaskHandle) {
        let (key, mut task): (usize, Box<dyn Task>) = {
            let mut inner = self.inner.borrow_mut();
            let key: usize = match inner.ids.get(&handle.id()) {
                Some(&key) => key,
                // The frame was destroyed; the wakeup is a no-op.
                None => return,
            };
            match inner.tasks[key].task.take() {
                Some(task) => (key, task),
                None => return,
            }
        };

        let waker: Waker = LoopWaker::new(Rc::downgrade(&self.inner), handle.clone()).into_waker();
        let mut ctx: Context = Context::from_waker(&waker);
        self.inner.borrow_mut().current = Some(handle.clone());
        let poll_result: Poll<()> = Future::poll(Pin::new(&mut task), &mut ctx);

        // The frame (and anything it reaped) must drop after the borrow is
        // released: destructors may re-enter the scheduler.
        let reaped: Option<TaskSlot> = {
            let mut inner = self.inner.borrow_mut();
            inner.current = None;
            match poll_result {
                Poll::Ready(()) => {
                    trace!("dispatch(): task completed, name={:?} id={:?}", task.get_name(), handle.id());
                    match inner.ids.remove(&handle.id()) {
                        Some(key) => Some(inner.tasks.remove(key)),
                        None => None,
                    }
                },
                Poll::Pending => {
                    // The task may have removed itself while running.
                    match inner.ids.get(&handle.id()) {
                        Some(&k) if k == key => {
                            inner.tasks[key].task = Some(task);
                            // Not re-scheduled during its own run: the task
                            // now waits on an external event.
                            if handle.state() == HandleState::Unscheduled {
                                handle.set_state(HandleState::Suspended);
                            }
                            return;
                        },
                        _ => None,
                    }
                },
            }
        };
        drop(reaped);
    }

    //==========================================================================
    // Selector forwarding
    //==========================================================================

    /// Registers a completion queue with the loop's selector.
    pub fn register_cq(&self, cq: Rc<dyn CompletionQueue>) {
        self.inner.borrow_mut().selector.register(cq);
    }

    /// Unregisters a completion queue from the loop's selector.
    pub fn unregister_cq(&self, id: CqId) {
        self.inner.borrow_mut().selector.unregister(id);
    }

    /// Registers an immediate-data tag with the loop's selector.
    pub fn register_imm(&self, tag: u32, token: OpToken) -> Result<(), Fail> {
        self.inner.borrow_mut().selector.register_imm(tag, token)
    }

    /// Unregisters an immediate-data tag from the loop's selector.
    pub fn unregister_imm(&self, tag: u32) {
        self.inner.borrow_mut().selector.unregister_imm(tag);
    }

    /// Allocates an operation context slot.
    pub fn alloc_context(&self) -> OpToken {
        self.inner.borrow_mut().selector.alloc_context()
    }

    /// Stores the waker to notify when the context receives its completion.
    pub fn set_context_waker(&self, token: OpToken, waker: Waker) {
        self.inner.borrow_mut().selector.set_context_waker(token, waker);
    }

    /// Takes the completion entry delivered to a context, if any.
    pub fn take_context_entry(&self, token: OpToken) -> Option<CqDataEntry> {
        self.inner.borrow_mut().selector.take_context_entry(token)
    }

    /// Releases an operation context slot. A slot whose completion is still
    /// owed by the provider is kept until the completion is observed.
    pub fn release_context(&self, token: OpToken, in_flight: bool) {
        self.inner.borrow_mut().selector.release_context(token, in_flight);
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Returns a delay awaitable on the calling thread's scheduler.
pub fn sleep(delay: Duration) -> SleepFuture {
    Scheduler::get().sleep(delay)
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Future for SleepFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _ctx: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        match self_.deadline {
            None => {
                let handle: TaskHandle = self_
                    .scheduler
                    .current_handle()
                    .expect("sleep must be awaited from a scheduler task");
                self_.deadline = Some(self_.scheduler.call_later(self_.delay, &handle));
                Poll::Pending
            },
            Some(deadline) => {
                if self_.scheduler.time() >= deadline {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            },
        }
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &TimerEntry) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &TimerEntry) -> Option<::std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &TimerEntry) -> ::std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use ::anyhow::Result;
    use ::std::{
        cell::RefCell,
        rc::Rc,
    };

    #[test]
    fn scheduler_runs_spawned_task() -> Result<()> {
        let scheduler: Scheduler = Scheduler::new();
        let task = scheduler.spawn("answer", async { Ok(42u32) });
        scheduler.run().map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
        assert_eq!(task.try_result().unwrap(), 42);
        Ok(())
    }

    #[test]
    fn scheduler_preserves_submission_order() -> Result<()> {
        let scheduler: Scheduler = Scheduler::new();
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let mut tasks = Vec::new();
        for id in 0..4u32 {
            let order = order.clone();
            tasks.push(scheduler.spawn("ordered", async move {
                order.borrow_mut().push(id);
                Ok(())
            }));
        }
        scheduler.run().map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn cancelled_task_is_skipped_at_dispatch() -> Result<()> {
        let scheduler: Scheduler = Scheduler::new();
        let task = scheduler.spawn("cancelled", async { Ok(1u32) });
        scheduler.cancel(task.handle());
        scheduler.run().map_err(|e| anyhow::anyhow!("run failed: {:?}", e.cause))?;
        assert!(!task.has_completed());
        assert!(task.try_result().is_err());
        Ok(())
    }
}
