// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Completion demultiplexer. The selector polls every registered completion
//! queue once per tick and routes each harvested entry to the operation
//! context that is waiting for it: remote-initiated writes are matched
//! through the immediate-data table, everything else through the operation
//! context token the initiator submitted.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::{
        provider::CompletionQueue,
        types::{
            CqDataEntry,
            CqError,
            CqErrEntry,
            CqId,
            OpToken,
            OP_REMOTE_WRITE,
        },
    },
    runtime::{
        fail::Fail,
        limits::MAX_CQ_ENTRIES,
    },
};
use ::arrayvec::ArrayVec;
use ::libc::{
    EEXIST,
    EINVAL,
    EIO,
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    rc::Rc,
    task::Waker,
};

//==============================================================================
// Structures
//==============================================================================

/// A completion surfaced to the scheduler: waking the waker re-schedules the
/// parked task.
pub struct Event {
    /// Completion flags of the routed entry.
    pub flags: u64,
    /// Waker of the parked task.
    pub waker: Waker,
}

/// Landing slot for one in-flight operation. The slot outlives the awaiter if
/// the awaiter is destroyed first: the provider still owes the completion, so
/// the slot is freed only once the completion is observed.
struct OperationContext {
    /// Copy of the completion entry, written exactly once on delivery.
    entry: Option<CqDataEntry>,
    /// Waker of the task parked on this operation.
    waker: Option<Waker>,
    /// The awaiter was destroyed before the completion arrived.
    orphaned: bool,
}

/// Completion-queue selector.
pub struct Selector {
    /// Registered completion queues, in registration order.
    cqs: Vec<Rc<dyn CompletionQueue>>,
    /// In-flight operation contexts, addressed by token.
    contexts: Slab<OperationContext>,
    /// Maps immediate-data tags to the context of the matching read awaiter.
    imm_table: HashMap<u32, OpToken>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Selectors
impl Selector {
    /// Creates a selector with no sources.
    pub fn new() -> Self {
        Self {
            cqs: Vec::new(),
            contexts: Slab::new(),
            imm_table: HashMap::new(),
        }
    }

    /// Registers a completion queue for polling.
    pub fn register(&mut self, cq: Rc<dyn CompletionQueue>) {
        let id: CqId = cq.id();
        if self.cqs.iter().any(|registered| registered.id() == id) {
            return;
        }
        trace!("register(): cq={:?}", id);
        self.cqs.push(cq);
    }

    /// Unregisters a completion queue from polling.
    pub fn unregister(&mut self, id: CqId) {
        trace!("unregister(): cq={:?}", id);
        self.cqs.retain(|registered| registered.id() != id);
    }

    /// Checks if the selector has no registered queues.
    pub fn stopped(&self) -> bool {
        self.cqs.is_empty()
    }

    /// Allocates a context slot for a new operation.
    pub fn alloc_context(&mut self) -> OpToken {
        let key: usize = self.contexts.insert(OperationContext {
            entry: None,
            waker: None,
            orphaned: false,
        });
        OpToken(key as u64)
    }

    /// Stores the waker to notify when the context receives its completion.
    pub fn set_context_waker(&mut self, token: OpToken, waker: Waker) {
        if let Some(context) = self.contexts.get_mut(token.0 as usize) {
            context.waker = Some(waker);
        }
    }

    /// Takes the completion entry delivered to a context, if any.
    pub fn take_context_entry(&mut self, token: OpToken) -> Option<CqDataEntry> {
        self.contexts.get_mut(token.0 as usize).and_then(|context| context.entry.take())
    }

    /// Releases a context slot. If the provider still owes a completion for
    /// it (`in_flight`), the slot is kept and reclaimed once the completion
    /// is observed.
    pub fn release_context(&mut self, token: OpToken, in_flight: bool) {
        let key: usize = token.0 as usize;
        match self.contexts.get_mut(key) {
            Some(context) if in_flight && context.entry.is_none() => {
                context.waker = None;
                context.orphaned = true;
            },
            Some(_) => {
                self.contexts.remove(key);
            },
            None => (),
        }
    }

    /// Registers an immediate-data tag for a read awaiter. Zero is reserved
    /// and tags are unique across all in-flight read awaiters.
    pub fn register_imm(&mut self, tag: u32, token: OpToken) -> Result<(), Fail> {
        if tag == 0 {
            return Err(Fail::new(EINVAL, "immediate-data tag zero is reserved"));
        }
        if self.imm_table.contains_key(&tag) {
            return Err(Fail::new(EEXIST, "immediate-data tag already registered"));
        }
        trace!("register_imm(): tag={:#x} token={:?}", tag, token);
        self.imm_table.insert(tag, token);
        Ok(())
    }

    /// Unregisters an immediate-data tag.
    pub fn unregister_imm(&mut self, tag: u32) {
        trace!("unregister_imm(): tag={:#x}", tag);
        self.imm_table.remove(&tag);
    }

    /// Polls every registered queue once and returns the routed completions
    /// in delivery order. Queue-level errors abort the loop.
    pub fn poll(&mut self) -> Result<Vec<Event>, Fail> {
        let mut events: Vec<Event> = Vec::new();
        for i in 0..self.cqs.len() {
            let cq: Rc<dyn CompletionQueue> = self.cqs[i].clone();
            match cq.read(MAX_CQ_ENTRIES) {
                Ok(entries) => self.route_entries(entries, &mut events),
                Err(CqError::Again) => continue,
                Err(CqError::ErrAvailable) => {
                    let err: CqErrEntry = cq.read_error()?;
                    return Err(Fail::new(
                        if err.errno != 0 { err.errno } else { EIO },
                        &format!("fabric operation failed: {}", err.message),
                    ));
                },
                Err(CqError::Fatal(rc)) => {
                    return Err(Fail::from_provider(rc, "fatal completion queue error"));
                },
            }
        }
        Ok(events)
    }

    fn route_entries(&mut self, entries: ArrayVec<CqDataEntry, MAX_CQ_ENTRIES>, events: &mut Vec<Event>) {
        for entry in entries {
            if entry.flags & OP_REMOTE_WRITE != 0 {
                self.route_remote_write(entry, events);
            } else {
                self.route_initiator(entry, events);
            }
        }
    }

    /// Routes a remote-initiated write through the immediate-data table.
    /// Entries with no tag, or with a tag nobody registered, are dropped.
    fn route_remote_write(&mut self, entry: CqDataEntry, events: &mut Vec<Event>) {
        if entry.data == 0 {
            return;
        }
        let token: OpToken = match self.imm_table.get(&entry.data) {
            Some(&token) => token,
            None => return,
        };
        if let Some(context) = self.contexts.get_mut(token.0 as usize) {
            if context.entry.is_some() {
                warn!("route_remote_write(): duplicate completion for tag={:#x}", entry.data);
            }
            context.entry = Some(entry);
            if let Some(waker) = context.waker.take() {
                events.push(Event {
                    flags: entry.flags,
                    waker,
                });
            }
        }
    }

    /// Routes an initiator-side completion through its operation context.
    fn route_initiator(&mut self, entry: CqDataEntry, events: &mut Vec<Event>) {
        let key: usize = entry.op_context as usize;
        match self.contexts.get_mut(key) {
            Some(context) if context.orphaned => {
                // The awaiter is gone; the completion has now been observed
                // and the slot can be reclaimed.
                self.contexts.remove(key);
            },
            Some(context) => {
                if context.entry.is_some() {
                    warn!("route_initiator(): duplicate completion for token={:?}", key);
                }
                context.entry = Some(entry);
                if let Some(waker) = context.waker.take() {
                    events.push(Event {
                        flags: entry.flags,
                        waker,
                    });
                }
            },
            None => {
                warn!("route_initiator(): completion for unknown context token={:?}", key);
            },
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::Selector;
    use crate::fabric::types::OpToken;
    use ::libc::{
        EEXIST,
        EINVAL,
    };

    #[test]
    fn imm_tag_zero_is_reserved() {
        let mut selector: Selector = Selector::new();
        let token: OpToken = selector.alloc_context();
        let fail = selector.register_imm(0, token).unwrap_err();
        assert_eq!(fail.errno, EINVAL);
    }

    #[test]
    fn imm_tags_are_unique_while_in_flight() {
        let mut selector: Selector = Selector::new();
        let first: OpToken = selector.alloc_context();
        let second: OpToken = selector.alloc_context();
        selector.register_imm(0x123, first).unwrap();
        let fail = selector.register_imm(0x123, second).unwrap_err();
        assert_eq!(fail.errno, EEXIST);
        // The tag becomes available again once the first awaiter resumes.
        selector.unregister_imm(0x123);
        selector.register_imm(0x123, second).unwrap();
    }

    #[test]
    fn selector_stops_when_no_queues_remain() {
        let selector: Selector = Selector::new();
        assert!(selector.stopped());
    }
}
