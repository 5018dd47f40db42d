// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::types::{
        CqDataEntry,
        OpToken,
        OP_REMOTE_WRITE,
    },
    network::connection::SharedConnection,
    runtime::{
        fail::Fail,
        scheduler::Scheduler,
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

/// Remote-Write Notification Descriptor. Awaits a remote-initiated RDMA write
/// carrying a matching immediate-data tag; the write lands in the
/// connection's device read buffer.
pub struct ReadFuture {
    /// Associated connection.
    conn: SharedConnection,
    /// Immediate-data tag to wait for.
    imm_data: u32,
    /// Operation context, allocated at registration.
    token: Option<OpToken>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Remote-Write Notification Descriptors
impl ReadFuture {
    /// Creates a descriptor for a remote-write notification.
    pub fn new(conn: SharedConnection, imm_data: u32) -> Self {
        Self {
            conn,
            imm_data,
            token: None,
        }
    }

    /// Registers the immediate-data tag with the selector.
    fn register(&mut self, ctx: &mut Context) -> Result<OpToken, Fail> {
        if self.imm_data == 0 {
            return Err(Fail::invalid_argument("imm_data should be greater than 0"));
        }
        let scheduler: Scheduler = self.conn.scheduler().clone();
        let token: OpToken = scheduler.alloc_context();
        if let Err(fail) = scheduler.register_imm(self.imm_data, token) {
            scheduler.release_context(token, false);
            return Err(fail);
        }
        scheduler.set_context_waker(token, ctx.waker().clone());
        Ok(token)
    }

    /// Unregisters the immediate-data tag and releases the context. No
    /// completion is owed to the slot once the tag is gone.
    fn unregister(&self, token: OpToken) {
        let scheduler: &Scheduler = self.conn.scheduler();
        scheduler.unregister_imm(self.imm_data);
        scheduler.release_context(token, false);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Future Trait Implementation for Remote-Write Notification Descriptors
impl Future for ReadFuture {
    type Output = Result<u64, Fail>;

    /// Polls the target [ReadFuture].
    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut ReadFuture = self.get_mut();
        let token: OpToken = match self_.token {
            Some(token) => token,
            None => match self_.register(ctx) {
                Ok(token) => {
                    self_.token = Some(token);
                    return Poll::Pending;
                },
                Err(fail) => return Poll::Ready(Err(fail)),
            },
        };
        let scheduler: Scheduler = self_.conn.scheduler().clone();
        match scheduler.take_context_entry(token) {
            Some(entry) => {
                self_.unregister(token);
                self_.token = None;
                Poll::Ready(resolve(&self_.conn, entry))
            },
            None => {
                scheduler.set_context_waker(token, ctx.waker().clone());
                Poll::Pending
            },
        }
    }
}

impl Drop for ReadFuture {
    fn drop(&mut self) {
        if let Some(token) = self.token {
            self.unregister(token);
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

fn resolve(conn: &SharedConnection, entry: CqDataEntry) -> Result<u64, Fail> {
    if entry.flags & OP_REMOTE_WRITE == 0 {
        return Err(Fail::protocol_mismatch("invalid remote write flags"));
    }
    trace!("remote write observed ({:?} bytes, tag={:#x})", entry.len, entry.data);
    Ok(conn.read_buffer().data())
}
