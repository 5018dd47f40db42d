// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::types::{
        CqDataEntry,
        MemDesc,
        MsgDesc,
        OpToken,
        OP_RECV,
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

/// Receive Operation Descriptor
pub struct RecvFuture {
    /// Associated connection.
    conn: SharedConnection,
    /// Maximum number of bytes to receive.
    size: usize,
    /// Operation context, allocated at submission.
    token: Option<OpToken>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Receive Operation Descriptors
impl RecvFuture {
    /// Creates a descriptor for a receive operation.
    pub fn new(conn: SharedConnection, size: usize) -> Self {
        Self {
            conn,
            size,
            token: None,
        }
    }

    /// Submits the receive descriptor against the connection's receive
    /// buffer, accepting from any source.
    fn submit(&mut self, ctx: &mut Context) -> Result<OpToken, Fail> {
        if self.size == 0 {
            return Err(Fail::invalid_argument("recv size should be greater than 0"));
        }
        if self.size > self.conn.recv_buffer().len() {
            return Err(Fail::invalid_argument("recv size exceeds buffer capacity"));
        }
        let scheduler: Scheduler = self.conn.scheduler().clone();
        let mem_desc: MemDesc = self.conn.recv_mem_desc()?;
        let token: OpToken = scheduler.alloc_context();
        let desc: MsgDesc = MsgDesc {
            base: self.conn.recv_buffer().data(),
            len: self.size,
            mem_desc,
            addr: None,
            context: token,
        };
        if let Err(fail) = self.conn.endpoint().recvmsg(&desc) {
            scheduler.release_context(token, false);
            return Err(fail);
        }
        scheduler.set_context_waker(token, ctx.waker().clone());
        Ok(token)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Future Trait Implementation for Receive Operation Descriptors
impl Future for RecvFuture {
    type Output = Result<(*const u8, usize), Fail>;

    /// Polls the target [RecvFuture].
    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut RecvFuture = self.get_mut();
        let token: OpToken = match self_.token {
            Some(token) => token,
            None => match self_.submit(ctx) {
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
                scheduler.release_context(token, false);
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

impl Drop for RecvFuture {
    fn drop(&mut self) {
        // The provider still owes a completion for this context.
        if let Some(token) = self.token {
            self.conn.scheduler().release_context(token, true);
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

fn resolve(conn: &SharedConnection, entry: CqDataEntry) -> Result<(*const u8, usize), Fail> {
    if entry.flags & OP_RECV == 0 {
        return Err(Fail::protocol_mismatch("invalid cq recv flags"));
    }
    trace!("recv completed ({:?} bytes)", entry.len);
    Ok((conn.recv_buffer().data() as *const u8, entry.len))
}
