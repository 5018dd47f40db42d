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
        OP_SEND,
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

/// Send Operation Descriptor
pub struct SendFuture<'a> {
    /// Associated connection.
    conn: SharedConnection,
    /// Bytes to send; copied into the send buffer at submission.
    data: &'a [u8],
    /// Operation context, allocated at submission.
    token: Option<OpToken>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Send Operation Descriptors
impl<'a> SendFuture<'a> {
    /// Creates a descriptor for a send operation.
    pub fn new(conn: SharedConnection, data: &'a [u8]) -> Self {
        Self {
            conn,
            data,
            token: None,
        }
    }

    /// Copies the payload into the send buffer and submits the send
    /// descriptor to the peer.
    fn submit(&mut self, ctx: &mut Context) -> Result<OpToken, Fail> {
        if self.data.is_empty() {
            return Err(Fail::invalid_argument("send size should be greater than 0"));
        }
        if self.data.len() > self.conn.send_buffer().len() {
            return Err(Fail::invalid_argument("send size exceeds buffer capacity"));
        }
        let data: &[u8] = self.data;
        self.conn.send_buffer().fill(data)?;
        let scheduler: Scheduler = self.conn.scheduler().clone();
        let mem_desc: MemDesc = self.conn.send_mem_desc()?;
        let token: OpToken = scheduler.alloc_context();
        let desc: MsgDesc = MsgDesc {
            base: self.conn.send_buffer().data(),
            len: data.len(),
            mem_desc,
            addr: Some(self.conn.remote()),
            context: token,
        };
        if let Err(fail) = self.conn.endpoint().sendmsg(&desc) {
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

/// Future Trait Implementation for Send Operation Descriptors
impl Future for SendFuture<'_> {
    type Output = Result<usize, Fail>;

    /// Polls the target [SendFuture].
    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut SendFuture = self.get_mut();
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
                Poll::Ready(resolve(entry))
            },
            None => {
                scheduler.set_context_waker(token, ctx.waker().clone());
                Poll::Pending
            },
        }
    }
}

impl Drop for SendFuture<'_> {
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

fn resolve(entry: CqDataEntry) -> Result<usize, Fail> {
    if entry.flags & OP_SEND == 0 {
        return Err(Fail::protocol_mismatch("invalid cq send flags"));
    }
    trace!("send completed ({:?} bytes)", entry.len);
    Ok(entry.len)
}
