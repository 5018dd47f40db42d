// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::types::{
        CqDataEntry,
        OpToken,
        RmaDesc,
        OP_REMOTE_CQ_DATA,
        OP_WRITE,
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

/// One-Sided Write Operation Descriptor
pub struct WriteFuture {
    /// Associated connection.
    conn: SharedConnection,
    /// Number of bytes to write from the device write buffer.
    len: usize,
    /// Target address in the remote region.
    remote_addr: u64,
    /// Remote key of the target region.
    remote_key: u64,
    /// Immediate data; zero carries no remote notification.
    imm_data: u32,
    /// Operation context, allocated at submission.
    token: Option<OpToken>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Write Operation Descriptors
impl WriteFuture {
    /// Creates a descriptor for a one-sided write operation.
    pub fn new(conn: SharedConnection, len: usize, remote_addr: u64, remote_key: u64, imm_data: u32) -> Self {
        Self {
            conn,
            len,
            remote_addr,
            remote_key,
            imm_data,
            token: None,
        }
    }

    /// Submits the write descriptor sourcing from the device write buffer.
    fn submit(&mut self, ctx: &mut Context) -> Result<OpToken, Fail> {
        if self.len == 0 {
            return Err(Fail::invalid_argument("write size should be greater than 0"));
        }
        if self.len > self.conn.write_buffer().len() {
            return Err(Fail::invalid_argument("write size exceeds buffer capacity"));
        }
        let scheduler: Scheduler = self.conn.scheduler().clone();
        let token: OpToken = scheduler.alloc_context();
        let mut flags: u64 = 0;
        if self.imm_data != 0 {
            flags |= OP_REMOTE_CQ_DATA;
        }
        let desc: RmaDesc = RmaDesc {
            base: self.conn.write_buffer().data(),
            len: self.len,
            mem_desc: self.conn.write_buffer().mem_desc(),
            addr: self.conn.remote(),
            remote_addr: self.remote_addr,
            remote_key: self.remote_key,
            context: token,
            imm_data: self.imm_data,
            flags,
        };
        if let Err(fail) = self.conn.endpoint().writemsg(&desc) {
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

/// Future Trait Implementation for Write Operation Descriptors
impl Future for WriteFuture {
    type Output = Result<usize, Fail>;

    /// Polls the target [WriteFuture].
    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut WriteFuture = self.get_mut();
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

impl Drop for WriteFuture {
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
    if entry.flags & OP_WRITE == 0 {
        return Err(Fail::protocol_mismatch("invalid cq write flags"));
    }
    trace!("write completed ({:?} bytes)", entry.len);
    Ok(entry.len)
}
