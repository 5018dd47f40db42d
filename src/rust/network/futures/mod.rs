// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod read;
mod recv;
mod send;
mod write;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    read::ReadFuture,
    recv::RecvFuture,
    send::SendFuture,
    write::WriteFuture,
};
