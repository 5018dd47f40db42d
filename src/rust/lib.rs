// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod cluster;
pub mod config;
pub mod fabric;
pub mod memory;
pub mod network;
pub mod runtime;
pub mod test_helpers;

pub use self::{
    config::Config,
    network::{
        connection::SharedConnection,
        SharedNetwork,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            run,
            Scheduler,
            TaskFuture,
        },
    },
};
