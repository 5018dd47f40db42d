// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! In-memory stand-ins for the external collaborators: a software fabric
//! implementing the provider contract and a host-backed device driver. Two
//! networks opened on one software fabric reach each other, which lets the
//! whole runtime be exercised on a single machine without EFA hardware or a
//! GPU.

pub mod fabric;
pub mod memory;

//==============================================================================
// Imports
//==============================================================================

use ::rand::{
    rngs::StdRng,
    RngCore,
    SeedableRng,
};

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    fabric::TestFabric,
    memory::TestDeviceDriver,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Deterministic random payload for round-trip comparisons.
pub fn rand_buffer(seed: u64, len: usize) -> Vec<u8> {
    let mut rng: StdRng = StdRng::seed_from_u64(seed);
    let mut bytes: Vec<u8> = vec![0; len];
    rng.fill_bytes(&mut bytes);
    bytes
}
