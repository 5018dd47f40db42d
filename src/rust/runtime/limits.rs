// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Size of an endpoint address as it travels on the wire.
pub const ADDR_SIZE: usize = 32;

/// Size of the buffer handed to the provider when reading the local address.
pub const MAX_ADDR_SIZE: usize = 64;

/// Default alignment boundary for registered buffers.
pub const DEFAULT_ALIGN: usize = 128;

/// Default capacity for host message buffers.
pub const BUFFER_SIZE: usize = 8129;

/// Maximum number of completion entries harvested from a queue per poll.
pub const MAX_CQ_ENTRIES: usize = 16;

/// Default capacity for device memory regions.
pub const MEMORY_REGION_SIZE: usize = 1 << 30;
