// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Exports
//==============================================================================

pub mod buffer;

pub use self::buffer::{
    DeviceBuffer,
    HostBuffer,
};
