// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Contract required of the underlying fabric provider and GPU driver. The
//! runtime is written against these traits only; a real libfabric/EFA backend
//! and the in-memory software fabric used by tests both live behind them.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::types::{
        AvId,
        CqDataEntry,
        CqError,
        CqErrEntry,
        CqId,
        DmabufAttr,
        DomainId,
        MemDesc,
        MsgDesc,
        PeerAddr,
        RawAddr,
        RmaDesc,
    },
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use crate::runtime::limits::MAX_CQ_ENTRIES;
use ::std::rc::Rc;

//==============================================================================
// Traits
//==============================================================================

/// A fabric provider instance for one NIC, as discovered by the topology
/// collaborator.
pub trait Fabric {
    /// Provider name, for logging.
    fn name(&self) -> String;

    /// Opens an access domain on this fabric.
    fn domain(&self) -> Result<Rc<dyn FabricDomain>, Fail>;
}

/// An access domain: the registration and object-creation scope.
pub trait FabricDomain {
    /// Unique identifier of this domain.
    fn id(&self) -> DomainId;

    /// Opens a data-format completion queue.
    fn open_cq(&self) -> Result<Rc<dyn CompletionQueue>, Fail>;

    /// Opens an address vector.
    fn open_av(&self) -> Result<Rc<dyn AddressVector>, Fail>;

    /// Creates a reliable-datagram endpoint.
    fn open_endpoint(&self) -> Result<Rc<dyn FabricEndpoint>, Fail>;

    /// Registers host memory with the given access mask.
    fn register_host(&self, base: *mut u8, len: usize, access: u64) -> Result<Box<dyn MemoryRegion>, Fail>;

    /// Registers device memory described by a DMA-BUF with the given access
    /// mask (interface CUDA).
    fn register_dmabuf(&self, attr: &DmabufAttr, access: u64) -> Result<Box<dyn MemoryRegion>, Fail>;
}

/// A reliable-datagram endpoint.
pub trait FabricEndpoint {
    /// Binds a completion queue to this endpoint for the given operations.
    fn bind_cq(&self, cq: &Rc<dyn CompletionQueue>, flags: u64) -> Result<(), Fail>;

    /// Binds an address vector to this endpoint.
    fn bind_av(&self, av: &Rc<dyn AddressVector>) -> Result<(), Fail>;

    /// Transitions the endpoint to the enabled state.
    fn enable(&self) -> Result<(), Fail>;

    /// Reads the local endpoint address. Returns the address length.
    fn getname(&self, addr: &mut RawAddr) -> Result<usize, Fail>;

    /// Submits a receive descriptor. Completion is delivered through the
    /// bound completion queue with the descriptor's context.
    fn recvmsg(&self, desc: &MsgDesc) -> Result<(), Fail>;

    /// Submits a send descriptor.
    fn sendmsg(&self, desc: &MsgDesc) -> Result<(), Fail>;

    /// Submits a one-sided RDMA write descriptor, optionally carrying
    /// immediate data to the remote completion queue.
    fn writemsg(&self, desc: &RmaDesc) -> Result<(), Fail>;
}

/// A data-format completion queue.
pub trait CompletionQueue {
    /// Unique identifier of this queue.
    fn id(&self) -> CqId;

    /// Non-blocking read of up to `max` completion entries.
    fn read(&self, max: usize) -> Result<ArrayVec<CqDataEntry, MAX_CQ_ENTRIES>, CqError>;

    /// Drains the pending error entry.
    fn read_error(&self) -> Result<CqErrEntry, Fail>;
}

/// An address vector mapping raw endpoint addresses to fabric addresses.
pub trait AddressVector {
    /// Unique identifier of this address vector.
    fn id(&self) -> AvId;

    /// Inserts a raw 32-byte address and returns the resolved peer address.
    fn insert(&self, addr: &[u8]) -> Result<PeerAddr, Fail>;
}

/// A registered memory region. Dropping the handle releases the registration;
/// owners must drop it before freeing the underlying memory.
pub trait MemoryRegion {
    /// Opaque local descriptor, submitted with operations on this region.
    fn mem_desc(&self) -> MemDesc;

    /// Remote key for one-sided access to this region.
    fn key(&self) -> u64;
}

/// Contract required of the GPU driver: allocate device memory, export a
/// DMA-BUF file descriptor over a subrange, and recover the device index of a
/// pointer.
pub trait DeviceDriver {
    /// Allocates `len` bytes of device memory and returns its device address.
    fn malloc(&self, len: usize) -> Result<u64, Fail>;

    /// Frees a device allocation.
    fn free(&self, addr: u64) -> Result<(), Fail>;

    /// Exports a DMA-BUF file descriptor covering `[addr, addr + len)`.
    fn export_dmabuf(&self, addr: u64, len: usize) -> Result<i32, Fail>;

    /// Queries pointer attributes to recover the owning device index.
    fn device_of(&self, addr: u64) -> Result<i32, Fail>;
}
