// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Plain data types of the fabric provider contract. These mirror the shapes
//! a libfabric-style provider exposes: operation/completion flag bits shared
//! across memory access masks, endpoint bindings and completion entries; a
//! data-format completion entry; and the descriptors handed to an endpoint on
//! submission.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::limits::MAX_ADDR_SIZE;

//==============================================================================
// Constants
//==============================================================================

/// Operation and completion flag bits. One namespace serves memory access
/// masks, endpoint bind flags, and completion-entry flags.
pub const OP_SEND: u64 = 1 << 0;
pub const OP_RECV: u64 = 1 << 1;
pub const OP_WRITE: u64 = 1 << 2;
pub const OP_READ: u64 = 1 << 3;
pub const OP_REMOTE_WRITE: u64 = 1 << 4;
pub const OP_REMOTE_READ: u64 = 1 << 5;
/// Carry immediate data to the remote completion queue.
pub const OP_REMOTE_CQ_DATA: u64 = 1 << 6;

//==============================================================================
// Structures
//==============================================================================

/// Identifies a fabric domain.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct DomainId(pub u64);

/// Identifies a completion queue.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct CqId(pub u64);

/// Identifies an address vector.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct AvId(pub u64);

/// Opaque local memory descriptor of a registered region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemDesc(pub u64);

/// Resolved peer address, minted by an address vector.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PeerAddr(pub u64);

/// Token identifying an operation context registered with the selector. Its
/// value is what travels through the provider as the operation context.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct OpToken(pub u64);

/// Raw endpoint address as published by `getname`. The wire address is the
/// first [crate::runtime::limits::ADDR_SIZE] bytes.
pub type RawAddr = [u8; MAX_ADDR_SIZE];

/// One entry of a data-format completion queue.
#[derive(Clone, Copy, Debug)]
pub struct CqDataEntry {
    /// Operation context the initiator submitted, zero for remote-initiated
    /// completions.
    pub op_context: u64,
    /// Completion flags.
    pub flags: u64,
    /// Number of bytes transferred.
    pub len: usize,
    /// Immediate data, zero when none was carried.
    pub data: u32,
}

/// One entry of a completion queue's error queue.
#[derive(Clone, Debug)]
pub struct CqErrEntry {
    /// Operation context of the failed operation, if known.
    pub op_context: u64,
    /// Generic error code.
    pub errno: i32,
    /// Provider-specific error code.
    pub prov_errno: i32,
    /// Human-readable description.
    pub message: String,
}

/// Outcome of a non-blocking completion-queue read that yielded no entries.
#[derive(Debug)]
pub enum CqError {
    /// No completions are pending.
    Again,
    /// An error entry is pending; drain it with `read_error`.
    ErrAvailable,
    /// Unrecoverable provider error (negative fabric error code).
    Fatal(i32),
}

/// Message send/receive descriptor.
pub struct MsgDesc {
    /// Local buffer base.
    pub base: *mut u8,
    /// Number of bytes.
    pub len: usize,
    /// Local descriptor of the registered region backing `base`.
    pub mem_desc: MemDesc,
    /// Destination address for sends; None receives from any source.
    pub addr: Option<PeerAddr>,
    /// Operation context to deliver with the completion.
    pub context: OpToken,
}

/// One-sided RDMA write descriptor.
pub struct RmaDesc {
    /// Local source base address, as registered (host or device).
    pub base: u64,
    /// Number of bytes.
    pub len: usize,
    /// Local descriptor of the registered region backing `base`.
    pub mem_desc: MemDesc,
    /// Destination endpoint.
    pub addr: PeerAddr,
    /// Target address in the remote registered region.
    pub remote_addr: u64,
    /// Remote key of the target region.
    pub remote_key: u64,
    /// Operation context to deliver with the local completion.
    pub context: OpToken,
    /// Immediate data, delivered to the remote completion queue when
    /// `flags` carries [OP_REMOTE_CQ_DATA].
    pub imm_data: u32,
    /// Submission flags.
    pub flags: u64,
}

/// DMA-BUF registration descriptor for device memory.
pub struct DmabufAttr {
    /// DMA-BUF file descriptor covering the region.
    pub fd: i32,
    /// Offset of the region within the DMA-BUF.
    pub offset: u64,
    /// Length of the region.
    pub len: usize,
    /// Device virtual address of the region base.
    pub base_addr: u64,
    /// Device index that owns the memory.
    pub device: i32,
}
