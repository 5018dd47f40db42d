// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! An endpoint-addressed peer. A connection owns its messaging buffers (host)
//! and its one-sided buffers (device): the send/recv host buffers carry
//! point-to-point messages, the device write buffer is the local source of
//! RDMA writes, and the device read buffer is the local target of
//! remote-initiated writes.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    config::Config,
    fabric::{
        provider::{
            DeviceDriver,
            FabricDomain,
            FabricEndpoint,
        },
        types::{
            MemDesc,
            PeerAddr,
        },
    },
    memory::{
        DeviceBuffer,
        HostBuffer,
    },
    network::futures::{
        ReadFuture,
        RecvFuture,
        SendFuture,
        WriteFuture,
    },
    runtime::{
        fail::Fail,
        scheduler::Scheduler,
        SharedObject,
    },
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// A peer reachable through a fabric endpoint.
pub struct Connection {
    /// Scheduler owning the selector this connection's operations park on.
    scheduler: Scheduler,
    /// Registration domain of the buffers.
    domain: Rc<dyn FabricDomain>,
    /// Endpoint the operations are submitted on.
    endpoint: Rc<dyn FabricEndpoint>,
    /// Resolved peer address.
    remote: PeerAddr,
    /// Landing buffer for incoming messages.
    recv_buffer: HostBuffer,
    /// Staging buffer for outgoing messages.
    send_buffer: HostBuffer,
    /// Local target of remote-initiated RDMA writes.
    read_buffer: DeviceBuffer,
    /// Local source of RDMA writes.
    write_buffer: DeviceBuffer,
}

/// Connection shared across coroutines of the loop thread.
pub struct SharedConnection(SharedObject<Connection>);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Connections
impl Connection {
    /// Creates a connection and its four buffers.
    pub fn new(
        scheduler: Scheduler,
        domain: Rc<dyn FabricDomain>,
        endpoint: Rc<dyn FabricEndpoint>,
        driver: &Rc<dyn DeviceDriver>,
        remote: PeerAddr,
        config: &Config,
    ) -> Result<Self, Fail> {
        let recv_buffer: HostBuffer = HostBuffer::new(&domain, config.host_buffer_size, config.align)?;
        let send_buffer: HostBuffer = HostBuffer::new(&domain, config.host_buffer_size, config.align)?;
        let read_buffer: DeviceBuffer = DeviceBuffer::new(&domain, driver, config.device_region_size, config.align)?;
        let write_buffer: DeviceBuffer = DeviceBuffer::new(&domain, driver, config.device_region_size, config.align)?;
        Ok(Self {
            scheduler,
            domain,
            endpoint,
            remote,
            recv_buffer,
            send_buffer,
            read_buffer,
            write_buffer,
        })
    }

    /// Returns the scheduler this connection parks its operations on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the endpoint operations are submitted on.
    pub fn endpoint(&self) -> &Rc<dyn FabricEndpoint> {
        &self.endpoint
    }

    /// Returns the resolved peer address.
    pub fn remote(&self) -> PeerAddr {
        self.remote
    }

    /// Returns the landing buffer for incoming messages.
    pub fn recv_buffer(&self) -> &HostBuffer {
        &self.recv_buffer
    }

    /// Returns the staging buffer for outgoing messages.
    pub fn send_buffer(&mut self) -> &mut HostBuffer {
        &mut self.send_buffer
    }

    /// Returns the local target of remote-initiated RDMA writes.
    pub fn read_buffer(&self) -> &DeviceBuffer {
        &self.read_buffer
    }

    /// Returns the local source of RDMA writes.
    pub fn write_buffer(&self) -> &DeviceBuffer {
        &self.write_buffer
    }

    /// Returns the local descriptor of the receive buffer.
    pub fn recv_mem_desc(&self) -> Result<MemDesc, Fail> {
        self.recv_buffer.mem_desc(self.domain.id())
    }

    /// Returns the local descriptor of the send buffer.
    pub fn send_mem_desc(&self) -> Result<MemDesc, Fail> {
        self.send_buffer.mem_desc(self.domain.id())
    }
}

/// Associate Functions for Shared Connections
impl SharedConnection {
    pub fn new(connection: Connection) -> Self {
        Self(SharedObject::new(connection))
    }

    /// Receives a message of up to the receive buffer's capacity from any
    /// source. Resolves to the receive-buffer base and the received length.
    pub fn recv(&self) -> RecvFuture {
        self.recv_sized(self.recv_buffer().len())
    }

    /// Receives a message of up to `size` bytes from any source.
    pub fn recv_sized(&self, size: usize) -> RecvFuture {
        RecvFuture::new(self.clone(), size)
    }

    /// Copies `data` into the send buffer and sends it to the peer. Resolves
    /// to the number of bytes sent.
    pub fn send<'a>(&self, data: &'a [u8]) -> SendFuture<'a> {
        SendFuture::new(self.clone(), data)
    }

    /// Writes the first `len` bytes of the device write buffer into the
    /// remote region `(remote_addr, remote_key)`. A non-zero `imm_data` is
    /// carried to the peer's completion queue.
    pub fn write(&self, len: usize, remote_addr: u64, remote_key: u64, imm_data: u32) -> WriteFuture {
        WriteFuture::new(self.clone(), len, remote_addr, remote_key, imm_data)
    }

    /// Awaits a remote-initiated write carrying `imm_data`. Resolves to the
    /// device read buffer's base address.
    pub fn read(&self, imm_data: u32) -> ReadFuture {
        ReadFuture::new(self.clone(), imm_data)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Clone for SharedConnection {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SharedConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
