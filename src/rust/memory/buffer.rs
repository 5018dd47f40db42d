// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Registered memory buffers. A host buffer is heap memory registered with a
//! fabric domain for messaging; a device buffer is GPU memory exported as a
//! DMA-BUF and registered for messaging and one-sided access. In both cases
//! the registration is released before the memory is freed, and the base
//! pointer is stable for the buffer's lifetime.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::{
        provider::{
            DeviceDriver,
            FabricDomain,
            MemoryRegion,
        },
        types::{
            DmabufAttr,
            DomainId,
            MemDesc,
            OP_READ,
            OP_RECV,
            OP_REMOTE_READ,
            OP_REMOTE_WRITE,
            OP_SEND,
            OP_WRITE,
        },
    },
    runtime::fail::Fail,
};
use ::libc::{
    EINVAL,
    ENOMEM,
    ENOENT,
};
use ::std::{
    alloc::{
        alloc,
        dealloc,
        Layout,
    },
    ptr::NonNull,
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// Host memory buffer registered for messaging. May be registered against
/// multiple domains for multi-NIC deployments; each registration is
/// independent and released on destruction.
pub struct HostBuffer {
    /// Aligned base pointer.
    data: NonNull<u8>,
    /// Usable length.
    len: usize,
    /// Allocation layout, kept for deallocation.
    layout: Layout,
    /// One registration per domain.
    mrs: Vec<(DomainId, Box<dyn MemoryRegion>)>,
}

/// Device memory buffer registered through a DMA-BUF for messaging and
/// one-sided access.
pub struct DeviceBuffer {
    /// Owning driver.
    driver: Rc<dyn DeviceDriver>,
    /// Raw device allocation base.
    raw: u64,
    /// Aligned base within the allocation.
    data: u64,
    /// Usable length: the aligned suffix of the allocation.
    len: usize,
    /// Owning device index.
    device: i32,
    /// Exported DMA-BUF file descriptor.
    dmabuf_fd: i32,
    /// Fabric registration.
    mr: Option<Box<dyn MemoryRegion>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Host Buffers
impl HostBuffer {
    /// Allocates `size` bytes aligned at `align` and registers the region
    /// with `domain` for messaging.
    pub fn new(domain: &Rc<dyn FabricDomain>, size: usize, align: usize) -> Result<Self, Fail> {
        let layout: Layout = match Layout::from_size_align(size, align) {
            Ok(layout) if size > 0 => layout,
            _ => return Err(Fail::new(EINVAL, "invalid buffer size or alignment")),
        };
        let data: NonNull<u8> = match NonNull::new(unsafe { alloc(layout) }) {
            Some(data) => data,
            None => return Err(Fail::new(ENOMEM, "host buffer allocation failed")),
        };
        let mut buffer: Self = Self {
            data,
            len: size,
            layout,
            mrs: Vec::new(),
        };
        buffer.register_with(domain)?;
        Ok(buffer)
    }

    /// Registers this buffer with another domain. A no-op if the buffer is
    /// already registered there.
    pub fn register_with(&mut self, domain: &Rc<dyn FabricDomain>) -> Result<(), Fail> {
        if self.mrs.iter().any(|(id, _)| *id == domain.id()) {
            return Ok(());
        }
        let mr: Box<dyn MemoryRegion> = domain.register_host(self.data.as_ptr(), self.len, OP_SEND | OP_RECV)?;
        self.mrs.push((domain.id(), mr));
        Ok(())
    }

    /// Returns the registration for a given domain.
    pub fn mr(&self, domain: DomainId) -> Result<&dyn MemoryRegion, Fail> {
        match self.mrs.iter().find(|(id, _)| *id == domain) {
            Some((_, mr)) => Ok(mr.as_ref()),
            None => Err(Fail::new(ENOENT, "buffer is not registered with this domain")),
        }
    }

    /// Returns the local descriptor for a given domain.
    pub fn mem_desc(&self, domain: DomainId) -> Result<MemDesc, Fail> {
        Ok(self.mr(domain)?.mem_desc())
    }

    /// Returns the aligned base pointer.
    pub fn data(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Returns the usable length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `data` into the front of the buffer.
    pub fn fill(&mut self, data: &[u8]) -> Result<(), Fail> {
        if data.len() > self.len {
            return Err(Fail::new(EINVAL, "data exceeds buffer capacity"));
        }
        unsafe { ::std::ptr::copy_nonoverlapping(data.as_ptr(), self.data.as_ptr(), data.len()) };
        Ok(())
    }

    /// Views the first `len` bytes of the buffer.
    ///
    /// # Safety
    ///
    /// The caller must ensure no operation is concurrently writing into the
    /// buffer.
    pub unsafe fn slice(&self, len: usize) -> &[u8] {
        ::std::slice::from_raw_parts(self.data.as_ptr(), len.min(self.len))
    }
}

/// Associate Functions for Device Buffers
impl DeviceBuffer {
    /// Allocates `size` bytes of device memory, exports a DMA-BUF covering
    /// the aligned subrange, and registers it with `domain` for messaging and
    /// one-sided access.
    pub fn new(
        domain: &Rc<dyn FabricDomain>,
        driver: &Rc<dyn DeviceDriver>,
        size: usize,
        align: usize,
    ) -> Result<Self, Fail> {
        if size == 0 || align == 0 || !align.is_power_of_two() {
            return Err(Fail::new(EINVAL, "invalid buffer size or alignment"));
        }
        // The aligned base must stay inside the allocation even when the
        // driver returns an unaligned address.
        if size < align {
            return Err(Fail::new(EINVAL, "buffer size is smaller than its alignment"));
        }
        let raw: u64 = driver.malloc(size)?;
        match Self::bind(domain, driver, raw, size, align) {
            Ok(buffer) => Ok(buffer),
            Err(fail) => {
                if let Err(free_fail) = driver.free(raw) {
                    warn!("new(): leaking device allocation: {:?}", free_fail);
                }
                Err(fail)
            },
        }
    }

    fn bind(
        domain: &Rc<dyn FabricDomain>,
        driver: &Rc<dyn DeviceDriver>,
        raw: u64,
        size: usize,
        align: usize,
    ) -> Result<Self, Fail> {
        let data: u64 = (raw + align as u64 - 1) & !(align as u64 - 1);
        let len: usize = (raw + size as u64 - data) as usize;
        let device: i32 = driver.device_of(raw)?;
        let dmabuf_fd: i32 = driver.export_dmabuf(data, len)?;
        let attr: DmabufAttr = DmabufAttr {
            fd: dmabuf_fd,
            offset: 0,
            len,
            base_addr: data,
            device,
        };
        let access: u64 = OP_SEND | OP_RECV | OP_WRITE | OP_READ | OP_REMOTE_WRITE | OP_REMOTE_READ;
        let mr: Box<dyn MemoryRegion> = domain.register_dmabuf(&attr, access)?;
        Ok(Self {
            driver: driver.clone(),
            raw,
            data,
            len,
            device,
            dmabuf_fd,
            mr: Some(mr),
        })
    }

    /// Returns the aligned device base address.
    pub fn data(&self) -> u64 {
        self.data
    }

    /// Returns the usable length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the owning device index.
    pub fn device(&self) -> i32 {
        self.device
    }

    /// Returns the exported DMA-BUF file descriptor.
    pub fn dmabuf_fd(&self) -> i32 {
        self.dmabuf_fd
    }

    /// Returns the local descriptor of the registration.
    pub fn mem_desc(&self) -> MemDesc {
        self.mr.as_ref().expect("registration lives as long as the buffer").mem_desc()
    }

    /// Returns the remote key of the registration.
    pub fn key(&self) -> u64 {
        self.mr.as_ref().expect("registration lives as long as the buffer").key()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // Release registrations before freeing the memory.
        self.mrs.clear();
        unsafe { dealloc(self.data.as_ptr(), self.layout) };
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // Release the registration before freeing the memory.
        self.mr = None;
        if let Err(fail) = self.driver.free(self.raw) {
            warn!("drop(): leaking device allocation: {:?}", fail);
        }
    }
}
