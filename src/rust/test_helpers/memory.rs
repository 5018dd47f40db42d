// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host-backed device driver. "Device" allocations are aligned host memory,
//! so tests can inspect what RDMA writes landed there; DMA-BUF descriptors
//! are fabricated.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::provider::DeviceDriver,
    runtime::fail::Fail,
};
use ::libc::{
    EINVAL,
    ENOMEM,
};
use ::std::{
    alloc::{
        alloc_zeroed,
        dealloc,
        Layout,
    },
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

//==============================================================================
// Constants
//==============================================================================

/// Device allocations come back aligned like the CUDA allocator's.
const DEVICE_ALLOC_ALIGN: usize = 256;

//==============================================================================
// Structures
//==============================================================================

struct DriverInner {
    /// Live allocations, keyed by base address.
    allocations: HashMap<u64, Layout>,
    /// Next fabricated DMA-BUF file descriptor.
    next_fd: i32,
}

/// Host-backed device driver.
#[derive(Clone)]
pub struct TestDeviceDriver {
    inner: Rc<RefCell<DriverInner>>,
    /// Device index reported for every allocation.
    device: i32,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Test Device Drivers
impl TestDeviceDriver {
    /// Creates a driver for the given device index.
    pub fn new(device: i32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DriverInner {
                allocations: HashMap::new(),
                next_fd: 100,
            })),
            device,
        }
    }

    /// Copies `len` bytes out of a device allocation.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, Fail> {
        self.check_range(addr, len)?;
        Ok(unsafe { ::std::slice::from_raw_parts(addr as *const u8, len) }.to_vec())
    }

    /// Copies `data` into a device allocation.
    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), Fail> {
        self.check_range(addr, data.len())?;
        unsafe { ::std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) };
        Ok(())
    }

    fn check_range(&self, addr: u64, len: usize) -> Result<(), Fail> {
        let inner = self.inner.borrow();
        let contained: bool = inner
            .allocations
            .iter()
            .any(|(&base, layout)| base <= addr && addr + len as u64 <= base + layout.size() as u64);
        if contained {
            Ok(())
        } else {
            Err(Fail::new(EINVAL, "address range is not a device allocation"))
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl DeviceDriver for TestDeviceDriver {
    fn malloc(&self, len: usize) -> Result<u64, Fail> {
        let layout: Layout = match Layout::from_size_align(len, DEVICE_ALLOC_ALIGN) {
            Ok(layout) if len > 0 => layout,
            _ => return Err(Fail::new(EINVAL, "invalid device allocation size")),
        };
        let base: *mut u8 = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(Fail::new(ENOMEM, "device allocation failed"));
        }
        let addr: u64 = base as u64;
        self.inner.borrow_mut().allocations.insert(addr, layout);
        trace!("malloc(): addr={:#x} len={:?}", addr, len);
        Ok(addr)
    }

    fn free(&self, addr: u64) -> Result<(), Fail> {
        let layout: Layout = match self.inner.borrow_mut().allocations.remove(&addr) {
            Some(layout) => layout,
            None => return Err(Fail::new(EINVAL, "not a device allocation")),
        };
        unsafe { dealloc(addr as *mut u8, layout) };
        Ok(())
    }

    fn export_dmabuf(&self, addr: u64, len: usize) -> Result<i32, Fail> {
        self.check_range(addr, len)?;
        let mut inner = self.inner.borrow_mut();
        let fd: i32 = inner.next_fd;
        inner.next_fd += 1;
        Ok(fd)
    }

    fn device_of(&self, addr: u64) -> Result<i32, Fail> {
        self.check_range(addr, 1)?;
        Ok(self.device)
    }
}
