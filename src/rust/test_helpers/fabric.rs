// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Software fabric. Endpoints opened on one fabric instance resolve each
//! other through their address vectors; sends match posted receives (or queue
//! as unexpected messages), one-sided writes copy straight into the target
//! registered region, and completions land in per-endpoint data-format
//! queues. An injected submission error and remote-access violations model
//! the provider's failure surface.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::{
        provider::{
            AddressVector,
            CompletionQueue,
            Fabric,
            FabricDomain,
            FabricEndpoint,
            MemoryRegion,
        },
        types::{
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
            OP_RECV,
            OP_REMOTE_CQ_DATA,
            OP_REMOTE_WRITE,
            OP_SEND,
            OP_WRITE,
        },
    },
    runtime::{
        fail::Fail,
        limits::ADDR_SIZE,
    },
};
use ::arrayvec::ArrayVec;
use ::libc::{
    EACCES,
    EINVAL,
    ENOENT,
};
use crate::runtime::limits::MAX_CQ_ENTRIES;
use ::std::{
    cell::RefCell,
    collections::{
        HashMap,
        VecDeque,
    },
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// A receive descriptor waiting for a message.
struct PostedRecv {
    base: u64,
    len: usize,
    context: u64,
}

/// State of one endpoint.
struct EndpointState {
    addr: [u8; ADDR_SIZE],
    cq: Option<u64>,
    av: Option<u64>,
    enabled: bool,
    /// Posted receive descriptors, matched in order.
    posted: VecDeque<PostedRecv>,
    /// Messages that arrived before a receive was posted.
    unexpected: VecDeque<Vec<u8>>,
}

/// State of one completion queue.
#[derive(Default)]
struct CqState {
    entries: VecDeque<CqDataEntry>,
    errors: VecDeque<CqErrEntry>,
}

/// One registered memory region.
struct RegionState {
    domain: u64,
    base: u64,
    len: usize,
    access: u64,
    key: u64,
}

/// Shared state of the software fabric.
struct FabricInner {
    next_domain: u64,
    next_cq: u64,
    next_av: u64,
    next_endpoint: u64,
    next_region: u64,
    next_key: u64,
    /// Error injected into the next submission.
    fault: Option<i32>,
    endpoints: HashMap<u64, EndpointState>,
    /// Maps wire addresses to endpoints.
    addr_map: HashMap<[u8; ADDR_SIZE], u64>,
    cqs: HashMap<u64, CqState>,
    avs: HashMap<u64, Vec<[u8; ADDR_SIZE]>>,
    regions: HashMap<u64, RegionState>,
}

/// Software fabric instance.
#[derive(Clone)]
pub struct TestFabric {
    inner: Rc<RefCell<FabricInner>>,
}

/// Access domain handle.
struct TestDomain {
    fabric: TestFabric,
    id: u64,
}

/// Completion queue handle.
struct TestCompletionQueue {
    fabric: TestFabric,
    id: u64,
}

/// Address vector handle.
struct TestAddressVector {
    fabric: TestFabric,
    id: u64,
}

/// Endpoint handle.
struct TestEndpoint {
    fabric: TestFabric,
    id: u64,
}

/// Registration handle. Dropping it unregisters the region.
struct TestMemoryRegion {
    fabric: TestFabric,
    id: u64,
    key: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Test Fabrics
impl TestFabric {
    /// Creates an empty software fabric.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(FabricInner {
                next_domain: 1,
                next_cq: 1,
                next_av: 1,
                next_endpoint: 1,
                next_region: 1,
                next_key: 1,
                fault: None,
                endpoints: HashMap::new(),
                addr_map: HashMap::new(),
                cqs: HashMap::new(),
                avs: HashMap::new(),
                regions: HashMap::new(),
            })),
        }
    }

    /// Returns this fabric as a provider handle.
    pub fn as_fabric(&self) -> Rc<dyn Fabric> {
        Rc::new(self.clone())
    }

    /// Makes the next send or write submission fail with `errno`.
    pub fn inject_submission_error(&self, errno: i32) {
        self.inner.borrow_mut().fault = Some(errno);
    }

    /// Consumes the injected fault, if any.
    fn take_fault(&self) -> Option<i32> {
        self.inner.borrow_mut().fault.take()
    }

    /// Delivers a message to `target`: into a posted receive if one is
    /// waiting, otherwise onto the unexpected queue.
    fn deliver(&self, target: u64, bytes: Vec<u8>) -> Result<(), Fail> {
        let mut inner = self.inner.borrow_mut();
        let inner: &mut FabricInner = &mut inner;
        let state: &mut EndpointState = match inner.endpoints.get_mut(&target) {
            Some(state) => state,
            None => return Err(Fail::new(ENOENT, "no such endpoint")),
        };
        match state.posted.pop_front() {
            Some(recv) => {
                let n: usize = bytes.len().min(recv.len);
                unsafe { ::std::ptr::copy_nonoverlapping(bytes.as_ptr(), recv.base as *mut u8, n) };
                let cq: u64 = state.cq.expect("enabled endpoint has a bound cq");
                inner.cqs.get_mut(&cq).expect("bound cq exists").entries.push_back(CqDataEntry {
                    op_context: recv.context,
                    flags: OP_RECV,
                    len: n,
                    data: 0,
                });
            },
            None => {
                state.unexpected.push_back(bytes);
            },
        }
        Ok(())
    }

    /// Resolves a peer address through an endpoint's bound address vector.
    fn resolve(&self, endpoint: u64, addr: PeerAddr) -> Result<u64, Fail> {
        let inner = self.inner.borrow();
        let state: &EndpointState = match inner.endpoints.get(&endpoint) {
            Some(state) => state,
            None => return Err(Fail::new(ENOENT, "no such endpoint")),
        };
        let av: u64 = match state.av {
            Some(av) => av,
            None => return Err(Fail::new(EINVAL, "endpoint has no bound address vector")),
        };
        let addrs: &Vec<[u8; ADDR_SIZE]> = inner.avs.get(&av).expect("bound av exists");
        let raw: [u8; ADDR_SIZE] = match addrs.get(addr.0 as usize) {
            Some(&raw) => raw,
            None => return Err(Fail::new(EINVAL, "unresolved peer address")),
        };
        match inner.addr_map.get(&raw) {
            Some(&target) => Ok(target),
            None => Err(Fail::new(ENOENT, "peer endpoint is gone")),
        }
    }

    /// Checks that the endpoint is enabled and returns its bound cq.
    fn submission_cq(&self, endpoint: u64) -> Result<u64, Fail> {
        let inner = self.inner.borrow();
        let state: &EndpointState = match inner.endpoints.get(&endpoint) {
            Some(state) => state,
            None => return Err(Fail::new(ENOENT, "no such endpoint")),
        };
        if !state.enabled {
            return Err(Fail::new(EINVAL, "endpoint is not enabled"));
        }
        match state.cq {
            Some(cq) => Ok(cq),
            None => Err(Fail::new(EINVAL, "endpoint has no bound completion queue")),
        }
    }

    /// Appends a completion entry to a queue.
    fn complete(&self, cq: u64, entry: CqDataEntry) {
        self.inner
            .borrow_mut()
            .cqs
            .get_mut(&cq)
            .expect("bound cq exists")
            .entries
            .push_back(entry);
    }

    /// Appends an error entry to a queue.
    fn complete_error(&self, cq: u64, entry: CqErrEntry) {
        self.inner
            .borrow_mut()
            .cqs
            .get_mut(&cq)
            .expect("bound cq exists")
            .errors
            .push_back(entry);
    }

    /// Looks up the target region of a one-sided write.
    fn check_remote_access(&self, addr: u64, len: usize, key: u64) -> bool {
        let inner = self.inner.borrow();
        inner.regions.values().any(|region| {
            region.key == key
                && region.access & OP_REMOTE_WRITE != 0
                && region.base <= addr
                && addr + len as u64 <= region.base + region.len as u64
        })
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for TestFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric for TestFabric {
    fn name(&self) -> String {
        "software".to_string()
    }

    fn domain(&self) -> Result<Rc<dyn FabricDomain>, Fail> {
        let mut inner = self.inner.borrow_mut();
        let id: u64 = inner.next_domain;
        inner.next_domain += 1;
        Ok(Rc::new(TestDomain {
            fabric: self.clone(),
            id,
        }))
    }
}

impl FabricDomain for TestDomain {
    fn id(&self) -> DomainId {
        DomainId(self.id)
    }

    fn open_cq(&self) -> Result<Rc<dyn CompletionQueue>, Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = inner.next_cq;
        inner.next_cq += 1;
        inner.cqs.insert(id, CqState::default());
        Ok(Rc::new(TestCompletionQueue {
            fabric: self.fabric.clone(),
            id,
        }))
    }

    fn open_av(&self) -> Result<Rc<dyn AddressVector>, Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = inner.next_av;
        inner.next_av += 1;
        inner.avs.insert(id, Vec::new());
        Ok(Rc::new(TestAddressVector {
            fabric: self.fabric.clone(),
            id,
        }))
    }

    fn open_endpoint(&self) -> Result<Rc<dyn FabricEndpoint>, Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = inner.next_endpoint;
        inner.next_endpoint += 1;
        let mut addr: [u8; ADDR_SIZE] = [0; ADDR_SIZE];
        addr[0..8].copy_from_slice(&id.to_le_bytes());
        for (i, byte) in addr.iter_mut().enumerate().skip(8) {
            *byte = (0xa5 ^ i) as u8;
        }
        inner.endpoints.insert(id, EndpointState {
            addr,
            cq: None,
            av: None,
            enabled: false,
            posted: VecDeque::new(),
            unexpected: VecDeque::new(),
        });
        inner.addr_map.insert(addr, id);
        Ok(Rc::new(TestEndpoint {
            fabric: self.fabric.clone(),
            id,
        }))
    }

    fn register_host(&self, base: *mut u8, len: usize, access: u64) -> Result<Box<dyn MemoryRegion>, Fail> {
        if base.is_null() || len == 0 {
            return Err(Fail::new(EINVAL, "invalid registration range"));
        }
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = inner.next_region;
        inner.next_region += 1;
        let key: u64 = inner.next_key;
        inner.next_key += 1;
        inner.regions.insert(id, RegionState {
            domain: self.id,
            base: base as u64,
            len,
            access,
            key,
        });
        Ok(Box::new(TestMemoryRegion {
            fabric: self.fabric.clone(),
            id,
            key,
        }))
    }

    fn register_dmabuf(&self, attr: &DmabufAttr, access: u64) -> Result<Box<dyn MemoryRegion>, Fail> {
        if attr.fd < 0 || attr.len == 0 || attr.base_addr == 0 {
            return Err(Fail::new(EINVAL, "invalid dmabuf descriptor"));
        }
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = inner.next_region;
        inner.next_region += 1;
        let key: u64 = inner.next_key;
        inner.next_key += 1;
        inner.regions.insert(id, RegionState {
            domain: self.id,
            base: attr.base_addr + attr.offset,
            len: attr.len,
            access,
            key,
        });
        Ok(Box::new(TestMemoryRegion {
            fabric: self.fabric.clone(),
            id,
            key,
        }))
    }
}

impl FabricEndpoint for TestEndpoint {
    fn bind_cq(&self, cq: &Rc<dyn CompletionQueue>, _flags: u64) -> Result<(), Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = cq.id().0;
        if !inner.cqs.contains_key(&id) {
            return Err(Fail::new(ENOENT, "no such completion queue"));
        }
        inner.endpoints.get_mut(&self.id).expect("endpoint exists").cq = Some(id);
        Ok(())
    }

    fn bind_av(&self, av: &Rc<dyn AddressVector>) -> Result<(), Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let id: u64 = av.id().0;
        if !inner.avs.contains_key(&id) {
            return Err(Fail::new(ENOENT, "no such address vector"));
        }
        inner.endpoints.get_mut(&self.id).expect("endpoint exists").av = Some(id);
        Ok(())
    }

    fn enable(&self) -> Result<(), Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let state: &mut EndpointState = inner.endpoints.get_mut(&self.id).expect("endpoint exists");
        if state.cq.is_none() || state.av.is_none() {
            return Err(Fail::new(EINVAL, "endpoint is missing a binding"));
        }
        state.enabled = true;
        Ok(())
    }

    fn getname(&self, addr: &mut RawAddr) -> Result<usize, Fail> {
        let inner = self.fabric.inner.borrow();
        let state: &EndpointState = match inner.endpoints.get(&self.id) {
            Some(state) => state,
            None => return Err(Fail::new(ENOENT, "no such endpoint")),
        };
        addr.fill(0);
        addr[..ADDR_SIZE].copy_from_slice(&state.addr);
        Ok(ADDR_SIZE)
    }

    fn recvmsg(&self, desc: &MsgDesc) -> Result<(), Fail> {
        let cq: u64 = self.fabric.submission_cq(self.id)?;
        let pending: Option<Vec<u8>> = self
            .fabric
            .inner
            .borrow_mut()
            .endpoints
            .get_mut(&self.id)
            .expect("endpoint exists")
            .unexpected
            .pop_front();
        match pending {
            Some(bytes) => {
                let n: usize = bytes.len().min(desc.len);
                unsafe { ::std::ptr::copy_nonoverlapping(bytes.as_ptr(), desc.base, n) };
                self.fabric.complete(cq, CqDataEntry {
                    op_context: desc.context.0,
                    flags: OP_RECV,
                    len: n,
                    data: 0,
                });
            },
            None => {
                self.fabric
                    .inner
                    .borrow_mut()
                    .endpoints
                    .get_mut(&self.id)
                    .expect("endpoint exists")
                    .posted
                    .push_back(PostedRecv {
                        base: desc.base as u64,
                        len: desc.len,
                        context: desc.context.0,
                    });
            },
        }
        Ok(())
    }

    fn sendmsg(&self, desc: &MsgDesc) -> Result<(), Fail> {
        if let Some(errno) = self.fabric.take_fault() {
            return Err(Fail::new(errno, "injected submission failure"));
        }
        let cq: u64 = self.fabric.submission_cq(self.id)?;
        let addr: PeerAddr = match desc.addr {
            Some(addr) => addr,
            None => return Err(Fail::new(EINVAL, "send requires a destination")),
        };
        let target: u64 = self.fabric.resolve(self.id, addr)?;
        let bytes: Vec<u8> = unsafe { ::std::slice::from_raw_parts(desc.base, desc.len) }.to_vec();
        self.fabric.deliver(target, bytes)?;
        self.fabric.complete(cq, CqDataEntry {
            op_context: desc.context.0,
            flags: OP_SEND,
            len: desc.len,
            data: 0,
        });
        Ok(())
    }

    fn writemsg(&self, desc: &RmaDesc) -> Result<(), Fail> {
        if let Some(errno) = self.fabric.take_fault() {
            return Err(Fail::new(errno, "injected submission failure"));
        }
        let cq: u64 = self.fabric.submission_cq(self.id)?;
        let target: u64 = self.fabric.resolve(self.id, desc.addr)?;
        if !self.fabric.check_remote_access(desc.remote_addr, desc.len, desc.remote_key) {
            // Bad key or range: the provider reports this through the error
            // queue, not the submission return.
            self.fabric.complete_error(cq, CqErrEntry {
                op_context: desc.context.0,
                errno: EACCES,
                prov_errno: EACCES,
                message: "remote memory access violation".to_string(),
            });
            return Ok(());
        }
        unsafe {
            ::std::ptr::copy_nonoverlapping(desc.base as *const u8, desc.remote_addr as *mut u8, desc.len)
        };
        self.fabric.complete(cq, CqDataEntry {
            op_context: desc.context.0,
            flags: OP_WRITE,
            len: desc.len,
            data: 0,
        });
        if desc.flags & OP_REMOTE_CQ_DATA != 0 && desc.imm_data != 0 {
            let remote_cq: u64 = self.fabric.submission_cq(target)?;
            self.fabric.complete(remote_cq, CqDataEntry {
                op_context: 0,
                flags: OP_REMOTE_WRITE,
                len: desc.len,
                data: desc.imm_data,
            });
        }
        Ok(())
    }
}

impl CompletionQueue for TestCompletionQueue {
    fn id(&self) -> CqId {
        CqId(self.id)
    }

    fn read(&self, max: usize) -> Result<ArrayVec<CqDataEntry, MAX_CQ_ENTRIES>, CqError> {
        let mut inner = self.fabric.inner.borrow_mut();
        let state: &mut CqState = match inner.cqs.get_mut(&self.id) {
            Some(state) => state,
            None => return Err(CqError::Fatal(-EINVAL)),
        };
        if !state.errors.is_empty() {
            return Err(CqError::ErrAvailable);
        }
        if state.entries.is_empty() {
            return Err(CqError::Again);
        }
        let mut batch: ArrayVec<CqDataEntry, MAX_CQ_ENTRIES> = ArrayVec::new();
        while batch.len() < max.min(MAX_CQ_ENTRIES) {
            match state.entries.pop_front() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        Ok(batch)
    }

    fn read_error(&self) -> Result<CqErrEntry, Fail> {
        let mut inner = self.fabric.inner.borrow_mut();
        let state: &mut CqState = match inner.cqs.get_mut(&self.id) {
            Some(state) => state,
            None => return Err(Fail::new(ENOENT, "no such completion queue")),
        };
        match state.errors.pop_front() {
            Some(entry) => Ok(entry),
            None => Err(Fail::new(EINVAL, "no error entry is pending")),
        }
    }
}

impl AddressVector for TestAddressVector {
    fn id(&self) -> AvId {
        AvId(self.id)
    }

    fn insert(&self, addr: &[u8]) -> Result<PeerAddr, Fail> {
        if addr.len() < ADDR_SIZE {
            return Err(Fail::new(EINVAL, "short endpoint address"));
        }
        let mut raw: [u8; ADDR_SIZE] = [0; ADDR_SIZE];
        raw.copy_from_slice(&addr[..ADDR_SIZE]);
        let mut inner = self.fabric.inner.borrow_mut();
        let addrs: &mut Vec<[u8; ADDR_SIZE]> = inner.avs.get_mut(&self.id).expect("av exists");
        addrs.push(raw);
        Ok(PeerAddr(addrs.len() as u64 - 1))
    }
}

impl MemoryRegion for TestMemoryRegion {
    fn mem_desc(&self) -> MemDesc {
        MemDesc(self.id)
    }

    fn key(&self) -> u64 {
        self.key
    }
}

impl Drop for TestMemoryRegion {
    fn drop(&mut self) {
        self.fabric.inner.borrow_mut().regions.remove(&self.id);
    }
}
