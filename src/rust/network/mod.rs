// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod address;
pub mod connection;
pub mod futures;
pub mod wire;

//==============================================================================
// Imports
//==============================================================================

use crate::{
    config::Config,
    fabric::{
        provider::{
            AddressVector,
            CompletionQueue,
            DeviceDriver,
            Fabric,
            FabricDomain,
            FabricEndpoint,
        },
        types::{
            CqId,
            PeerAddr,
            RawAddr,
            OP_RECV,
            OP_SEND,
        },
    },
    network::{
        address::addr_to_string,
        connection::{
            Connection,
            SharedConnection,
        },
    },
    runtime::{
        fail::Fail,
        limits::{
            ADDR_SIZE,
            MAX_ADDR_SIZE,
        },
        scheduler::Scheduler,
        SharedObject,
    },
};
use ::libc::EINVAL;
use ::std::{
    collections::HashMap,
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// One fabric endpoint and the connections minted from it. Opening a network
/// registers its completion queue with the loop's selector; destruction
/// unregisters it.
///
/// Field order is load-bearing: teardown closes the connections, then the
/// completion queue, address vector, endpoint, and domain, in that order.
pub struct Network {
    /// Minted connections, keyed by the peer's hex address.
    connections: HashMap<String, SharedConnection>,
    /// Data-format completion queue bound to the endpoint.
    cq: Rc<dyn CompletionQueue>,
    /// Address vector resolving raw peer addresses.
    av: Rc<dyn AddressVector>,
    /// Reliable-datagram endpoint.
    endpoint: Rc<dyn FabricEndpoint>,
    /// Access domain of the endpoint and all connection buffers.
    domain: Rc<dyn FabricDomain>,
    /// GPU driver backing the connections' device buffers.
    driver: Rc<dyn DeviceDriver>,
    /// Buffer capacities for minted connections.
    config: Config,
    /// Local endpoint address.
    addr: RawAddr,
    /// Scheduler owning the selector.
    scheduler: Scheduler,
}

/// Network shared across coroutines of the loop thread.
pub struct SharedNetwork(SharedObject<Network>);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Shared Networks
impl SharedNetwork {
    /// Builds the domain, completion queue, address vector, and endpoint;
    /// binds and enables the endpoint; publishes the local address; and
    /// registers the completion queue with the loop's selector.
    pub fn open(fabric: &Rc<dyn Fabric>, driver: Rc<dyn DeviceDriver>, config: Config) -> Result<Self, Fail> {
        crate::runtime::logging::initialize();
        let scheduler: Scheduler = Scheduler::get();
        let domain: Rc<dyn FabricDomain> = fabric.domain()?;
        let cq: Rc<dyn CompletionQueue> = domain.open_cq()?;
        let av: Rc<dyn AddressVector> = domain.open_av()?;
        let endpoint: Rc<dyn FabricEndpoint> = domain.open_endpoint()?;
        endpoint.bind_cq(&cq, OP_SEND | OP_RECV)?;
        endpoint.bind_av(&av)?;
        endpoint.enable()?;
        let mut addr: RawAddr = [0; MAX_ADDR_SIZE];
        endpoint.getname(&mut addr)?;
        scheduler.register_cq(cq.clone());
        debug!("open(): provider={:?} addr={:?}", fabric.name(), addr_to_string(&addr));
        Ok(Self(SharedObject::new(Network {
            connections: HashMap::new(),
            cq,
            av,
            endpoint,
            domain,
            driver,
            config,
            addr,
            scheduler,
        })))
    }

    /// Inserts the remote address into the address vector and mints a
    /// connection for it. Connecting twice to the same peer returns the
    /// existing connection.
    pub fn connect(&mut self, remote: &[u8]) -> Result<SharedConnection, Fail> {
        if remote.len() < ADDR_SIZE {
            return Err(Fail::new(EINVAL, "short endpoint address"));
        }
        let key: String = addr_to_string(remote);
        if let Some(connection) = self.connections.get(&key) {
            return Ok(connection.clone());
        }
        let peer: PeerAddr = self.av.insert(&remote[..ADDR_SIZE])?;
        let connection: Connection = Connection::new(
            self.scheduler.clone(),
            self.domain.clone(),
            self.endpoint.clone(),
            &self.driver,
            peer,
            &self.config,
        )?;
        debug!("connect(): remote={:?}", key);
        let connection: SharedConnection = SharedConnection::new(connection);
        self.0.deref_mut().connections.insert(key, connection.clone());
        Ok(connection)
    }

    /// Returns the local endpoint address.
    pub fn local_addr(&self) -> &RawAddr {
        &self.0.addr
    }

    /// Returns the local endpoint address as a hex string.
    pub fn addr_string(&self) -> String {
        addr_to_string(&self.0.addr)
    }

    /// Returns the identifier of the endpoint's completion queue.
    pub fn cq_id(&self) -> CqId {
        self.0.cq.id()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Drop for Network {
    fn drop(&mut self) {
        // Unregister the queue from the selector, then release connections
        // and their registrations. The remaining handles close in field
        // declaration order: queue, address vector, endpoint, domain.
        self.scheduler.unregister_cq(self.cq.id());
        self.connections.clear();
    }
}

impl Clone for SharedNetwork {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SharedNetwork {
    type Target = Network;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedNetwork {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
