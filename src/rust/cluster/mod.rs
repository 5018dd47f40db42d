// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Contracts of the bootstrap collaborators. Process placement, the
//! all-gather of endpoint addresses, and GPU/NIC/core affinity discovery all
//! happen outside this crate; workers only see these traits.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    fabric::provider::Fabric,
    runtime::{
        fail::Fail,
        limits::MAX_ADDR_SIZE,
    },
};
use ::libc::EINVAL;
use ::std::rc::Rc;

//==============================================================================
// Structures
//==============================================================================

/// Placement of one local rank: the GPU it drives, the core it pins to, and
/// the fabric of the NIC paired with that GPU.
pub struct PeerLocality {
    /// Device index of the paired GPU.
    pub device: i32,
    /// Logical index of a CPU core in the same NUMA domain.
    pub core: usize,
    /// Fabric of the paired NIC.
    pub fabric: Rc<dyn Fabric>,
}

//==============================================================================
// Traits
//==============================================================================

/// A world-rank/local-rank process group with an all-gather primitive.
pub trait ProcessGroup {
    /// Number of processes in the world.
    fn world_size(&self) -> usize;

    /// Rank of this process in the world.
    fn world_rank(&self) -> usize;

    /// Number of processes on this node.
    fn local_size(&self) -> usize;

    /// Rank of this process on this node.
    fn local_rank(&self) -> usize;

    /// Gathers `local` from every rank into `out`, rank-ordered. `out` must
    /// hold `world_size() * local.len()` bytes.
    fn all_gather(&self, local: &[u8], out: &mut [u8]) -> Result<(), Fail>;
}

/// Affinity discovery: maps a local rank to its GPU/core/NIC placement.
pub trait Topology {
    fn locate(&self, local_rank: usize) -> Result<PeerLocality, Fail>;
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Byte offset of a rank's slot in a gathered endpoint-address buffer.
pub fn endpoint_index(rank: usize) -> usize {
    rank * MAX_ADDR_SIZE
}

/// Exchanges endpoint addresses across the process group and returns them
/// rank-ordered.
pub fn exchange_addresses(
    group: &dyn ProcessGroup,
    local: &[u8; MAX_ADDR_SIZE],
) -> Result<Vec<[u8; MAX_ADDR_SIZE]>, Fail> {
    let world_size: usize = group.world_size();
    if world_size == 0 {
        return Err(Fail::new(EINVAL, "empty process group"));
    }
    let mut gathered: Vec<u8> = vec![0; world_size * MAX_ADDR_SIZE];
    group.all_gather(local, &mut gathered)?;
    let mut addrs: Vec<[u8; MAX_ADDR_SIZE]> = Vec::with_capacity(world_size);
    for rank in 0..world_size {
        let mut addr: [u8; MAX_ADDR_SIZE] = [0; MAX_ADDR_SIZE];
        addr.copy_from_slice(&gathered[endpoint_index(rank)..endpoint_index(rank + 1)]);
        addrs.push(addr);
    }
    Ok(addrs)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        exchange_addresses,
        ProcessGroup,
    };
    use crate::runtime::{
        fail::Fail,
        limits::MAX_ADDR_SIZE,
    };
    use ::anyhow::Result;

    /// Single-process group: the gather is a copy of the local slot.
    struct SoloGroup;

    impl ProcessGroup for SoloGroup {
        fn world_size(&self) -> usize {
            1
        }

        fn world_rank(&self) -> usize {
            0
        }

        fn local_size(&self) -> usize {
            1
        }

        fn local_rank(&self) -> usize {
            0
        }

        fn all_gather(&self, local: &[u8], out: &mut [u8]) -> Result<(), Fail> {
            out[..local.len()].copy_from_slice(local);
            Ok(())
        }
    }

    #[test]
    fn solo_exchange_yields_local_address() -> Result<()> {
        let mut local: [u8; MAX_ADDR_SIZE] = [0; MAX_ADDR_SIZE];
        local[0] = 0xab;
        local[31] = 0xcd;
        let addrs = exchange_addresses(&SoloGroup, &local)?;
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0], local);
        Ok(())
    }
}
