// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Handshake message of the benchmark driver: a fixed header advertising how
//! many device regions follow, then one record per region. Everything is
//! little-endian.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::byteorder::{
    ByteOrder,
    LittleEndian,
};
use ::libc::EINVAL;

//==============================================================================
// Constants
//==============================================================================

/// Encoded size of a [Message] header.
pub const MESSAGE_SIZE: usize = 20;

/// Encoded size of a [CudaRegion] record.
pub const REGION_SIZE: usize = 24;

//==============================================================================
// Structures
//==============================================================================

/// Handshake header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Message {
    /// World rank of the sender.
    pub rank: i32,
    /// Number of region records that follow.
    pub num: u64,
    /// Seed the sender will use to fill its pages.
    pub seed: u64,
}

/// One advertised device memory region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CudaRegion {
    /// Device address of the region base.
    pub addr: u64,
    /// Region length.
    pub size: u64,
    /// Remote key for one-sided access.
    pub key: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Messages
impl Message {
    /// Returns the encoded size of a header followed by `num` regions.
    pub fn wire_size(&self) -> usize {
        MESSAGE_SIZE + REGION_SIZE * self.num as usize
    }

    /// Encodes this header into the front of `buf`.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        if buf.len() < MESSAGE_SIZE {
            return Err(Fail::new(EINVAL, "buffer too short for message header"));
        }
        LittleEndian::write_i32(&mut buf[0..4], self.rank);
        LittleEndian::write_u64(&mut buf[4..12], self.num);
        LittleEndian::write_u64(&mut buf[12..20], self.seed);
        Ok(MESSAGE_SIZE)
    }

    /// Decodes a header from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < MESSAGE_SIZE {
            return Err(Fail::new(EINVAL, "buffer too short for message header"));
        }
        Ok(Self {
            rank: LittleEndian::read_i32(&buf[0..4]),
            num: LittleEndian::read_u64(&buf[4..12]),
            seed: LittleEndian::read_u64(&buf[12..20]),
        })
    }
}

/// Associate Functions for Region Records
impl CudaRegion {
    /// Encodes this record into the front of `buf`.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        if buf.len() < REGION_SIZE {
            return Err(Fail::new(EINVAL, "buffer too short for region record"));
        }
        LittleEndian::write_u64(&mut buf[0..8], self.addr);
        LittleEndian::write_u64(&mut buf[8..16], self.size);
        LittleEndian::write_u64(&mut buf[16..24], self.key);
        Ok(REGION_SIZE)
    }

    /// Decodes a record from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < REGION_SIZE {
            return Err(Fail::new(EINVAL, "buffer too short for region record"));
        }
        Ok(Self {
            addr: LittleEndian::read_u64(&buf[0..8]),
            size: LittleEndian::read_u64(&buf[8..16]),
            key: LittleEndian::read_u64(&buf[16..24]),
        })
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Encodes a handshake (header plus regions) into `buf` and returns the
/// number of bytes written.
pub fn serialize_handshake(message: &Message, regions: &[CudaRegion], buf: &mut [u8]) -> Result<usize, Fail> {
    if message.num as usize != regions.len() {
        return Err(Fail::new(EINVAL, "region count does not match header"));
    }
    let mut offset: usize = message.serialize(buf)?;
    for region in regions {
        offset += region.serialize(&mut buf[offset..])?;
    }
    Ok(offset)
}

/// Decodes a handshake of exactly `len` bytes.
pub fn parse_handshake(buf: &[u8], len: usize) -> Result<(Message, Vec<CudaRegion>), Fail> {
    let message: Message = Message::parse(buf)?;
    if len != message.wire_size() {
        return Err(Fail::new(EINVAL, "handshake length does not match header"));
    }
    let mut regions: Vec<CudaRegion> = Vec::with_capacity(message.num as usize);
    let mut offset: usize = MESSAGE_SIZE;
    for _ in 0..message.num {
        regions.push(CudaRegion::parse(&buf[offset..])?);
        offset += REGION_SIZE;
    }
    Ok((message, regions))
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        parse_handshake,
        serialize_handshake,
        CudaRegion,
        Message,
    };
    use ::anyhow::Result;

    #[test]
    fn handshake_roundtrip() -> Result<()> {
        let message: Message = Message {
            rank: 1,
            num: 1,
            seed: 0x1234_5678_9abc_def0,
        };
        let region: CudaRegion = CudaRegion {
            addr: 0xdead_beef_0000,
            size: 1 << 30,
            key: 42,
        };
        let mut buf: [u8; 64] = [0; 64];
        let len: usize = serialize_handshake(&message, &[region], &mut buf)?;
        assert_eq!(len, message.wire_size());

        let (parsed, regions) = parse_handshake(&buf, len)?;
        assert_eq!(parsed, message);
        assert_eq!(regions.as_slice(), &[region]);
        Ok(())
    }

    #[test]
    fn truncated_handshake_rejected() {
        let buf: [u8; 8] = [0; 8];
        assert!(parse_handshake(&buf, 8).is_err());
    }
}
