// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Endpoint addresses are opaque 32-byte blobs, exchanged out of band as
//! 64-hex-character strings.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    limits::ADDR_SIZE,
};
use ::libc::EINVAL;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Hex-encodes the wire part of an endpoint address.
pub fn addr_to_string(addr: &[u8]) -> String {
    addr.iter().take(ADDR_SIZE).map(|byte| format!("{:02x}", byte)).collect()
}

/// Decodes a 64-hex-character string into a 32-byte endpoint address.
pub fn string_to_addr(addr: &str) -> Result<[u8; ADDR_SIZE], Fail> {
    if addr.len() != 2 * ADDR_SIZE {
        return Err(Fail::new(EINVAL, "malformed endpoint address string"));
    }
    let mut bytes: [u8; ADDR_SIZE] = [0; ADDR_SIZE];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = match u8::from_str_radix(&addr[2 * i..2 * i + 2], 16) {
            Ok(byte) => byte,
            Err(_) => return Err(Fail::new(EINVAL, "malformed endpoint address string")),
        };
    }
    Ok(bytes)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        addr_to_string,
        string_to_addr,
    };
    use crate::runtime::limits::ADDR_SIZE;
    use ::anyhow::Result;

    #[test]
    fn address_roundtrip() -> Result<()> {
        let mut addr: [u8; ADDR_SIZE] = [0; ADDR_SIZE];
        for (i, byte) in addr.iter_mut().enumerate() {
            *byte = (i * 7 + 3) as u8;
        }
        let encoded: String = addr_to_string(&addr);
        assert_eq!(encoded.len(), 2 * ADDR_SIZE);
        assert_eq!(string_to_addr(&encoded)?, addr);
        Ok(())
    }

    #[test]
    fn malformed_address_rejected() {
        assert!(string_to_addr("deadbeef").is_err());
        assert!(string_to_addr(&"zz".repeat(ADDR_SIZE)).is_err());
    }
}
