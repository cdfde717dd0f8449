// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Comm group message bodies.
//!
//! Comm messages travel bare in the frame payload, without the packet
//! stub used by the Key and Crypto groups.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

use crate::COMM_DATA_LEN;

/// Maximum bytes carried by one echo exchange.
pub const ECHO_MAX: usize = COMM_DATA_LEN - core::mem::size_of::<u16>();

/// Init request: the client announces its identity.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CommInitRequest {
    /// Identity the client will use for the connection.
    pub client_id: u32,
}

/// Init response: the server echoes the client identity and reports its own.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CommInitResponse {
    /// Client identity as registered by the server.
    pub client_id: u32,

    /// Server identity.
    pub server_id: u32,
}

/// Generic length-prefixed data block, used by Echo in both directions.
///
/// The full struct is sent regardless of `len`; the receiver must not
/// trust `len` beyond `ECHO_MAX`.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CommLenData {
    /// Number of meaningful bytes in `data`.
    pub len: u16,

    /// Payload bytes; contents beyond `len` are unspecified.
    pub data: [u8; ECHO_MAX],
}

const _: () = {
    assert!(core::mem::size_of::<CommLenData>() == COMM_DATA_LEN);
};

impl CommLenData {
    /// Builds a block from `bytes`, silently truncating to `ECHO_MAX`.
    pub fn new(bytes: &[u8]) -> Self {
        let len = bytes.len().min(ECHO_MAX);
        let mut data = [0u8; ECHO_MAX];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            len: len as u16,
            data,
        }
    }

    /// The meaningful prefix of `data`, with `len` clamped to `ECHO_MAX`.
    pub fn payload(&self) -> &[u8] {
        let len = (self.len as usize).min(ECHO_MAX);
        &self.data[..len]
    }
}

impl core::fmt::Debug for CommLenData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len = self.len;
        f.debug_struct("CommLenData").field("len", &len).finish()
    }
}

/// Info response: server identity, build, and free-resource gauges.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CommInfoResponse {
    /// Server version string, NUL-padded.
    pub version: [u8; 8],

    /// Server build identifier, NUL-padded.
    pub build: [u8; 8],

    /// Free RAM in bytes, zero when unreported.
    pub ram_free: u32,

    /// Free NVM in bytes, zero when unreported.
    pub nvm_free: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_data_truncates_silently() {
        let big = vec![0xAB; ECHO_MAX + 100];
        let msg = CommLenData::new(&big);
        assert_eq!(msg.payload().len(), ECHO_MAX);
        assert!(msg.payload().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn len_data_clamps_hostile_len_field() {
        let mut msg = CommLenData::new(b"abc");
        msg.len = u16::MAX;
        assert_eq!(msg.payload().len(), ECHO_MAX);
    }
}
