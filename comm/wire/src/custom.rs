// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Custom callback message bodies.
//!
//! The callback id doubles as the action byte of the message kind, so a
//! response can be matched to its registered handler without decoding
//! the body first.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Number of callback slots a server exposes.
pub const CUSTOM_CB_COUNT: u32 = 8;

/// Fixed width of the opaque callback data block.
pub const CUSTOM_DATA_LEN: usize = 256;

/// Discriminator for custom exchanges.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomCbKind {
    /// Ask whether a handler is registered at the id.
    Query = 0,

    /// Invoke the registered handler with the data block.
    Invoke = 1,
}

/// Request to a custom server callback.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CustomCbRequest {
    /// Identifier of the registered callback, `0..CUSTOM_CB_COUNT`.
    pub id: u32,

    /// `CustomCbKind` discriminator.
    pub kind: u16,

    /// Opaque data interpreted by the handler.
    pub data: [u8; CUSTOM_DATA_LEN],
}

/// Response from a custom server callback.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CustomCbResponse {
    /// Identifier of the callback that produced the response.
    pub id: u16,

    /// `CustomCbKind` discriminator echoed from the request.
    pub kind: u16,

    /// Handler status; `ErrorCode::NoHandler` for an empty Query slot.
    pub err: i32,

    /// Opaque data produced by the handler.
    pub data: [u8; CUSTOM_DATA_LEN],
}

impl core::fmt::Debug for CustomCbRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (id, kind) = (self.id, self.kind);
        f.debug_struct("CustomCbRequest")
            .field("id", &id)
            .field("kind", &kind)
            .finish()
    }
}

impl core::fmt::Debug for CustomCbResponse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (id, kind, err) = (self.id, self.kind, self.err);
        f.debug_struct("CustomCbResponse")
            .field("id", &id)
            .field("kind", &kind)
            .field("err", &err)
            .finish()
    }
}

impl CustomCbRequest {
    /// Builds a request with `data` copied into the fixed block.
    ///
    /// Data longer than `CUSTOM_DATA_LEN` is truncated.
    pub fn new(id: u32, kind: CustomCbKind, data: &[u8]) -> Self {
        let mut block = [0u8; CUSTOM_DATA_LEN];
        let n = data.len().min(CUSTOM_DATA_LEN);
        block[..n].copy_from_slice(&data[..n]);
        Self {
            id,
            kind: kind as u16,
            data: block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        assert_eq!(
            core::mem::size_of::<CustomCbRequest>(),
            4 + 2 + CUSTOM_DATA_LEN
        );
        assert_eq!(
            core::mem::size_of::<CustomCbResponse>(),
            2 + 2 + 4 + CUSTOM_DATA_LEN
        );
    }
}
