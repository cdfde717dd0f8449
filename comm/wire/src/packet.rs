// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Packet assembly and parsing over the frame payload region.
//!
//! Key and Crypto packets are laid out as `stub | fixed body | tail`,
//! where the stub carries the server return code and the tail is the
//! operation's variable-length data. The frame header `size` equals the
//! total of the three parts. Comm and Custom messages are bare bodies
//! without the stub.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

use crate::WireError;

/// Fixed prefix of every stub-framed packet.
///
/// `rc` is meaningful in responses only; requests carry zero.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PacketStub {
    /// Server return code, `0` on success.
    pub rc: i32,
}

/// Length of the packet stub in bytes.
pub const PACKET_STUB_LEN: usize = core::mem::size_of::<PacketStub>();

/// Serializes `stub rc | body | tail` into `buf` and returns the total
/// packet length.
pub fn write_packet<B>(buf: &mut [u8], rc: i32, body: &B, tail: &[u8]) -> Result<usize, WireError>
where
    B: IntoBytes + Immutable,
{
    let body_bytes = body.as_bytes();
    let total = PACKET_STUB_LEN + body_bytes.len() + tail.len();
    if total > buf.len() {
        return Err(WireError::Overflow {
            len: total,
            max: buf.len(),
        });
    }
    let stub = PacketStub { rc };
    buf[..PACKET_STUB_LEN].copy_from_slice(stub.as_bytes());
    buf[PACKET_STUB_LEN..PACKET_STUB_LEN + body_bytes.len()].copy_from_slice(body_bytes);
    buf[PACKET_STUB_LEN + body_bytes.len()..total].copy_from_slice(tail);
    Ok(total)
}

/// Parses a stub-framed packet into `(rc, body, tail)`.
///
/// The payload slice must already be truncated to the frame `size`; the
/// remainder after the fixed body is the tail.
pub fn read_packet<B>(payload: &[u8]) -> Result<(i32, B, &[u8]), WireError>
where
    B: FromBytes,
{
    let (stub, rest) =
        PacketStub::read_from_prefix(payload).map_err(|_| WireError::TooShort {
            need: PACKET_STUB_LEN,
            have: payload.len(),
        })?;
    let (body, tail) = B::read_from_prefix(rest).map_err(|_| WireError::TooShort {
        need: PACKET_STUB_LEN + core::mem::size_of::<B>(),
        have: payload.len(),
    })?;
    Ok((stub.rc, body, tail))
}

/// Serializes a stub-only packet, the shape of every error response and
/// of status-only successes.
pub fn write_stub(buf: &mut [u8], rc: i32) -> Result<usize, WireError> {
    if buf.len() < PACKET_STUB_LEN {
        return Err(WireError::Overflow {
            len: PACKET_STUB_LEN,
            max: buf.len(),
        });
    }
    let stub = PacketStub { rc };
    buf[..PACKET_STUB_LEN].copy_from_slice(stub.as_bytes());
    Ok(PACKET_STUB_LEN)
}

/// Parses only the stub of a status-only response.
pub fn read_stub(payload: &[u8]) -> Result<i32, WireError> {
    let (stub, _) = PacketStub::read_from_prefix(payload).map_err(|_| WireError::TooShort {
        need: PACKET_STUB_LEN,
        have: payload.len(),
    })?;
    Ok(stub.rc)
}

/// Serializes a bare (stub-less) message plus tail into `buf`.
pub fn write_message<B>(buf: &mut [u8], body: &B, tail: &[u8]) -> Result<usize, WireError>
where
    B: IntoBytes + Immutable,
{
    let body_bytes = body.as_bytes();
    let total = body_bytes.len() + tail.len();
    if total > buf.len() {
        return Err(WireError::Overflow {
            len: total,
            max: buf.len(),
        });
    }
    buf[..body_bytes.len()].copy_from_slice(body_bytes);
    buf[body_bytes.len()..total].copy_from_slice(tail);
    Ok(total)
}

/// Parses a bare message into `(body, tail)`.
pub fn read_message<B>(payload: &[u8]) -> Result<(B, &[u8]), WireError>
where
    B: FromBytes,
{
    B::read_from_prefix(payload).map_err(|_| WireError::TooShort {
        need: core::mem::size_of::<B>(),
        have: payload.len(),
    })
}
