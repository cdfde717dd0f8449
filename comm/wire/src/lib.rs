// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Wire contract shared by the veilhsm client and server: frame header,
//! message kinds, error codes, and the packed little-endian message
//! layouts for every operation group.
//!
//! Every structured type in this crate survives a byte-for-byte copy
//! between peers. Layouts are `#[repr(C, packed)]` with no padding;
//! multi-byte fields are little-endian on the wire and only the native
//! magic is accepted, so in-memory and wire representation coincide.

mod comm;
mod crypto;
mod custom;
mod error;
mod header;
mod key;
mod kind;
mod packet;

pub use comm::*;
pub use crypto::*;
pub use custom::*;
pub use error::*;
pub use header::*;
pub use key::*;
pub use kind::*;
pub use packet::*;

/// Length of the fixed frame header in bytes.
pub const COMM_HEADER_LEN: usize = 16;

/// Maximum payload bytes carried in one frame (excludes the header).
pub const COMM_DATA_LEN: usize = 1280;

/// Maximum total frame length accepted by any transport.
pub const COMM_MTU: usize = COMM_HEADER_LEN + COMM_DATA_LEN;

/// Fixed width of a key/NVM object label on the wire.
pub const NVM_LABEL_LEN: usize = 24;

/// Opaque handle naming a key slot on the server.
///
/// Cache entries are scoped to the owning `client_id`; the same numeric id
/// may name distinct keys in different clients' caches.
pub type KeyId = u16;

/// Sentinel key id meaning "no key / erased".
pub const KEY_ID_ERASED: KeyId = 0;
