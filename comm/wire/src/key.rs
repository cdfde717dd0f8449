// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key group message bodies.
//!
//! Key packets are stub-prefixed. Cache requests and export responses
//! carry the raw key material as a variable tail directly after the
//! fixed body; the frame `size` accounts for stub, body, and tail.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

use crate::KeyId;
use crate::NVM_LABEL_LEN;

/// Cache request body, followed by `len` raw key bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyCacheRequest {
    /// Requested slot id, or `KEY_ID_ERASED` to let the server allocate.
    pub id: KeyId,

    /// Caller-defined flags stored with the entry.
    pub flags: u32,

    /// Length of the trailing key material in bytes.
    pub len: u32,

    /// Label length as supplied by the caller; may exceed
    /// `NVM_LABEL_LEN`, in which case only the first `NVM_LABEL_LEN`
    /// bytes were carried.
    pub label_len: u32,

    /// Label bytes, zero-padded.
    pub label: [u8; NVM_LABEL_LEN],
}

/// Cache response body: the slot id actually used.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyCacheResponse {
    /// Assigned (or confirmed) slot id.
    pub id: KeyId,
}

/// Evict request body; the response is status-only.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyEvictRequest {
    /// Slot to drop from the cache.
    pub id: KeyId,
}

/// Export request body.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyExportRequest {
    /// Slot to read back.
    pub id: KeyId,
}

/// Export response body, followed by `len` raw key bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyExportResponse {
    /// Length of the trailing key material in bytes.
    pub len: u32,

    /// Label stored with the entry.
    pub label: [u8; NVM_LABEL_LEN],
}

/// Commit request body; the response is status-only.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyCommitRequest {
    /// Cached slot to promote to persistent storage.
    pub id: KeyId,
}

/// Erase request body; the response is status-only.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct KeyEraseRequest {
    /// Slot to remove from cache and persistent storage.
    pub id: KeyId,
}

/// Copies a caller label into the fixed wire field, truncating to
/// `NVM_LABEL_LEN` and zero-padding the remainder.
pub fn pack_label(label: &[u8]) -> [u8; NVM_LABEL_LEN] {
    let mut out = [0u8; NVM_LABEL_LEN];
    let n = label.len().min(NVM_LABEL_LEN);
    out[..n].copy_from_slice(&label[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_request_layout() {
        assert_eq!(
            core::mem::size_of::<KeyCacheRequest>(),
            2 + 4 + 4 + 4 + NVM_LABEL_LEN
        );
    }

    #[test]
    fn long_labels_truncate() {
        let label = [0xFFu8; NVM_LABEL_LEN + 8];
        let packed = pack_label(&label);
        assert_eq!(packed, [0xFF; NVM_LABEL_LEN]);
    }
}
