// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crypto group message bodies.
//!
//! All crypto packets are stub-prefixed. Bulk inputs and outputs travel
//! as variable tails after the fixed body, in the order the body fields
//! describe them.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

use crate::KeyId;
use crate::NVM_LABEL_LEN;

/// AES-CBC block and IV width in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// Cipher direction for symmetric operations.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    /// Plaintext to ciphertext.
    Encrypt = 0,

    /// Ciphertext to plaintext.
    Decrypt = 1,
}

/// RSA primitive selector.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaOp {
    /// Public-key function (verify/encrypt direction).
    Public = 0,

    /// Private-key function (sign/decrypt direction).
    Private = 1,
}

/// Algorithms the server can generate keys for.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenAlgo {
    /// RSA with a 2048-bit modulus.
    Rsa2048 = 1,

    /// NIST P-256.
    EccP256 = 2,

    /// X25519.
    X25519 = 3,
}

/// RNG request: ask for `len` random bytes.
///
/// The server may return fewer bytes than requested; callers loop until
/// satisfied.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoRngRequest {
    /// Requested byte count.
    pub len: u32,
}

/// RNG response, followed by `len` random bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoRngResponse {
    /// Number of random bytes in the tail.
    pub len: u32,
}

/// AES-CBC request, followed by `len` input bytes.
///
/// `len` must be a multiple of `AES_BLOCK_LEN`; the server applies no
/// implicit padding.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoAesCbcRequest {
    /// Cached key slot to use.
    pub key_id: KeyId,

    /// `CipherDirection` discriminator.
    pub dir: u8,

    /// Reserved, zero on send.
    pub reserved: u8,

    /// Initialization vector.
    pub iv: [u8; AES_BLOCK_LEN],

    /// Input length in bytes.
    pub len: u32,
}

/// AES-CBC response, followed by `len` output bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoAesCbcResponse {
    /// Output length in bytes.
    pub len: u32,
}

/// Raw RSA function request, followed by `len` input bytes.
///
/// The input must already be padded to the modulus size; padding is the
/// caller's concern.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoRsaRequest {
    /// Cached key slot to use.
    pub key_id: KeyId,

    /// `RsaOp` discriminator.
    pub op: u8,

    /// Reserved, zero on send.
    pub reserved: u8,

    /// Input length in bytes.
    pub len: u32,
}

/// Raw RSA function response, followed by `len` output bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoRsaResponse {
    /// Output length in bytes.
    pub len: u32,
}

/// ECDSA sign request, followed by `len` digest bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoEcdsaSignRequest {
    /// Cached private-key slot.
    pub key_id: KeyId,

    /// Reserved, zero on send.
    pub reserved: u16,

    /// Digest length in bytes.
    pub len: u32,
}

/// ECDSA sign response, followed by `len` DER signature bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoEcdsaSignResponse {
    /// Signature length in bytes.
    pub len: u32,
}

/// ECDSA verify request, followed by `sig_len` signature bytes and then
/// `digest_len` digest bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoEcdsaVerifyRequest {
    /// Cached key slot holding the public (or full) key.
    pub key_id: KeyId,

    /// Reserved, zero on send.
    pub reserved: u16,

    /// DER signature length in bytes.
    pub sig_len: u32,

    /// Digest length in bytes.
    pub digest_len: u32,
}

/// ECDSA verify response.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoEcdsaVerifyResponse {
    /// Nonzero when the signature verified.
    pub ok: u32,
}

/// Shared-secret agreement request (ECDH and X25519), followed by
/// `pub_len` peer public-key bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoAgreeRequest {
    /// Cached private-key slot.
    pub key_id: KeyId,

    /// Reserved, zero on send.
    pub reserved: u16,

    /// Peer public-key length in bytes.
    pub pub_len: u32,
}

/// Shared-secret agreement response, followed by `len` secret bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoAgreeResponse {
    /// Shared-secret length in bytes.
    pub len: u32,
}

/// Key generation request.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoKeyGenRequest {
    /// Requested slot id, or `KEY_ID_ERASED` to let the server allocate.
    pub key_id: KeyId,

    /// `KeyGenAlgo` discriminator.
    pub algo: u8,

    /// Reserved, zero on send.
    pub reserved: u8,

    /// Flags stored with the cached entry.
    pub flags: u32,

    /// Label length as supplied by the caller.
    pub label_len: u32,

    /// Label bytes, zero-padded.
    pub label: [u8; NVM_LABEL_LEN],
}

/// Key generation response, followed by `pub_len` public-key bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct CryptoKeyGenResponse {
    /// Slot id holding the generated key.
    pub key_id: KeyId,

    /// Reserved, zero in responses.
    pub reserved: u16,

    /// Public-key length in bytes; zero when the algorithm has no
    /// separate public part to report.
    pub pub_len: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_request_layout() {
        assert_eq!(
            core::mem::size_of::<CryptoAesCbcRequest>(),
            2 + 1 + 1 + AES_BLOCK_LEN + 4
        );
    }

    #[test]
    fn keygen_request_layout() {
        assert_eq!(
            core::mem::size_of::<CryptoKeyGenRequest>(),
            2 + 1 + 1 + 4 + 4 + NVM_LABEL_LEN
        );
    }
}
