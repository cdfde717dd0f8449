// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! EMSA-PKCS1-v1_5 signature encoding (RFC 8017 §9.2).
//!
//! The encoding runs on the host; only the raw RSA function is
//! offloaded. Splitting it this way keeps HSM signatures byte-identical
//! to a local software signer over the same key.

use crate::ClientError;
use crate::Result;

/// Digest algorithms accepted by the PKCS#1 v1.5 encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaDigestKind {
    /// SHA2-256
    Sha256,

    /// SHA2-384
    Sha384,
}

// DigestInfo prefixes from RFC 8017 Section 9.2 notes.
const SHA256_ALGO_ID: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

const SHA384_ALGO_ID: [u8; 19] = [
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02,
    0x05, 0x00, 0x04, 0x30,
];

impl RsaDigestKind {
    fn algo_id(self) -> &'static [u8] {
        match self {
            RsaDigestKind::Sha256 => &SHA256_ALGO_ID,
            RsaDigestKind::Sha384 => &SHA384_ALGO_ID,
        }
    }

    /// Digest length in bytes.
    pub fn hash_len(self) -> usize {
        match self {
            RsaDigestKind::Sha256 => 32,
            RsaDigestKind::Sha384 => 48,
        }
    }
}

/// Encodes `digest` into an `em_len`-byte message block:
/// `0x00 0x01 PS(0xFF..) 0x00 DigestInfo`.
pub fn emsa_pkcs1_v15_encode(
    digest: &[u8],
    em_len: usize,
    kind: RsaDigestKind,
) -> Result<Vec<u8>> {
    if digest.len() != kind.hash_len() {
        return Err(ClientError::BadArgs);
    }
    let t_len = kind.algo_id().len() + digest.len();
    if em_len < t_len + 11 {
        return Err(ClientError::BadArgs);
    }
    let mut em = vec![0xFFu8; em_len];
    em[0] = 0x00;
    em[1] = 0x01;
    let t_start = em_len - t_len;
    em[t_start - 1] = 0x00;
    em[t_start..t_start + kind.algo_id().len()].copy_from_slice(kind.algo_id());
    em[t_start + kind.algo_id().len()..].copy_from_slice(digest);
    Ok(em)
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn encoding_structure() {
        let digest = [0xAB; 32];
        let em = emsa_pkcs1_v15_encode(&digest, 256, RsaDigestKind::Sha256).unwrap();
        assert_eq!(em.len(), 256);
        assert_eq!(&em[..2], &[0x00, 0x01]);
        let t_start = 256 - (SHA256_ALGO_ID.len() + 32);
        assert!(em[2..t_start - 1].iter().all(|&b| b == 0xFF));
        assert_eq!(em[t_start - 1], 0x00);
        assert_eq!(&em[t_start..t_start + 19], &SHA256_ALGO_ID);
        assert_eq!(&em[256 - 32..], &digest);
    }

    #[test]
    fn wrong_digest_length_is_rejected() {
        let digest = [0u8; 20];
        assert!(emsa_pkcs1_v15_encode(&digest, 256, RsaDigestKind::Sha256).is_err());
    }

    #[test]
    fn modulus_too_small_is_rejected() {
        let digest = [0u8; 32];
        assert!(emsa_pkcs1_v15_encode(&digest, 32, RsaDigestKind::Sha256).is_err());
    }
}
