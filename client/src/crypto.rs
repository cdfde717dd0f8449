// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire-level cryptographic commands operating on cached key slots.
//!
//! These are the raw offload primitives: every input and output crosses
//! the packet channel, and keys are referenced by slot id only. The
//! provider module layers key-object ergonomics and ephemeral-key
//! fallback on top.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use veilhsm_wire::pack_label;
use veilhsm_wire::read_packet;
use veilhsm_wire::read_stub;
use veilhsm_wire::write_packet;
use veilhsm_wire::CipherDirection;
use veilhsm_wire::CryptoAction;
use veilhsm_wire::CryptoAesCbcRequest;
use veilhsm_wire::CryptoAesCbcResponse;
use veilhsm_wire::CryptoAgreeRequest;
use veilhsm_wire::CryptoAgreeResponse;
use veilhsm_wire::CryptoEcdsaSignRequest;
use veilhsm_wire::CryptoEcdsaSignResponse;
use veilhsm_wire::CryptoEcdsaVerifyRequest;
use veilhsm_wire::CryptoEcdsaVerifyResponse;
use veilhsm_wire::CryptoKeyGenRequest;
use veilhsm_wire::CryptoKeyGenResponse;
use veilhsm_wire::CryptoRngRequest;
use veilhsm_wire::CryptoRngResponse;
use veilhsm_wire::CryptoRsaRequest;
use veilhsm_wire::CryptoRsaResponse;
use veilhsm_wire::Group;
use veilhsm_wire::KeyGenAlgo;
use veilhsm_wire::KeyId;
use veilhsm_wire::RsaOp;
use veilhsm_wire::AES_BLOCK_LEN;
use veilhsm_wire::PACKET_STUB_LEN;

use crate::context::retry;
use crate::Client;
use crate::ClientError;
use crate::Result;

/// A generated key: the slot holding it plus its public part.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Cache slot holding the generated key.
    pub key_id: KeyId,

    /// Encoded public key; empty when the algorithm reports none.
    pub public: Vec<u8>,
}

impl Client {
    /// One stub-framed crypto exchange: marshal, send, receive, check rc.
    fn crypto_exchange<Req, Res>(
        &mut self,
        action: CryptoAction,
        body: &Req,
        tail: &[u8],
    ) -> Result<(Res, Vec<u8>)>
    where
        Req: IntoBytes + Immutable,
        Res: FromBytes,
    {
        let size = write_packet(self.data_mut(), 0, body, tail)?;
        retry(|| self.send_request(Group::Crypto, action as u8, size as u16))?;
        retry(|| {
            let (_, _, size) = self.recv_response()?;
            // Error responses carry the stub alone.
            let rc = read_stub(&self.data()[..size])?;
            if rc != 0 {
                return Err(ClientError::from_rc(rc));
            }
            let (_, res, tail) = read_packet::<Res>(&self.data()[..size])?;
            Ok((res, tail.to_vec()))
        })
    }

    /// Fills `out` with server-generated random bytes, looping over the
    /// per-packet limit as needed.
    pub fn fill_random(&mut self, out: &mut [u8]) -> Result<()> {
        let max = self.max_data_len()
            - PACKET_STUB_LEN
            - core::mem::size_of::<CryptoRngResponse>();
        let mut off = 0;
        while off < out.len() {
            let want = (out.len() - off).min(max);
            let body = CryptoRngRequest { len: want as u32 };
            let (res, tail): (CryptoRngResponse, _) =
                self.crypto_exchange(CryptoAction::Rng, &body, &[])?;
            let got = (res.len as usize).min(tail.len()).min(want);
            if got == 0 {
                return Err(ClientError::Aborted);
            }
            out[off..off + got].copy_from_slice(&tail[..got]);
            off += got;
        }
        Ok(())
    }

    /// AES-CBC over a cached key. `input` must be block-aligned; the
    /// server applies no padding.
    pub fn crypto_aes_cbc(
        &mut self,
        key_id: KeyId,
        dir: CipherDirection,
        iv: &[u8; AES_BLOCK_LEN],
        input: &[u8],
    ) -> Result<Vec<u8>> {
        if input.is_empty() || input.len() % AES_BLOCK_LEN != 0 {
            return Err(ClientError::BadArgs);
        }
        let body = CryptoAesCbcRequest {
            key_id,
            dir: dir as u8,
            reserved: 0,
            iv: *iv,
            len: input.len() as u32,
        };
        let (res, tail): (CryptoAesCbcResponse, _) =
            self.crypto_exchange(CryptoAction::AesCbc, &body, input)?;
        let len = (res.len as usize).min(tail.len());
        Ok(tail[..len].to_vec())
    }

    /// Raw RSA public/private function over a cached key. The input must
    /// already be padded to the modulus size.
    pub fn crypto_rsa_function(
        &mut self,
        key_id: KeyId,
        op: RsaOp,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        if input.is_empty() {
            return Err(ClientError::BadArgs);
        }
        let body = CryptoRsaRequest {
            key_id,
            op: op as u8,
            reserved: 0,
            len: input.len() as u32,
        };
        let (res, tail): (CryptoRsaResponse, _) =
            self.crypto_exchange(CryptoAction::RsaFunction, &body, input)?;
        let len = (res.len as usize).min(tail.len());
        Ok(tail[..len].to_vec())
    }

    /// ECDSA signature over a caller-supplied digest, returned DER-encoded.
    pub fn crypto_ecdsa_sign(&mut self, key_id: KeyId, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.is_empty() {
            return Err(ClientError::BadArgs);
        }
        let body = CryptoEcdsaSignRequest {
            key_id,
            reserved: 0,
            len: digest.len() as u32,
        };
        let (res, tail): (CryptoEcdsaSignResponse, _) =
            self.crypto_exchange(CryptoAction::EcdsaSign, &body, digest)?;
        let len = (res.len as usize).min(tail.len());
        Ok(tail[..len].to_vec())
    }

    /// ECDSA verification of a DER signature against a digest.
    pub fn crypto_ecdsa_verify(
        &mut self,
        key_id: KeyId,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        if digest.is_empty() || signature.is_empty() {
            return Err(ClientError::BadArgs);
        }
        let body = CryptoEcdsaVerifyRequest {
            key_id,
            reserved: 0,
            sig_len: signature.len() as u32,
            digest_len: digest.len() as u32,
        };
        let mut tail = Vec::with_capacity(signature.len() + digest.len());
        tail.extend_from_slice(signature);
        tail.extend_from_slice(digest);
        let (res, _): (CryptoEcdsaVerifyResponse, _) =
            self.crypto_exchange(CryptoAction::EcdsaVerify, &body, &tail)?;
        Ok(res.ok != 0)
    }

    /// ECDH shared secret between a cached private key and a peer public
    /// key (SubjectPublicKeyInfo DER).
    pub fn crypto_ecdh(&mut self, key_id: KeyId, peer_public: &[u8]) -> Result<Vec<u8>> {
        self.agree(CryptoAction::Ecdh, key_id, peer_public)
    }

    /// X25519 shared secret between a cached private key and a raw
    /// 32-byte peer public key.
    pub fn crypto_x25519(&mut self, key_id: KeyId, peer_public: &[u8]) -> Result<Vec<u8>> {
        self.agree(CryptoAction::X25519, key_id, peer_public)
    }

    fn agree(&mut self, action: CryptoAction, key_id: KeyId, peer_public: &[u8]) -> Result<Vec<u8>> {
        if peer_public.is_empty() {
            return Err(ClientError::BadArgs);
        }
        let body = CryptoAgreeRequest {
            key_id,
            reserved: 0,
            pub_len: peer_public.len() as u32,
        };
        let (res, tail): (CryptoAgreeResponse, _) =
            self.crypto_exchange(action, &body, peer_public)?;
        let len = (res.len as usize).min(tail.len());
        Ok(tail[..len].to_vec())
    }

    /// Generates a key on the server directly into a cache slot.
    ///
    /// `key_id` follows cache semantics: `KEY_ID_ERASED` allocates.
    pub fn crypto_key_gen(
        &mut self,
        algo: KeyGenAlgo,
        flags: u32,
        label: &[u8],
        key_id: KeyId,
    ) -> Result<GeneratedKey> {
        let body = CryptoKeyGenRequest {
            key_id,
            algo: algo as u8,
            reserved: 0,
            flags,
            label_len: label.len() as u32,
            label: pack_label(label),
        };
        let (res, tail): (CryptoKeyGenResponse, _) =
            self.crypto_exchange(CryptoAction::KeyGen, &body, &[])?;
        let len = (res.pub_len as usize).min(tail.len());
        Ok(GeneratedKey {
            key_id: res.key_id,
            public: tail[..len].to_vec(),
        })
    }
}
