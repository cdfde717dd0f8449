// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crypto provider bridge.
//!
//! Key objects carry an explicit backend-handle slot: when a slot id is
//! set, operations offload to the HSM against that cached key; when only
//! raw material is present, the bridge caches it for the duration of the
//! operation and evicts it afterwards. Either way the observable results
//! match the local software provider over the same material.
//!
//! The bridge claims a process-wide device registration at context init:
//! one context per device id, so a second context registering the same
//! id fails until the holder is cleaned up.

mod pkcs1;

pub use pkcs1::emsa_pkcs1_v15_encode;
pub use pkcs1::RsaDigestKind;

use std::collections::HashMap;

use lazy_static::lazy_static;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use parking_lot::Mutex;
use zeroize::Zeroizing;

use veilhsm_wire::CipherDirection;
use veilhsm_wire::KeyId;
use veilhsm_wire::RsaOp;
use veilhsm_wire::AES_BLOCK_LEN;
use veilhsm_wire::KEY_ID_ERASED;

use crate::Client;
use crate::ClientError;
use crate::Result;

/// Well-known device id the provider registers under.
pub const DEV_ID: u32 = 0x5648_534D; // "VHSM"

/// Label attached to ephemeral cache entries created by the fallback path.
const EPHEMERAL_LABEL: &[u8] = b"ephemeral";

lazy_static! {
    static ref DEVICE_REGISTRY: Mutex<HashMap<u32, u32>> = Mutex::new(HashMap::new());
}

/// Claims the provider registration for `dev_id` on behalf of
/// `client_id`.
pub(crate) fn register_device(dev_id: u32, client_id: u32) -> Result<()> {
    let mut registry = DEVICE_REGISTRY.lock();
    if registry.contains_key(&dev_id) {
        tracing::warn!(dev_id, client_id, "crypto device already registered");
        return Err(ClientError::DeviceBusy(dev_id));
    }
    registry.insert(dev_id, client_id);
    Ok(())
}

/// Releases the registration if `client_id` holds it.
pub(crate) fn unregister_device(dev_id: u32, client_id: u32) {
    let mut registry = DEVICE_REGISTRY.lock();
    if registry.get(&dev_id) == Some(&client_id) {
        registry.remove(&dev_id);
    }
}

fn resolve<T>(
    client: &mut Client,
    key_id: Option<KeyId>,
    material: Option<&[u8]>,
    f: impl FnOnce(&mut Client, KeyId) -> Result<T>,
) -> Result<T> {
    if let Some(id) = key_id {
        return f(client, id);
    }
    let material = material.ok_or(ClientError::BadArgs)?;
    let id = client.key_cache(0, EPHEMERAL_LABEL, material, KEY_ID_ERASED)?;
    let result = f(client, id);
    let evicted = client.key_evict(id);
    match result {
        Ok(value) => evicted.map(|_| value),
        Err(err) => Err(err),
    }
}

/// AES key object: a slot handle, raw material, or both.
pub struct HsmAesKey {
    key_id: Option<KeyId>,
    material: Option<Zeroizing<Vec<u8>>>,
}

impl HsmAesKey {
    /// References an already-cached key by slot id.
    pub fn with_key_id(key_id: KeyId) -> Self {
        Self {
            key_id: Some(key_id),
            material: None,
        }
    }

    /// Wraps raw AES key material (16, 24, or 32 bytes).
    pub fn from_material(material: &[u8]) -> Result<Self> {
        if !matches!(material.len(), 16 | 24 | 32) {
            return Err(ClientError::BadArgs);
        }
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(material.to_vec())),
        })
    }

    /// Binds this object to a cached slot; later operations offload
    /// against it instead of re-sending material.
    pub fn set_key_id(&mut self, key_id: KeyId) {
        self.key_id = Some(key_id);
    }

    /// The bound slot id, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    fn material(&self) -> Option<&[u8]> {
        self.material.as_deref().map(|v| v.as_slice())
    }
}

/// RSA key object. The modulus length is tracked host-side so padding
/// can be computed without a round trip.
pub struct HsmRsaKey {
    key_id: Option<KeyId>,
    material: Option<Zeroizing<Vec<u8>>>,
    modulus_len: usize,
}

impl HsmRsaKey {
    /// References an already-cached key by slot id.
    pub fn with_key_id(key_id: KeyId, modulus_len: usize) -> Self {
        Self {
            key_id: Some(key_id),
            material: None,
            modulus_len,
        }
    }

    /// Wraps a DER-encoded PKCS#1 private key.
    pub fn from_private_der(der: &[u8]) -> Result<Self> {
        let rsa = openssl::rsa::Rsa::private_key_from_der(der)?;
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(der.to_vec())),
            modulus_len: rsa.size() as usize,
        })
    }

    /// Wraps a DER-encoded PKCS#1 public key.
    pub fn from_public_der(der: &[u8]) -> Result<Self> {
        let rsa = openssl::rsa::Rsa::public_key_from_der_pkcs1(der)?;
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(der.to_vec())),
            modulus_len: rsa.size() as usize,
        })
    }

    /// Binds this object to a cached slot.
    pub fn set_key_id(&mut self, key_id: KeyId) {
        self.key_id = Some(key_id);
    }

    /// The bound slot id, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        self.modulus_len
    }

    fn material(&self) -> Option<&[u8]> {
        self.material.as_deref().map(|v| v.as_slice())
    }
}

/// ECC (P-256) key object.
pub struct HsmEccKey {
    key_id: Option<KeyId>,
    material: Option<Zeroizing<Vec<u8>>>,
}

impl HsmEccKey {
    /// References an already-cached key by slot id.
    pub fn with_key_id(key_id: KeyId) -> Self {
        Self {
            key_id: Some(key_id),
            material: None,
        }
    }

    /// Wraps a DER-encoded SEC1 private key.
    pub fn from_private_der(der: &[u8]) -> Result<Self> {
        openssl::ec::EcKey::private_key_from_der(der)?;
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(der.to_vec())),
        })
    }

    /// Wraps a DER-encoded SubjectPublicKeyInfo public key.
    pub fn from_public_der(der: &[u8]) -> Result<Self> {
        openssl::pkey::PKey::public_key_from_der(der)?;
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(der.to_vec())),
        })
    }

    /// Binds this object to a cached slot.
    pub fn set_key_id(&mut self, key_id: KeyId) {
        self.key_id = Some(key_id);
    }

    /// The bound slot id, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    fn material(&self) -> Option<&[u8]> {
        self.material.as_deref().map(|v| v.as_slice())
    }
}

/// X25519 key object over a raw 32-byte scalar.
pub struct HsmX25519Key {
    key_id: Option<KeyId>,
    material: Option<Zeroizing<Vec<u8>>>,
}

impl HsmX25519Key {
    /// References an already-cached key by slot id.
    pub fn with_key_id(key_id: KeyId) -> Self {
        Self {
            key_id: Some(key_id),
            material: None,
        }
    }

    /// Wraps a raw 32-byte private scalar.
    pub fn from_material(material: &[u8]) -> Result<Self> {
        if material.len() != 32 {
            return Err(ClientError::BadArgs);
        }
        Ok(Self {
            key_id: None,
            material: Some(Zeroizing::new(material.to_vec())),
        })
    }

    /// Binds this object to a cached slot.
    pub fn set_key_id(&mut self, key_id: KeyId) {
        self.key_id = Some(key_id);
    }

    /// The bound slot id, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    fn material(&self) -> Option<&[u8]> {
        self.material.as_deref().map(|v| v.as_slice())
    }
}

impl Client {
    /// AES-CBC encryption through the HSM.
    pub fn aes_cbc_encrypt(
        &mut self,
        key: &HsmAesKey,
        iv: &[u8; AES_BLOCK_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_aes_cbc(id, CipherDirection::Encrypt, iv, plaintext)
        })
    }

    /// AES-CBC decryption through the HSM.
    pub fn aes_cbc_decrypt(
        &mut self,
        key: &HsmAesKey,
        iv: &[u8; AES_BLOCK_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_aes_cbc(id, CipherDirection::Decrypt, iv, ciphertext)
        })
    }

    /// Raw RSA public function through the HSM.
    pub fn rsa_public(&mut self, key: &HsmRsaKey, input: &[u8]) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_rsa_function(id, RsaOp::Public, input)
        })
    }

    /// Raw RSA private function through the HSM.
    pub fn rsa_private(&mut self, key: &HsmRsaKey, input: &[u8]) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_rsa_function(id, RsaOp::Private, input)
        })
    }

    /// PKCS#1 v1.5 signature: digest and encoding on the host, the
    /// private-key function on the HSM.
    pub fn rsa_sign_pkcs1v15(
        &mut self,
        key: &HsmRsaKey,
        kind: RsaDigestKind,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let digest = hash(digest_for(kind), message)?;
        let em = emsa_pkcs1_v15_encode(&digest, key.modulus_len(), kind)?;
        self.rsa_private(key, &em)
    }

    /// PKCS#1 v1.5 verification via the HSM public-key function.
    pub fn rsa_verify_pkcs1v15(
        &mut self,
        key: &HsmRsaKey,
        kind: RsaDigestKind,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        if signature.len() != key.modulus_len() {
            return Ok(false);
        }
        let em = self.rsa_public(key, signature)?;
        let digest = hash(digest_for(kind), message)?;
        let expected = emsa_pkcs1_v15_encode(&digest, key.modulus_len(), kind)?;
        Ok(em.len() == expected.len() && openssl::memcmp::eq(&em, &expected))
    }

    /// ECDSA signature over `digest`, DER-encoded.
    pub fn ecdsa_sign(&mut self, key: &HsmEccKey, digest: &[u8]) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_ecdsa_sign(id, digest)
        })
    }

    /// ECDSA verification of a DER signature over `digest`.
    pub fn ecdsa_verify(
        &mut self,
        key: &HsmEccKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_ecdsa_verify(id, digest, signature)
        })
    }

    /// ECDH agreement with a peer SubjectPublicKeyInfo public key.
    pub fn ecdh_agree(&mut self, key: &HsmEccKey, peer_public: &[u8]) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_ecdh(id, peer_public)
        })
    }

    /// X25519 agreement with a raw 32-byte peer public key.
    pub fn x25519_agree(&mut self, key: &HsmX25519Key, peer_public: &[u8; 32]) -> Result<Vec<u8>> {
        resolve(self, key.key_id(), key.material(), |client, id| {
            client.crypto_x25519(id, peer_public)
        })
    }
}

fn digest_for(kind: RsaDigestKind) -> MessageDigest {
    match kind {
        RsaDigestKind::Sha256 => MessageDigest::sha256(),
        RsaDigestKind::Sha384 => MessageDigest::sha384(),
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn registration_is_exclusive_per_device() {
        const DEV: u32 = 0x7E57_0001;
        register_device(DEV, 1).unwrap();
        assert!(matches!(
            register_device(DEV, 2),
            Err(ClientError::DeviceBusy(d)) if d == DEV
        ));

        // A non-holder cannot release the slot.
        unregister_device(DEV, 2);
        assert!(register_device(DEV, 3).is_err());

        unregister_device(DEV, 1);
        register_device(DEV, 3).unwrap();
        unregister_device(DEV, 3);
    }

    #[test]
    fn aes_material_sizes_are_validated() {
        assert!(HsmAesKey::from_material(&[0u8; 16]).is_ok());
        assert!(HsmAesKey::from_material(&[0u8; 24]).is_ok());
        assert!(HsmAesKey::from_material(&[0u8; 32]).is_ok());
        assert!(HsmAesKey::from_material(&[0u8; 15]).is_err());
    }

    #[test]
    fn x25519_material_must_be_32_bytes() {
        assert!(HsmX25519Key::from_material(&[0u8; 32]).is_ok());
        assert!(HsmX25519Key::from_material(&[0u8; 31]).is_err());
    }
}
