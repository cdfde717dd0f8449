// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crypto handlers backing the offload group, implemented over openssl.
//!
//! Key material arrives as the raw bytes the client cached: AES keys and
//! X25519 scalars are raw, RSA keys are PKCS#1 DER, ECC keys are SEC1
//! private DER or SubjectPublicKeyInfo DER. Malformed material or input
//! reports bad-arguments; the operation itself never panics.

use openssl::derive::Deriver;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::ecdsa::EcdsaSig;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::symm::Crypter;
use openssl::symm::Mode;
use veilhsm_wire::ErrorCode;
use veilhsm_wire::KeyGenAlgo;
use veilhsm_wire::AES_BLOCK_LEN;

pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>, ErrorCode> {
    let mut out = vec![0u8; len];
    openssl::rand::rand_bytes(&mut out).map_err(|_| ErrorCode::Aborted)?;
    Ok(out)
}

fn cbc_cipher(key_len: usize) -> Result<Cipher, ErrorCode> {
    match key_len {
        16 => Ok(Cipher::aes_128_cbc()),
        24 => Ok(Cipher::aes_192_cbc()),
        32 => Ok(Cipher::aes_256_cbc()),
        _ => Err(ErrorCode::BadArgs),
    }
}

/// AES-CBC without implicit padding; input must be block-aligned.
pub(crate) fn aes_cbc(
    material: &[u8],
    encrypt: bool,
    iv: &[u8; AES_BLOCK_LEN],
    input: &[u8],
) -> Result<Vec<u8>, ErrorCode> {
    if input.is_empty() || input.len() % AES_BLOCK_LEN != 0 {
        return Err(ErrorCode::BadArgs);
    }
    let cipher = cbc_cipher(material.len())?;
    let mode = if encrypt { Mode::Encrypt } else { Mode::Decrypt };
    let mut crypter =
        Crypter::new(cipher, mode, material, Some(iv)).map_err(|_| ErrorCode::BadArgs)?;
    crypter.pad(false);

    let mut out = vec![0u8; input.len() + cipher.block_size()];
    let mut count = crypter
        .update(input, &mut out)
        .map_err(|_| ErrorCode::BadArgs)?;
    count += crypter
        .finalize(&mut out[count..])
        .map_err(|_| ErrorCode::BadArgs)?;
    out.truncate(count);
    Ok(out)
}

/// Raw RSA function: modular exponentiation with the private or public
/// key, no padding applied or checked.
pub(crate) fn rsa_function(
    material: &[u8],
    private: bool,
    input: &[u8],
) -> Result<Vec<u8>, ErrorCode> {
    if private {
        let rsa = Rsa::private_key_from_der(material).map_err(|_| ErrorCode::BadArgs)?;
        if input.len() != rsa.size() as usize {
            return Err(ErrorCode::BadArgs);
        }
        let mut out = vec![0u8; rsa.size() as usize];
        let n = rsa
            .private_encrypt(input, &mut out, Padding::NONE)
            .map_err(|_| ErrorCode::BadArgs)?;
        out.truncate(n);
        Ok(out)
    } else {
        let rsa = match Rsa::private_key_from_der(material) {
            Ok(key) => {
                let n = key.n().to_owned().map_err(|_| ErrorCode::BadArgs)?;
                let e = key.e().to_owned().map_err(|_| ErrorCode::BadArgs)?;
                Rsa::from_public_components(n, e).map_err(|_| ErrorCode::BadArgs)?
            }
            Err(_) => Rsa::public_key_from_der_pkcs1(material).map_err(|_| ErrorCode::BadArgs)?,
        };
        if input.len() != rsa.size() as usize {
            return Err(ErrorCode::BadArgs);
        }
        let mut out = vec![0u8; rsa.size() as usize];
        let n = rsa
            .public_decrypt(input, &mut out, Padding::NONE)
            .map_err(|_| ErrorCode::BadArgs)?;
        out.truncate(n);
        Ok(out)
    }
}

fn ec_key_from_material(material: &[u8]) -> Result<EcKey<openssl::pkey::Public>, ErrorCode> {
    if let Ok(private) = EcKey::private_key_from_der(material) {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
            .map_err(|_| ErrorCode::Aborted)?;
        return EcKey::from_public_key(&group, private.public_key())
            .map_err(|_| ErrorCode::BadArgs);
    }
    let pkey = PKey::public_key_from_der(material).map_err(|_| ErrorCode::BadArgs)?;
    pkey.ec_key().map_err(|_| ErrorCode::BadArgs)
}

pub(crate) fn ecdsa_sign(material: &[u8], digest: &[u8]) -> Result<Vec<u8>, ErrorCode> {
    let key = EcKey::private_key_from_der(material).map_err(|_| ErrorCode::BadArgs)?;
    let sig = EcdsaSig::sign(digest, &key).map_err(|_| ErrorCode::BadArgs)?;
    sig.to_der().map_err(|_| ErrorCode::Aborted)
}

pub(crate) fn ecdsa_verify(
    material: &[u8],
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, ErrorCode> {
    let key = ec_key_from_material(material)?;
    let sig = EcdsaSig::from_der(signature).map_err(|_| ErrorCode::BadArgs)?;
    sig.verify(digest, &key).map_err(|_| ErrorCode::BadArgs)
}

pub(crate) fn ecdh(material: &[u8], peer_public_der: &[u8]) -> Result<Vec<u8>, ErrorCode> {
    let key = EcKey::private_key_from_der(material).map_err(|_| ErrorCode::BadArgs)?;
    let pkey = PKey::from_ec_key(key).map_err(|_| ErrorCode::Aborted)?;
    let peer = PKey::public_key_from_der(peer_public_der).map_err(|_| ErrorCode::BadArgs)?;
    derive(&pkey, &peer)
}

pub(crate) fn x25519(material: &[u8], peer_public: &[u8]) -> Result<Vec<u8>, ErrorCode> {
    let pkey =
        PKey::private_key_from_raw_bytes(material, Id::X25519).map_err(|_| ErrorCode::BadArgs)?;
    let peer =
        PKey::public_key_from_raw_bytes(peer_public, Id::X25519).map_err(|_| ErrorCode::BadArgs)?;
    derive(&pkey, &peer)
}

fn derive<T: openssl::pkey::HasPrivate>(
    pkey: &PKey<T>,
    peer: &PKey<openssl::pkey::Public>,
) -> Result<Vec<u8>, ErrorCode> {
    let mut deriver = Deriver::new(pkey).map_err(|_| ErrorCode::BadArgs)?;
    deriver.set_peer(peer).map_err(|_| ErrorCode::BadArgs)?;
    deriver.derive_to_vec().map_err(|_| ErrorCode::BadArgs)
}

/// Generates key material for `algo`: `(cacheable material, public part)`.
pub(crate) fn key_gen(algo: KeyGenAlgo) -> Result<(Vec<u8>, Vec<u8>), ErrorCode> {
    match algo {
        KeyGenAlgo::Rsa2048 => {
            let rsa = Rsa::generate(2048).map_err(|_| ErrorCode::Aborted)?;
            let material = rsa.private_key_to_der().map_err(|_| ErrorCode::Aborted)?;
            let public = rsa
                .public_key_to_der_pkcs1()
                .map_err(|_| ErrorCode::Aborted)?;
            Ok((material, public))
        }
        KeyGenAlgo::EccP256 => {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
                .map_err(|_| ErrorCode::Aborted)?;
            let key = EcKey::generate(&group).map_err(|_| ErrorCode::Aborted)?;
            let material = key.private_key_to_der().map_err(|_| ErrorCode::Aborted)?;
            let pkey = PKey::from_ec_key(key).map_err(|_| ErrorCode::Aborted)?;
            let public = pkey.public_key_to_der().map_err(|_| ErrorCode::Aborted)?;
            Ok((material, public))
        }
        KeyGenAlgo::X25519 => {
            let pkey = PKey::generate_x25519().map_err(|_| ErrorCode::Aborted)?;
            let material = pkey.raw_private_key().map_err(|_| ErrorCode::Aborted)?;
            let public = pkey.raw_public_key().map_err(|_| ErrorCode::Aborted)?;
            Ok((material, public))
        }
    }
}
