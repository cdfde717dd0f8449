// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crypto provider bridge: offloaded operations must be
//! indistinguishable from the local software provider.

use std::sync::Arc;

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::sign::Verifier;
use openssl::symm::Cipher;
use openssl::symm::Crypter;
use openssl::symm::Mode;
use parking_lot::Mutex;
use veilhsm_client::provider::HsmAesKey;
use veilhsm_client::provider::HsmEccKey;
use veilhsm_client::provider::HsmRsaKey;
use veilhsm_client::provider::HsmX25519Key;
use veilhsm_client::provider::RsaDigestKind;
use veilhsm_client::Client;
use veilhsm_client::ClientConfig;
use veilhsm_client::ClientError;
use veilhsm_client::CommClientConfig;
use veilhsm_client::CryptoConfig;
use veilhsm_sim::shared_server;
use veilhsm_sim::SimDevice;
use veilhsm_sim::SimServer;
use veilhsm_sim::SimServerConfig;
use veilhsm_wire::KeyGenAlgo;
use veilhsm_wire::KEY_ID_ERASED;

fn connect(server: &Arc<Mutex<SimServer>>, client_id: u32) -> Client {
    let device = SimDevice::new(server.clone());
    Client::new(ClientConfig {
        comm: CommClientConfig {
            transport: Box::new(device),
            client_id,
        },
        crypto: None,
    })
    .expect("client init")
}

fn software_aes_cbc_encrypt(key: &[u8], iv: &[u8; 16], pt: &[u8]) -> Vec<u8> {
    let mut crypter =
        Crypter::new(Cipher::aes_256_cbc(), Mode::Encrypt, key, Some(iv)).unwrap();
    crypter.pad(false);
    let mut out = vec![0u8; pt.len() + 16];
    let mut n = crypter.update(pt, &mut out).unwrap();
    n += crypter.finalize(&mut out[n..]).unwrap();
    out.truncate(n);
    out
}

#[test]
fn aes_cbc_offload_is_byte_identical_to_software() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let key_bytes = [0x42u8; 32];
    let iv = [0x24u8; 16];
    let pt = [0x7Eu8; 64];

    let key_id = client
        .key_cache(0, b"aes", &key_bytes, KEY_ID_ERASED)
        .unwrap();
    let key = HsmAesKey::with_key_id(key_id);

    let ct = client.aes_cbc_encrypt(&key, &iv, &pt).unwrap();
    assert_eq!(ct, software_aes_cbc_encrypt(&key_bytes, &iv, &pt));

    let back = client.aes_cbc_decrypt(&key, &iv, &ct).unwrap();
    assert_eq!(back, pt);
}

#[test]
fn ephemeral_aes_keys_are_cached_then_evicted() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    // Ids allocate downward from the top, so eviction is observable
    // through the next allocation.
    let first = client.key_cache(0, b"probe", &[1u8; 16], KEY_ID_ERASED).unwrap();

    let iv = [0u8; 16];
    let key = HsmAesKey::from_material(&[0x10u8; 16]).unwrap();
    let ct = client.aes_cbc_encrypt(&key, &iv, &[0u8; 16]).unwrap();
    assert_eq!(
        ct,
        openssl::symm::encrypt(Cipher::aes_128_cbc(), &[0x10u8; 16], Some(&iv), &[0u8; 16])
            .map(|mut v| {
                v.truncate(16);
                v
            })
            .unwrap()
    );

    // The slot the ephemeral key used is free again.
    let next = client.key_cache(0, b"probe2", &[2u8; 16], KEY_ID_ERASED).unwrap();
    assert_eq!(next, first - 1);
}

#[test]
fn rsa_pkcs1v15_signature_matches_openssl_signer() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
    let der = rsa.private_key_to_der().unwrap();
    let key = HsmRsaKey::from_private_der(&der).unwrap();
    let message = b"the contents do not matter, determinism does";

    let hsm_sig = client
        .rsa_sign_pkcs1v15(&key, RsaDigestKind::Sha256, message)
        .unwrap();

    let pkey = PKey::from_rsa(rsa).unwrap();
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
    signer.update(message).unwrap();
    let sw_sig = signer.sign_to_vec().unwrap();

    assert_eq!(hsm_sig, sw_sig);

    assert!(client
        .rsa_verify_pkcs1v15(&key, RsaDigestKind::Sha256, message, &hsm_sig)
        .unwrap());
    assert!(!client
        .rsa_verify_pkcs1v15(&key, RsaDigestKind::Sha256, b"tampered", &hsm_sig)
        .unwrap());
}

#[test]
fn ecdsa_signatures_cross_verify_with_openssl() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let group =
        openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
    let ec = openssl::ec::EcKey::generate(&group).unwrap();
    let private_der = ec.private_key_to_der().unwrap();
    let public_der = PKey::from_ec_key(ec.clone())
        .unwrap()
        .public_key_to_der()
        .unwrap();

    let digest = openssl::hash::hash(MessageDigest::sha256(), b"sign me").unwrap();

    // HSM signs, openssl verifies.
    let key = HsmEccKey::from_private_der(&private_der).unwrap();
    let hsm_sig = client.ecdsa_sign(&key, &digest).unwrap();
    let sig = openssl::ecdsa::EcdsaSig::from_der(&hsm_sig).unwrap();
    assert!(sig.verify(&digest, &ec).unwrap());

    // openssl signs, HSM verifies using public material only.
    let local_sig = openssl::ecdsa::EcdsaSig::sign(&digest, &ec)
        .unwrap()
        .to_der()
        .unwrap();
    let public_key = HsmEccKey::from_public_der(&public_der).unwrap();
    assert!(client.ecdsa_verify(&public_key, &digest, &local_sig).unwrap());
    let wrong = openssl::hash::hash(MessageDigest::sha256(), b"other").unwrap();
    assert!(!client.ecdsa_verify(&public_key, &wrong, &local_sig).unwrap());
}

#[test]
fn ecdh_agreement_matches_local_derive() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let group =
        openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
    let ours = openssl::ec::EcKey::generate(&group).unwrap();
    let peer = openssl::ec::EcKey::generate(&group).unwrap();
    let peer_public_der = PKey::from_ec_key(peer.clone())
        .unwrap()
        .public_key_to_der()
        .unwrap();

    let key = HsmEccKey::from_private_der(&ours.private_key_to_der().unwrap()).unwrap();
    let hsm_secret = client.ecdh_agree(&key, &peer_public_der).unwrap();

    let ours_pkey = PKey::from_ec_key(ours).unwrap();
    let peer_pkey = PKey::from_ec_key(peer).unwrap();
    let mut deriver = openssl::derive::Deriver::new(&ours_pkey).unwrap();
    deriver.set_peer(&peer_pkey).unwrap();
    assert_eq!(hsm_secret, deriver.derive_to_vec().unwrap());
}

#[test]
fn x25519_agreement_matches_local_derive() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let ours = PKey::generate_x25519().unwrap();
    let peer = PKey::generate_x25519().unwrap();
    let peer_public: [u8; 32] = peer.raw_public_key().unwrap().try_into().unwrap();

    let key = HsmX25519Key::from_material(&ours.raw_private_key().unwrap()).unwrap();
    let hsm_secret = client.x25519_agree(&key, &peer_public).unwrap();

    let mut deriver = openssl::derive::Deriver::new(&ours).unwrap();
    deriver.set_peer(&peer).unwrap();
    assert_eq!(hsm_secret, deriver.derive_to_vec().unwrap());
}

#[test]
fn generated_rsa_key_signs_under_its_cached_slot() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let generated = client
        .crypto_key_gen(KeyGenAlgo::Rsa2048, 0, b"generated", KEY_ID_ERASED)
        .unwrap();
    let public = openssl::rsa::Rsa::public_key_from_der_pkcs1(&generated.public).unwrap();

    let key = HsmRsaKey::with_key_id(generated.key_id, public.size() as usize);
    let message = b"signed by a key that never left the server";
    let sig = client
        .rsa_sign_pkcs1v15(&key, RsaDigestKind::Sha256, message)
        .unwrap();

    let pkey = PKey::from_rsa(public).unwrap();
    let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey).unwrap();
    verifier.update(message).unwrap();
    assert!(verifier.verify(&sig).unwrap());
}

#[test]
fn generated_x25519_key_agrees_with_a_local_peer() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let generated = client
        .crypto_key_gen(KeyGenAlgo::X25519, 0, b"gen-x", KEY_ID_ERASED)
        .unwrap();
    assert_eq!(generated.public.len(), 32);

    let peer = PKey::generate_x25519().unwrap();
    let peer_public: [u8; 32] = peer.raw_public_key().unwrap().try_into().unwrap();

    let key = HsmX25519Key::with_key_id(generated.key_id);
    let hsm_secret = client.x25519_agree(&key, &peer_public).unwrap();

    let generated_pub =
        PKey::public_key_from_raw_bytes(&generated.public, openssl::pkey::Id::X25519).unwrap();
    let mut deriver = openssl::derive::Deriver::new(&peer).unwrap();
    deriver.set_peer(&generated_pub).unwrap();
    assert_eq!(hsm_secret, deriver.derive_to_vec().unwrap());
}

#[test]
fn fill_random_spans_multiple_packets() {
    let server = shared_server(SimServerConfig::default());
    let mut client = connect(&server, 1);
    client.comm_init().unwrap();

    let mut first = vec![0u8; 4096];
    client.fill_random(&mut first).unwrap();
    assert!(first.iter().any(|&b| b != 0));

    let mut second = vec![0u8; 4096];
    client.fill_random(&mut second).unwrap();
    assert_ne!(first, second);
}

#[test]
fn provider_registration_is_exclusive() {
    const DEV_ID: u32 = 0xD0D0_0001;
    let server = shared_server(SimServerConfig::default());

    let make = |client_id: u32| {
        let device = SimDevice::new(server.clone());
        Client::new(ClientConfig {
            comm: CommClientConfig {
                transport: Box::new(device),
                client_id,
            },
            crypto: Some(CryptoConfig { dev_id: DEV_ID }),
        })
    };

    let mut holder = make(1).unwrap();
    match make(2) {
        Err(ClientError::DeviceBusy(dev)) => assert_eq!(dev, DEV_ID),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("registration should be busy"),
    }

    // Cleanup releases the registration for the next context.
    holder.cleanup();
    make(3).unwrap();
}
