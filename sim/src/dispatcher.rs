// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Frame dispatcher: parses requests, routes them to the keystore,
//! custom-callback, and crypto handlers, and builds the response frame.

use std::collections::HashSet;

use tracing::instrument;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

use veilhsm_wire::kind_action;
use veilhsm_wire::kind_group;
use veilhsm_wire::read_message;
use veilhsm_wire::read_packet;
use veilhsm_wire::write_message;
use veilhsm_wire::write_packet;
use veilhsm_wire::write_stub;
use veilhsm_wire::CommAction;
use veilhsm_wire::CommInfoResponse;
use veilhsm_wire::CommInitRequest;
use veilhsm_wire::CommInitResponse;
use veilhsm_wire::CommLenData;
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
use veilhsm_wire::CustomCbKind;
use veilhsm_wire::CustomCbRequest;
use veilhsm_wire::CustomCbResponse;
use veilhsm_wire::ErrorCode;
use veilhsm_wire::FrameHeader;
use veilhsm_wire::Group;
use veilhsm_wire::KeyAction;
use veilhsm_wire::KeyCacheRequest;
use veilhsm_wire::KeyCacheResponse;
use veilhsm_wire::KeyCommitRequest;
use veilhsm_wire::KeyEraseRequest;
use veilhsm_wire::KeyEvictRequest;
use veilhsm_wire::KeyExportRequest;
use veilhsm_wire::KeyExportResponse;
use veilhsm_wire::KeyGenAlgo;
use veilhsm_wire::COMM_DATA_LEN;
use veilhsm_wire::COMM_HEADER_LEN;
use veilhsm_wire::CUSTOM_CB_COUNT;
use veilhsm_wire::CUSTOM_DATA_LEN;
use veilhsm_wire::MAGIC_NATIVE;
use veilhsm_wire::NVM_LABEL_LEN;
use veilhsm_wire::PACKET_STUB_LEN;

use crate::custom::CustomHandler;
use crate::custom::CustomRegistry;
use crate::keystore::key_id_bits;
use crate::keystore::make_key_id;
use crate::keystore::KeyMeta;
use crate::keystore::Keystore;
use crate::keystore::KEY_TYPE_CRYPTO;
use crate::sim_crypto;

/// Simulator configuration.
#[derive(Debug, Clone, Copy)]
pub struct SimServerConfig {
    /// Identity reported by the init response.
    pub server_id: u32,
}

impl Default for SimServerConfig {
    fn default() -> Self {
        Self { server_id: 1 }
    }
}

/// One simulated HSM server: keystore, NVM, custom callbacks, crypto.
pub struct SimServer {
    config: SimServerConfig,
    keystore: Keystore,
    custom: CustomRegistry,
    clients: HashSet<u32>,
}

impl SimServer {
    /// Creates a server with an empty keystore.
    pub fn new(config: SimServerConfig) -> Self {
        Self {
            config,
            keystore: Keystore::new(),
            custom: CustomRegistry::new(),
            clients: HashSet::new(),
        }
    }

    /// Registers a custom callback at `id`.
    pub fn register_custom_handler(
        &mut self,
        id: u32,
        handler: CustomHandler,
    ) -> Result<(), ErrorCode> {
        self.custom.register(id, handler)
    }

    /// Handles one request frame and returns the response frame, or
    /// `None` when the frame is malformed enough to drop.
    #[instrument(skip_all, fields(len = frame.len()))]
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let Ok((header, rest)) = FrameHeader::ref_from_prefix(frame) else {
            tracing::warn!("runt frame dropped");
            return None;
        };
        let header = *header;
        if header.magic != MAGIC_NATIVE {
            tracing::warn!(magic = { header.magic }, "non-native magic dropped");
            return None;
        }
        let size = header.size as usize;
        if size > rest.len() {
            tracing::warn!(size, have = rest.len(), "truncated frame dropped");
            return None;
        }
        let payload = &rest[..size];
        tracing::debug!(
            kind = { header.kind },
            seq = { header.seq },
            client_id = { header.client_id },
            "request payload (in hex): {:02x?}",
            payload
        );

        let group = kind_group(header.kind);
        let action = kind_action(header.kind);
        let client_id = header.client_id;

        let mut out = vec![0u8; COMM_DATA_LEN];
        let out_len = match Group::try_from(group) {
            Ok(Group::Comm) => self.handle_comm(action, client_id, payload, &mut out),
            Ok(Group::Key) => self.handle_key(action, client_id, payload, &mut out),
            Ok(Group::Custom) => self.handle_custom(action, payload, &mut out),
            Ok(Group::Crypto) => self.handle_crypto(action, client_id, payload, &mut out),
            _ => write_stub(&mut out, ErrorCode::BadArgs.to_rc()).unwrap_or(0),
        };

        let resp_header = FrameHeader::new(header.kind, header.seq, client_id, out_len as u16);
        let mut resp = Vec::with_capacity(COMM_HEADER_LEN + out_len);
        resp.extend_from_slice(resp_header.as_bytes());
        resp.extend_from_slice(&out[..out_len]);
        tracing::debug!(
            kind = { header.kind },
            "response payload (in hex): {:02x?}",
            &resp[COMM_HEADER_LEN..]
        );
        Some(resp)
    }

    /// Comm group: bare messages, no stub. Malformed requests get an
    /// empty response, which the client rejects by size.
    fn handle_comm(&mut self, action: u8, client_id: u32, payload: &[u8], out: &mut [u8]) -> usize {
        match action {
            a if a == CommAction::Init as u8 => {
                let Ok((req, _)) = read_message::<CommInitRequest>(payload) else {
                    return 0;
                };
                self.clients.insert(req.client_id);
                tracing::debug!(client_id = { req.client_id }, "client connected");
                let resp = CommInitResponse {
                    client_id: req.client_id,
                    server_id: self.config.server_id,
                };
                write_message(out, &resp, &[]).unwrap_or(0)
            }
            a if a == CommAction::Close as u8 => {
                self.keystore.drop_uncommitted_for_user(client_id);
                self.clients.remove(&client_id);
                tracing::debug!(client_id, "client disconnected");
                0
            }
            a if a == CommAction::Echo as u8 => {
                let Ok((req, _)) = read_message::<CommLenData>(payload) else {
                    return 0;
                };
                let resp = CommLenData::new(req.payload());
                write_message(out, &resp, &[]).unwrap_or(0)
            }
            a if a == CommAction::Info as u8 => {
                let resp = CommInfoResponse {
                    version: *b"1.0.0\0\0\0",
                    build: *b"sim\0\0\0\0\0",
                    ram_free: 0x0010_0000,
                    nvm_free: self.keystore.nvm.free_estimate(),
                };
                write_message(out, &resp, &[]).unwrap_or(0)
            }
            _ => 0,
        }
    }

    fn handle_key(&mut self, action: u8, client_id: u32, payload: &[u8], out: &mut [u8]) -> usize {
        let result = self.key_op(action, client_id, payload, out);
        match result {
            Ok(len) => len,
            Err(code) => {
                tracing::debug!(action, rc = code.to_rc(), "key op failed");
                write_stub(out, code.to_rc()).unwrap_or(0)
            }
        }
    }

    fn key_op(
        &mut self,
        action: u8,
        client_id: u32,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        match action {
            a if a == KeyAction::Cache as u8 => {
                let (_, req, tail) =
                    read_packet::<KeyCacheRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let material = tail.get(..req.len as usize).ok_or(ErrorCode::BadArgs)?;

                let full_id = if key_id_bits(req.id) == 0 {
                    self.keystore.unique_id(KEY_TYPE_CRYPTO, client_id)?
                } else {
                    make_key_id(KEY_TYPE_CRYPTO, client_id, req.id)
                };
                // The label length travels as supplied; truncate on read.
                let label_len = (req.label_len as usize).min(NVM_LABEL_LEN);
                let mut label = [0u8; NVM_LABEL_LEN];
                label[..label_len].copy_from_slice(&req.label[..label_len]);

                let meta = KeyMeta {
                    id: full_id,
                    flags: req.flags,
                    len: req.len,
                    label,
                };
                self.keystore.cache_key(meta, material)?;
                let resp = KeyCacheResponse {
                    id: key_id_bits(full_id),
                };
                write_packet(out, 0, &resp, &[]).map_err(|_| ErrorCode::Aborted)
            }
            a if a == KeyAction::Evict as u8 => {
                let (_, req, _) =
                    read_packet::<KeyEvictRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                self.keystore
                    .evict(make_key_id(KEY_TYPE_CRYPTO, client_id, req.id))?;
                write_stub(out, 0).map_err(|_| ErrorCode::Aborted)
            }
            a if a == KeyAction::Export as u8 => {
                let (_, req, _) =
                    read_packet::<KeyExportRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let (meta, material) = self
                    .keystore
                    .read_key(make_key_id(KEY_TYPE_CRYPTO, client_id, req.id))?;
                let resp = KeyExportResponse {
                    len: material.len() as u32,
                    label: meta.label,
                };
                write_packet(out, 0, &resp, &material).map_err(|_| ErrorCode::Aborted)
            }
            a if a == KeyAction::Commit as u8 => {
                let (_, req, _) =
                    read_packet::<KeyCommitRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                self.keystore
                    .commit(make_key_id(KEY_TYPE_CRYPTO, client_id, req.id))?;
                write_stub(out, 0).map_err(|_| ErrorCode::Aborted)
            }
            a if a == KeyAction::Erase as u8 => {
                let (_, req, _) =
                    read_packet::<KeyEraseRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                self.keystore
                    .erase(make_key_id(KEY_TYPE_CRYPTO, client_id, req.id))?;
                write_stub(out, 0).map_err(|_| ErrorCode::Aborted)
            }
            _ => Err(ErrorCode::BadArgs),
        }
    }

    fn handle_custom(&mut self, action: u8, payload: &[u8], out: &mut [u8]) -> usize {
        let Ok((req, _)) = read_message::<CustomCbRequest>(payload) else {
            return 0;
        };
        let id = req.id;
        if id >= CUSTOM_CB_COUNT || id != action as u32 {
            return 0;
        }

        let mut data = [0u8; CUSTOM_DATA_LEN];
        let err = match { req.kind } {
            k if k == CustomCbKind::Query as u16 => {
                if self.custom.registered(id) {
                    0
                } else {
                    ErrorCode::NoHandler.to_rc()
                }
            }
            k if k == CustomCbKind::Invoke as u16 => {
                match self.custom.invoke(id, req.kind, &req.data) {
                    Ok(result) => {
                        let n = result.len().min(CUSTOM_DATA_LEN);
                        data[..n].copy_from_slice(&result[..n]);
                        0
                    }
                    Err(code) => code.to_rc(),
                }
            }
            _ => ErrorCode::BadArgs.to_rc(),
        };

        let resp = CustomCbResponse {
            id: id as u16,
            kind: req.kind,
            err,
            data,
        };
        write_message(out, &resp, &[]).unwrap_or(0)
    }

    fn handle_crypto(
        &mut self,
        action: u8,
        client_id: u32,
        payload: &[u8],
        out: &mut [u8],
    ) -> usize {
        let result = self.crypto_op(action, client_id, payload, out);
        match result {
            Ok(len) => len,
            Err(code) => {
                tracing::debug!(action, rc = code.to_rc(), "crypto op failed");
                write_stub(out, code.to_rc()).unwrap_or(0)
            }
        }
    }

    fn crypto_op(
        &mut self,
        action: u8,
        client_id: u32,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        match action {
            a if a == CryptoAction::Rng as u8 => {
                let (_, req, _) =
                    read_packet::<CryptoRngRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let max = COMM_DATA_LEN
                    - PACKET_STUB_LEN
                    - core::mem::size_of::<CryptoRngResponse>();
                let len = (req.len as usize).min(max);
                let data = sim_crypto::random_bytes(len)?;
                let resp = CryptoRngResponse { len: len as u32 };
                write_packet(out, 0, &resp, &data).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::AesCbc as u8 => {
                let (_, req, tail) =
                    read_packet::<CryptoAesCbcRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let input = tail.get(..req.len as usize).ok_or(ErrorCode::BadArgs)?;
                let (_, material) = self.read_client_key(client_id, req.key_id)?;
                let output = sim_crypto::aes_cbc(&material, req.dir == 0, &{ req.iv }, input)?;
                let resp = CryptoAesCbcResponse {
                    len: output.len() as u32,
                };
                write_packet(out, 0, &resp, &output).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::RsaFunction as u8 => {
                let (_, req, tail) =
                    read_packet::<CryptoRsaRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let input = tail.get(..req.len as usize).ok_or(ErrorCode::BadArgs)?;
                let (_, material) = self.read_client_key(client_id, req.key_id)?;
                let output = sim_crypto::rsa_function(&material, req.op == 1, input)?;
                let resp = CryptoRsaResponse {
                    len: output.len() as u32,
                };
                write_packet(out, 0, &resp, &output).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::EcdsaSign as u8 => {
                let (_, req, tail) = read_packet::<CryptoEcdsaSignRequest>(payload)
                    .map_err(|_| ErrorCode::BadArgs)?;
                let digest = tail.get(..req.len as usize).ok_or(ErrorCode::BadArgs)?;
                let (_, material) = self.read_client_key(client_id, req.key_id)?;
                let signature = sim_crypto::ecdsa_sign(&material, digest)?;
                let resp = CryptoEcdsaSignResponse {
                    len: signature.len() as u32,
                };
                write_packet(out, 0, &resp, &signature).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::EcdsaVerify as u8 => {
                let (_, req, tail) = read_packet::<CryptoEcdsaVerifyRequest>(payload)
                    .map_err(|_| ErrorCode::BadArgs)?;
                let sig_len = req.sig_len as usize;
                let digest_len = req.digest_len as usize;
                let signature = tail.get(..sig_len).ok_or(ErrorCode::BadArgs)?;
                let digest = tail
                    .get(sig_len..sig_len + digest_len)
                    .ok_or(ErrorCode::BadArgs)?;
                let (_, material) = self.read_client_key(client_id, req.key_id)?;
                let ok = sim_crypto::ecdsa_verify(&material, digest, signature)?;
                let resp = CryptoEcdsaVerifyResponse { ok: ok as u32 };
                write_packet(out, 0, &resp, &[]).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::Ecdh as u8 || a == CryptoAction::X25519 as u8 => {
                let (_, req, tail) =
                    read_packet::<CryptoAgreeRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let peer = tail.get(..req.pub_len as usize).ok_or(ErrorCode::BadArgs)?;
                let (_, material) = self.read_client_key(client_id, req.key_id)?;
                let secret = if a == CryptoAction::Ecdh as u8 {
                    sim_crypto::ecdh(&material, peer)?
                } else {
                    sim_crypto::x25519(&material, peer)?
                };
                let resp = CryptoAgreeResponse {
                    len: secret.len() as u32,
                };
                write_packet(out, 0, &resp, &secret).map_err(|_| ErrorCode::Aborted)
            }
            a if a == CryptoAction::KeyGen as u8 => {
                let (_, req, _) =
                    read_packet::<CryptoKeyGenRequest>(payload).map_err(|_| ErrorCode::BadArgs)?;
                let algo = match { req.algo } {
                    a if a == KeyGenAlgo::Rsa2048 as u8 => KeyGenAlgo::Rsa2048,
                    a if a == KeyGenAlgo::EccP256 as u8 => KeyGenAlgo::EccP256,
                    a if a == KeyGenAlgo::X25519 as u8 => KeyGenAlgo::X25519,
                    _ => return Err(ErrorCode::BadArgs),
                };
                let (material, public) = sim_crypto::key_gen(algo)?;

                let full_id = if key_id_bits(req.key_id) == 0 {
                    self.keystore.unique_id(KEY_TYPE_CRYPTO, client_id)?
                } else {
                    make_key_id(KEY_TYPE_CRYPTO, client_id, req.key_id)
                };
                let label_len = (req.label_len as usize).min(NVM_LABEL_LEN);
                let mut label = [0u8; NVM_LABEL_LEN];
                label[..label_len].copy_from_slice(&req.label[..label_len]);
                let meta = KeyMeta {
                    id: full_id,
                    flags: req.flags,
                    len: material.len() as u32,
                    label,
                };
                self.keystore.cache_key(meta, &material)?;

                let resp = CryptoKeyGenResponse {
                    key_id: key_id_bits(full_id),
                    reserved: 0,
                    pub_len: public.len() as u32,
                };
                write_packet(out, 0, &resp, &public).map_err(|_| ErrorCode::Aborted)
            }
            _ => Err(ErrorCode::BadArgs),
        }
    }

    fn read_client_key(
        &mut self,
        client_id: u32,
        key_id: u16,
    ) -> Result<(KeyMeta, Vec<u8>), ErrorCode> {
        self.keystore
            .read_key(make_key_id(KEY_TYPE_CRYPTO, client_id, key_id))
    }
}
