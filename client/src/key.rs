// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key management operations: cache, evict, export, commit, erase.
//!
//! Every operation is a request/response pair plus a convenience form
//! that busy-retries both halves over not-ready. Server statuses arrive
//! in the packet stub and are surfaced verbatim.

use veilhsm_wire::pack_label;
use veilhsm_wire::read_packet;
use veilhsm_wire::read_stub;
use veilhsm_wire::write_packet;
use veilhsm_wire::Group;
use veilhsm_wire::KeyAction;
use veilhsm_wire::KeyCacheRequest;
use veilhsm_wire::KeyCacheResponse;
use veilhsm_wire::KeyCommitRequest;
use veilhsm_wire::KeyEraseRequest;
use veilhsm_wire::KeyEvictRequest;
use veilhsm_wire::KeyExportRequest;
use veilhsm_wire::KeyExportResponse;
use veilhsm_wire::KeyId;
use veilhsm_wire::KEY_ID_ERASED;
use veilhsm_wire::NVM_LABEL_LEN;

use crate::context::retry;
use crate::Client;
use crate::ClientError;
use crate::Result;

/// Key material and label read back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExport {
    /// Raw key bytes.
    pub material: Vec<u8>,

    /// Label stored with the entry.
    pub label: [u8; NVM_LABEL_LEN],
}

impl Client {
    /// Sends a cache request for `material` at a specific slot id.
    ///
    /// `KEY_ID_ERASED` asks the server to allocate a fresh id. Labels
    /// longer than `NVM_LABEL_LEN` are truncated on the wire with the
    /// supplied length recorded, so the server truncates identically.
    pub fn key_cache_request_with_id(
        &mut self,
        flags: u32,
        label: &[u8],
        material: &[u8],
        key_id: KeyId,
    ) -> Result<()> {
        if material.is_empty() {
            return Err(ClientError::BadArgs);
        }
        let body = KeyCacheRequest {
            id: key_id,
            flags,
            len: material.len() as u32,
            label_len: label.len() as u32,
            label: pack_label(label),
        };
        let size = write_packet(self.data_mut(), 0, &body, material)
            .map_err(|_| ClientError::BadArgs)?;
        self.send_request(Group::Key, KeyAction::Cache as u8, size as u16)
    }

    /// Sends a cache request with a server-allocated id.
    pub fn key_cache_request(&mut self, flags: u32, label: &[u8], material: &[u8]) -> Result<()> {
        self.key_cache_request_with_id(flags, label, material, KEY_ID_ERASED)
    }

    /// Receives the cache response: the slot id actually used.
    pub fn key_cache_response(&mut self) -> Result<KeyId> {
        let (_, _, size) = self.recv_response()?;
        // Error responses carry the stub alone.
        let rc = read_stub(&self.data()[..size])?;
        if rc != 0 {
            return Err(ClientError::from_rc(rc));
        }
        let (_, body, _) = read_packet::<KeyCacheResponse>(&self.data()[..size])?;
        Ok(body.id)
    }

    /// Caches `material` under `key_id` (or a fresh id for
    /// `KEY_ID_ERASED`), returning the id actually used.
    pub fn key_cache(
        &mut self,
        flags: u32,
        label: &[u8],
        material: &[u8],
        key_id: KeyId,
    ) -> Result<KeyId> {
        retry(|| self.key_cache_request_with_id(flags, label, material, key_id))?;
        retry(|| self.key_cache_response())
    }

    /// Sends an evict request.
    pub fn key_evict_request(&mut self, key_id: KeyId) -> Result<()> {
        if key_id == KEY_ID_ERASED {
            return Err(ClientError::BadArgs);
        }
        let body = KeyEvictRequest { id: key_id };
        let size = write_packet(self.data_mut(), 0, &body, &[])?;
        self.send_request(Group::Key, KeyAction::Evict as u8, size as u16)
    }

    /// Receives the status-only evict response.
    pub fn key_evict_response(&mut self) -> Result<()> {
        let (_, _, size) = self.recv_response()?;
        let rc = read_stub(&self.data()[..size])?;
        if rc != 0 {
            return Err(ClientError::from_rc(rc));
        }
        Ok(())
    }

    /// Drops this client's cached entry at `key_id`.
    ///
    /// Evicting a slot owned by another client reports not-found.
    pub fn key_evict(&mut self, key_id: KeyId) -> Result<()> {
        retry(|| self.key_evict_request(key_id))?;
        retry(|| self.key_evict_response())
    }

    /// Sends an export request.
    pub fn key_export_request(&mut self, key_id: KeyId) -> Result<()> {
        if key_id == KEY_ID_ERASED {
            return Err(ClientError::BadArgs);
        }
        let body = KeyExportRequest { id: key_id };
        let size = write_packet(self.data_mut(), 0, &body, &[])?;
        self.send_request(Group::Key, KeyAction::Export as u8, size as u16)
    }

    /// Receives the export response as owned material and label.
    pub fn key_export_response(&mut self) -> Result<KeyExport> {
        let (_, _, size) = self.recv_response()?;
        // Error responses carry the stub alone.
        let rc = read_stub(&self.data()[..size])?;
        if rc != 0 {
            return Err(ClientError::from_rc(rc));
        }
        let (_, body, tail) = read_packet::<KeyExportResponse>(&self.data()[..size])?;
        let len = body.len as usize;
        if tail.len() < len {
            return Err(ClientError::Aborted);
        }
        Ok(KeyExport {
            material: tail[..len].to_vec(),
            label: body.label,
        })
    }

    /// Retrieves key material and label for `key_id`.
    pub fn key_export(&mut self, key_id: KeyId) -> Result<KeyExport> {
        retry(|| self.key_export_request(key_id))?;
        retry(|| self.key_export_response())
    }

    /// Retrieves only the material length for `key_id`, for callers
    /// sizing a buffer before `key_export_into`.
    pub fn key_export_len(&mut self, key_id: KeyId) -> Result<usize> {
        let export = self.key_export(key_id)?;
        Ok(export.material.len())
    }

    /// Retrieves key material into a caller buffer.
    ///
    /// A buffer smaller than the stored material aborts the result
    /// without partial output. Returns the number of bytes written and
    /// the stored label.
    pub fn key_export_into(
        &mut self,
        key_id: KeyId,
        out: &mut [u8],
    ) -> Result<(usize, [u8; NVM_LABEL_LEN])> {
        let export = self.key_export(key_id)?;
        if out.len() < export.material.len() {
            return Err(ClientError::Aborted);
        }
        out[..export.material.len()].copy_from_slice(&export.material);
        Ok((export.material.len(), export.label))
    }

    /// Sends a commit request.
    pub fn key_commit_request(&mut self, key_id: KeyId) -> Result<()> {
        if key_id == KEY_ID_ERASED {
            return Err(ClientError::BadArgs);
        }
        let body = KeyCommitRequest { id: key_id };
        let size = write_packet(self.data_mut(), 0, &body, &[])?;
        self.send_request(Group::Key, KeyAction::Commit as u8, size as u16)
    }

    /// Receives the status-only commit response.
    pub fn key_commit_response(&mut self) -> Result<()> {
        let (_, _, size) = self.recv_response()?;
        let rc = read_stub(&self.data()[..size])?;
        if rc != 0 {
            return Err(ClientError::from_rc(rc));
        }
        Ok(())
    }

    /// Promotes the cached entry at `key_id` to persistent storage.
    pub fn key_commit(&mut self, key_id: KeyId) -> Result<()> {
        retry(|| self.key_commit_request(key_id))?;
        retry(|| self.key_commit_response())
    }

    /// Sends an erase request.
    pub fn key_erase_request(&mut self, key_id: KeyId) -> Result<()> {
        if key_id == KEY_ID_ERASED {
            return Err(ClientError::BadArgs);
        }
        let body = KeyEraseRequest { id: key_id };
        let size = write_packet(self.data_mut(), 0, &body, &[])?;
        self.send_request(Group::Key, KeyAction::Erase as u8, size as u16)
    }

    /// Receives the status-only erase response.
    pub fn key_erase_response(&mut self) -> Result<()> {
        let (_, _, size) = self.recv_response()?;
        let rc = read_stub(&self.data()[..size])?;
        if rc != 0 {
            return Err(ClientError::from_rc(rc));
        }
        Ok(())
    }

    /// Removes `key_id` from both the cache and persistent storage;
    /// subsequent exports report not-found.
    pub fn key_erase(&mut self, key_id: KeyId) -> Result<()> {
        retry(|| self.key_erase_request(key_id))?;
        retry(|| self.key_erase_response())
    }
}
