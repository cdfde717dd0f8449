// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Communication layer: frame header handling over a raw transport.
//!
//! `CommClient` owns the transport endpoint, the client identity, and
//! the request sequence counter. It frames payloads and parses response
//! headers; matching a response to the outstanding request is the
//! protocol driver's job, not this layer's.

use veilhsm_transport::Transport;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

use veilhsm_wire::FrameHeader;
use veilhsm_wire::COMM_DATA_LEN;
use veilhsm_wire::COMM_HEADER_LEN;
use veilhsm_wire::COMM_MTU;

use crate::ClientError;
use crate::Result;

/// Communication layer configuration.
pub struct CommClientConfig {
    /// Connected transport endpoint.
    pub transport: Box<dyn Transport>,

    /// Identity carried in every request header.
    pub client_id: u32,
}

/// Client end of the framed request/response channel.
pub struct CommClient {
    transport: Box<dyn Transport>,
    client_id: u32,
    seq: u16,
    frame: Box<[u8; COMM_MTU]>,
}

impl CommClient {
    /// Builds the layer over a connected transport.
    pub fn new(config: CommClientConfig) -> Self {
        Self {
            transport: config.transport,
            client_id: config.client_id,
            seq: 0,
            frame: Box::new([0u8; COMM_MTU]),
        }
    }

    /// Identity carried in request headers.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Payload scratch area; operations marshal packets here before
    /// sending and read responses from here after receiving.
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.frame[COMM_HEADER_LEN..]
    }

    /// Read view of the payload scratch area.
    pub(crate) fn data(&self) -> &[u8] {
        &self.frame[COMM_HEADER_LEN..]
    }

    /// Frames the first `size` payload bytes under `kind` and sends them.
    ///
    /// On success the assigned request sequence number is returned.
    /// Sequence numbers wrap at 16 bits; adjacent requests never share
    /// one. `NotReady` leaves the counter and payload untouched so the
    /// caller can retry the same call.
    pub fn send_request(&mut self, magic: u16, kind: u16, size: u16) -> Result<u16> {
        if size as usize > COMM_DATA_LEN {
            return Err(ClientError::BadArgs);
        }
        let seq = self.seq.wrapping_add(1);
        let mut header = FrameHeader::new(kind, seq, self.client_id, size);
        header.magic = magic;
        self.frame[..COMM_HEADER_LEN].copy_from_slice(header.as_bytes());

        let total = COMM_HEADER_LEN + size as usize;
        self.transport.send(&self.frame[..total])?;
        self.seq = seq;
        Ok(seq)
    }

    /// Receives one frame and returns its parsed header; the payload is
    /// left in the scratch area, truncated to `header.size`.
    pub fn recv_response(&mut self) -> Result<FrameHeader> {
        let n = self.transport.recv(&mut self.frame[..])?;
        if n < COMM_HEADER_LEN {
            tracing::warn!(len = n, "runt frame dropped");
            return Err(ClientError::Aborted);
        }
        let (header, payload) = FrameHeader::ref_from_prefix(&self.frame[..n])
            .map_err(|_| ClientError::Aborted)?;
        let header = *header;
        if header.size as usize > payload.len() {
            tracing::warn!(
                size = { header.size },
                payload = payload.len(),
                "frame shorter than its declared payload"
            );
            return Err(ClientError::Aborted);
        }
        Ok(header)
    }

    /// Resets the sequence counter after a confirmed close.
    pub(crate) fn reset(&mut self) {
        self.seq = 0;
    }

    /// Best-effort transport teardown; zeroes the scratch state.
    pub fn cleanup(&mut self) {
        self.transport.cleanup();
        self.frame.fill(0);
        self.seq = 0;
    }
}
