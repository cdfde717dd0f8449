// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loopback device: a transport that dispatches straight into a shared
//! simulator.
//!
//! `send` runs the request through the server synchronously and queues
//! the response; `recv` pops it. Several devices may share one server,
//! each modeling a distinct client connection against the same keystore.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use veilhsm_transport::Transport;
use veilhsm_transport::TransportError;
use veilhsm_wire::COMM_MTU;

use crate::SimServer;
use crate::SimServerConfig;

/// Creates a server that loopback devices can share.
pub fn shared_server(config: SimServerConfig) -> Arc<Mutex<SimServer>> {
    Arc::new(Mutex::new(SimServer::new(config)))
}

/// In-process loopback transport bound to a shared simulator.
pub struct SimDevice {
    server: Arc<Mutex<SimServer>>,
    pending: VecDeque<Vec<u8>>,
}

impl SimDevice {
    /// Opens a device against `server`.
    pub fn new(server: Arc<Mutex<SimServer>>) -> Self {
        Self {
            server,
            pending: VecDeque::new(),
        }
    }
}

impl Transport for SimDevice {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > COMM_MTU {
            return Err(TransportError::TooLarge {
                len: frame.len(),
                mtu: COMM_MTU,
            });
        }
        if let Some(resp) = self.server.lock().handle_frame(frame) {
            self.pending.push_back(resp);
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let need = match self.pending.front() {
            Some(frame) => frame.len(),
            None => return Err(TransportError::NotReady),
        };
        if buf.len() < need {
            return Err(TransportError::BufferTooSmall {
                need,
                have: buf.len(),
            });
        }
        if let Some(frame) = self.pending.pop_front() {
            buf[..frame.len()].copy_from_slice(&frame);
            return Ok(frame.len());
        }
        Err(TransportError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;
    use veilhsm_wire::read_message;
    use veilhsm_wire::CommAction;
    use veilhsm_wire::CommInitRequest;
    use veilhsm_wire::CommInitResponse;
    use veilhsm_wire::FrameHeader;
    use veilhsm_wire::Group;
    use zerocopy::FromBytes;
    use zerocopy::IntoBytes;

    use super::*;

    #[test]
    fn send_queues_a_response_for_recv() {
        let server = shared_server(SimServerConfig { server_id: 5 });
        let mut device = SimDevice::new(server);

        let mut buf = [0u8; COMM_MTU];
        assert_eq!(device.recv(&mut buf), Err(TransportError::NotReady));

        let req = CommInitRequest { client_id: 2 };
        let header = FrameHeader::new(Group::Comm.kind(CommAction::Init as u8), 1, 2, 4);
        let mut frame = Vec::new();
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(req.as_bytes());
        device.send(&frame).unwrap();

        let n = device.recv(&mut buf).unwrap();
        let (_, payload) = FrameHeader::ref_from_prefix(&buf[..n]).unwrap();
        let (resp, _) = read_message::<CommInitResponse>(payload).unwrap();
        assert_eq!({ resp.server_id }, 5);
    }
}
