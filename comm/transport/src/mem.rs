// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process shared-memory transport.
//!
//! Two one-slot mailboxes model the reference's paired request/response
//! memory blocks: each slot carries a notify counter bumped by the
//! writer and a consumed counter advanced by the reader, so a slot holds
//! at most one frame and the writer sees backpressure as `NotReady`.

use std::sync::Arc;

use parking_lot::Mutex;
use veilhsm_wire::COMM_MTU;

use crate::Transport;
use crate::TransportError;

struct Slot {
    frame: Vec<u8>,
    len: usize,
    notify: u16,
    consumed: u16,
}

impl Slot {
    fn new(mtu: usize) -> Self {
        Self {
            frame: vec![0; mtu],
            len: 0,
            notify: 0,
            consumed: 0,
        }
    }

    fn write(&mut self, data: &[u8], mtu: usize) -> Result<(), TransportError> {
        if data.len() > mtu {
            return Err(TransportError::TooLarge {
                len: data.len(),
                mtu,
            });
        }
        if self.notify != self.consumed {
            // Previous frame not yet picked up.
            return Err(TransportError::NotReady);
        }
        self.frame[..data.len()].copy_from_slice(data);
        self.len = data.len();
        self.notify = self.notify.wrapping_add(1);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.notify == self.consumed {
            return Err(TransportError::NotReady);
        }
        if buf.len() < self.len {
            return Err(TransportError::BufferTooSmall {
                need: self.len,
                have: buf.len(),
            });
        }
        buf[..self.len].copy_from_slice(&self.frame[..self.len]);
        self.consumed = self.notify;
        Ok(self.len)
    }
}

struct Shared {
    request: Slot,
    response: Slot,
    mtu: usize,
    closed: bool,
}

/// One endpoint of an in-process framed channel.
///
/// The client endpoint writes requests and reads responses; the server
/// endpoint is the mirror image.
pub struct MemTransport {
    shared: Arc<Mutex<Shared>>,
    server_side: bool,
}

/// Creates a connected `(client, server)` endpoint pair with the default
/// `COMM_MTU`.
pub fn channel_pair() -> (MemTransport, MemTransport) {
    let shared = Arc::new(Mutex::new(Shared {
        request: Slot::new(COMM_MTU),
        response: Slot::new(COMM_MTU),
        mtu: COMM_MTU,
        closed: false,
    }));
    (
        MemTransport {
            shared: shared.clone(),
            server_side: false,
        },
        MemTransport {
            shared,
            server_side: true,
        },
    )
}

impl Transport for MemTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(TransportError::Disconnected);
        }
        let mtu = shared.mtu;
        if self.server_side {
            shared.response.write(frame, mtu)
        } else {
            shared.request.write(frame, mtu)
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(TransportError::Disconnected);
        }
        if self.server_side {
            shared.request.read(buf)
        } else {
            shared.response.read(buf)
        }
    }

    fn cleanup(&mut self) {
        tracing::debug!(server_side = self.server_side, "closing mem transport");
        self.shared.lock().closed = true;
    }
}
