// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Transport abstraction for the veilhsm packet channel.
//!
//! A transport moves opaque byte frames of bounded length between one
//! client and one server endpoint. Both directions are non-blocking:
//! `NotReady` means "try again, nothing failed" and is the only status
//! the upper layers retry on.

mod mem;

pub use mem::channel_pair;
pub use mem::MemTransport;

use thiserror::Error;

/// Transport failure statuses.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The channel cannot make progress right now; retry.
    #[error("transport not ready")]
    NotReady,

    /// The frame exceeds the channel MTU.
    #[error("frame of {len} bytes exceeds the {mtu}-byte MTU")]
    TooLarge {
        /// Offered frame length.
        len: usize,
        /// Channel MTU.
        mtu: usize,
    },

    /// The receive buffer is smaller than the pending frame.
    #[error("receive buffer of {have} bytes cannot hold a {need}-byte frame")]
    BufferTooSmall {
        /// Pending frame length.
        need: usize,
        /// Caller buffer length.
        have: usize,
    },

    /// The peer endpoint has been torn down.
    #[error("transport disconnected")]
    Disconnected,
}

/// Non-blocking framed channel endpoint.
///
/// The send/recv pair is the Rust rendition of the reference's
/// vtable-of-callbacks transport binding; the communication layer holds
/// the endpoint as a `Box<dyn Transport>`.
pub trait Transport: Send {
    /// Queues one frame for the peer. `NotReady` when the channel is
    /// backed up.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receives one whole frame into `buf`, returning its length.
    /// `NotReady` when no frame is pending.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Best-effort teardown; the default does nothing.
    fn cleanup(&mut self) {}
}
