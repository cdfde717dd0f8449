// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client-side error type.

use thiserror::Error;
use veilhsm_transport::TransportError;
use veilhsm_wire::ErrorCode;
use veilhsm_wire::WireError;

/// Client Result
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the protocol driver.
///
/// Server-side statuses arrive as the packet stub `rc` and are surfaced
/// verbatim: known codes as [`ClientError::Device`], anything else as
/// [`ClientError::DeviceRc`]. Transport errors propagate untouched.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Null-equivalent, out-of-range, or malformed input. No side effects.
    #[error("bad arguments")]
    BadArgs,

    /// The operation would block; retry.
    #[error("not ready, retry")]
    NotReady,

    /// Header, id, or size mismatch, or an undersized output buffer.
    /// The exchange is lost.
    #[error("exchange aborted")]
    Aborted,

    /// A send was attempted while another exchange is outstanding.
    #[error("a request is already outstanding on this context")]
    RequestPending,

    /// Another context already holds the crypto provider registration.
    #[error("crypto device {0:#010x} is already registered")]
    DeviceBusy(u32),

    /// Known server status carried in the packet stub.
    #[error("device error: {0}")]
    Device(ErrorCode),

    /// Unrecognized nonzero server status, passed through verbatim.
    #[error("device error rc={0}")]
    DeviceRc(i32),

    /// Transport failure, propagated untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Marshalling fault.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Host crypto library failure.
    #[error("crypto backend error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl ClientError {
    /// Whether this status means "retry the same call".
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            ClientError::NotReady | ClientError::Transport(TransportError::NotReady)
        )
    }

    /// Converts a nonzero stub `rc` into the matching error.
    pub fn from_rc(rc: i32) -> ClientError {
        match ErrorCode::from_rc(rc) {
            Some(code) => ClientError::Device(code),
            None => ClientError::DeviceRc(rc),
        }
    }

    /// The stub code carried by this error, when it is a device status.
    pub fn device_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Device(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_rc_maps_to_device_error() {
        let err = ClientError::from_rc(-414);
        assert_eq!(err.device_code(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn unknown_rc_passes_through_verbatim() {
        match ClientError::from_rc(-9999) {
            ClientError::DeviceRc(rc) => assert_eq!(rc, -9999),
            other => panic!("unexpected {other:?}"),
        }
    }
}
