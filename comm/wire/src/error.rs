// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Status codes carried in the packet stub and marshalling faults.

use thiserror::Error;

/// Server status codes with stable negative wire identities.
///
/// The numeric values are part of the wire contract: the server writes
/// them into the packet stub `rc` field and the client surfaces them
/// verbatim.
#[repr(i32)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed input; no side effects. Fix the arguments and retry.
    #[error("bad arguments")]
    BadArgs = -400,

    /// Nothing failed; the operation would block. Retry.
    #[error("not ready")]
    NotReady = -401,

    /// The exchange has fatally failed and is lost.
    #[error("aborted")]
    Aborted = -402,

    /// Operation was canceled.
    #[error("canceled")]
    Cancel = -403,

    /// Cancel arrived after the operation completed.
    #[error("cancel processed too late")]
    CancelLate = -404,

    /// Rejected due to concurrent access; unlock and retry.
    #[error("locked")]
    Locked = -410,

    /// Caller lacks access to the referenced object.
    #[error("access denied")]
    Access = -411,

    /// Backing store contents do not match.
    #[error("not verified")]
    NotVerified = -412,

    /// Target area is not blank.
    #[error("not blank")]
    NotBlank = -413,

    /// The referenced key or slot does not exist.
    #[error("not found")]
    NotFound = -414,

    /// No space left for the object.
    #[error("no space")]
    NoSpace = -415,

    /// No handler registered for the requested custom callback.
    #[error("no handler registered")]
    NoHandler = -420,
}

impl ErrorCode {
    /// The wire representation of this code.
    pub fn to_rc(self) -> i32 {
        self as i32
    }

    /// Maps a stub `rc` back to a known code. Zero and unknown values
    /// return `None`; unknown nonzero codes must still be surfaced
    /// verbatim by the caller.
    pub fn from_rc(rc: i32) -> Option<ErrorCode> {
        match rc {
            -400 => Some(ErrorCode::BadArgs),
            -401 => Some(ErrorCode::NotReady),
            -402 => Some(ErrorCode::Aborted),
            -403 => Some(ErrorCode::Cancel),
            -404 => Some(ErrorCode::CancelLate),
            -410 => Some(ErrorCode::Locked),
            -411 => Some(ErrorCode::Access),
            -412 => Some(ErrorCode::NotVerified),
            -413 => Some(ErrorCode::NotBlank),
            -414 => Some(ErrorCode::NotFound),
            -415 => Some(ErrorCode::NoSpace),
            -420 => Some(ErrorCode::NoHandler),
            _ => None,
        }
    }
}

/// Faults raised while building or parsing wire messages.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The buffer is too short for the fixed part of the message.
    #[error("buffer too short: need {need} bytes, have {have}")]
    TooShort {
        /// Bytes required by the fixed layout.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// The assembled packet would exceed the frame payload limit.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    Overflow {
        /// Requested payload length.
        len: usize,
        /// Maximum payload length.
        max: usize,
    },

    /// The kind field does not name a known (group, action) pair.
    #[error("unknown message kind {0:#06x}")]
    BadKind(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_values_are_stable() {
        assert_eq!(ErrorCode::BadArgs.to_rc(), -400);
        assert_eq!(ErrorCode::NotFound.to_rc(), -414);
        assert_eq!(ErrorCode::NoHandler.to_rc(), -420);
    }

    #[test]
    fn rc_round_trip() {
        for rc in -430..0 {
            if let Some(code) = ErrorCode::from_rc(rc) {
                assert_eq!(code.to_rc(), rc);
            }
        }
        assert_eq!(ErrorCode::from_rc(0), None);
        assert_eq!(ErrorCode::from_rc(-1), None);
    }
}
