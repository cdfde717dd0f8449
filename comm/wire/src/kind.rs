// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Message kind packing: `kind = (group << 8) | action`.

use crate::WireError;

/// Operation groups, each owning an 8-bit action space.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Connection management and diagnostics.
    Comm = 0x01,

    /// Key cache / NVM key management.
    Key = 0x02,

    /// Custom server callbacks; the action carries the callback id.
    Custom = 0x03,

    /// Offloaded cryptographic operations.
    Crypto = 0x04,

    /// Raw NVM object management. Reserved; no operations at this layer.
    Nvm = 0x05,
}

impl Group {
    /// Packs this group with an action code into a wire kind.
    pub fn kind(self, action: u8) -> u16 {
        ((self as u16) << 8) | action as u16
    }
}

impl TryFrom<u8> for Group {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Group::Comm),
            0x02 => Ok(Group::Key),
            0x03 => Ok(Group::Custom),
            0x04 => Ok(Group::Crypto),
            0x05 => Ok(Group::Nvm),
            _ => Err(WireError::BadKind((value as u16) << 8)),
        }
    }
}

/// Extracts the group byte of a packed kind.
pub fn kind_group(kind: u16) -> u8 {
    (kind >> 8) as u8
}

/// Extracts the action byte of a packed kind.
pub fn kind_action(kind: u16) -> u8 {
    (kind & 0xFF) as u8
}

/// Actions in the Comm group.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommAction {
    /// Establish identity with the server.
    Init = 0x01,

    /// Orderly disconnect.
    Close = 0x02,

    /// Length-preserving payload echo.
    Echo = 0x03,

    /// Server version and resource report.
    Info = 0x04,
}

/// Actions in the Key group.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Place key material into the server RAM cache.
    Cache = 0x01,

    /// Drop a cached entry.
    Evict = 0x02,

    /// Read back key material and label.
    Export = 0x03,

    /// Promote a cached entry to persistent storage.
    Commit = 0x04,

    /// Remove from cache and persistent storage.
    Erase = 0x05,
}

/// Actions in the Crypto group.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoAction {
    /// Random byte generation.
    Rng = 0x01,

    /// AES-CBC encrypt/decrypt with a cached key.
    AesCbc = 0x02,

    /// Raw RSA public/private function.
    RsaFunction = 0x03,

    /// ECDSA signature over a caller-supplied digest.
    EcdsaSign = 0x04,

    /// ECDSA signature verification.
    EcdsaVerify = 0x05,

    /// ECDH shared-secret agreement.
    Ecdh = 0x06,

    /// X25519 shared-secret agreement.
    X25519 = 0x07,

    /// Server-side key generation into a cache slot.
    KeyGen = 0x08,
}
