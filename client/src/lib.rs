// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! veilhsm client: the protocol driver that multiplexes key-management
//! and cryptographic operations over a framed packet channel to an HSM
//! server.
//!
//! One [`Client`] owns one connection. Control flow is strictly
//! request → response with a single outstanding exchange; every typed
//! operation comes as a request/response pair plus a convenience form
//! that busy-retries over not-ready. The [`provider`] module adds key
//! objects whose operations offload transparently to cached HSM keys.

mod comm;
mod context;
mod crypto;
mod error;
mod key;
pub mod provider;

pub use comm::CommClient;
pub use comm::CommClientConfig;
pub use context::Client;
pub use context::ClientConfig;
pub use context::CryptoConfig;
pub use crypto::GeneratedKey;
pub use error::ClientError;
pub use error::Result;
pub use key::KeyExport;
