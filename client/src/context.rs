// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Protocol driver: the client context and its request/response engine.

use veilhsm_wire::kind_action;
use veilhsm_wire::kind_group;
use veilhsm_wire::read_message;
use veilhsm_wire::write_message;
use veilhsm_wire::CommAction;
use veilhsm_wire::CommInfoResponse;
use veilhsm_wire::CommInitRequest;
use veilhsm_wire::CommInitResponse;
use veilhsm_wire::CommLenData;
use veilhsm_wire::CustomCbKind;
use veilhsm_wire::CustomCbRequest;
use veilhsm_wire::CustomCbResponse;
use veilhsm_wire::ErrorCode;
use veilhsm_wire::Group;
use veilhsm_wire::COMM_DATA_LEN;
use veilhsm_wire::CUSTOM_CB_COUNT;
use veilhsm_wire::MAGIC_NATIVE;

use crate::provider;
use crate::ClientError;
use crate::CommClient;
use crate::CommClientConfig;
use crate::Result;

/// Crypto provider bridge configuration.
pub struct CryptoConfig {
    /// Device id to register the provider under; one context per id.
    pub dev_id: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            dev_id: provider::DEV_ID,
        }
    }
}

/// Top-level client configuration.
pub struct ClientConfig {
    /// Communication layer configuration.
    pub comm: CommClientConfig,

    /// Enables the crypto provider bridge when set.
    pub crypto: Option<CryptoConfig>,
}

#[derive(Debug, Clone, Copy)]
struct Exchange {
    kind: u16,
    seq: u16,
}

/// Client context: one connection to an HSM server.
///
/// The context is single-threaded and cooperative: exactly one exchange
/// may be outstanding, and the only retried status is not-ready. The
/// convenience operations (`comm_init`, `echo`, the key ops, ...) wrap
/// their request/response halves in the canonical busy-retry loop;
/// callers that integrate with a scheduler use the halves directly.
pub struct Client {
    comm: CommClient,
    outstanding: Option<Exchange>,
    crypto_dev: Option<u32>,
}

/// Busy-retries `f` while it reports not-ready.
pub(crate) fn retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match f() {
            Err(err) if err.is_not_ready() => continue,
            other => return other,
        }
    }
}

impl Client {
    /// Initializes a context: communication layer first, then the
    /// optional crypto provider registration. Any sub-step failure
    /// tears down what was built and propagates the first error.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut client = Self {
            comm: CommClient::new(config.comm),
            outstanding: None,
            crypto_dev: None,
        };
        if let Some(crypto) = config.crypto {
            if let Err(err) = provider::register_device(crypto.dev_id, client.comm.client_id()) {
                client.cleanup();
                return Err(err);
            }
            client.crypto_dev = Some(crypto.dev_id);
        }
        tracing::debug!(
            client_id = client.comm.client_id(),
            crypto = client.crypto_dev.is_some(),
            "client context initialized"
        );
        Ok(client)
    }

    /// Best-effort teardown: releases the provider registration and the
    /// transport, and clears all exchange state. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(dev_id) = self.crypto_dev.take() {
            provider::unregister_device(dev_id, self.comm.client_id());
        }
        self.outstanding = None;
        self.comm.cleanup();
    }

    /// Identity of this context.
    pub fn client_id(&self) -> u32 {
        self.comm.client_id()
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.comm.data_mut()
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.comm.data()
    }

    /// Sends the first `size` scratch-area bytes as a `(group, action)`
    /// request and records the outstanding exchange.
    ///
    /// A second send while an exchange is pending is rejected with
    /// [`ClientError::RequestPending`].
    pub fn send_request(&mut self, group: Group, action: u8, size: u16) -> Result<()> {
        if self.outstanding.is_some() {
            return Err(ClientError::RequestPending);
        }
        let kind = group.kind(action);
        let seq = self.comm.send_request(MAGIC_NATIVE, kind, size)?;
        self.outstanding = Some(Exchange { kind, seq });
        Ok(())
    }

    /// Receives and validates the response to the outstanding exchange.
    ///
    /// A frame whose magic, kind, or sequence number does not match the
    /// recorded exchange is discarded and surfaces as
    /// [`ClientError::Aborted`]; either way the context returns to idle.
    /// Returns `(group, action, payload_len)`; the payload is in the
    /// scratch area.
    pub fn recv_response(&mut self) -> Result<(u8, u8, usize)> {
        let header = self.comm.recv_response()?;
        let expected = self.outstanding.take();

        let matches = expected.is_some_and(|e| {
            header.magic == MAGIC_NATIVE && { header.kind } == e.kind && { header.seq } == e.seq
        });
        if !matches {
            tracing::warn!(
                magic = { header.magic },
                kind = { header.kind },
                seq = { header.seq },
                "unexpected response discarded"
            );
            return Err(ClientError::Aborted);
        }
        Ok((
            kind_group(header.kind),
            kind_action(header.kind),
            header.size as usize,
        ))
    }

    /// Drains and discards any in-flight reply, leaving the context idle.
    ///
    /// Used after a caller abandons a pending `recv_response`, so a stale
    /// reply cannot collide with the next exchange.
    pub fn flush_pending(&mut self) -> Result<()> {
        if self.outstanding.is_none() {
            return Ok(());
        }
        match retry(|| self.comm.recv_response().map(|_| ())) {
            Ok(()) | Err(ClientError::Aborted) => {
                self.outstanding = None;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Sends the connection-init request carrying this client's id.
    pub fn comm_init_request(&mut self) -> Result<()> {
        let msg = CommInitRequest {
            client_id: self.comm.client_id(),
        };
        let size = write_message(self.comm.data_mut(), &msg, &[])?;
        self.send_request(Group::Comm, CommAction::Init as u8, size as u16)
    }

    /// Receives the init response: `(client_id, server_id)`.
    pub fn comm_init_response(&mut self) -> Result<(u32, u32)> {
        let (group, action, size) = self.recv_response()?;
        if group != Group::Comm as u8
            || action != CommAction::Init as u8
            || size != core::mem::size_of::<CommInitResponse>()
        {
            return Err(ClientError::Aborted);
        }
        let (msg, _) = read_message::<CommInitResponse>(&self.data()[..size])?;
        Ok((msg.client_id, msg.server_id))
    }

    /// Connection init, retried over not-ready.
    pub fn comm_init(&mut self) -> Result<(u32, u32)> {
        retry(|| self.comm_init_request())?;
        retry(|| self.comm_init_response())
    }

    /// Sends the close request (empty payload).
    pub fn comm_close_request(&mut self) -> Result<()> {
        self.send_request(Group::Comm, CommAction::Close as u8, 0)
    }

    /// Receives the close confirmation and resets the exchange and
    /// sequence state: the server has dropped this connection.
    pub fn comm_close_response(&mut self) -> Result<()> {
        let (group, action, _size) = self.recv_response()?;
        if group != Group::Comm as u8 || action != CommAction::Close as u8 {
            return Err(ClientError::Aborted);
        }
        self.comm.reset();
        Ok(())
    }

    /// Orderly disconnect, retried over not-ready.
    pub fn comm_close(&mut self) -> Result<()> {
        retry(|| self.comm_close_request())?;
        retry(|| self.comm_close_response())
    }

    /// Sends an echo request; payloads beyond `ECHO_MAX` are silently
    /// truncated.
    pub fn echo_request(&mut self, data: &[u8]) -> Result<()> {
        let msg = CommLenData::new(data);
        let size = write_message(self.comm.data_mut(), &msg, &[])?;
        self.send_request(Group::Comm, CommAction::Echo as u8, size as u16)
    }

    /// Receives the echoed bytes.
    pub fn echo_response(&mut self) -> Result<Vec<u8>> {
        let (group, action, size) = self.recv_response()?;
        if group != Group::Comm as u8
            || action != CommAction::Echo as u8
            || size != core::mem::size_of::<CommLenData>()
        {
            return Err(ClientError::Aborted);
        }
        let (msg, _) = read_message::<CommLenData>(&self.data()[..size])?;
        Ok(msg.payload().to_vec())
    }

    /// Round-trip echo, retried over not-ready.
    pub fn echo(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        retry(|| self.echo_request(data))?;
        retry(|| self.echo_response())
    }

    /// Sends the server-info request (empty payload).
    pub fn comm_info_request(&mut self) -> Result<()> {
        self.send_request(Group::Comm, CommAction::Info as u8, 0)
    }

    /// Receives the server version/build/resource report.
    pub fn comm_info_response(&mut self) -> Result<CommInfoResponse> {
        let (group, action, size) = self.recv_response()?;
        if group != Group::Comm as u8
            || action != CommAction::Info as u8
            || size != core::mem::size_of::<CommInfoResponse>()
        {
            return Err(ClientError::Aborted);
        }
        let (msg, _) = read_message::<CommInfoResponse>(&self.data()[..size])?;
        Ok(msg)
    }

    /// Server info probe, retried over not-ready.
    pub fn comm_info(&mut self) -> Result<CommInfoResponse> {
        retry(|| self.comm_info_request())?;
        retry(|| self.comm_info_response())
    }

    /// Sends a custom-callback request; the callback id rides as the
    /// action byte.
    pub fn custom_cb_request(&mut self, req: &CustomCbRequest) -> Result<()> {
        if { req.id } >= CUSTOM_CB_COUNT {
            return Err(ClientError::BadArgs);
        }
        let size = write_message(self.comm.data_mut(), req, &[])?;
        self.send_request(Group::Custom, { req.id } as u8, size as u16)
    }

    /// Receives a custom-callback response.
    pub fn custom_cb_response(&mut self) -> Result<CustomCbResponse> {
        let (group, action, size) = self.recv_response()?;
        if group != Group::Custom as u8
            || action as u32 >= CUSTOM_CB_COUNT
            || size != core::mem::size_of::<CustomCbResponse>()
        {
            return Err(ClientError::Aborted);
        }
        let (msg, _) = read_message::<CustomCbResponse>(&self.data()[..size])?;
        Ok(msg)
    }

    /// One custom-callback exchange, retried over not-ready.
    pub fn custom_cb(&mut self, req: &CustomCbRequest) -> Result<CustomCbResponse> {
        retry(|| self.custom_cb_request(req))?;
        retry(|| self.custom_cb_response())
    }

    /// Asks whether a handler is registered at `id`.
    ///
    /// Returns `true` when a handler is registered and `false` when the
    /// slot reports no-handler. Any other status from a query is fatal
    /// and surfaces as aborted.
    pub fn custom_cb_check_registered(&mut self, id: u32) -> Result<bool> {
        let req = CustomCbRequest::new(id, CustomCbKind::Query, &[]);
        let resp = self.custom_cb(&req)?;
        if { resp.kind } != CustomCbKind::Query as u16 {
            return Err(ClientError::Aborted);
        }
        match { resp.err } {
            0 => Ok(true),
            rc if ErrorCode::from_rc(rc) == Some(ErrorCode::NoHandler) => Ok(false),
            _ => Err(ClientError::Aborted),
        }
    }

    /// Invokes the handler registered at `id` with `data`.
    pub fn custom_cb_invoke(&mut self, id: u32, data: &[u8]) -> Result<CustomCbResponse> {
        let req = CustomCbRequest::new(id, CustomCbKind::Invoke, data);
        let resp = self.custom_cb(&req)?;
        if { resp.kind } != CustomCbKind::Invoke as u16 {
            return Err(ClientError::Aborted);
        }
        Ok(resp)
    }

    /// Upper bound on one packet's payload, for callers sizing bulk
    /// transfers.
    pub fn max_data_len(&self) -> usize {
        COMM_DATA_LEN
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cleanup();
    }
}
