// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Custom callback registry.

use veilhsm_wire::ErrorCode;
use veilhsm_wire::CUSTOM_CB_COUNT;
use veilhsm_wire::CUSTOM_DATA_LEN;

/// Server-side custom callback.
///
/// Receives the request kind discriminator and data block; returns the
/// response data or a status to report in `err`.
pub type CustomHandler =
    Box<dyn FnMut(u16, &[u8; CUSTOM_DATA_LEN]) -> Result<Vec<u8>, ErrorCode> + Send>;

pub(crate) struct CustomRegistry {
    handlers: Vec<Option<CustomHandler>>,
}

impl CustomRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handlers: (0..CUSTOM_CB_COUNT).map(|_| None).collect(),
        }
    }

    pub(crate) fn register(&mut self, id: u32, handler: CustomHandler) -> Result<(), ErrorCode> {
        let slot = self
            .handlers
            .get_mut(id as usize)
            .ok_or(ErrorCode::BadArgs)?;
        *slot = Some(handler);
        Ok(())
    }

    pub(crate) fn registered(&self, id: u32) -> bool {
        matches!(self.handlers.get(id as usize), Some(Some(_)))
    }

    pub(crate) fn invoke(
        &mut self,
        id: u32,
        kind: u16,
        data: &[u8; CUSTOM_DATA_LEN],
    ) -> Result<Vec<u8>, ErrorCode> {
        match self.handlers.get_mut(id as usize) {
            Some(Some(handler)) => handler(kind, data),
            Some(None) => Err(ErrorCode::NoHandler),
            None => Err(ErrorCode::BadArgs),
        }
    }
}
