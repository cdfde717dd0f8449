// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Server keystore: a fixed set of RAM cache slots in front of the NVM
//! object store.
//!
//! Full key ids compose `(type, user, id)` where `user` is the low
//! nibble of the owning client id; cache entries are therefore
//! partitioned per client while the numeric id the client sees stays in
//! the low byte.

use veilhsm_wire::ErrorCode;
use veilhsm_wire::KeyCacheRequest;
use veilhsm_wire::COMM_DATA_LEN;
use veilhsm_wire::NVM_LABEL_LEN;
use veilhsm_wire::PACKET_STUB_LEN;
use zeroize::Zeroize;

use crate::nvm::NvmStore;

pub(crate) const KEY_TYPE_CRYPTO: u16 = 0x1000;

const KEY_ID_MASK: u16 = 0x00FF;
const KEY_USER_MASK: u16 = 0x0F00;
const KEY_TYPE_MASK: u16 = 0xF000;

pub(crate) const KEY_ID_MAX: u16 = 0x00FF;

/// RAM cache slots available per server.
pub(crate) const CACHE_SLOT_COUNT: usize = 8;

/// Largest key material one cache request frame can carry.
pub(crate) const MAX_KEY_LEN: usize =
    COMM_DATA_LEN - PACKET_STUB_LEN - core::mem::size_of::<KeyCacheRequest>();

pub(crate) fn make_key_id(typ: u16, user: u32, id: u16) -> u16 {
    (typ & KEY_TYPE_MASK) | (((user as u16) << 8) & KEY_USER_MASK) | (id & KEY_ID_MASK)
}

pub(crate) fn key_id_bits(full_id: u16) -> u16 {
    full_id & KEY_ID_MASK
}

/// Metadata stored with every key object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeyMeta {
    pub id: u16,
    pub flags: u32,
    pub len: u32,
    pub label: [u8; NVM_LABEL_LEN],
}

struct CacheSlot {
    meta: KeyMeta,
    committed: bool,
    buffer: Vec<u8>,
}

impl CacheSlot {
    fn empty() -> Self {
        Self {
            meta: KeyMeta {
                id: 0,
                flags: 0,
                len: 0,
                label: [0; NVM_LABEL_LEN],
            },
            committed: false,
            buffer: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.buffer.zeroize();
        *self = Self::empty();
    }
}

pub(crate) struct Keystore {
    slots: Vec<CacheSlot>,
    pub(crate) nvm: NvmStore,
}

impl Keystore {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..CACHE_SLOT_COUNT).map(|_| CacheSlot::empty()).collect(),
            nvm: NvmStore::default(),
        }
    }

    /// Finds an id in `(type, user)` scope that names neither a cached
    /// nor a persistent object, searching down from the top.
    pub(crate) fn unique_id(&self, typ: u16, user: u32) -> Result<u16, ErrorCode> {
        for id in (1..=KEY_ID_MAX).rev() {
            let candidate = make_key_id(typ, user, id);
            let cached = self.slots.iter().any(|s| s.meta.id == candidate);
            if !cached && self.nvm.get_meta(candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(ErrorCode::NoSpace)
    }

    /// Installs key material in a cache slot: an empty slot, the slot
    /// already holding this id, or a committed slot that can be
    /// reclaimed (its material survives in NVM).
    pub(crate) fn cache_key(&mut self, meta: KeyMeta, data: &[u8]) -> Result<(), ErrorCode> {
        if meta.id == 0 || data.len() > MAX_KEY_LEN || data.len() != meta.len as usize {
            return Err(ErrorCode::BadArgs);
        }

        let index = self
            .slots
            .iter()
            .position(|s| s.meta.id == 0 || s.meta.id == meta.id)
            .or_else(|| self.slots.iter().position(|s| s.committed));
        let Some(index) = index else {
            return Err(ErrorCode::NoSpace);
        };

        let slot = &mut self.slots[index];
        slot.clear();
        slot.meta = meta;
        slot.buffer = data.to_vec();
        slot.committed = self.nvm.get_meta(meta.id).is_some();
        Ok(())
    }

    /// Reads a key from the cache, falling back to NVM and freshening
    /// the cache on a persistent hit.
    pub(crate) fn read_key(&mut self, full_id: u16) -> Result<(KeyMeta, Vec<u8>), ErrorCode> {
        if key_id_bits(full_id) == 0 {
            return Err(ErrorCode::BadArgs);
        }
        if let Some(slot) = self.slots.iter().find(|s| s.meta.id == full_id) {
            return Ok((slot.meta, slot.buffer.clone()));
        }
        let (meta, data) = self
            .nvm
            .read(full_id)
            .map(|(meta, data)| (*meta, data.to_vec()))
            .ok_or(ErrorCode::NotFound)?;
        // Freshen: only committed slots get reclaimed, so this cannot
        // push out uncommitted material.
        let _ = self.cache_key(meta, &data);
        Ok((meta, data))
    }

    pub(crate) fn evict(&mut self, full_id: u16) -> Result<(), ErrorCode> {
        if key_id_bits(full_id) == 0 {
            return Err(ErrorCode::BadArgs);
        }
        match self.slots.iter_mut().find(|s| s.meta.id == full_id) {
            Some(slot) => {
                slot.clear();
                Ok(())
            }
            None => Err(ErrorCode::NotFound),
        }
    }

    pub(crate) fn commit(&mut self, full_id: u16) -> Result<(), ErrorCode> {
        if key_id_bits(full_id) == 0 {
            return Err(ErrorCode::BadArgs);
        }
        match self.slots.iter_mut().find(|s| s.meta.id == full_id) {
            Some(slot) => {
                self.nvm.add_object(slot.meta, &slot.buffer);
                slot.committed = true;
                Ok(())
            }
            None => Err(ErrorCode::NotFound),
        }
    }

    pub(crate) fn erase(&mut self, full_id: u16) -> Result<(), ErrorCode> {
        if key_id_bits(full_id) == 0 {
            return Err(ErrorCode::BadArgs);
        }
        let _ = self.evict(full_id);
        self.nvm.destroy(full_id)
    }

    /// Drops all uncommitted cache entries owned by `user`; called on
    /// connection close.
    pub(crate) fn drop_uncommitted_for_user(&mut self, user: u32) {
        let user_bits = ((user as u16) << 8) & KEY_USER_MASK;
        for slot in &mut self.slots {
            if slot.meta.id != 0 && (slot.meta.id & KEY_USER_MASK) == user_bits && !slot.committed
            {
                slot.clear();
            }
        }
    }
}
