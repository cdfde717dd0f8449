// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory stand-in for the persistent NVM object store.

use std::collections::HashMap;

use veilhsm_wire::ErrorCode;
use zeroize::Zeroize;

use crate::keystore::KeyMeta;

#[derive(Default)]
pub(crate) struct NvmStore {
    objects: HashMap<u16, (KeyMeta, Vec<u8>)>,
}

impl NvmStore {
    /// Adds or replaces the object named by `meta.id`.
    pub(crate) fn add_object(&mut self, meta: KeyMeta, data: &[u8]) {
        if let Some((_, mut old)) = self.objects.insert(meta.id, (meta, data.to_vec())) {
            old.zeroize();
        }
    }

    pub(crate) fn get_meta(&self, id: u16) -> Option<&KeyMeta> {
        self.objects.get(&id).map(|(meta, _)| meta)
    }

    pub(crate) fn read(&self, id: u16) -> Option<(&KeyMeta, &[u8])> {
        self.objects
            .get(&id)
            .map(|(meta, data)| (meta, data.as_slice()))
    }

    pub(crate) fn destroy(&mut self, id: u16) -> Result<(), ErrorCode> {
        match self.objects.remove(&id) {
            Some((_, mut data)) => {
                data.zeroize();
                Ok(())
            }
            None => Err(ErrorCode::NotFound),
        }
    }

    pub(crate) fn free_estimate(&self) -> u32 {
        let used: usize = self.objects.values().map(|(_, data)| data.len()).sum();
        (64 * 1024usize).saturating_sub(used) as u32
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    fn meta(id: u16, len: u32) -> KeyMeta {
        KeyMeta {
            id,
            flags: 0,
            len,
            label: [0; veilhsm_wire::NVM_LABEL_LEN],
        }
    }

    #[test]
    fn objects_replace_in_place() {
        let mut nvm = NvmStore::default();
        nvm.add_object(meta(0x1101, 3), &[1, 2, 3]);
        nvm.add_object(meta(0x1101, 2), &[9, 9]);
        let (m, data) = nvm.read(0x1101).unwrap();
        assert_eq!(m.len, 2);
        assert_eq!(data, &[9, 9]);
    }

    #[test]
    fn destroy_is_terminal() {
        let mut nvm = NvmStore::default();
        nvm.add_object(meta(0x1101, 1), &[1]);
        nvm.destroy(0x1101).unwrap();
        assert!(nvm.read(0x1101).is_none());
        assert_eq!(nvm.destroy(0x1101), Err(ErrorCode::NotFound));
    }
}
