//! C6 — sector cache: presents the encrypted payload as a decrypted virtual
//! byte range, backed by a bounded LRU of whole decrypted sectors.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::consts::SECTOR_SIZE;
use crate::device::BackingDevice;
use crate::error::{Error, Result};
use crate::sector::{decrypt_sector, SectorCrypt};

struct Inner {
    lru: LruCache<u64, Arc<[u8; SECTOR_SIZE]>>,
    crypt: SectorCrypt,
}

/// Decrypted-sector cache for one volume's payload. Guards the LRU and the
/// keyed cipher behind a single mutex — both must move together, since a
/// cache miss calls into the cipher with the decrypted sector landing
/// straight in the cache entry it just created.
pub struct SectorCache {
    inner: Mutex<Inner>,
    payload_base_offset: u64,
}

impl SectorCache {
    pub fn new(crypt: SectorCrypt, capacity: usize, payload_base_offset: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        SectorCache {
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                crypt,
            }),
            payload_base_offset,
        }
    }

    /// Fetch the decrypted 512-byte sector covering `payload_relative_offset`,
    /// decrypting and inserting into the cache on a miss. The offset is
    /// rounded down to a sector boundary internally.
    pub fn get_sector(
        &self,
        device: &dyn BackingDevice,
        payload_relative_offset: u64,
    ) -> Result<Arc<[u8; SECTOR_SIZE]>> {
        let aligned = payload_relative_offset - (payload_relative_offset % SECTOR_SIZE as u64);
        let sector_number = aligned / SECTOR_SIZE as u64;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sector) = inner.lru.get(&sector_number) {
            return Ok(sector.clone());
        }

        tracing::debug!(sector_number, "sector cache miss");
        let mut buf = [0u8; SECTOR_SIZE];
        let device_offset = self.payload_base_offset + aligned;
        let n = device.read_at(device_offset, &mut buf)?;
        if n != SECTOR_SIZE {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read fetching payload sector",
            )));
        }
        decrypt_sector(&mut inner.crypt, sector_number, &mut buf)?;

        let sector = Arc::new(buf);
        inner.lru.put(sector_number, sector.clone());
        Ok(sector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EncryptionContext;
    use crate::device::test_fixture::MemDevice;
    use crate::header::{Chaining, Cipher, HashAlg, IvMode};

    fn plain_cbc_device(plaintext_sectors: &[[u8; SECTOR_SIZE]], key: &[u8; 32]) -> MemDevice {
        use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
        let mut data = Vec::new();
        for sector in plaintext_sectors {
            let mut ct = *sector;
            type Enc = cbc::Encryptor<aes::Aes256>;
            let mut enc = Enc::new(GenericArray::from_slice(key), &GenericArray::from([0u8; 16]));
            for block in ct.chunks_mut(16) {
                let mut b = GenericArray::clone_from_slice(block);
                enc.encrypt_block_mut(&mut b);
                block.copy_from_slice(&b);
            }
            data.extend_from_slice(&ct);
        }
        MemDevice::new(data)
    }

    #[test]
    fn cache_hit_returns_same_bytes_without_rereading() {
        let key = [0x77u8; 32];
        let sector0 = [0xAAu8; SECTOR_SIZE];
        let sector1 = [0xBBu8; SECTOR_SIZE];
        let device = plain_cbc_device(&[sector0, sector1], &key);

        let ctx = EncryptionContext::new(Cipher::Aes, Chaining::Cbc, IvMode::Null, &key).unwrap();
        let crypt = SectorCrypt::BlockMode(ctx);
        let cache = SectorCache::new(crypt, 4, 0);

        let a = cache.get_sector(&device, 0).unwrap();
        let b = cache.get_sector(&device, 0).unwrap();
        assert_eq!(&a[..], &sector0[..]);
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.get_sector(&device, 512).unwrap();
        assert_eq!(&c[..], &sector1[..]);
    }

    #[test]
    fn offset_within_a_sector_rounds_down() {
        let key = [0x11u8; 32];
        let sector0 = [0x55u8; SECTOR_SIZE];
        let device = plain_cbc_device(&[sector0], &key);
        let ctx = EncryptionContext::new(Cipher::Aes, Chaining::Cbc, IvMode::Null, &key).unwrap();
        let crypt = SectorCrypt::BlockMode(ctx);
        let cache = SectorCache::new(crypt, 4, 0);

        let sector = cache.get_sector(&device, 300).unwrap();
        assert_eq!(&sector[..], &sector0[..]);
    }
}
