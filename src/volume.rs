//! C8 — the public volume facade: a seekable, read-only byte stream over a
//! LUKS1 payload, gated behind the C7 unlock state machine.

use std::io::SeekFrom;
use std::sync::{Arc, RwLock};

use zeroize::Zeroizing;

use crate::cache::SectorCache;
use crate::config::VolumeConfig;
use crate::consts::{HEADER_SIZE, SECTOR_SIZE};
use crate::device::BackingDevice;
use crate::error::{Error, Result};
use crate::header::{Chaining, Cipher, VolumeHeader};
use crate::sector::build_crypt;
use crate::unlock;

enum Secret {
    Key(Zeroizing<Vec<u8>>),
    Password(Zeroizing<Vec<u8>>),
}

struct Unlocked {
    #[allow(dead_code)] // kept alive so its Drop zeroizes; never read after install
    master_key: Zeroizing<Vec<u8>>,
    cache: SectorCache,
}

/// Mutable facade state guarded by a single `RwLock`, per the concurrency
/// model: the current logical offset and the one-shot abort flag.
struct FacadeState {
    offset: u64,
    aborted: bool,
}

/// A single opened LUKS1 volume. `Locked` until [`Volume::unlock`] (or
/// [`Volume::try_unlock`]) succeeds; all sensitive key material is zeroized
/// on every failure path and on [`Volume::close`]/`Drop`.
pub struct Volume {
    device: Arc<dyn BackingDevice>,
    header: VolumeHeader,
    config: VolumeConfig,
    payload_base_offset: u64,
    payload_size: u64,
    pending_secret: RwLock<Option<Secret>>,
    unlocked: RwLock<Option<Unlocked>>,
    facade: RwLock<FacadeState>,
}

impl Volume {
    /// Read and parse the header from `device`, returning a `Locked` volume.
    pub fn open(device: Arc<dyn BackingDevice>, config: VolumeConfig) -> Result<Self> {
        let _span = tracing::info_span!("volume_open").entered();
        let mut header_buf = vec![0u8; HEADER_SIZE];
        let n = device.read_at(0, &mut header_buf)?;
        if n != HEADER_SIZE {
            return Err(Error::CorruptHeader("device is shorter than one header"));
        }
        let header = VolumeHeader::parse(&header_buf)?;
        let payload_base_offset = header.payload_offset();
        let device_size = device.size()?;
        let payload_size = device_size.saturating_sub(payload_base_offset);

        Ok(Volume {
            device,
            header,
            config,
            payload_base_offset,
            payload_size,
            pending_secret: RwLock::new(None),
            unlocked: RwLock::new(None),
            facade: RwLock::new(FacadeState {
                offset: 0,
                aborted: false,
            }),
        })
    }

    /// Stage a raw master key for the next [`Volume::unlock`] call.
    pub fn set_key(&self, key: &[u8]) -> Result<()> {
        if !matches!(key.len(), 16 | 32 | 64) {
            return Err(Error::InvalidKeySize(key.len()));
        }
        *self.pending_secret.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Secret::Key(Zeroizing::new(key.to_vec())));
        Ok(())
    }

    /// Stage a passphrase for the next [`Volume::unlock`] call.
    pub fn set_password(&self, password: &[u8]) -> Result<()> {
        *self.pending_secret.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Secret::Password(Zeroizing::new(password.to_vec())));
        Ok(())
    }

    /// Run the unlock state machine using the staged secret. Returns
    /// `Ok(())` once `Unlocked`; `Err(StillLocked)` if a staged password
    /// matched no active slot (the volume remains `Locked` and may be
    /// retried with a different secret).
    pub fn unlock(&self) -> Result<()> {
        if !self.is_locked() {
            return Ok(());
        }
        let secret = self
            .pending_secret
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let secret = secret
            .as_ref()
            .ok_or(Error::InvalidState("unlock called with no staged secret"))?;

        let _span = tracing::info_span!("try_unlock").entered();
        let master_key = match secret {
            Secret::Key(k) => unlock::unlock_with_key(&self.header, k)?,
            Secret::Password(p) => unlock::unlock_with_password(&self.header, &*self.device, p)?,
        };
        tracing::debug!("volume unlocked");

        let crypt = build_crypt(
            self.header.cipher,
            self.header.chaining,
            self.header.iv_mode,
            &master_key,
        )?;
        let cache = SectorCache::new(crypt, self.config.cache_sectors, self.payload_base_offset);

        *self.unlocked.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Unlocked { master_key, cache });
        Ok(())
    }

    /// Convenience: stage `secret` (same rules as `set_key`/`set_password`
    /// based on length) and unlock in one call.
    pub fn try_unlock(&self, secret: &[u8]) -> Result<()> {
        if matches!(secret.len(), 16 | 32 | 64) {
            self.set_key(secret)?;
        } else {
            self.set_password(secret)?;
        }
        self.unlock()
    }

    pub fn is_locked(&self) -> bool {
        self.unlocked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Plaintext payload size in bytes.
    pub fn size(&self) -> u64 {
        self.payload_size
    }

    pub fn encryption_method(&self) -> (Cipher, Chaining) {
        (self.header.cipher, self.header.chaining)
    }

    pub fn volume_identifier(&self) -> [u8; 16] {
        self.header.uuid
    }

    /// Update the logical read offset. Seeking past the end of the payload
    /// is permitted; subsequent reads return 0 bytes. A resulting negative
    /// offset fails without changing state.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut facade = self.facade.write().unwrap_or_else(|e| e.into_inner());
        let new_offset: i128 = match pos {
            SeekFrom::Start(o) => o as i128,
            SeekFrom::Current(d) => facade.offset as i128 + d as i128,
            SeekFrom::End(d) => self.payload_size as i128 + d as i128,
        };
        if new_offset < 0 {
            return Err(Error::InvalidState("seek resulted in a negative offset"));
        }
        facade.offset = new_offset as u64;
        Ok(facade.offset)
    }

    /// Read starting at the current offset, advancing it by the number of
    /// bytes returned. See §4.8 for the exact loop this follows.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let unlocked = self.unlocked.read().unwrap_or_else(|e| e.into_inner());
        let unlocked = unlocked
            .as_ref()
            .ok_or(Error::InvalidState("read before unlock"))?;

        let mut facade = self.facade.write().unwrap_or_else(|e| e.into_inner());
        let cur = facade.offset;
        if cur >= self.payload_size {
            return Ok(0);
        }
        let remaining_total = ((self.payload_size - cur).min(buf.len() as u64)) as usize;
        if remaining_total == 0 {
            return Ok(0);
        }

        let mut copied = 0usize;
        let mut cur_offset = cur;
        while copied < remaining_total {
            if facade.aborted {
                break;
            }
            let sector_off = cur_offset - (cur_offset % SECTOR_SIZE as u64);
            let in_sector = (cur_offset - sector_off) as usize;
            let sector = unlocked.cache.get_sector(&*self.device, sector_off)?;
            let take = (SECTOR_SIZE - in_sector).min(remaining_total - copied);
            buf[copied..copied + take].copy_from_slice(&sector[in_sector..in_sector + take]);
            copied += take;
            cur_offset += take as u64;
        }
        facade.offset = cur_offset;
        Ok(copied)
    }

    /// Equivalent to `seek(SeekFrom::Start(offset))` followed by `read(buf)`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        self.read(buf)
    }

    /// Set the one-shot abort flag; an in-flight `read` returns the bytes
    /// already copied, and all reads see the flag until `close`.
    pub fn signal_abort(&self) {
        self.facade.write().unwrap_or_else(|e| e.into_inner()).aborted = true;
    }

    /// Zeroize and drop all key material, returning the volume to `Locked`.
    pub fn close(&self) {
        *self.unlocked.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.pending_secret.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        self.close();
    }
}
