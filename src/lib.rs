//! Read-only parser and decryption pipeline for LUKS1 encrypted volumes.
//!
//! Typical use:
//!
//! ```no_run
//! use std::sync::Arc;
//! use luksde::{BackingDevice, FileDevice, Volume, VolumeConfig};
//!
//! # fn run() -> luksde::Result<()> {
//! let device: Arc<dyn BackingDevice> = Arc::new(FileDevice::open("disk.img".as_ref())?);
//! let volume = Volume::open(device, VolumeConfig::default())?;
//! volume.try_unlock(b"correct horse battery staple")?;
//! let mut buf = vec![0u8; 4096];
//! volume.read_at(&mut buf, 0)?;
//! # Ok(())
//! # }
//! ```

mod af;
mod cache;
mod config;
mod consts;
mod context;
mod device;
mod error;
mod header;
mod kdf;
mod sector;
mod unlock;
mod volume;

pub use config::VolumeConfig;
pub use consts::{HEADER_SIZE, MAX_ALLOC, SECTOR_SIZE};
pub use device::{BackingDevice, FileDevice};
pub use error::{Error, Result};
pub use header::{Chaining, Cipher, HashAlg, IvMode, Luks2Diagnostics};
pub use volume::Volume;
