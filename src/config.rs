//! A4 — tunables for an opened `Volume`.

/// Configuration for [`crate::volume::Volume::open`].
#[derive(Debug, Clone, Copy)]
pub struct VolumeConfig {
    /// Number of decrypted sectors the payload cache holds at once.
    pub cache_sectors: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        VolumeConfig { cache_sectors: 256 }
    }
}
