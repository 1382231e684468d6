//! Fixed geometry constants for the LUKS1 on-disk format.

/// Size in bytes of the fixed 4 KiB header that precedes the key slots.
pub const HEADER_SIZE: usize = 4096;

/// All LUKS1 I/O is sector-addressed at this granularity.
pub const SECTOR_SIZE: usize = 512;

/// Number of key slots in a LUKS1 header.
pub const NUM_KEY_SLOTS: usize = 8;

/// Magic value marking a key slot as active (`LUKS_KEY_ENABLED` upstream).
pub const KEY_SLOT_ACTIVE: u32 = 0x00AC_71F3;

/// Upper bound on any single allocation driven by on-disk fields (key
/// material buffers, passphrases). Not part of the wire format; chosen as a
/// generous sanity bound so a corrupt `stripes` or `master_key_size` field
/// cannot be used to force an unbounded allocation.
pub const MAX_ALLOC: usize = 64 * 1024 * 1024;

/// Length in bytes of the master-key validation hash, regardless of which
/// hash algorithm produced it — PBKDF2 output is simply truncated/extended
/// to this length at the two validation call sites.
pub const MK_DIGEST_SIZE: usize = 20;
