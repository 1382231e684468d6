//! C1 — on-disk header parsing (LUKS1 fully; LUKS2 far enough to recognize
//! it and report its fixed-size diagnostic fields — unlock itself rejects
//! v2 downstream since its cipher/keyslot metadata lives in an unparsed
//! JSON area).

use byteorder::{BigEndian, ByteOrder};
use zeroize::Zeroize;

use crate::consts::{HEADER_SIZE, KEY_SLOT_ACTIVE, NUM_KEY_SLOTS, SECTOR_SIZE};
use crate::error::{Error, Result};

const SIGNATURE_PRIMARY: &[u8; 6] = b"LUKS\xBA\xBE";
const SIGNATURE_BACKUP: &[u8; 6] = b"SKUL\xBA\xBE";

/// Symmetric cipher named in the header. Only [`Cipher::Aes`],
/// [`Cipher::Serpent`], and [`Cipher::Rc4`] can be instantiated by
/// [`crate::context::EncryptionContext`] — the rest parse so that
/// `info`-style introspection works, then fail unlock with
/// `UnsupportedAlgorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Aes,
    Anubis,
    Blowfish,
    Cast5,
    Cast6,
    Serpent,
    Twofish,
    Rc4,
}

impl Cipher {
    fn parse(name: &str) -> Result<Self> {
        let name = name.to_ascii_lowercase();
        Ok(match name.as_str() {
            "aes" => Cipher::Aes,
            "anubis" => Cipher::Anubis,
            "blowfish" => Cipher::Blowfish,
            "cast5" => Cipher::Cast5,
            "cast6" => Cipher::Cast6,
            "serpent" => Cipher::Serpent,
            "twofish" => Cipher::Twofish,
            "rc4" => Cipher::Rc4,
            _ => return Err(Error::CorruptHeader("unrecognized cipher name")),
        })
    }
}

/// Block chaining mode, the first component of the mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chaining {
    Cbc,
    Ecb,
    Xts,
}

impl Chaining {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "cbc" => Chaining::Cbc,
            "ecb" => Chaining::Ecb,
            "xts" => Chaining::Xts,
            _ => return Err(Error::CorruptHeader("unrecognized chaining mode")),
        })
    }
}

/// Hash algorithm named in the header, used both for PBKDF2 and for the AF
/// diffuser. Only the SHA family is usable at unlock time; RIPEMD160 parses
/// but PBKDF2 over it is unimplemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Ripemd160,
    Sha1,
    Sha224,
    Sha256,
    Sha512,
}

impl HashAlg {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "ripemd160" => HashAlg::Ripemd160,
            "sha1" => HashAlg::Sha1,
            "sha224" => HashAlg::Sha224,
            "sha256" => HashAlg::Sha256,
            "sha512" => HashAlg::Sha512,
            _ => return Err(Error::CorruptHeader("unrecognized hash name")),
        })
    }

    /// Digest length for this hash, in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlg::Ripemd160 | HashAlg::Sha1 => 20,
            HashAlg::Sha224 => 28,
            HashAlg::Sha256 => 32,
            HashAlg::Sha512 => 64,
        }
    }
}

/// Per-sector IV derivation scheme, the second component of the mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvMode {
    None,
    Null,
    Plain32,
    Plain64,
    Benbi,
    Essiv(HashAlg),
    Lmk,
}

/// State + key-material location of a single LUKS1 key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Disabled,
    Active,
}

/// One of the eight on-disk password-unlock entries.
#[derive(Debug, Clone)]
pub struct KeySlot {
    pub state: SlotState,
    pub iterations: u32,
    pub salt: [u8; 32],
    /// Raw on-disk field: a sector count. Call [`KeySlot::key_material_offset`]
    /// to get the byte offset — the ×512 conversion must happen exactly once.
    key_material_start_sector: u32,
    pub stripes: u32,
}

impl KeySlot {
    /// Byte offset of this slot's key material, computed from the raw
    /// sector count exactly once.
    pub fn key_material_offset(&self) -> u64 {
        self.key_material_start_sector as u64 * SECTOR_SIZE as u64
    }

    fn parse(raw: &[u8; 48]) -> Self {
        let state_raw = BigEndian::read_u32(&raw[0..4]);
        let state = if state_raw == KEY_SLOT_ACTIVE {
            SlotState::Active
        } else {
            SlotState::Disabled
        };
        KeySlot {
            state,
            iterations: BigEndian::read_u32(&raw[4..8]),
            salt: raw[8..40].try_into().unwrap(),
            key_material_start_sector: BigEndian::read_u32(&raw[40..44]),
            stripes: BigEndian::read_u32(&raw[44..48]),
        }
    }
}

/// Fields read from the fixed-size area of a LUKS2 header purely for
/// introspection; `unlock` never consults these (LUKS2's actual metadata —
/// cipher, keyslots, digests — lives in a JSON area this parser does not
/// read).
#[derive(Debug, Clone, Default)]
pub struct Luks2Diagnostics {
    pub metadata_area_size: u64,
    pub sequence_id: u64,
    pub label: String,
    pub checksum_algorithm: String,
    pub salt: [u8; 64],
    pub uuid: [u8; 16],
    pub subsystem: String,
    pub header_offset: u64,
}

/// Parsed LUKS header. Immutable after construction.
#[derive(Clone)]
pub struct VolumeHeader {
    pub format_version: u16,
    pub encrypted_payload_start_sector: u32,
    pub master_key_size_bytes: usize,
    pub master_key_validation_hash: [u8; 20],
    pub master_key_salt: [u8; 32],
    pub master_key_iterations: u32,
    pub cipher: Cipher,
    pub chaining: Chaining,
    pub iv_mode: IvMode,
    pub hash: HashAlg,
    pub uuid: [u8; 16],
    pub key_slots: [KeySlot; NUM_KEY_SLOTS],
    pub diagnostics: Option<Luks2Diagnostics>,
}

impl Drop for VolumeHeader {
    fn drop(&mut self) {
        self.master_key_validation_hash.zeroize();
        self.master_key_salt.zeroize();
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.salt.zeroize();
        }
    }
}

fn read_cstr(raw: &[u8]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}

/// Parse the 40-byte ASCII hyphenated UUID field into 16 raw bytes, in the
/// RFC 4122 big-endian field-group order.
fn parse_uuid(raw: &[u8]) -> Result<[u8; 16]> {
    let s = std::str::from_utf8(raw).map_err(|_| Error::CorruptHeader("uuid is not ASCII"))?;
    let s = s.trim_end_matches('\0');
    if s.len() != 36 {
        return Err(Error::CorruptHeader("uuid is not 36 characters"));
    }
    if s.as_bytes().get(8) != Some(&b'-')
        || s.as_bytes().get(13) != Some(&b'-')
        || s.as_bytes().get(18) != Some(&b'-')
        || s.as_bytes().get(23) != Some(&b'-')
    {
        return Err(Error::CorruptHeader("uuid is missing a hyphen"));
    }

    let groups: [(usize, usize); 5] = [(0, 8), (9, 13), (14, 18), (19, 23), (24, 36)];
    let mut out = [0u8; 16];
    let mut pos = 0;
    for (start, end) in groups {
        let hex_chunk = s
            .get(start..end)
            .ok_or(Error::CorruptHeader("uuid has wrong hyphen placement"))?;
        let bytes = hex_chunk.len() / 2;
        for i in 0..bytes {
            let byte_str = &hex_chunk[i * 2..i * 2 + 2];
            out[pos] = u8::from_str_radix(byte_str, 16)
                .map_err(|_| Error::CorruptHeader("uuid contains non-hex digits"))?;
            pos += 1;
        }
    }
    Ok(out)
}

/// Parse the mode string: `"<chain>[-<iv-mode>[:<essiv-hash>]]"`.
fn parse_mode(mode: &str) -> Result<(Chaining, IvMode)> {
    let mode = mode.to_ascii_lowercase();
    let (chain_part, rest) = match mode.split_once('-') {
        Some((c, r)) => (c, Some(r)),
        None => (mode.as_str(), None),
    };
    let chaining = Chaining::parse(chain_part)?;

    let iv_mode = match rest {
        None => IvMode::None,
        Some(rest) => {
            let (iv_part, essiv_part) = match rest.split_once(':') {
                Some((a, b)) => (a, Some(b)),
                None => (rest, None),
            };
            match iv_part {
                "null" => IvMode::Null,
                "plain" | "plain32" => IvMode::Plain32,
                "plain64" => IvMode::Plain64,
                "benbi" => IvMode::Benbi,
                "lmk" => IvMode::Lmk,
                "essiv" => {
                    let hash_name = essiv_part
                        .ok_or(Error::CorruptHeader("essiv iv-mode requires a hash"))?;
                    let hash = HashAlg::parse(hash_name)?;
                    if !matches!(hash, HashAlg::Sha1 | HashAlg::Sha256) {
                        return Err(Error::CorruptHeader(
                            "essiv hash must be sha1 or sha256",
                        ));
                    }
                    IvMode::Essiv(hash)
                }
                _ => return Err(Error::CorruptHeader("unrecognized iv mode")),
            }
        }
    };
    Ok((chaining, iv_mode))
}

impl VolumeHeader {
    /// Parse the fixed 4 KiB header read from device offset 0.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::CorruptHeader("short header read"));
        }

        let signature: &[u8; 6] = raw[0..6].try_into().unwrap();
        if signature != SIGNATURE_PRIMARY && signature != SIGNATURE_BACKUP {
            return Err(Error::UnsupportedSignature);
        }

        let format_version = BigEndian::read_u16(&raw[6..8]);
        if format_version == 2 {
            // The real cipher/keyslot/digest metadata lives in a JSON area
            // this parser does not read; unlock rejects format_version == 2
            // downstream. Only the fixed-size diagnostic fields are parsed
            // here so introspection (size, uuid, label, ...) still works on
            // a locked v2 container.
            return Self::parse_v2_diagnostics(raw);
        }
        if format_version != 1 {
            return Err(Error::UnsupportedFormat(format_version));
        }

        let cipher = Cipher::parse(read_cstr(&raw[8..40]))?;
        let (chaining, iv_mode) = parse_mode(read_cstr(&raw[40..72]))?;
        let hash = HashAlg::parse(read_cstr(&raw[72..104]))?;

        let encrypted_payload_start_sector = BigEndian::read_u32(&raw[104..108]);
        let master_key_size_bytes = BigEndian::read_u32(&raw[108..112]) as usize;
        if master_key_size_bytes == 0 || master_key_size_bytes > 64 {
            return Err(Error::CorruptHeader("master_key_size out of range"));
        }

        let master_key_validation_hash: [u8; 20] = raw[112..132].try_into().unwrap();
        let master_key_salt: [u8; 32] = raw[132..164].try_into().unwrap();
        let master_key_iterations = BigEndian::read_u32(&raw[164..168]);
        if master_key_iterations == 0 {
            return Err(Error::CorruptHeader("master_key_iterations is zero"));
        }

        let uuid = parse_uuid(&raw[168..208])?;

        let mut key_slots: Vec<KeySlot> = Vec::with_capacity(NUM_KEY_SLOTS);
        for i in 0..NUM_KEY_SLOTS {
            let start = 208 + i * 48;
            let raw_slot: &[u8; 48] = raw[start..start + 48].try_into().unwrap();
            key_slots.push(KeySlot::parse(raw_slot));
        }
        let key_slots: [KeySlot; NUM_KEY_SLOTS] = key_slots
            .try_into()
            .map_err(|_| Error::CorruptHeader("key slot array has wrong length"))?;

        Ok(VolumeHeader {
            format_version,
            encrypted_payload_start_sector,
            master_key_size_bytes,
            master_key_validation_hash,
            master_key_salt,
            master_key_iterations,
            cipher,
            chaining,
            iv_mode,
            hash,
            uuid,
            key_slots,
            diagnostics: None,
        })
    }

    /// Byte offset into the backing device where the encrypted payload
    /// begins.
    pub fn payload_offset(&self) -> u64 {
        self.encrypted_payload_start_sector as u64 * SECTOR_SIZE as u64
    }

    /// Parse the fixed-size portion of a LUKS2 header (everything before
    /// the JSON metadata area) into diagnostic fields only. The rest of
    /// `VolumeHeader` is populated with inert placeholders: nothing at
    /// unlock time consults them for `format_version == 2`, since `unlock`
    /// rejects that version outright.
    fn parse_v2_diagnostics(raw: &[u8]) -> Result<Self> {
        let metadata_area_size = BigEndian::read_u64(&raw[8..16]);
        let sequence_id = BigEndian::read_u64(&raw[16..24]);
        let label = read_cstr(&raw[24..72]).to_string();
        let checksum_algorithm = read_cstr(&raw[72..104]).to_string();
        let salt: [u8; 64] = raw[104..168].try_into().unwrap();
        let uuid = parse_uuid(&raw[168..208])?;
        let subsystem = read_cstr(&raw[208..256]).to_string();
        let header_offset = BigEndian::read_u64(&raw[256..264]);

        let key_slots: [KeySlot; NUM_KEY_SLOTS] = std::array::from_fn(|_| KeySlot {
            state: SlotState::Disabled,
            iterations: 0,
            salt: [0u8; 32],
            key_material_start_sector: 0,
            stripes: 0,
        });

        Ok(VolumeHeader {
            format_version: 2,
            encrypted_payload_start_sector: 0,
            master_key_size_bytes: 0,
            master_key_validation_hash: [0u8; 20],
            master_key_salt: [0u8; 32],
            master_key_iterations: 0,
            cipher: Cipher::Aes,
            chaining: Chaining::Cbc,
            iv_mode: IvMode::None,
            hash: HashAlg::Sha256,
            uuid,
            key_slots,
            diagnostics: Some(Luks2Diagnostics {
                metadata_area_size,
                sequence_id,
                label,
                checksum_algorithm,
                salt,
                uuid,
                subsystem,
                header_offset,
            }),
        })
    }
}
