//! C4 — encryption context: turns (cipher, chaining, iv_mode, essiv_hash)
//! plus a key into something §4.5 (sector.rs) can hand one sector to.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::consts::SECTOR_SIZE;
use crate::error::{Error, Result};
use crate::header::{Chaining, Cipher, HashAlg, IvMode};

/// Serpent accepts 128/192/256-bit keys by padding with a single set bit
/// then zeros up to the full 256-bit key schedule input, per the Serpent
/// specification — not every RustCrypto block cipher does this for you.
fn pad_serpent_key(key: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[..key.len()].copy_from_slice(key);
    if key.len() < 32 {
        padded[key.len()] = 0x01;
    }
    padded
}

/// A keyed primitive able to decrypt exactly one 512-byte sector given its
/// already-derived 16-byte IV/tweak. Chaining-mode dispatch lives here so
/// `sector.rs` only has to derive the IV and call through this trait.
trait SectorCipher: Send {
    fn decrypt_sector(&mut self, iv: [u8; 16], data: &mut [u8]) -> Result<()>;
}

struct AesCbc(AesKeyBytes);
struct AesEcb(AesKeyBytes);
struct SerpentCbc([u8; 32]);
struct SerpentEcb([u8; 32]);
struct Rc4Stream(Vec<u8>);

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
enum AesKeyBytes {
    K128([u8; 16]),
    K192([u8; 24]),
    K256([u8; 32]),
}

impl AesKeyBytes {
    fn from_slice(key: &[u8]) -> Result<Self> {
        Ok(match key.len() {
            16 => AesKeyBytes::K128(key.try_into().unwrap()),
            24 => AesKeyBytes::K192(key.try_into().unwrap()),
            32 => AesKeyBytes::K256(key.try_into().unwrap()),
            _ => return Err(Error::UnsupportedAlgorithm("aes key must be 128/192/256 bits")),
        })
    }
}

impl SectorCipher for AesCbc {
    fn decrypt_sector(&mut self, iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        let iv = GenericArray::from(iv);
        let result = match &self.0 {
            AesKeyBytes::K128(k) => cbc::Decryptor::<Aes128>::new(GenericArray::from_slice(k), &iv)
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            AesKeyBytes::K192(k) => cbc::Decryptor::<Aes192>::new(GenericArray::from_slice(k), &iv)
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            AesKeyBytes::K256(k) => cbc::Decryptor::<Aes256>::new(GenericArray::from_slice(k), &iv)
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
        };
        result.map_err(|_| Error::CryptFailed)
    }
}

impl SectorCipher for AesEcb {
    fn decrypt_sector(&mut self, _iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        // ECB ignores the IV. Decryption always uses the decryption-
        // direction cipher object here (never the encryptor).
        let result = match &self.0 {
            AesKeyBytes::K128(k) => ecb::Decryptor::<Aes128>::new(GenericArray::from_slice(k))
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            AesKeyBytes::K192(k) => ecb::Decryptor::<Aes192>::new(GenericArray::from_slice(k))
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            AesKeyBytes::K256(k) => ecb::Decryptor::<Aes256>::new(GenericArray::from_slice(k))
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
        };
        result.map_err(|_| Error::CryptFailed)
    }
}

impl SectorCipher for SerpentCbc {
    fn decrypt_sector(&mut self, iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        let iv = GenericArray::from(iv);
        cbc::Decryptor::<serpent::Serpent>::new(GenericArray::from_slice(&self.0), &iv)
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ())
            .map_err(|_| Error::CryptFailed)
    }
}

impl SectorCipher for SerpentEcb {
    fn decrypt_sector(&mut self, _iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        ecb::Decryptor::<serpent::Serpent>::new(GenericArray::from_slice(&self.0))
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ())
            .map_err(|_| Error::CryptFailed)
    }
}

impl SectorCipher for Rc4Stream {
    fn decrypt_sector(&mut self, _iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        // RC4 has no concept of an IV; each sector re-keys the stream from
        // scratch so that re-reading a sector is deterministic.
        let mut cipher = rc4::Rc4::new_from_slice(&self.0).map_err(|_| Error::CryptFailed)?;
        cipher.apply_keystream(data);
        Ok(())
    }
}

/// AES-ECB keyed by `H(master_key)`, used only to turn a sector number into
/// an IV for [`IvMode::Essiv`].
struct EssivContext {
    cipher: AesKeyBytes,
}

impl EssivContext {
    fn new(master_key: &[u8], hash: HashAlg) -> Result<Self> {
        let mut key = [0u8; 32];
        match hash {
            HashAlg::Sha1 => {
                let digest = Sha1::digest(master_key);
                // SHA-1 output (20 bytes) is zero-padded on the right to 32.
                key[..20].copy_from_slice(&digest);
            }
            HashAlg::Sha256 => {
                let digest = Sha256::digest(master_key);
                key.copy_from_slice(&digest);
            }
            _ => return Err(Error::UnsupportedAlgorithm("essiv hash must be sha1 or sha256")),
        }
        Ok(EssivContext {
            cipher: AesKeyBytes::K256(key),
        })
    }

    /// Encrypt a single 16-byte block (the encoded sector number) to derive
    /// the IV for that sector.
    fn derive_iv(&self, plain_block: [u8; 16]) -> [u8; 16] {
        let AesKeyBytes::K256(k) = &self.cipher else {
            unreachable!("essiv always uses a 256-bit key")
        };
        let mut block = GenericArray::from(plain_block);
        Aes256::new(GenericArray::from_slice(k)).encrypt_block(&mut block);
        block.into()
    }
}

/// The installed cipher/chaining pair plus, when needed, the ESSIV
/// sub-context. Owns the master key for its lifetime and zeroizes it on
/// drop.
pub struct EncryptionContext {
    cipher: Box<dyn SectorCipher>,
    essiv: Option<EssivContext>,
    iv_mode: IvMode,
}

impl EncryptionContext {
    /// Instantiate the keyed cipher for `(cipher, chaining)` and, if
    /// `iv_mode` is ESSIV, the ESSIV sub-context keyed by `H(master_key)`.
    pub fn new(
        cipher: Cipher,
        chaining: Chaining,
        iv_mode: IvMode,
        master_key: &[u8],
    ) -> Result<Self> {
        let engine: Box<dyn SectorCipher> = match (cipher, chaining) {
            (Cipher::Aes, Chaining::Cbc) => Box::new(AesCbc(AesKeyBytes::from_slice(master_key)?)),
            (Cipher::Aes, Chaining::Ecb) => Box::new(AesEcb(AesKeyBytes::from_slice(master_key)?)),
            (Cipher::Aes, Chaining::Xts) => {
                return Err(Error::UnsupportedAlgorithm(
                    "aes-xts is handled by XtsContext, not EncryptionContext",
                ))
            }
            (Cipher::Serpent, Chaining::Cbc) => Box::new(SerpentCbc(pad_serpent_key(master_key))),
            (Cipher::Serpent, Chaining::Ecb) => Box::new(SerpentEcb(pad_serpent_key(master_key))),
            (Cipher::Rc4, Chaining::Cbc) | (Cipher::Rc4, Chaining::Ecb) => {
                Box::new(Rc4Stream(master_key.to_vec()))
            }
            _ => return Err(Error::UnsupportedAlgorithm("unsupported cipher/chaining combination")),
        };

        let essiv = match iv_mode {
            IvMode::Essiv(h) => Some(EssivContext::new(master_key, h)?),
            _ => None,
        };

        Ok(EncryptionContext {
            cipher: engine,
            essiv,
            iv_mode,
        })
    }

    pub fn essiv_derive_iv(&self, plain_block: [u8; 16]) -> Option<[u8; 16]> {
        self.essiv.as_ref().map(|e| e.derive_iv(plain_block))
    }

    pub fn iv_mode(&self) -> IvMode {
        self.iv_mode
    }

    /// Decrypt exactly one [`SECTOR_SIZE`]-byte sector in place.
    pub fn decrypt_sector(&mut self, iv: [u8; 16], data: &mut [u8]) -> Result<()> {
        if data.len() != SECTOR_SIZE {
            return Err(Error::CryptFailed);
        }
        self.cipher.decrypt_sector(iv, data)
    }
}

/// AES-XTS keeps a pair of ciphers (data + tweak) and is modeled separately
/// since `xts-mode` has its own sector API rather than our `SectorCipher`
/// block-mode trait.
pub struct XtsContext {
    xts: XtsVariant,
}

enum XtsVariant {
    Aes128(xts_mode::Xts128<Aes128>),
    Aes256(xts_mode::Xts128<Aes256>),
}

impl XtsContext {
    pub fn new(master_key: &[u8]) -> Result<Self> {
        if master_key.len() % 2 != 0 {
            return Err(Error::UnsupportedAlgorithm("aes-xts key must have even length"));
        }
        let half = master_key.len() / 2;
        let (k1, k2) = master_key.split_at(half);
        let xts = match half {
            16 => XtsVariant::Aes128(xts_mode::Xts128::new(
                Aes128::new(GenericArray::from_slice(k1)),
                Aes128::new(GenericArray::from_slice(k2)),
            )),
            32 => XtsVariant::Aes256(xts_mode::Xts128::new(
                Aes256::new(GenericArray::from_slice(k1)),
                Aes256::new(GenericArray::from_slice(k2)),
            )),
            _ => return Err(Error::UnsupportedAlgorithm("aes-xts half-key must be 128 or 256 bits")),
        };
        Ok(XtsContext { xts })
    }

    /// `tweak` is the 16-byte IV computed by §4.5, passed straight through
    /// as the XTS sector tweak.
    pub fn decrypt_sector(&self, tweak: [u8; 16], data: &mut [u8]) -> Result<()> {
        if data.len() != SECTOR_SIZE {
            return Err(Error::CryptFailed);
        }
        match &self.xts {
            XtsVariant::Aes128(x) => x.decrypt_sector(data, tweak),
            XtsVariant::Aes256(x) => x.decrypt_sector(data, tweak),
        }
        Ok(())
    }
}
