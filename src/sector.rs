//! C5 — sector crypt: derives the 16-byte IV for one payload-relative sector
//! and hands the 512-byte ciphertext to the keyed cipher from `context.rs`.

use crate::consts::SECTOR_SIZE;
use crate::context::{EncryptionContext, XtsContext};
use crate::error::{Error, Result};
use crate::header::{Chaining, IvMode};

/// Either of the two keyed-cipher shapes a header can select: block-mode
/// ciphers that take a 16-byte IV, or AES-XTS which owns its own sector API.
pub enum SectorCrypt {
    BlockMode(EncryptionContext),
    Xts { ctx: XtsContext, iv_mode: IvMode },
}

/// Build the keyed cipher named by `(cipher, chaining, iv_mode)` for
/// `key` — shared by the volume's real context and the transient context
/// built once per key-slot attempt during unlock.
pub fn build_crypt(
    cipher: crate::header::Cipher,
    chaining: Chaining,
    iv_mode: IvMode,
    key: &[u8],
) -> Result<SectorCrypt> {
    if chaining == Chaining::Xts {
        return Ok(SectorCrypt::Xts {
            ctx: XtsContext::new(key)?,
            iv_mode,
        });
    }
    Ok(SectorCrypt::BlockMode(EncryptionContext::new(
        cipher, chaining, iv_mode, key,
    )?))
}

/// Derive the 16-byte IV/tweak for `sector_number` under `iv_mode`. For
/// ESSIV this performs one AES-ECB block encryption through `essiv_encrypt`.
fn derive_iv(
    iv_mode: IvMode,
    sector_number: u64,
    essiv_encrypt: impl FnOnce([u8; 16]) -> [u8; 16],
) -> Result<[u8; 16]> {
    Ok(match iv_mode {
        IvMode::None | IvMode::Null => [0u8; 16],
        IvMode::Plain32 => {
            let mut iv = [0u8; 16];
            iv[0..4].copy_from_slice(&(sector_number as u32).to_le_bytes());
            iv
        }
        IvMode::Plain64 => {
            let mut iv = [0u8; 16];
            iv[0..8].copy_from_slice(&sector_number.to_le_bytes());
            iv
        }
        IvMode::Benbi => {
            let mut iv = [0u8; 16];
            let value = (sector_number << 5) + 1;
            iv[8..16].copy_from_slice(&value.to_be_bytes());
            iv
        }
        IvMode::Essiv(_) => {
            let mut plain = [0u8; 16];
            plain[0..8].copy_from_slice(&sector_number.to_le_bytes());
            essiv_encrypt(plain)
        }
        IvMode::Lmk => return Err(Error::UnsupportedAlgorithm("lmk iv mode is not implemented")),
    })
}

/// Decrypt one [`SECTOR_SIZE`]-byte sector in place. `sector_number` is the
/// *payload-relative* sector index, as required by the IV derivation rules
/// above — never the device-relative one.
pub fn decrypt_sector(crypt: &mut SectorCrypt, sector_number: u64, data: &mut [u8]) -> Result<()> {
    if data.len() != SECTOR_SIZE {
        return Err(Error::CryptFailed);
    }
    match crypt {
        SectorCrypt::BlockMode(ctx) => {
            let iv_mode = ctx.iv_mode();
            let iv = derive_iv(iv_mode, sector_number, |plain| {
                ctx.essiv_derive_iv(plain)
                    .expect("essiv iv_mode implies an essiv sub-context")
            })?;
            ctx.decrypt_sector(iv, data)
        }
        SectorCrypt::Xts { ctx, iv_mode } => {
            // AES-XTS headers are always parsed with a non-ESSIV iv_mode
            // (plain/plain64/benbi), so no essiv closure is needed here.
            let iv = derive_iv(*iv_mode, sector_number, |_| [0u8; 16])?;
            ctx.decrypt_sector(iv, data)
        }
    }
}
