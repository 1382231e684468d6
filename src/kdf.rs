//! C2 — PBKDF2-HMAC key derivation over the hash family the header can name.

use hmac::Hmac;

use crate::error::{Error, Result};
use crate::header::HashAlg;

/// Derive `dk_len` bytes via PBKDF2-HMAC(`hash`, `password`, `salt`,
/// `iterations`). Fails with `UnsupportedAlgorithm` for RIPEMD160, which the
/// header parser accepts but this derivation does not implement.
pub fn derive(
    hash: HashAlg,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    dk_len: usize,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; dk_len];
    match hash {
        HashAlg::Sha1 => {
            pbkdf2::pbkdf2::<Hmac<sha1::Sha1>>(password, salt, iterations, &mut out)
                .map_err(|_| Error::CryptFailed)?;
        }
        HashAlg::Sha224 => {
            pbkdf2::pbkdf2::<Hmac<sha2::Sha224>>(password, salt, iterations, &mut out)
                .map_err(|_| Error::CryptFailed)?;
        }
        HashAlg::Sha256 => {
            pbkdf2::pbkdf2::<Hmac<sha2::Sha256>>(password, salt, iterations, &mut out)
                .map_err(|_| Error::CryptFailed)?;
        }
        HashAlg::Sha512 => {
            pbkdf2::pbkdf2::<Hmac<sha2::Sha512>>(password, salt, iterations, &mut out)
                .map_err(|_| Error::CryptFailed)?;
        }
        HashAlg::Ripemd160 => {
            return Err(Error::UnsupportedAlgorithm("pbkdf2 over ripemd160"));
        }
    }
    Ok(out)
}
