//! C3 — anti-forensic (AF) splitter diffuser and merge.

use byteorder::{BigEndian, ByteOrder};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha512};

use crate::error::{Error, Result};
use crate::header::HashAlg;

fn hash_block(hash: HashAlg, block_index: u32, data: &[u8]) -> Result<Vec<u8>> {
    let mut counter = [0u8; 4];
    BigEndian::write_u32(&mut counter, block_index);
    Ok(match hash {
        HashAlg::Sha1 => {
            let mut h = Sha1::new();
            h.update(counter);
            h.update(data);
            h.finalize().to_vec()
        }
        HashAlg::Sha224 => {
            let mut h = Sha224::new();
            h.update(counter);
            h.update(data);
            h.finalize().to_vec()
        }
        HashAlg::Sha256 => {
            let mut h = Sha256::new();
            h.update(counter);
            h.update(data);
            h.finalize().to_vec()
        }
        HashAlg::Sha512 => {
            let mut h = Sha512::new();
            h.update(counter);
            h.update(data);
            h.finalize().to_vec()
        }
        HashAlg::Ripemd160 => return Err(Error::UnsupportedAlgorithm("af diffuser over ripemd160")),
    })
}

/// Overwrite `buf` in place with the iterated hash diffuser: split into
/// `h`-sized (digest-sized) blocks, replace block `b` with the first `w`
/// bytes of `H(BE32(b) ∥ block_b)`.
pub fn diffuse(buf: &mut [u8], hash: HashAlg) -> Result<()> {
    let h = hash.digest_len();
    let mut block_index: u32 = 0;
    let mut offset = 0;
    while offset < buf.len() {
        let w = h.min(buf.len() - offset);
        let digest = hash_block(hash, block_index, &buf[offset..offset + w])?;
        buf[offset..offset + w].copy_from_slice(&digest[..w]);
        offset += w;
        block_index += 1;
    }
    Ok(())
}

/// Recover the master key from an AF-split buffer of `key_size * stripes`
/// bytes.
pub fn merge(split: &[u8], key_size: usize, stripes: u32, hash: HashAlg) -> Result<Vec<u8>> {
    if stripes == 0 || key_size == 0 {
        return Err(Error::CorruptHeader("af merge requires stripes >= 1 and key_size >= 1"));
    }
    if split.len() != key_size * stripes as usize {
        return Err(Error::CorruptHeader("af split buffer has wrong length"));
    }

    let mut d = vec![0u8; key_size];
    for i in 0..(stripes - 1) {
        let stripe = &split[i as usize * key_size..(i as usize + 1) * key_size];
        for (acc, s) in d.iter_mut().zip(stripe.iter()) {
            *acc ^= s;
        }
        diffuse(&mut d, hash)?;
    }
    let last = &split[(stripes - 1) as usize * key_size..stripes as usize * key_size];
    for (acc, s) in d.iter_mut().zip(last.iter()) {
        *acc ^= s;
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a split buffer such that `merge` recovers exactly `master_key`,
    /// by running the merge algorithm's dual (split) construction: pick
    /// stripes 0..stripes-2 at random (here: deterministic filler), diffuse
    /// forward, then solve the final stripe by XOR.
    fn split_for(master_key: &[u8], stripes: u32, hash: HashAlg) -> Vec<u8> {
        let key_size = master_key.len();
        let mut split = vec![0u8; key_size * stripes as usize];
        let mut d = vec![0u8; key_size];
        for i in 0..(stripes - 1) {
            // Arbitrary deterministic filler stripe.
            let stripe_start = i as usize * key_size;
            for (j, b) in split[stripe_start..stripe_start + key_size].iter_mut().enumerate() {
                *b = (i as u8).wrapping_add(j as u8);
            }
            for (acc, s) in d.iter_mut().zip(split[stripe_start..stripe_start + key_size].iter()) {
                *acc ^= s;
            }
            diffuse(&mut d, hash).unwrap();
        }
        let last_start = (stripes - 1) as usize * key_size;
        for j in 0..key_size {
            split[last_start + j] = d[j] ^ master_key[j];
        }
        split
    }

    #[test]
    fn merge_recovers_master_key() {
        for &key_size in &[16usize, 32, 64] {
            for &stripes in &[1u32, 2, 4000] {
                for hash in [HashAlg::Sha1, HashAlg::Sha224, HashAlg::Sha256, HashAlg::Sha512] {
                    let master_key: Vec<u8> = (0..key_size).map(|i| i as u8).collect();
                    let split = split_for(&master_key, stripes, hash);
                    let recovered = merge(&split, key_size, stripes, hash).unwrap();
                    assert_eq!(recovered, master_key, "key_size={key_size} stripes={stripes} hash={hash:?}");
                }
            }
        }
    }

    #[test]
    fn merge_is_deterministic() {
        let master_key = vec![0x42u8; 32];
        let split = split_for(&master_key, 4000, HashAlg::Sha256);
        let a = merge(&split, 32, 4000, HashAlg::Sha256).unwrap();
        let b = merge(&split, 32, 4000, HashAlg::Sha256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn merge_rejects_wrong_length() {
        let split = vec![0u8; 10];
        assert!(merge(&split, 32, 4, HashAlg::Sha256).is_err());
    }
}
