//! C7 — unlock state machine: recovers the master key either directly (raw
//! key) or by trying each active key slot against a passphrase.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::af;
use crate::consts::MAX_ALLOC;
use crate::device::BackingDevice;
use crate::error::{Error, Result};
use crate::header::{SlotState, VolumeHeader};
use crate::kdf;
use crate::sector::{build_crypt, decrypt_sector};

/// Validate a raw master key against the header's PBKDF2 validation hash.
/// Returns the key on match (caller owns zeroization of the input).
pub fn unlock_with_key(header: &VolumeHeader, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if header.format_version != 1 {
        return Err(Error::UnsupportedFormat(header.format_version));
    }
    if !matches!(key.len(), 16 | 32 | 64) {
        return Err(Error::InvalidKeySize(key.len()));
    }
    let candidate_hash = kdf::derive(
        header.hash,
        key,
        &header.master_key_salt,
        header.master_key_iterations,
        20,
    )?;
    if bool::from(candidate_hash.ct_eq(&header.master_key_validation_hash[..])) {
        Ok(Zeroizing::new(key.to_vec()))
    } else {
        Err(Error::InvalidKey)
    }
}

/// Try each active key slot against `password`, stopping at the first slot
/// whose recovered master key matches the header's validation hash.
/// Returns `Err(StillLocked)` if every active slot fails.
pub fn unlock_with_password(
    header: &VolumeHeader,
    device: &dyn BackingDevice,
    password: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if header.format_version != 1 {
        return Err(Error::UnsupportedFormat(header.format_version));
    }
    let key_size = header.master_key_size_bytes;

    for (slot_index, slot) in header.key_slots.iter().enumerate() {
        if slot.state != SlotState::Active {
            continue;
        }
        if slot.stripes == 0 {
            return Err(Error::CorruptSlot {
                slot: slot_index,
                reason: "stripes is zero",
            });
        }
        let total = key_size
            .checked_mul(slot.stripes as usize)
            .ok_or(Error::CorruptSlot {
                slot: slot_index,
                reason: "key_size * stripes overflows",
            })?;
        if total == 0 || total > MAX_ALLOC {
            return Err(Error::CorruptSlot {
                slot: slot_index,
                reason: "key-material size is zero or exceeds the allocation limit",
            });
        }
        if total % crate::consts::SECTOR_SIZE != 0 {
            return Err(Error::CorruptSlot {
                slot: slot_index,
                reason: "key-material size is not a whole number of sectors",
            });
        }

        let user_key = Zeroizing::new(kdf::derive(
            header.hash,
            password,
            &slot.salt,
            slot.iterations,
            key_size,
        )?);

        let mut key_material = Zeroizing::new(vec![0u8; total]);
        let n = device.read_at(slot.key_material_offset(), &mut key_material)?;
        if n != total {
            tracing::warn!(slot = slot_index, "key slot material read was short");
            continue;
        }

        let mut crypt = build_crypt(header.cipher, header.chaining, header.iv_mode, &user_key)?;
        let sector_count = total / crate::consts::SECTOR_SIZE;
        let mut ok = true;
        for i in 0..sector_count {
            let start = i * crate::consts::SECTOR_SIZE;
            let end = start + crate::consts::SECTOR_SIZE;
            if decrypt_sector(&mut crypt, i as u64, &mut key_material[start..end]).is_err() {
                ok = false;
                break;
            }
        }
        if !ok {
            tracing::warn!(slot = slot_index, "key slot material failed to decrypt");
            continue;
        }

        let candidate = Zeroizing::new(af::merge(&key_material, key_size, slot.stripes, header.hash)?);
        let candidate_hash = kdf::derive(
            header.hash,
            &candidate,
            &header.master_key_salt,
            header.master_key_iterations,
            20,
        )?;
        if bool::from(candidate_hash.ct_eq(&header.master_key_validation_hash[..])) {
            tracing::debug!(slot = slot_index, "key slot unlocked the volume");
            return Ok(Zeroizing::new(candidate.to_vec()));
        }
        tracing::warn!(slot = slot_index, "key slot password did not match");
    }

    Err(Error::StillLocked)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::consts::SECTOR_SIZE;
    use crate::device::test_fixture::MemDevice;
    use crate::header::test_fixture::build_header;
    use crate::sector::build_crypt;

    /// Build a complete LUKS1 image (header + one active key slot encoding
    /// `password`, + an encrypted payload under `master_key`) usable by both
    /// unlock and volume-facade tests.
    pub(crate) fn build_luks1_image(
        password: &[u8],
        master_key: &[u8],
        payload_plaintext: &[u8],
    ) -> (Vec<u8>, VolumeHeader) {
        let key_size = master_key.len();
        // Chosen so key_size * stripes is already a whole number of 512-byte
        // sectors, matching real LUKS1 images (which always use stripes =
        // 4000 for exactly this reason).
        let stripes = (SECTOR_SIZE / key_size) as u32;
        let slot_iterations = 10u32;
        let slot_salt = [0x5Au8; 32];
        let mk_iterations = 10u32;
        let mk_salt = [0x99u8; 32];

        let mk_validation_hash: [u8; 20] = kdf::derive(crate::header::HashAlg::Sha256, master_key, &mk_salt, mk_iterations, 20)
            .unwrap()
            .try_into()
            .unwrap();

        let user_key = kdf::derive(crate::header::HashAlg::Sha256, password, &slot_salt, slot_iterations, key_size).unwrap();

        let af_len = key_size * stripes as usize;
        let split = split_master_key(master_key, stripes, crate::header::HashAlg::Sha256, key_size);
        let mut key_material = vec![0u8; af_len];
        key_material[..split.len()].copy_from_slice(&split);

        for chunk in key_material.chunks_mut(SECTOR_SIZE) {
            encrypt_cbc_null_key(&user_key, chunk);
        }

        let key_material_start_sector = 8u32;
        let payload_start_sector = key_material_start_sector + (af_len / SECTOR_SIZE) as u32 + 1;

        let raw_header = build_header(
            "aes",
            "cbc-null",
            "sha256",
            payload_start_sector,
            key_size as u32,
            mk_validation_hash,
            mk_salt,
            mk_iterations,
            "12345678-1234-1234-1234-123456789abc",
            &[(true, slot_iterations, slot_salt, key_material_start_sector, stripes)],
        );

        let mut image = raw_header;
        let km_offset = key_material_start_sector as usize * SECTOR_SIZE;
        if image.len() < km_offset + key_material.len() {
            image.resize(km_offset + key_material.len(), 0);
        }
        image[km_offset..km_offset + key_material.len()].copy_from_slice(&key_material);

        let payload_offset = payload_start_sector as usize * SECTOR_SIZE;
        let mut ciphertext = payload_plaintext.to_vec();
        let padded = ciphertext.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        ciphertext.resize(padded, 0);
        for chunk in ciphertext.chunks_mut(SECTOR_SIZE) {
            encrypt_cbc_null_key(master_key, chunk);
        }
        if image.len() < payload_offset + ciphertext.len() {
            image.resize(payload_offset + ciphertext.len(), 0);
        }
        image[payload_offset..payload_offset + ciphertext.len()].copy_from_slice(&ciphertext);

        let header = VolumeHeader::parse(&image).unwrap();
        (image, header)
    }

    /// Encrypt one 512-byte chunk with AES-CBC under a zero IV (the inverse
    /// of the `cbc-null` decrypt path), for building known-plaintext
    /// fixtures without going through `EncryptionContext`.
    fn encrypt_cbc_null_key(key: &[u8], data: &mut [u8]) {
        use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
        let iv = GenericArray::from([0u8; 16]);
        match key.len() {
            16 => {
                let mut enc = cbc::Encryptor::<aes::Aes128>::new(GenericArray::from_slice(key), &iv);
                for block in data.chunks_mut(16) {
                    let mut b = GenericArray::clone_from_slice(block);
                    enc.encrypt_block_mut(&mut b);
                    block.copy_from_slice(&b);
                }
            }
            32 => {
                let mut enc = cbc::Encryptor::<aes::Aes256>::new(GenericArray::from_slice(key), &iv);
                for block in data.chunks_mut(16) {
                    let mut b = GenericArray::clone_from_slice(block);
                    enc.encrypt_block_mut(&mut b);
                    block.copy_from_slice(&b);
                }
            }
            _ => panic!("test fixture only supports 128/256-bit keys"),
        }
    }

    fn split_master_key(master_key: &[u8], stripes: u32, hash: crate::header::HashAlg, key_size: usize) -> Vec<u8> {
        let mut split = vec![0u8; key_size * stripes as usize];
        let mut d = vec![0u8; key_size];
        for i in 0..(stripes - 1) {
            let start = i as usize * key_size;
            for (j, b) in split[start..start + key_size].iter_mut().enumerate() {
                *b = (i as u8).wrapping_add(j as u8);
            }
            for (acc, s) in d.iter_mut().zip(split[start..start + key_size].iter()) {
                *acc ^= s;
            }
            af::diffuse(&mut d, hash).unwrap();
        }
        let last = (stripes - 1) as usize * key_size;
        for j in 0..key_size {
            split[last + j] = d[j] ^ master_key[j];
        }
        split
    }

    #[test]
    fn raw_key_unlocks_on_match() {
        let master_key = vec![0x42u8; 32];
        let mk_salt = [0x11u8; 32];
        let mk_validation_hash: [u8; 20] = kdf::derive(crate::header::HashAlg::Sha256, &master_key, &mk_salt, 10, 20)
            .unwrap()
            .try_into()
            .unwrap();
        let raw = build_header(
            "aes",
            "cbc-null",
            "sha256",
            16,
            32,
            mk_validation_hash,
            mk_salt,
            10,
            "12345678-1234-1234-1234-123456789abc",
            &[],
        );
        let header = VolumeHeader::parse(&raw).unwrap();
        let recovered = unlock_with_key(&header, &master_key).unwrap();
        assert_eq!(&recovered[..], &master_key[..]);
    }

    #[test]
    fn raw_key_rejects_mismatch() {
        let mk_salt = [0x11u8; 32];
        let mk_validation_hash: [u8; 20] = kdf::derive(crate::header::HashAlg::Sha256, &vec![0u8; 32], &mk_salt, 10, 20)
            .unwrap()
            .try_into()
            .unwrap();
        let raw = build_header(
            "aes",
            "cbc-null",
            "sha256",
            16,
            32,
            mk_validation_hash,
            mk_salt,
            10,
            "12345678-1234-1234-1234-123456789abc",
            &[],
        );
        let header = VolumeHeader::parse(&raw).unwrap();
        let wrong_key = vec![0xFFu8; 32];
        assert!(matches!(unlock_with_key(&header, &wrong_key), Err(Error::InvalidKey)));
    }

    #[test]
    fn raw_key_rejects_bad_size() {
        let raw = build_header(
            "aes", "cbc-null", "sha256", 16, 32, [0u8; 20], [0u8; 32], 10,
            "12345678-1234-1234-1234-123456789abc", &[],
        );
        let header = VolumeHeader::parse(&raw).unwrap();
        assert!(matches!(
            unlock_with_key(&header, &[0u8; 20]),
            Err(Error::InvalidKeySize(20))
        ));
    }

    #[test]
    fn v2_header_is_rejected_at_unlock_not_at_parse() {
        use crate::header::test_fixture::build_luks2_header;
        let raw = build_luks2_header(
            "label",
            "sha256",
            "12345678-1234-1234-1234-123456789abc",
            16 * 1024 * 1024,
            1,
        );
        let header = VolumeHeader::parse(&raw).unwrap();
        assert_eq!(header.format_version, 2);
        assert!(matches!(
            unlock_with_key(&header, &[0u8; 32]),
            Err(Error::UnsupportedFormat(2))
        ));
        let device = MemDevice::new(vec![0u8; 8192]);
        assert!(matches!(
            unlock_with_password(&header, &device, b"whatever"),
            Err(Error::UnsupportedFormat(2))
        ));
    }

    #[test]
    fn no_active_slots_is_still_locked() {
        let raw = build_header(
            "aes", "cbc-null", "sha256", 16, 32, [0u8; 20], [0u8; 32], 10,
            "12345678-1234-1234-1234-123456789abc", &[],
        );
        let header = VolumeHeader::parse(&raw).unwrap();
        let device = MemDevice::new(vec![0u8; 8192]);
        assert!(matches!(
            unlock_with_password(&header, &device, b"whatever"),
            Err(Error::StillLocked)
        ));
    }
}
