//! ZIP extraction: traditional PKWARE (ZipCrypto) and WinZip AE entries.

use std::path::Path;

use tracing::debug;

use crate::crypto::winzip_salt_len;
use crate::extract::MAX_SAMPLE_BYTES;
use crate::fingerprint::{
    ArchiveDescriptor, ArchiveVariant, PkzipData, ScanBudget, WinZipAesData,
};
use crate::reader::BinaryReader;
use crate::CrackError;

const LOCAL_FILE_SIG: u32 = 0x0403_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;

/// Header ID of the WinZip AES extra field, `01 99` on disk.
const AES_EXTRA_ID: u16 = 0x9901;
/// Compression method value marking an AES-encrypted entry.
const AES_METHOD: u16 = 99;

/// One parsed local file header.
struct LocalHeader {
    flags: u16,
    method: u16,
    mod_time: u16,
    crc32: u32,
    compressed_size: u32,
    name: String,
    extra: Vec<u8>,
    /// Absolute offset of the entry's (possibly encrypted) payload.
    data_offset: u64,
}

/// Walks local file headers from `base_offset` until the first encrypted
/// entry, then captures its verification data.
pub(crate) fn extract(
    path: &Path,
    reader: &mut BinaryReader,
    base_offset: u64,
    budget: &ScanBudget,
) -> Result<ArchiveDescriptor, CrackError> {
    let mut offset = base_offset;
    let mut saw_entry = false;

    loop {
        budget.check()?;
        let header = match read_local_header(reader, offset) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(CrackError::Truncated { .. }) if saw_entry => break,
            Err(e) => return Err(e),
        };
        saw_entry = true;

        if header.flags & 0x1 != 0 && header.compressed_size > 0 {
            debug!(entry = %header.name, method = header.method, "found encrypted entry");
            return if header.method == AES_METHOD || find_aes_extra(&header.extra).is_some() {
                extract_winzip_aes(path, reader, header)
            } else {
                extract_pkzip(path, reader, header)
            };
        }

        if header.compressed_size == 0 && header.flags & 0x8 != 0 {
            // Streamed entry without sizes in the local header: we cannot
            // walk past it, so scan forward for the next signature.
            match scan_next_local_sig(reader, header.data_offset, budget)? {
                Some(next) => offset = next,
                None => break,
            }
        } else {
            offset = header.data_offset + u64::from(header.compressed_size);
        }
    }

    if saw_entry {
        Err(CrackError::NoEncryptedEntry)
    } else {
        Err(CrackError::MalformedHeader { context: "no ZIP local file header at scan offset".into() })
    }
}

fn read_local_header(
    reader: &mut BinaryReader,
    offset: u64,
) -> Result<Option<LocalHeader>, CrackError> {
    if offset + 30 > reader.len() {
        return Ok(None);
    }
    reader.seek(offset)?;
    let sig = reader.read_u32_le("ZIP signature")?;
    if sig == CENTRAL_DIR_SIG || sig == END_OF_CENTRAL_SIG {
        return Ok(None);
    }
    if sig != LOCAL_FILE_SIG {
        return Ok(None);
    }

    let _version = reader.read_u16_le("ZIP local header")?;
    let flags = reader.read_u16_le("ZIP local header")?;
    let method = reader.read_u16_le("ZIP local header")?;
    let mod_time = reader.read_u16_le("ZIP local header")?;
    let _mod_date = reader.read_u16_le("ZIP local header")?;
    let crc32 = reader.read_u32_le("ZIP local header")?;
    let compressed_size = reader.read_u32_le("ZIP local header")?;
    let _uncompressed_size = reader.read_u32_le("ZIP local header")?;
    let name_len = reader.read_u16_le("ZIP local header")? as usize;
    let extra_len = reader.read_u16_le("ZIP local header")? as usize;

    let name_bytes = reader.read_bytes(name_len, "ZIP entry name")?;
    let extra = reader.read_bytes(extra_len, "ZIP extra field")?;
    let data_offset = reader.position()?;

    Ok(Some(LocalHeader {
        flags,
        method,
        mod_time,
        crc32,
        compressed_size,
        name: String::from_utf8_lossy(&name_bytes).into_owned(),
        extra,
        data_offset,
    }))
}

fn extract_pkzip(
    path: &Path,
    reader: &mut BinaryReader,
    header: LocalHeader,
) -> Result<ArchiveDescriptor, CrackError> {
    if header.compressed_size < 12 {
        return Err(CrackError::MalformedHeader {
            context: format!("encrypted entry '{}' shorter than its encryption header", header.name),
        });
    }
    reader.seek(header.data_offset)?;
    let mut enc_header = [0u8; 12];
    reader.read_exact(&mut enc_header, "ZipCrypto header")?;

    let crc_hi = (header.crc32 >> 24) as u8;
    let time_hi = (header.mod_time >> 8) as u8;
    // With a data descriptor the CRC field is not yet final at the local
    // header, so the cipher checks against the mod-time high byte instead.
    let check_byte = if header.flags & 0x8 != 0 { time_hi } else { crc_hi };

    Ok(ArchiveDescriptor {
        path: path.to_path_buf(),
        entry_name: Some(header.name),
        variant: ArchiveVariant::Pkzip(PkzipData {
            compression: header.method,
            crc32: header.crc32,
            mod_time: header.mod_time,
            crc_hi,
            time_hi,
            check_byte,
            header: enc_header,
        }),
    })
}

fn extract_winzip_aes(
    path: &Path,
    reader: &mut BinaryReader,
    header: LocalHeader,
) -> Result<ArchiveDescriptor, CrackError> {
    let marker = find_aes_extra(&header.extra).ok_or_else(|| CrackError::MalformedHeader {
        context: format!("entry '{}' uses method 99 but has no AES extra field", header.name),
    })?;

    // Field layout from the `01 99` marker: id(2) size(2) version(2)
    // vendor(2) strength(1) method(2). The strength byte sits at +8; +4 is
    // the AES version and reading it silently breaks the salt sizing.
    if marker + 11 > header.extra.len() {
        return Err(CrackError::MalformedHeader {
            context: format!("entry '{}': AES extra field truncated", header.name),
        });
    }
    let strength = header.extra[marker + 8];
    if !(1..=3).contains(&strength) {
        return Err(CrackError::MalformedHeader {
            context: format!("entry '{}': AES strength {} out of range", header.name, strength),
        });
    }
    let compression =
        u16::from_le_bytes([header.extra[marker + 9], header.extra[marker + 10]]);

    let salt_len = winzip_salt_len(strength);
    let total = u64::from(header.compressed_size);
    let overhead = salt_len as u64 + 2 + 10;
    let ciphertext_len = total.checked_sub(overhead).filter(|&n| n >= 1).ok_or_else(|| {
        CrackError::MalformedHeader {
            context: format!("entry '{}': encrypted payload smaller than AES overhead", header.name),
        }
    })?;

    reader.seek(header.data_offset)?;
    let salt = reader.read_bytes(salt_len, "WinZip AES salt")?;
    let mut verifier = [0u8; 2];
    reader.read_exact(&mut verifier, "WinZip AES verifier")?;

    let ciphertext_offset = header.data_offset + salt_len as u64 + 2;
    let sample_len = (ciphertext_len as usize).min(MAX_SAMPLE_BYTES);
    let sample = reader.read_bytes(sample_len, "WinZip AES ciphertext")?;

    reader.seek(ciphertext_offset + ciphertext_len)?;
    let mut auth_tag = [0u8; 10];
    reader.read_exact(&mut auth_tag, "WinZip AES auth tag")?;

    Ok(ArchiveDescriptor {
        path: path.to_path_buf(),
        entry_name: Some(header.name),
        variant: ArchiveVariant::WinZipAes(WinZipAesData {
            strength,
            compression,
            salt,
            verifier,
            sample,
            auth_tag,
            ciphertext_offset,
            ciphertext_len,
        }),
    })
}

/// Locates the WinZip AES extra-field record and returns the offset of its
/// header-ID byte. Walks well-formed records first, then falls back to a
/// raw byte scan so a misaligned extra field still resolves.
fn find_aes_extra(extra: &[u8]) -> Option<usize> {
    let mut idx = 0usize;
    while idx + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[idx], extra[idx + 1]]);
        let size = u16::from_le_bytes([extra[idx + 2], extra[idx + 3]]) as usize;
        if id == AES_EXTRA_ID {
            return Some(idx);
        }
        idx += 4 + size;
    }
    // Byte scan fallback: the marker is `01 99` on disk.
    extra.windows(2).position(|w| w == [0x01, 0x99])
}

/// Finds the next local-file-header signature at or after `from`.
fn scan_next_local_sig(
    reader: &mut BinaryReader,
    from: u64,
    budget: &ScanBudget,
) -> Result<Option<u64>, CrackError> {
    const CHUNK: usize = 64 * 1024;
    let sig = LOCAL_FILE_SIG.to_le_bytes();
    let mut offset = from;
    let mut buf = vec![0u8; CHUNK + 3];

    while offset < reader.len() {
        let want = ((reader.len() - offset) as usize).min(buf.len());
        if want < 4 {
            return Ok(None);
        }
        reader.seek(offset)?;
        reader.read_exact(&mut buf[..want], "ZIP signature scan")?;
        for pos in 0..want - 3 {
            if pos % 256 == 0 {
                budget.check()?;
            }
            if buf[pos..pos + 4] == sig {
                return Ok(Some(offset + pos as u64));
            }
        }
        offset += CHUNK as u64;
    }
    Ok(None)
}
