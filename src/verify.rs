//! Authoritative candidate verification.
//!
//! The fast-rejection tests in the workers tolerate false positives; before
//! a `Found` event may be emitted, the candidate must survive the one
//! definitive decryption path its variant has. A `false` here never
//! terminates the attack; the candidate goes into the skip set and the
//! workers keep going.

use std::io::Read;
use std::process::Command;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::{debug, warn};

use crate::crypto;
use crate::fingerprint::{
    ArchiveDescriptor, ArchiveVariant, Rar3Data, Rar3Encryption, Rar5Data, WinZipAesData,
};
use crate::reader::BinaryReader;
use crate::tools::ToolRegistry;
use crate::CrackError;

pub struct Verifier {
    descriptor: Arc<ArchiveDescriptor>,
    tools: ToolRegistry,
}

impl Verifier {
    pub fn new(descriptor: Arc<ArchiveDescriptor>, tools: ToolRegistry) -> Self {
        Self { descriptor, tools }
    }

    /// Whether this verifier has an in-process path that can confirm a
    /// candidate. False only for data-only RAR3 with a compressed entry:
    /// confirming those needs a RAR unpacker, so the external cracker's
    /// own full check is the single authoritative path.
    pub fn confirmable(&self) -> bool {
        match &self.descriptor.variant {
            ArchiveVariant::Rar3(d) => {
                d.encryption == Rar3Encryption::HeadersEncrypted || d.method == 0x30
            }
            _ => true,
        }
    }

    /// Definitive test for a single candidate password.
    ///
    /// `Ok(false)` means "wrong password"; `Err` is reserved for
    /// environmental failures (unreadable archive, missing helper) which
    /// callers treat as soft.
    pub fn verify(&self, password: &str) -> Result<bool, CrackError> {
        match &self.descriptor.variant {
            ArchiveVariant::Pkzip(_) => self.verify_zip_crate(password),
            ArchiveVariant::WinZipAes(data) => self.verify_winzip(data, password),
            ArchiveVariant::Rar5(data) => Ok(verify_rar5(data, password)),
            ArchiveVariant::Rar3(data) => self.verify_rar3(data, password),
            ArchiveVariant::SevenZip(_) => self.verify_seven_zip(password),
        }
    }

    /// PKZIP: full decrypt + CRC over the decompressed stream, through the
    /// zip crate. Any read failure is a CRC mismatch in disguise, so it
    /// counts as a rejection rather than an error.
    fn verify_zip_crate(&self, password: &str) -> Result<bool, CrackError> {
        let file = std::fs::File::open(&self.descriptor.path)
            .map_err(|e| CrackError::io_at(e, &self.descriptor.path))?;
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "archive unreadable during verification");
                return Ok(false);
            }
        };

        for index in 0..archive.len() {
            let entry = match archive.by_index_decrypt(index, password.as_bytes()) {
                Ok(Ok(entry)) => entry,
                _ => continue,
            };
            if let Some(wanted) = &self.descriptor.entry_name {
                if entry.name() != wanted {
                    continue;
                }
            }
            let mut entry = entry;
            let mut sink = [0u8; 4096];
            loop {
                match entry.read(&mut sink) {
                    Ok(0) => return Ok(true),
                    Ok(_) => continue,
                    // Read failure = CRC/stream mismatch: a key collision.
                    Err(_) => break,
                }
            }
        }
        Ok(false)
    }

    /// WinZip AE: derive the key block, check the 2-byte verifier, then
    /// authenticate the whole ciphertext with HMAC-SHA1.
    fn verify_winzip(&self, data: &WinZipAesData, password: &str) -> Result<bool, CrackError> {
        let key_len = crypto::winzip_key_len(data.strength);
        let derived = crypto::winzip_derive(password.as_bytes(), &data.salt, key_len);
        if derived[2 * key_len..] != data.verifier {
            return Ok(false);
        }

        let auth_key = &derived[key_len..2 * key_len];
        let mut mac = Hmac::<Sha1>::new_from_slice(auth_key)
            .map_err(|_| CrackError::UnrecoverableState("HMAC key sizing".into()))?;

        let mut reader = BinaryReader::open(&self.descriptor.path)?;
        reader.seek(data.ciphertext_offset)?;
        let mut remaining = data.ciphertext_len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            reader.read_exact(&mut buf[..take], "WinZip AES ciphertext")?;
            mac.update(&buf[..take]);
            remaining -= take as u64;
        }
        let tag = mac.finalize().into_bytes();
        Ok(tag[..10] == data.auth_tag)
    }

    fn verify_rar3(&self, data: &Rar3Data, password: &str) -> Result<bool, CrackError> {
        // Compressed data-only entries would need a RAR unpacker to confirm
        // anything; the decrypted sample proves nothing either way, so the
        // candidate is rejected before any KDF work is spent on it.
        if data.encryption == Rar3Encryption::DataOnly && data.method != 0x30 {
            debug!("RAR3 compressed entry: no in-process confirmation, rejecting");
            return Ok(false);
        }

        let (key, iv) = crypto::rar3_derive(password, &data.salt);
        match data.encryption {
            Rar3Encryption::HeadersEncrypted => {
                let mut block = data.sample;
                crypto::rar3_decrypt(&key, &iv, &mut block);
                Ok(rar3_block_is_plausible_header(&block))
            }
            Rar3Encryption::DataOnly => self.verify_rar3_stored(data, &key, &iv),
        }
    }

    fn verify_rar3_stored(
        &self,
        data: &Rar3Data,
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> Result<bool, CrackError> {
        let mut reader = BinaryReader::open(&self.descriptor.path)?;
        reader.seek(data.data_offset)?;
        // The packed size is padded up to the cipher block; the CRC covers
        // only the unpacked length.
        let mut buf = reader.read_bytes((data.pack_size as usize) & !15, "RAR3 packed data")?;
        crypto::rar3_decrypt(key, iv, &mut buf);
        buf.truncate(data.unpacked_size.min(buf.len() as u64) as usize);
        let crc = crc32fast::hash(&buf);
        Ok(crc == data.file_crc)
    }

    /// 7-Zip: delegate to the `7z` binary's own integrity test.
    fn verify_seven_zip(&self, password: &str) -> Result<bool, CrackError> {
        let tool = self.tools.require_seven_zip()?;
        let output = Command::new(tool)
            .arg("t")
            .arg(format!("-p{password}"))
            .arg("-y")
            .arg(&self.descriptor.path)
            .output()
            .map_err(|e| CrackError::ExternalToolFailed {
                tool: tool.display().to_string(),
                detail: format!("could not run: {e}"),
            })?;
        Ok(output.status.success())
    }
}

fn verify_rar5(data: &Rar5Data, password: &str) -> bool {
    let check = crypto::rar5_password_check(password.as_bytes(), &data.salt, data.kdf_log);
    crypto::rar5_check_matches(&check, &data.check_value)
}

/// A decrypted RAR3 block that starts a believable header: known block
/// type and a header size that fits the format.
fn rar3_block_is_plausible_header(block: &[u8; 16]) -> bool {
    let block_type = block[2];
    let head_size = u16::from_le_bytes([block[5], block[6]]);
    (0x72..=0x7b).contains(&block_type) && head_size >= 7 && head_size < 0x4000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rar5_check_round_trip() {
        let salt = [9u8; 16];
        let check = crypto::rar5_password_check(b"1234", &salt, 4);
        let mut check_value = [0u8; 12];
        check_value[..8].copy_from_slice(&check);
        check_value[8..].copy_from_slice(&crc32fast::hash(&check).to_le_bytes());

        let data = Rar5Data { kdf_log: 4, salt, check_value };
        assert!(verify_rar5(&data, "1234"));
        assert!(!verify_rar5(&data, "4321"));
    }

    #[test]
    fn plausible_rar3_header_bounds() {
        let mut block = [0u8; 16];
        block[2] = 0x74; // file header
        block[5] = 0x30;
        block[6] = 0x00;
        assert!(rar3_block_is_plausible_header(&block));

        block[2] = 0x10; // unknown type
        assert!(!rar3_block_is_plausible_header(&block));

        block[2] = 0x74;
        block[5] = 0x03; // size 3 < minimal header
        block[6] = 0x00;
        assert!(!rar3_block_is_plausible_header(&block));
    }
}
