//! # Hash extraction
//!
//! Per-variant readers that pull the salt, password verifier, ciphertext
//! sample and authentication tag out of an archive, plus the canonical
//! ASCII hash serialization consumed by the external GPU cracker.

pub mod rar;
pub mod sevenzip;
pub mod zip;

use crate::fingerprint::{ArchiveDescriptor, ArchiveVariant, Rar3Encryption};

/// Maximum ciphertext carried in a WinZip AES hash string.
pub const MAX_SAMPLE_BYTES: usize = 32 * 1024;

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

impl ArchiveDescriptor {
    /// The canonical hash string for this archive, in the format the GPU
    /// cracker consumes.
    pub fn hash_line(&self) -> String {
        match &self.variant {
            ArchiveVariant::Pkzip(d) => format!(
                "$pkzip2$*{}*0*{:02x}*{:02x}*{}*$/pkzip2$",
                d.compression,
                d.crc_hi,
                d.time_hi,
                hex(&d.header),
            ),
            ArchiveVariant::WinZipAes(d) => format!(
                "$zip2$*0*{}*0*{}*{}*{:x}*{}*{}*$/zip2$",
                d.strength,
                hex(&d.salt),
                hex(&d.verifier),
                d.sample.len(),
                hex(&d.sample),
                hex(&d.auth_tag),
            ),
            ArchiveVariant::Rar5(d) => format!(
                "$rar5$16${}$15${}$8${}",
                hex(&d.salt),
                hex(&d.check_value),
                d.kdf_log,
            ),
            ArchiveVariant::Rar3(d) => format!(
                "$RAR3$*{}*{}*{}",
                match d.encryption {
                    Rar3Encryption::HeadersEncrypted => 0,
                    Rar3Encryption::DataOnly => 1,
                },
                hex(&d.salt),
                hex(&d.sample),
            ),
            ArchiveVariant::SevenZip(d) => d.hash_line.clone(),
        }
    }

    /// The hashcat `-m` mode matching this archive.
    pub fn hashcat_mode(&self) -> u32 {
        match &self.variant {
            ArchiveVariant::Pkzip(d) => match d.compression {
                0 => 17210,
                8 => 17200,
                9 => 17220,
                14 => 17225,
                2..=5 => 17230,
                _ => 17200,
            },
            ArchiveVariant::WinZipAes(_) => 13600,
            ArchiveVariant::Rar3(d) => match d.encryption {
                Rar3Encryption::HeadersEncrypted => 12500,
                Rar3Encryption::DataOnly => 23800,
            },
            ArchiveVariant::Rar5(_) => 13000,
            ArchiveVariant::SevenZip(_) => 11600,
        }
    }
}
