//! RAR3 and RAR5 extraction.

use std::path::Path;

use tracing::debug;

use crate::fingerprint::{
    ArchiveDescriptor, ArchiveVariant, Rar3Data, Rar3Encryption, Rar5Data, ScanBudget,
};
use crate::reader::BinaryReader;
use crate::CrackError;

const RAR3_SIG_LEN: u64 = 7;
const RAR5_SIG_LEN: u64 = 8;

/// RAR3 block type: file header.
const RAR3_FILE_BLOCK: u8 = 0x74;
/// RAR3 generic flag: the block carries an ADD_SIZE data area.
const RAR3_ADD_SIZE_FLAG: u16 = 0x8000;
/// File is encrypted.
const RAR3_ENCRYPTED_FLAG: u16 = 0x0004;
/// An 8-byte KDF salt follows the file metadata.
const RAR3_SALT_FLAG: u16 = 0x0100;
/// The archive encrypts its headers, not just file data.
const RAR3_HEADERS_ENC_FLAG: u16 = 0x0200;

/// RAR5 header type: archive encryption record.
const RAR5_CRYPT_HEADER: u64 = 4;

/// Walks RAR3 blocks from the signature at `base_offset` and captures the
/// verification data of the first encrypted file.
pub(crate) fn extract_rar3(
    path: &Path,
    reader: &mut BinaryReader,
    base_offset: u64,
    budget: &ScanBudget,
) -> Result<ArchiveDescriptor, CrackError> {
    let mut offset = base_offset + RAR3_SIG_LEN;

    while offset + 7 <= reader.len() {
        budget.check()?;
        reader.seek(offset)?;
        let _head_crc = reader.read_u16_le("RAR3 block header")?;
        let block_type = reader.read_u8("RAR3 block header")?;
        let flags = reader.read_u16_le("RAR3 block header")?;
        let head_size = reader.read_u16_le("RAR3 block header")?;
        if head_size == 0 {
            // A zero-size header cannot advance the walk.
            break;
        }
        if head_size < 7 {
            return Err(CrackError::MalformedHeader {
                context: format!("RAR3 block 0x{block_type:02x} with header size {head_size}"),
            });
        }

        if block_type == RAR3_FILE_BLOCK {
            let pack_size = u64::from(reader.read_u32_le("RAR3 file header")?);
            let unpacked_size = u64::from(reader.read_u32_le("RAR3 file header")?);
            let _host_os = reader.read_u8("RAR3 file header")?;
            let file_crc = reader.read_u32_le("RAR3 file header")?;
            let _ftime = reader.read_u32_le("RAR3 file header")?;
            let _unp_ver = reader.read_u8("RAR3 file header")?;
            let method = reader.read_u8("RAR3 file header")?;
            let name_size = reader.read_u16_le("RAR3 file header")? as usize;
            let _attr = reader.read_u32_le("RAR3 file header")?;
            let name_bytes = reader.read_bytes(name_size, "RAR3 file name")?;

            if flags & RAR3_ENCRYPTED_FLAG != 0 {
                let salt_present = flags & RAR3_SALT_FLAG != 0;
                let mut salt = [0u8; 8];
                if salt_present {
                    reader.read_exact(&mut salt, "RAR3 salt")?;
                }

                let data_offset = offset + u64::from(head_size);
                if pack_size < 16 {
                    return Err(CrackError::MalformedHeader {
                        context: "RAR3 encrypted block shorter than one cipher block".into(),
                    });
                }
                reader.seek(data_offset)?;
                let mut sample = [0u8; 16];
                reader.read_exact(&mut sample, "RAR3 encrypted block")?;

                let encryption = if flags & RAR3_HEADERS_ENC_FLAG != 0 {
                    Rar3Encryption::HeadersEncrypted
                } else {
                    Rar3Encryption::DataOnly
                };
                debug!(entry = %String::from_utf8_lossy(&name_bytes), ?encryption, "found encrypted RAR3 entry");

                return Ok(ArchiveDescriptor {
                    path: path.to_path_buf(),
                    entry_name: Some(String::from_utf8_lossy(&name_bytes).into_owned()),
                    variant: ArchiveVariant::Rar3(Rar3Data {
                        encryption,
                        salt,
                        salt_present,
                        sample,
                        method,
                        file_crc,
                        pack_size,
                        unpacked_size,
                        data_offset,
                    }),
                });
            }

            // A file block advances by its header plus its packed data.
            offset += u64::from(head_size) + pack_size;
        } else {
            // Non-file blocks advance by their header, plus the ADD_SIZE
            // area when the flag announces one.
            let mut advance = u64::from(head_size);
            if flags & RAR3_ADD_SIZE_FLAG != 0 {
                let add_size = reader.read_u32_le("RAR3 add size")?;
                advance += u64::from(add_size);
            }
            offset += advance;
        }
    }

    Err(CrackError::NoEncryptedEntry)
}

/// Walks RAR5 headers from the signature at `base_offset` until the
/// archive encryption record (type 4).
pub(crate) fn extract_rar5(
    path: &Path,
    reader: &mut BinaryReader,
    base_offset: u64,
    budget: &ScanBudget,
) -> Result<ArchiveDescriptor, CrackError> {
    let mut offset = base_offset + RAR5_SIG_LEN;

    while offset + 5 <= reader.len() {
        budget.check()?;
        reader.seek(offset)?;
        let _head_crc = reader.read_u32_le("RAR5 header")?;
        let head_size = reader.read_vint("RAR5 header size")?;
        if head_size == 0 {
            break;
        }
        // The size counts from the header-type field onward.
        let body_start = reader.position()?;
        let head_type = reader.read_vint("RAR5 header type")?;

        if head_type == RAR5_CRYPT_HEADER {
            let _flags = reader.read_vint("RAR5 encryption header")?;
            let version = reader.read_vint("RAR5 encryption header")?;
            let _enc_flags = reader.read_vint("RAR5 encryption header")?;
            let kdf_count = reader.read_vint("RAR5 encryption header")?;
            if version != 0 {
                return Err(CrackError::MalformedHeader {
                    context: format!("RAR5 encryption version {version} is unknown"),
                });
            }
            let mut salt = [0u8; 16];
            reader.read_exact(&mut salt, "RAR5 salt")?;
            let mut check_value = [0u8; 12];
            reader.read_exact(&mut check_value, "RAR5 check value")?;

            debug!(kdf_log = kdf_count, "found RAR5 encryption header");
            return Ok(ArchiveDescriptor {
                path: path.to_path_buf(),
                entry_name: None,
                variant: ArchiveVariant::Rar5(Rar5Data {
                    kdf_log: kdf_count as u32,
                    salt,
                    check_value,
                }),
            });
        }

        offset = body_start + head_size;
    }

    Err(CrackError::NoEncryptedEntry)
}
