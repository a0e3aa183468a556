//! Random-access binary reader over an archive file.
//!
//! All archive parsers in this crate read through [`BinaryReader`]: shared
//! read-only access, absolute seeks, little-endian fixed-width integers and
//! RAR5 variable-length integers. Short reads never return partial data.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::CrackError;

/// Maximum number of bytes a RAR5 vint may occupy.
const VINT_MAX_BYTES: usize = 10;

/// A positioned reader over an archive opened for shared read.
pub struct BinaryReader {
    file: File,
    len: u64,
}

impl BinaryReader {
    /// Opens `path` read-only.
    pub fn open(path: &Path) -> Result<Self, CrackError> {
        let file = File::open(path).map_err(|e| CrackError::io_at(e, path))?;
        let len = file
            .metadata()
            .map_err(|e| CrackError::io_at(e, path))?
            .len();
        Ok(Self { file, len })
    }

    /// Total file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Moves the cursor to an absolute offset.
    pub fn seek(&mut self, offset: u64) -> Result<(), CrackError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Current cursor position.
    pub fn position(&mut self) -> Result<u64, CrackError> {
        Ok(self.file.stream_position()?)
    }

    /// Reads exactly `buf.len()` bytes or fails with `Truncated`.
    pub fn read_exact(&mut self, buf: &mut [u8], context: &'static str) -> Result<(), CrackError> {
        self.file
            .read_exact(buf)
            .map_err(|_| CrackError::Truncated { context })
    }

    /// Reads a fixed-length byte run.
    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<Vec<u8>, CrackError> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf, context)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, CrackError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf, context)?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self, context: &'static str) -> Result<u16, CrackError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf, context)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self, context: &'static str) -> Result<u32, CrackError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, context)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self, context: &'static str) -> Result<u64, CrackError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf, context)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a RAR5 variable-length integer: 7 payload bits per byte, low
    /// byte first, terminated by a byte with the MSB clear. Fails after 10
    /// bytes so a corrupt stream cannot loop forever.
    pub fn read_vint(&mut self, context: &'static str) -> Result<u64, CrackError> {
        let mut value: u64 = 0;
        for i in 0..VINT_MAX_BYTES {
            let byte = self.read_u8(context)?;
            value |= u64::from(byte & 0x7f) << (7 * i as u32);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CrackError::MalformedHeader {
            context: format!("vint longer than {} bytes in {}", VINT_MAX_BYTES, context),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reader_over(bytes: &[u8]) -> BinaryReader {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let r = BinaryReader::open(tmp.path()).unwrap();
        // Keep the temp file alive for the duration of the test.
        std::mem::forget(tmp);
        r
    }

    #[test]
    fn fixed_width_integers() {
        let mut r = reader_over(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(r.read_u8("t").unwrap(), 0x01);
        r.seek(0).unwrap();
        assert_eq!(r.read_u16_le("t").unwrap(), 0x0201);
        r.seek(0).unwrap();
        assert_eq!(r.read_u32_le("t").unwrap(), 0x04030201);
        r.seek(0).unwrap();
        assert_eq!(r.read_u64_le("t").unwrap(), 0x0807060504030201);
    }

    #[test]
    fn short_read_is_truncated() {
        let mut r = reader_over(&[0xaa, 0xbb]);
        assert!(matches!(
            r.read_u32_le("test header"),
            Err(CrackError::Truncated { .. })
        ));
    }

    #[test]
    fn vint_single_byte() {
        let mut r = reader_over(&[0x07]);
        assert_eq!(r.read_vint("t").unwrap(), 7);
    }

    #[test]
    fn vint_multi_byte_low_first() {
        // 0x96 -> continuation with payload 0x16; 0x01 -> final payload 1.
        // value = 0x16 | (1 << 7) = 0x96 = 150
        let mut r = reader_over(&[0x96, 0x01]);
        assert_eq!(r.read_vint("t").unwrap(), 150);
    }

    #[test]
    fn vint_at_ten_byte_limit() {
        // Nine continuation bytes followed by a terminator is accepted.
        let mut bytes = vec![0x80u8; 9];
        bytes.push(0x01);
        let mut r = reader_over(&bytes);
        assert_eq!(r.read_vint("t").unwrap(), 1u64 << 63);

        // Ten continuation bytes is malformed.
        let mut r = reader_over(&[0x80u8; 11]);
        assert!(matches!(
            r.read_vint("t"),
            Err(CrackError::MalformedHeader { .. })
        ));
    }
}
