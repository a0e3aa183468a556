//! Archive fingerprinting.
//!
//! Given a file, decide which encryption family it belongs to and locate the
//! encrypted entry to attack. The quick path checks the signature at offset
//! zero; inconclusive files get a bounded, cancellable deep scan for embedded
//! containers (SFX installers and friends).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::extract;
use crate::reader::BinaryReader;
use crate::tools::ToolRegistry;
use crate::CrackError;

/// Deep-scan limit for files over [`LARGE_FILE_THRESHOLD`].
const DEEP_SCAN_LIMIT_LARGE: u64 = 5 * 1024 * 1024;
/// Deep-scan limit for everything else.
const DEEP_SCAN_LIMIT_SMALL: u64 = 10 * 1024 * 1024;
const LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;
/// How far into an MZ executable we look for an embedded ZIP.
const SFX_SCAN_LIMIT: u64 = 10 * 1024 * 1024;
/// Cancellation check granularity during scans, in bytes.
const SCAN_CHECK_GRANULARITY: usize = 256;

const ZIP_LOCAL_SIG: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const RAR3_SIG: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];
const RAR5_SIG: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x01, 0x00];
const SEVENZIP_SIG: [u8; 6] = [0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c];

/// PKZIP (ZipCrypto) verification data.
#[derive(Debug, Clone)]
pub struct PkzipData {
    /// ZIP compression method of the encrypted entry.
    pub compression: u16,
    pub crc32: u32,
    pub mod_time: u16,
    /// High byte of the CRC, as stored in the canonical hash.
    pub crc_hi: u8,
    /// High byte of the DOS mod time.
    pub time_hi: u8,
    /// The byte the 12th decrypted header byte must match. Equals `time_hi`
    /// when the entry uses a data descriptor, `crc_hi` otherwise.
    pub check_byte: u8,
    /// The 12-byte ZipCrypto encryption header.
    pub header: [u8; 12],
}

/// WinZip AE-1/AE-2 verification data.
#[derive(Debug, Clone)]
pub struct WinZipAesData {
    /// AES strength: 1=128, 2=192, 3=256. Uniquely determines the salt size.
    pub strength: u8,
    /// The actual compression method from the AES extra field.
    pub compression: u16,
    pub salt: Vec<u8>,
    /// 2-byte PBKDF2 password verifier.
    pub verifier: [u8; 2],
    /// Leading ciphertext, clipped to 32 KiB.
    pub sample: Vec<u8>,
    /// 10-byte HMAC-SHA1 authentication tag.
    pub auth_tag: [u8; 10],
    /// Absolute offset of the full ciphertext in the archive file.
    pub ciphertext_offset: u64,
    pub ciphertext_len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rar3Encryption {
    /// `-hp` style: headers themselves are encrypted.
    HeadersEncrypted,
    /// `-p` style: file data only.
    DataOnly,
}

/// RAR3 verification data.
#[derive(Debug, Clone)]
pub struct Rar3Data {
    pub encryption: Rar3Encryption,
    /// 8-byte KDF salt; all zeros when the header carried none.
    pub salt: [u8; 8],
    pub salt_present: bool,
    /// First 16 bytes of the encrypted block.
    pub sample: [u8; 16],
    /// RAR compression method byte (0x30 = store).
    pub method: u8,
    pub file_crc: u32,
    pub pack_size: u64,
    pub unpacked_size: u64,
    /// Absolute offset of the encrypted data.
    pub data_offset: u64,
}

/// RAR5 verification data.
#[derive(Debug, Clone)]
pub struct Rar5Data {
    /// log2 of the PBKDF2 iteration count.
    pub kdf_log: u32,
    pub salt: [u8; 16],
    /// 8 password-check bytes plus their CRC32.
    pub check_value: [u8; 12],
}

/// 7-Zip: the canonical hash comes from external tooling.
#[derive(Debug, Clone)]
pub struct SevenZipData {
    pub hash_line: String,
}

/// The closed set of attackable archive variants.
#[derive(Debug, Clone)]
pub enum ArchiveVariant {
    Pkzip(PkzipData),
    WinZipAes(WinZipAesData),
    Rar3(Rar3Data),
    Rar5(Rar5Data),
    SevenZip(SevenZipData),
}

/// Everything the workers need to test passwords offline. Created on file
/// selection, immutable thereafter.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
    pub path: PathBuf,
    /// Name of the encrypted entry, when the container exposes one.
    pub entry_name: Option<String>,
    pub variant: ArchiveVariant,
}

impl ArchiveDescriptor {
    pub fn variant_tag(&self) -> &'static str {
        match &self.variant {
            ArchiveVariant::Pkzip(_) => "pkzip",
            ArchiveVariant::WinZipAes(_) => "winzip-aes",
            ArchiveVariant::Rar3(_) => "rar3",
            ArchiveVariant::Rar5(_) => "rar5",
            ArchiveVariant::SevenZip(_) => "7z",
        }
    }
}

/// Wall-clock budget and cancellation for one fingerprint run.
#[derive(Clone)]
pub struct FingerprintOptions {
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(8), cancel: CancelToken::new() }
    }
}

/// Deadline + cancellation, checked from the scan inner loops.
pub(crate) struct ScanBudget {
    deadline: Instant,
    budget_secs: u64,
    cancel: CancelToken,
}

impl ScanBudget {
    fn new(opts: &FingerprintOptions) -> Self {
        Self {
            deadline: Instant::now() + opts.timeout,
            budget_secs: opts.timeout.as_secs(),
            cancel: opts.cancel.clone(),
        }
    }

    pub(crate) fn check(&self) -> Result<(), CrackError> {
        if self.cancel.is_cancelled() {
            return Err(CrackError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(CrackError::DetectionTimeout { budget_secs: self.budget_secs });
        }
        Ok(())
    }
}

/// Where the quick/deep scan located a container.
enum Container {
    Zip { offset: u64 },
    Rar3 { offset: u64 },
    Rar5 { offset: u64 },
    SevenZip,
}

/// Fingerprints `path` and extracts its password-verification data.
///
/// `tools` is only consulted for 7-Zip archives, whose hash extraction is
/// delegated to an external helper.
pub fn fingerprint(
    path: &Path,
    opts: &FingerprintOptions,
    tools: &ToolRegistry,
) -> Result<ArchiveDescriptor, CrackError> {
    let mut reader = BinaryReader::open(path)?;
    if reader.len() < 4 {
        return Err(CrackError::TooSmall { path: path.to_path_buf(), size: reader.len() });
    }

    let budget = ScanBudget::new(opts);
    let container = classify(&mut reader, &budget)?;
    match container {
        Container::Zip { offset } => extract::zip::extract(path, &mut reader, offset, &budget),
        Container::Rar3 { offset } => extract::rar::extract_rar3(path, &mut reader, offset, &budget),
        Container::Rar5 { offset } => extract::rar::extract_rar5(path, &mut reader, offset, &budget),
        Container::SevenZip => extract::sevenzip::extract(path, tools),
    }
}

/// Retry wrapper around [`fingerprint`]: up to `attempts` tries with
/// exponential back-off, doubling the timeout after a `DetectionTimeout`.
/// Permanent verdicts (unsupported, too small, no encrypted entry) are
/// returned immediately.
pub fn fingerprint_with_retry(
    path: &Path,
    opts: &FingerprintOptions,
    tools: &ToolRegistry,
    attempts: u32,
) -> Result<ArchiveDescriptor, CrackError> {
    let mut opts = opts.clone();
    let mut backoff = Duration::from_millis(200);
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match fingerprint(path, &opts, tools) {
            Ok(descriptor) => return Ok(descriptor),
            Err(e @ (CrackError::DetectionTimeout { .. } | CrackError::Io { .. })) => {
                debug!(attempt, error = %e, "fingerprint attempt failed, retrying");
                if matches!(e, CrackError::DetectionTimeout { .. }) {
                    opts.timeout *= 2;
                }
                last_err = Some(e);
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(CrackError::Cancelled))
}

fn classify(reader: &mut BinaryReader, budget: &ScanBudget) -> Result<Container, CrackError> {
    let head_len = (reader.len() as usize).min(8);
    reader.seek(0)?;
    let head = reader.read_bytes(head_len, "file signature")?;

    if head.starts_with(&ZIP_LOCAL_SIG) {
        return Ok(Container::Zip { offset: 0 });
    }
    if head.starts_with(&RAR5_SIG) {
        return Ok(Container::Rar5 { offset: 0 });
    }
    if head.starts_with(&RAR3_SIG) {
        return Ok(Container::Rar3 { offset: 0 });
    }
    if head.starts_with(&SEVENZIP_SIG) {
        return Ok(Container::SevenZip);
    }
    if head.starts_with(b"MZ") {
        // SFX candidate: executable stub with an embedded archive.
        let limit = SFX_SCAN_LIMIT.min(reader.len());
        return match scan_for_signatures(reader, 0, limit, 1, budget)? {
            Some(container) => Ok(container),
            None => Err(CrackError::Unsupported {
                detail: "executable without an embedded archive".into(),
            }),
        };
    }
    if head.starts_with(&[0x1f, 0x8b]) || head.starts_with(b"BZ") || head.starts_with(&[0xfd, 0x37, 0x7a, 0x58]) {
        return Err(CrackError::Unsupported {
            detail: "compressed TAR archives cannot be attacked".into(),
        });
    }
    if reader.len() >= 257 + 5 {
        reader.seek(257)?;
        let magic = reader.read_bytes(5, "tar magic")?;
        if magic == b"ustar" {
            return Err(CrackError::Unsupported { detail: "plain TAR archives carry no encryption".into() });
        }
    }

    // Inconclusive: bounded deep scan for an embedded container.
    let limit = if reader.len() > LARGE_FILE_THRESHOLD {
        DEEP_SCAN_LIMIT_LARGE
    } else {
        DEEP_SCAN_LIMIT_SMALL
    }
    .min(reader.len());
    match scan_for_signatures(reader, 0, limit, 4, budget)? {
        Some(container) => Ok(container),
        None => Err(CrackError::Unsupported { detail: "no known archive signature found".into() }),
    }
}

/// Scans `[start, start+limit)` for ZIP/RAR/7-Zip signatures, stepping
/// `step` bytes. The budget is checked at least every 256 bytes of input.
fn scan_for_signatures(
    reader: &mut BinaryReader,
    start: u64,
    limit: u64,
    step: usize,
    budget: &ScanBudget,
) -> Result<Option<Container>, CrackError> {
    const CHUNK: usize = 64 * 1024;
    // Longest signature is 8 bytes; overlap chunk reads so a signature
    // straddling a boundary is still seen.
    const OVERLAP: usize = 7;

    let end = start + limit;
    let mut chunk_start = start;
    let mut buf = vec![0u8; CHUNK + OVERLAP];

    while chunk_start < end {
        let want = ((end - chunk_start) as usize + OVERLAP).min(buf.len());
        reader.seek(chunk_start)?;
        let got = read_up_to(reader, &mut buf[..want])?;
        if got < 4 {
            break;
        }

        let mut pos = 0usize;
        while pos + 4 <= got {
            if pos % SCAN_CHECK_GRANULARITY < step {
                budget.check()?;
            }
            let window = &buf[pos..got];
            let absolute = chunk_start + pos as u64;
            if window.starts_with(&ZIP_LOCAL_SIG) {
                return Ok(Some(Container::Zip { offset: absolute }));
            }
            if window.starts_with(&RAR5_SIG) {
                return Ok(Some(Container::Rar5 { offset: absolute }));
            }
            if window.starts_with(&RAR3_SIG) {
                return Ok(Some(Container::Rar3 { offset: absolute }));
            }
            if window.starts_with(&SEVENZIP_SIG) {
                return Ok(Some(Container::SevenZip));
            }
            pos += step;
        }
        chunk_start += CHUNK as u64;
    }
    Ok(None)
}

/// Best-effort read: fills as much of `buf` as the file still has.
fn read_up_to(reader: &mut BinaryReader, buf: &mut [u8]) -> Result<usize, CrackError> {
    let remaining = reader.len().saturating_sub(reader.position()?) as usize;
    let n = remaining.min(buf.len());
    reader.read_exact(&mut buf[..n], "deep scan chunk")?;
    Ok(n)
}
