//! Shared fixture builders: minimal but structurally valid encrypted
//! archives, synthesized byte-by-byte so tests control every field.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use rand::{thread_rng, Rng};
use sha1::Sha1;

use blitzcrack::crypto;

/// ZipCrypto key state, encryption side. The crate only ever decrypts;
/// fixtures need the forward direction.
struct ZipCryptoEncryptor {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl ZipCryptoEncryptor {
    fn new(password: &[u8]) -> Self {
        let mut keys = Self { k0: 0x12345678, k1: 0x23456789, k2: 0x34567890 };
        for &c in password {
            keys.update(c);
        }
        keys
    }

    fn update(&mut self, c: u8) {
        self.k0 = crc32_lut(self.k0, c);
        self.k1 = self.k1.wrapping_add(self.k0 & 0xff);
        self.k1 = self.k1.wrapping_mul(134775813).wrapping_add(1);
        self.k2 = crc32_lut(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) & 0xffff;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn encrypt(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &plain in data {
            out.push(plain ^ self.stream_byte());
            self.update(plain);
        }
        out
    }
}

fn crc32_lut(crc: u32, b: u8) -> u32 {
    let mut rmd = u32::from((crc as u8) ^ b);
    for _ in 0..8 {
        rmd = if rmd & 1 != 0 { (rmd >> 1) ^ 0xEDB88320 } else { rmd >> 1 };
    }
    rmd ^ (crc >> 8)
}

fn le16(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}

fn le32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Raw deflate encoding of `data` as a single stored block.
fn deflate_stored(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u16;
    let mut out = vec![0x01];
    out.extend_from_slice(&le16(len));
    out.extend_from_slice(&le16(!len));
    out.extend_from_slice(data);
    out
}

/// Builds a ZIP holding one ZipCrypto-encrypted entry.
///
/// `method` must be 0 (store) or 8 (deflate; encoded as a stored deflate
/// block so any inflater can round-trip it).
pub fn build_pkzip_archive(dir: &Path, password: &str, plaintext: &[u8], method: u16) -> PathBuf {
    let crc = crc32fast::hash(plaintext);
    let compressed = match method {
        0 => plaintext.to_vec(),
        8 => deflate_stored(plaintext),
        other => panic!("unsupported fixture method {other}"),
    };

    // 12-byte encryption header: random filler, with the last byte
    // echoing the CRC high byte.
    let mut enc_header = [0u8; 12];
    thread_rng().fill(&mut enc_header[..11]);
    enc_header[11] = (crc >> 24) as u8;

    let mut cipher = ZipCryptoEncryptor::new(password.as_bytes());
    let mut payload = cipher.encrypt(&enc_header);
    payload.extend(cipher.encrypt(&compressed));

    let name = b"secret.txt";
    let comp_size = payload.len() as u32;
    let uncomp_size = plaintext.len() as u32;

    let mut local = Vec::new();
    local.extend_from_slice(&le32(0x0403_4b50));
    local.extend_from_slice(&le16(20)); // version needed
    local.extend_from_slice(&le16(0x0001)); // encrypted
    local.extend_from_slice(&le16(method));
    local.extend_from_slice(&le16(0x6000)); // mod time
    local.extend_from_slice(&le16(0x5800)); // mod date
    local.extend_from_slice(&le32(crc));
    local.extend_from_slice(&le32(comp_size));
    local.extend_from_slice(&le32(uncomp_size));
    local.extend_from_slice(&le16(name.len() as u16));
    local.extend_from_slice(&le16(0)); // extra len
    local.extend_from_slice(name);

    let mut bytes = local.clone();
    bytes.extend_from_slice(&payload);

    let central_offset = bytes.len() as u32;
    bytes.extend_from_slice(&le32(0x0201_4b50));
    bytes.extend_from_slice(&le16(20)); // version made by
    bytes.extend_from_slice(&le16(20)); // version needed
    bytes.extend_from_slice(&le16(0x0001));
    bytes.extend_from_slice(&le16(method));
    bytes.extend_from_slice(&le16(0x6000));
    bytes.extend_from_slice(&le16(0x5800));
    bytes.extend_from_slice(&le32(crc));
    bytes.extend_from_slice(&le32(comp_size));
    bytes.extend_from_slice(&le32(uncomp_size));
    bytes.extend_from_slice(&le16(name.len() as u16));
    bytes.extend_from_slice(&le16(0)); // extra
    bytes.extend_from_slice(&le16(0)); // comment
    bytes.extend_from_slice(&le16(0)); // disk start
    bytes.extend_from_slice(&le16(0)); // internal attrs
    bytes.extend_from_slice(&le32(0)); // external attrs
    bytes.extend_from_slice(&le32(0)); // local header offset
    bytes.extend_from_slice(name);
    let central_size = bytes.len() as u32 - central_offset;

    bytes.extend_from_slice(&le32(0x0605_4b50));
    bytes.extend_from_slice(&le16(0)); // disk
    bytes.extend_from_slice(&le16(0)); // cd disk
    bytes.extend_from_slice(&le16(1)); // entries this disk
    bytes.extend_from_slice(&le16(1)); // entries total
    bytes.extend_from_slice(&le32(central_size));
    bytes.extend_from_slice(&le32(central_offset));
    bytes.extend_from_slice(&le16(0)); // comment len

    let path = dir.join("pkzip.zip");
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Builds a ZIP holding one WinZip AES entry. The ciphertext is synthetic;
/// the password verifier and authentication tag are derived for real from
/// `password`, so the AES verifier path works end to end.
pub fn build_winzip_aes_archive(dir: &Path, password: &str, strength: u8) -> PathBuf {
    let mut rng = thread_rng();
    let salt_len = crypto::winzip_salt_len(strength);
    let key_len = crypto::winzip_key_len(strength);
    let mut salt = vec![0u8; salt_len];
    rng.fill(&mut salt[..]);

    let derived = crypto::winzip_derive(password.as_bytes(), &salt, key_len);
    let verifier = &derived[2 * key_len..];
    let auth_key = &derived[key_len..2 * key_len];

    let mut ciphertext = vec![0u8; 40];
    rng.fill(&mut ciphertext[..]);
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(auth_key).unwrap();
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut payload = salt.clone();
    payload.extend_from_slice(verifier);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&tag[..10]);

    // AE extra field: id, size, AE version, vendor "AE", strength, method.
    let mut extra = Vec::new();
    extra.extend_from_slice(&le16(0x9901));
    extra.extend_from_slice(&le16(7));
    extra.extend_from_slice(&le16(0x0002));
    extra.extend_from_slice(&le16(0x4541));
    extra.push(strength);
    extra.extend_from_slice(&le16(0));

    let path = dir.join("winzip-aes.zip");
    std::fs::write(&path, winzip_zip_bytes(&payload, &extra)).unwrap();
    path
}

/// Like [`build_winzip_aes_archive`] but with one garbage byte before the
/// AES extra field, so only the marker scan can find it.
pub fn build_winzip_aes_archive_misaligned(dir: &Path, password: &str) -> PathBuf {
    let strength = 3u8;
    let salt_len = crypto::winzip_salt_len(strength);
    let key_len = crypto::winzip_key_len(strength);
    let mut salt = vec![0u8; salt_len];
    thread_rng().fill(&mut salt[..]);

    let derived = crypto::winzip_derive(password.as_bytes(), &salt, key_len);
    let mut payload = salt.clone();
    payload.extend_from_slice(&derived[2 * key_len..]);
    payload.extend_from_slice(&[0xdd; 24]);
    payload.extend_from_slice(&[0xee; 10]);

    let mut extra = vec![0xff]; // misalignment byte
    extra.extend_from_slice(&le16(0x9901));
    extra.extend_from_slice(&le16(7));
    extra.extend_from_slice(&le16(0x0002));
    extra.extend_from_slice(&le16(0x4541));
    extra.push(strength);
    extra.extend_from_slice(&le16(0));

    let path = dir.join("winzip-aes-misaligned.zip");
    std::fs::write(&path, winzip_zip_bytes(&payload, &extra)).unwrap();
    path
}

fn winzip_zip_bytes(payload: &[u8], extra: &[u8]) -> Vec<u8> {
    let name = b"secret.bin";
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&le32(0x0403_4b50));
    bytes.extend_from_slice(&le16(51));
    bytes.extend_from_slice(&le16(0x0001));
    bytes.extend_from_slice(&le16(99)); // AES marker method
    bytes.extend_from_slice(&le16(0x6000));
    bytes.extend_from_slice(&le16(0x5800));
    bytes.extend_from_slice(&le32(0)); // AE-2: crc zeroed
    bytes.extend_from_slice(&le32(payload.len() as u32));
    bytes.extend_from_slice(&le32(24));
    bytes.extend_from_slice(&le16(name.len() as u16));
    bytes.extend_from_slice(&le16(extra.len() as u16));
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(extra);
    bytes.extend_from_slice(payload);
    bytes
}

/// Builds a minimal RAR5 archive: signature plus the archive encryption
/// header with a real derived check value.
pub fn build_rar5_archive(dir: &Path, password: &str, kdf_log: u32) -> PathBuf {
    let mut salt = [0u8; 16];
    thread_rng().fill(&mut salt[..]);
    let check = crypto::rar5_password_check(password.as_bytes(), &salt, kdf_log);
    let mut check_value = [0u8; 12];
    check_value[..8].copy_from_slice(&check);
    check_value[8..].copy_from_slice(&crc32fast::hash(&check).to_le_bytes());

    let mut bytes = vec![0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x01, 0x00];
    bytes.extend_from_slice(&le32(0)); // header CRC, unchecked
    // body: type, flags, version, enc flags, kdf count, salt, check value
    let body_len = 5 + 16 + 12;
    bytes.push(body_len as u8); // header size vint
    bytes.push(4); // type: encryption
    bytes.push(0); // flags
    bytes.push(0); // version
    bytes.push(0x01); // enc flags: password check present
    bytes.push(kdf_log as u8);
    bytes.extend_from_slice(&salt);
    bytes.extend_from_slice(&check_value);

    let path = dir.join("archive.rar5");
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Builds a RAR3 archive with one encrypted *stored* file, encrypted for
/// real with the RAR3 key schedule, so the store-mode verifier works.
pub fn build_rar3_archive(dir: &Path, password: &str, plaintext: &[u8], headers_encrypted: bool) -> PathBuf {
    build_rar3(dir, password, plaintext, headers_encrypted, 0x30)
}

/// Like [`build_rar3_archive`] but the entry claims a compressed method,
/// the shape with no in-process verification path.
pub fn build_rar3_compressed_archive(dir: &Path, password: &str, plaintext: &[u8]) -> PathBuf {
    build_rar3(dir, password, plaintext, false, 0x33)
}

fn build_rar3(
    dir: &Path,
    password: &str,
    plaintext: &[u8],
    headers_encrypted: bool,
    method: u8,
) -> PathBuf {
    let mut salt = [0u8; 8];
    thread_rng().fill(&mut salt[..]);
    let (key, iv) = crypto::rar3_derive(password, &salt);

    let mut padded = plaintext.to_vec();
    while padded.len() % 16 != 0 {
        padded.push(0);
    }
    let ciphertext = aes_cbc_encrypt(&key, &iv, &padded);
    let file_crc = crc32fast::hash(plaintext);

    let name = b"doc.bin";
    // salt flag (bit 8) + encrypted flag (bit 2), optionally bit 9.
    let mut flags: u16 = 0x0104;
    if headers_encrypted {
        flags |= 0x0200;
    }
    let head_size = (7 + 25 + name.len() + 8) as u16;

    let mut bytes = vec![0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];
    bytes.extend_from_slice(&le16(0)); // head crc, unchecked
    bytes.push(0x74); // file block
    bytes.extend_from_slice(&le16(flags));
    bytes.extend_from_slice(&le16(head_size));
    bytes.extend_from_slice(&le32(ciphertext.len() as u32)); // pack size
    bytes.extend_from_slice(&le32(plaintext.len() as u32)); // unpacked size
    bytes.push(0); // host os
    bytes.extend_from_slice(&le32(file_crc));
    bytes.extend_from_slice(&le32(0)); // file time
    bytes.push(29); // unpack version
    bytes.push(method);
    bytes.extend_from_slice(&le16(name.len() as u16));
    bytes.extend_from_slice(&le32(0x20)); // attributes
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&salt);
    bytes.extend_from_slice(&ciphertext);

    let path = dir.join("archive.rar");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut out = Vec::with_capacity(data.len());
    let mut prev = *iv;
    for block in data.chunks_exact(16) {
        let mut current = [0u8; 16];
        for (c, (b, p)) in current.iter_mut().zip(block.iter().zip(prev.iter())) {
            *c = b ^ p;
        }
        cipher.encrypt_block((&mut current).into());
        out.extend_from_slice(&current);
        prev = current;
    }
    out
}

/// Wraps an existing archive in an MZ executable stub (SFX shape).
pub fn wrap_in_sfx_stub(dir: &Path, inner: &Path) -> PathBuf {
    let mut bytes = b"MZ".to_vec();
    bytes.extend_from_slice(&[0x90; 510]); // stub padding
    bytes.extend_from_slice(&std::fs::read(inner).unwrap());
    let path = dir.join("installer.exe");
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Writes a dictionary file, one candidate per line.
pub fn write_dictionary(dir: &Path, words: &[&str]) -> PathBuf {
    let path = dir.join("wordlist.txt");
    std::fs::write(&path, words.join("\n")).unwrap();
    path
}
