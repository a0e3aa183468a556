//! Cryptography module: the key-derivation and check primitives shared by
//! the fast-rejection path, the verifier and the extractors.
//!
//! Nothing in here generates key material; every routine derives keys from a
//! candidate password and compares against verification data stored in the
//! archive.

use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// PBKDF2 iteration count fixed by the WinZip AE specification.
pub const WINZIP_PBKDF2_ROUNDS: u32 = 1000;

/// SHA-1 rounds of the RAR3 key schedule.
const RAR3_KDF_ROUNDS: u32 = 0x40000;

/// Pre-computed CRC32 lookup table (standard ZIP polynomial 0xEDB88320).
const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB88320 } else { crc >> 1 };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[inline(always)]
fn crc32_lut(crc: u32, b: u8) -> u32 {
    CRC32_TABLE[((crc as u8) ^ b) as usize] ^ (crc >> 8)
}

/// The three rolling keys of the traditional PKWARE stream cipher.
#[derive(Clone, Copy)]
pub struct ZipCryptoKeys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl ZipCryptoKeys {
    /// Initialises the key state from a candidate password.
    pub fn from_password(password: &[u8]) -> Self {
        let mut keys = Self { k0: 0x12345678, k1: 0x23456789, k2: 0x34567890 };
        for &c in password {
            keys.update(c);
        }
        keys
    }

    #[inline(always)]
    fn update(&mut self, c: u8) {
        self.k0 = crc32_lut(self.k0, c);
        self.k1 = self.k1.wrapping_add(self.k0 & 0xff);
        self.k1 = self.k1.wrapping_mul(134775813).wrapping_add(1);
        self.k2 = crc32_lut(self.k2, (self.k1 >> 24) as u8);
    }

    #[inline(always)]
    fn stream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) & 0xffff;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    /// Decrypts the 12-byte encryption header and compares the final byte
    /// against the stored check byte. False-positive rate is ~1/256, so a
    /// surviving candidate still needs the slow verification path.
    pub fn check_header(mut self, header: &[u8; 12], check_byte: u8) -> bool {
        let mut last = 0u8;
        for &c in header.iter() {
            last = c ^ self.stream_byte();
            self.update(last);
        }
        last == check_byte
    }

    /// Decrypts a buffer in place, maintaining key state.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for c in buf.iter_mut() {
            *c ^= self.stream_byte();
            self.update(*c);
        }
    }
}

/// Derives the WinZip AE key block: `2 * key_len + 2` bytes of
/// PBKDF2-HMAC-SHA1 output, where the trailing two bytes are the password
/// verifier.
pub fn winzip_derive(password: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut derived = vec![0u8; 2 * key_len + 2];
    pbkdf2_hmac::<Sha1>(password, salt, WINZIP_PBKDF2_ROUNDS, &mut derived);
    derived
}

/// Fast WinZip AE rejection: derive and compare the 2-byte verifier.
pub fn winzip_verifier_matches(password: &[u8], salt: &[u8], key_len: usize, pv: &[u8; 2]) -> bool {
    let derived = winzip_derive(password, salt, key_len);
    derived[2 * key_len..] == pv[..]
}

/// AES key length in bytes for a WinZip strength value (1..=3).
pub fn winzip_key_len(strength: u8) -> usize {
    (strength as usize + 1) * 8
}

/// Salt length in bytes for a WinZip strength value: 1→8, 2→12, 3→16.
pub fn winzip_salt_len(strength: u8) -> usize {
    (strength as usize + 1) * 4
}

/// RAR5 password check: PBKDF2-HMAC-SHA256 over `2^log2_count` iterations,
/// continued a further 2×16 iterations to produce the hash key and the
/// password-check value, which is XOR-folded to 8 bytes.
///
/// Matches unrar's key schedule; the 12-byte stored check value is the 8
/// folded bytes followed by the CRC32 of those bytes.
pub fn rar5_password_check(password: &[u8], salt: &[u8; 16], log2_count: u32) -> [u8; 8] {
    type HmacSha256 = Hmac<Sha256>;

    let count = 1u64 << log2_count.min(63);
    let mac = <HmacSha256 as Mac>::new_from_slice(password).expect("hmac accepts any key length");

    // U1 = HMAC(salt || INT(1)); subsequent iterations chain U_n = HMAC(U_{n-1}).
    let mut block = {
        let mut m = mac.clone();
        m.update(salt);
        m.update(&1u32.to_be_bytes());
        let out: [u8; 32] = m.finalize().into_bytes().into();
        out
    };
    let mut folded = block;

    let mut xor_rounds = |rounds: u64, folded: &mut [u8; 32], block: &mut [u8; 32]| {
        for _ in 0..rounds {
            let mut m = mac.clone();
            m.update(&block[..]);
            *block = m.finalize().into_bytes().into();
            for (f, b) in folded.iter_mut().zip(block.iter()) {
                *f ^= b;
            }
        }
    };

    // `count` iterations yield the AES key (unused here), 16 more the hash
    // key, 16 more the password check value.
    xor_rounds(count - 1, &mut folded, &mut block);
    xor_rounds(16, &mut folded, &mut block);
    xor_rounds(16, &mut folded, &mut block);

    let mut check = [0u8; 8];
    for (i, b) in folded.iter().enumerate() {
        check[i % 8] ^= b;
    }
    check
}

/// Compares a derived RAR5 check against the stored 12-byte check value
/// (8 check bytes + CRC32 of them).
pub fn rar5_check_matches(derived: &[u8; 8], stored: &[u8; 12]) -> bool {
    if derived[..] != stored[..8] {
        return false;
    }
    let crc = crc32fast::hash(&stored[..8]);
    stored[8..] == crc.to_le_bytes()
}

/// RAR3 key schedule: 0x40000 SHA-1 rounds over
/// `UTF-16LE(password) || salt || counter`, sampling one IV byte every
/// 0x4000 rounds. Returns the AES-128 key and CBC IV.
pub fn rar3_derive(password: &str, salt: &[u8; 8]) -> ([u8; 16], [u8; 16]) {
    let mut raw = Vec::with_capacity(password.len() * 2 + 8);
    for unit in password.encode_utf16() {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    raw.extend_from_slice(salt);

    let mut ctx = Sha1::new();
    let mut iv = [0u8; 16];
    for i in 0..RAR3_KDF_ROUNDS {
        ctx.update(&raw);
        ctx.update([i as u8, (i >> 8) as u8, (i >> 16) as u8]);
        if i % 0x4000 == 0 {
            let digest = ctx.clone().finalize();
            iv[(i / 0x4000) as usize] = digest[19];
        }
    }
    let digest = ctx.finalize();

    // unrar stores the key dwords byte-swapped.
    let mut key = [0u8; 16];
    for j in 0..4 {
        for k in 0..4 {
            key[j * 4 + k] = digest[j * 4 + 3 - k];
        }
    }
    (key, iv)
}

/// Decrypts RAR3 ciphertext in place with AES-128-CBC.
pub fn rar3_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 16, 0);
    let cipher = Aes128::new(key.into());
    let mut prev = *iv;
    for block in data.chunks_exact_mut(16) {
        let cipher_block: [u8; 16] = (&*block).try_into().expect("exact chunk");
        let block: &mut [u8; 16] = block.try_into().expect("exact chunk");
        cipher.decrypt_block(block.into());
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev = cipher_block;
    }
}
