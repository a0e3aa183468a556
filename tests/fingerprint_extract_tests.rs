mod common;

use blitzcrack::fingerprint::{
    fingerprint, ArchiveVariant, FingerprintOptions, Rar3Encryption,
};
use blitzcrack::tools::ToolRegistry;
use regex::Regex;
use tempfile::tempdir;

fn run(path: &std::path::Path) -> blitzcrack::fingerprint::ArchiveDescriptor {
    fingerprint(path, &FingerprintOptions::default(), &ToolRegistry::default())
        .expect("fingerprint should succeed")
}

#[test]
fn pkzip_deflate_descriptor_and_hash() {
    let dir = tempdir().unwrap();
    let path = common::build_pkzip_archive(dir.path(), "abc", b"hello pkzip world", 8);

    let descriptor = run(&path);
    assert_eq!(descriptor.variant_tag(), "pkzip");
    assert_eq!(descriptor.entry_name.as_deref(), Some("secret.txt"));
    match &descriptor.variant {
        ArchiveVariant::Pkzip(d) => {
            assert_eq!(d.compression, 8);
            assert_eq!(d.check_byte, d.crc_hi);
            assert_eq!(d.header.len(), 12);
        }
        other => panic!("wrong variant: {other:?}"),
    }
    assert!(descriptor.hash_line().starts_with("$pkzip2$*8*0*"));
    assert!(descriptor.hash_line().ends_with("*$/pkzip2$"));
    assert_eq!(descriptor.hashcat_mode(), 17200);
}

#[test]
fn pkzip_store_uses_uncompressed_mode() {
    let dir = tempdir().unwrap();
    let path = common::build_pkzip_archive(dir.path(), "abc", b"stored data", 0);
    let descriptor = run(&path);
    assert!(descriptor.hash_line().starts_with("$pkzip2$*0*0*"));
    assert_eq!(descriptor.hashcat_mode(), 17210);
}

#[test]
fn winzip_aes256_matches_canonical_shape() {
    let dir = tempdir().unwrap();
    let path = common::build_winzip_aes_archive(dir.path(), "Hello1", 3);

    let descriptor = run(&path);
    assert_eq!(descriptor.variant_tag(), "winzip-aes");
    let hash = descriptor.hash_line();
    let shape = Regex::new(
        r"^\$zip2\$\*0\*3\*0\*[0-9a-f]{32}\*[0-9a-f]{4}\*[0-9a-f]+\*[0-9a-f]+\*[0-9a-f]{20}\*\$/zip2\$$",
    )
    .unwrap();
    assert!(shape.is_match(&hash), "hash has wrong shape: {hash}");
    assert_eq!(descriptor.hashcat_mode(), 13600);
}

#[test]
fn winzip_salt_size_follows_strength() {
    let dir = tempdir().unwrap();
    for (strength, hex_len) in [(1u8, 16usize), (2, 24), (3, 32)] {
        let path = common::build_winzip_aes_archive(dir.path(), "pw", strength);
        let descriptor = run(&path);
        match &descriptor.variant {
            ArchiveVariant::WinZipAes(d) => {
                assert_eq!(d.strength, strength);
                assert_eq!(d.salt.len() * 2, hex_len);
            }
            other => panic!("wrong variant: {other:?}"),
        }
        let hash = descriptor.hash_line();
        let salt_field = hash.split('*').nth(4).unwrap();
        assert_eq!(salt_field.len(), hex_len, "strength {strength}");
    }
}

#[test]
fn winzip_extra_field_found_when_misaligned() {
    let dir = tempdir().unwrap();
    let path = common::build_winzip_aes_archive_misaligned(dir.path(), "pw");
    let descriptor = run(&path);
    match &descriptor.variant {
        ArchiveVariant::WinZipAes(d) => {
            // The strength byte must come from marker+8, not the version.
            assert_eq!(d.strength, 3);
            assert_eq!(d.salt.len(), 16);
        }
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn rar5_hash_is_exact() {
    let dir = tempdir().unwrap();
    let path = common::build_rar5_archive(dir.path(), "1234", 15);

    let descriptor = run(&path);
    assert_eq!(descriptor.variant_tag(), "rar5");
    let hash = descriptor.hash_line();
    let shape = Regex::new(r"^\$rar5\$16\$[0-9a-f]{32}\$15\$[0-9a-f]{24}\$8\$15$").unwrap();
    assert!(shape.is_match(&hash), "hash has wrong shape: {hash}");
    assert_eq!(descriptor.hashcat_mode(), 13000);
}

#[test]
fn rar3_data_only_descriptor() {
    let dir = tempdir().unwrap();
    let path = common::build_rar3_archive(dir.path(), "pw", b"some stored bytes", false);

    let descriptor = run(&path);
    assert_eq!(descriptor.variant_tag(), "rar3");
    match &descriptor.variant {
        ArchiveVariant::Rar3(d) => {
            assert_eq!(d.encryption, Rar3Encryption::DataOnly);
            assert!(d.salt_present);
            assert_eq!(d.method, 0x30);
        }
        other => panic!("wrong variant: {other:?}"),
    }
    assert!(descriptor.hash_line().starts_with("$RAR3$*1*"));
    assert_eq!(descriptor.hashcat_mode(), 23800);
}

#[test]
fn rar3_headers_encrypted_descriptor() {
    let dir = tempdir().unwrap();
    let path = common::build_rar3_archive(dir.path(), "pw", b"payload", true);
    let descriptor = run(&path);
    match &descriptor.variant {
        ArchiveVariant::Rar3(d) => assert_eq!(d.encryption, Rar3Encryption::HeadersEncrypted),
        other => panic!("wrong variant: {other:?}"),
    }
    assert!(descriptor.hash_line().starts_with("$RAR3$*0*"));
    assert_eq!(descriptor.hashcat_mode(), 12500);
}

#[test]
fn sfx_wrapped_zip_is_found() {
    let dir = tempdir().unwrap();
    let inner = common::build_pkzip_archive(dir.path(), "abc", b"sfx payload", 8);
    let wrapped = common::wrap_in_sfx_stub(dir.path(), &inner);

    let descriptor = run(&wrapped);
    assert_eq!(descriptor.variant_tag(), "pkzip");
    assert!(descriptor.hash_line().starts_with("$pkzip2$*8*0*"));
}

#[test]
fn rar3_zero_size_header_terminates_scan() {
    let dir = tempdir().unwrap();
    let mut bytes = vec![0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];
    bytes.extend_from_slice(&[0u8; 2]); // head crc
    bytes.push(0x73); // main header
    bytes.extend_from_slice(&[0u8; 2]); // flags
    bytes.extend_from_slice(&[0u8; 2]); // size = 0
    bytes.extend_from_slice(&[0xaa; 64]);
    let path = dir.path().join("zero.rar");
    std::fs::write(&path, bytes).unwrap();

    let err = fingerprint(&path, &FingerprintOptions::default(), &ToolRegistry::default())
        .unwrap_err();
    assert!(matches!(err, blitzcrack::CrackError::NoEncryptedEntry));
}

#[test]
fn seven_zip_without_helper_names_the_remedy() {
    let dir = tempdir().unwrap();
    let mut bytes = vec![0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c];
    bytes.extend_from_slice(&[0u8; 26]);
    let path = dir.path().join("locked.7z");
    std::fs::write(&path, bytes).unwrap();

    let err = fingerprint(&path, &FingerprintOptions::default(), &ToolRegistry::default())
        .unwrap_err();
    match err {
        blitzcrack::CrackError::ExternalToolRequired { tool, remedy } => {
            assert_eq!(tool, "7z2hashcat");
            assert!(remedy.contains("install"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unencrypted_zip_reports_no_encrypted_entry() {
    let dir = tempdir().unwrap();
    // Reuse the builder, then clear the encryption flag bits by hand.
    let path = common::build_pkzip_archive(dir.path(), "x", b"plain", 0);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[6] = 0; // local header flags
    let cd = bytes
        .windows(4)
        .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
        .unwrap();
    bytes[cd + 8] = 0; // central flags
    std::fs::write(&path, bytes).unwrap();

    let err = fingerprint(&path, &FingerprintOptions::default(), &ToolRegistry::default())
        .unwrap_err();
    assert!(matches!(err, blitzcrack::CrackError::NoEncryptedEntry));
}
