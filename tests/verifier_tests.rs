mod common;

use std::sync::Arc;

use blitzcrack::fingerprint::{fingerprint, FingerprintOptions};
use blitzcrack::tools::ToolRegistry;
use blitzcrack::verify::Verifier;
use tempfile::tempdir;

fn verifier_for(path: &std::path::Path) -> Verifier {
    let descriptor = fingerprint(path, &FingerprintOptions::default(), &ToolRegistry::default())
        .expect("fingerprint");
    Verifier::new(Arc::new(descriptor), ToolRegistry::default())
}

#[test]
fn pkzip_full_decrypt_check() {
    let dir = tempdir().unwrap();
    let path = common::build_pkzip_archive(dir.path(), "abc", b"the quick brown fox", 8);
    let verifier = verifier_for(&path);

    assert!(verifier.verify("abc").unwrap());
    assert!(!verifier.verify("abd").unwrap());
    assert!(!verifier.verify("").unwrap());
}

#[test]
fn winzip_aes_accepts_only_real_password() {
    let dir = tempdir().unwrap();
    let path = common::build_winzip_aes_archive(dir.path(), "Hello1", 3);
    let verifier = verifier_for(&path);

    assert!(verifier.verify("Hello1").unwrap());
    assert!(!verifier.verify("Hello2").unwrap());
}

#[test]
fn winzip_aes_tag_guards_against_pv_collisions() {
    // Corrupt the ciphertext: the 2-byte verifier still matches but the
    // HMAC tag must reject.
    let dir = tempdir().unwrap();
    let path = common::build_winzip_aes_archive(dir.path(), "Hello1", 3);
    let mut bytes = std::fs::read(&path).unwrap();
    let len = bytes.len();
    bytes[len - 15] ^= 0xff; // inside the ciphertext
    std::fs::write(&path, bytes).unwrap();

    let verifier = verifier_for(&path);
    assert!(!verifier.verify("Hello1").unwrap());
}

#[test]
fn rar5_check_value_path() {
    let dir = tempdir().unwrap();
    let path = common::build_rar5_archive(dir.path(), "1234", 4);
    let verifier = verifier_for(&path);

    assert!(verifier.verify("1234").unwrap());
    assert!(!verifier.verify("12345").unwrap());
    assert!(!verifier.verify("4321").unwrap());
}

#[test]
fn rar3_stored_entry_crc_path() {
    let dir = tempdir().unwrap();
    let path = common::build_rar3_archive(dir.path(), "winter", b"stored rar3 payload!", false);
    let verifier = verifier_for(&path);

    assert!(verifier.verify("winter").unwrap());
    assert!(!verifier.verify("summer").unwrap());
}

#[test]
fn rar3_compressed_entry_never_false_accepts() {
    // A compressed data-only entry has no in-process check: no candidate
    // may be accepted, least of all the first one tested.
    let dir = tempdir().unwrap();
    let path = common::build_rar3_compressed_archive(dir.path(), "winter", b"compressed rar3 bytes");
    let verifier = verifier_for(&path);

    assert!(!verifier.confirmable());
    for candidate in ["a", "0", "password", "winter"] {
        assert!(
            !verifier.verify(candidate).unwrap(),
            "candidate '{candidate}' must not be accepted without confirmation"
        );
    }
}

#[test]
fn rar3_stored_entry_is_confirmable() {
    let dir = tempdir().unwrap();
    let path = common::build_rar3_archive(dir.path(), "winter", b"stored rar3 payload!", false);
    assert!(verifier_for(&path).confirmable());
}

#[test]
fn seven_zip_without_helper_is_actionable() {
    use blitzcrack::fingerprint::{ArchiveDescriptor, ArchiveVariant, SevenZipData};

    let descriptor = ArchiveDescriptor {
        path: std::path::PathBuf::from("/tmp/x.7z"),
        entry_name: None,
        variant: ArchiveVariant::SevenZip(SevenZipData { hash_line: "$7z$...".into() }),
    };
    let verifier = Verifier::new(Arc::new(descriptor), ToolRegistry::default());
    let err = verifier.verify("pw").unwrap_err();
    assert!(matches!(err, blitzcrack::CrackError::ExternalToolRequired { .. }));
}
