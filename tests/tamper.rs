use pwsafe::{Error, Record, Vault, VaultOptions};
use std::fs;

#[test]
fn corrupted_trailer_is_rejected_by_hmac() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let mut vault = Vault::create_empty(&options);
    let mut record = Record::create();
    record.set_title("entry");
    record.set_password("hunter2");
    vault.records_mut().push(record);
    vault.save(&path, b"password").expect("save");

    let mut bytes = fs::read(&path).expect("read back");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&path, &bytes).expect("write tampered");

    let err = Vault::open(&path, b"password").unwrap_err();
    assert!(matches!(err, Error::HmacMismatch));
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let vault = Vault::create_empty(&options);
    vault.save(&path, b"password").expect("save");

    let bytes = fs::read(&path).expect("read back");
    fs::write(&path, &bytes[..bytes.len() / 2]).expect("write truncated");

    assert!(Vault::open(&path, b"password").is_err());
}

#[test]
fn file_missing_pws3_tag_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("not-a-vault.psafe3");
    fs::write(&path, b"this is not a vault file at all").expect("write garbage");

    let err = Vault::open(&path, b"password").unwrap_err();
    assert!(matches!(err, Error::NotPasswordSafeFile));
}

#[test]
fn iteration_floor_rejects_weak_vaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weak.psafe3");

    let weak_options = VaultOptions { min_iterations: 1 };
    let vault = Vault::create_empty(&weak_options);
    vault
        .save_rewrapped(&path, b"password", &weak_options)
        .expect("save with weak iteration count");

    let strict_options = VaultOptions {
        min_iterations: 100_000,
    };
    let err = Vault::open_with(&path, b"password", &strict_options).unwrap_err();
    assert!(matches!(err, Error::IterationCountTooLow(1, 100_000)));
}
