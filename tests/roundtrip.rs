use pwsafe::{Record, Vault, VaultOptions};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn file_round_trip_preserves_records_and_header() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let mut vault = Vault::create_empty(&options);
    vault.header_mut().set_db_name("integration vault");
    vault.header_mut().set_db_description("created by a test");

    let mut first = Record::create();
    first.set_group("email");
    first.set_title("example.com");
    first.set_user("alice");
    first.set_password("hunter2");
    first.set_url("https://example.com");
    vault.records_mut().push(first);

    let mut second = Record::create();
    second.set_group("banking");
    second.set_title("bank");
    second.set_user("alice");
    second.set_password("s3cr3t!");
    vault.records_mut().push(second);

    vault.save(&path, b"correct horse battery staple").expect("save");

    let reopened = Vault::open(&path, b"correct horse battery staple").expect("open");
    assert_eq!(reopened.records().len(), 2);
    assert_eq!(
        reopened.header().db_name().unwrap().unwrap(),
        "integration vault"
    );
    assert_eq!(
        reopened.header().db_description().unwrap().unwrap(),
        "created by a test"
    );

    let mut titles: Vec<String> = reopened
        .records()
        .iter()
        .map(|r| r.title().unwrap().unwrap())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["bank".to_string(), "example.com".to_string()]);
}

#[test]
fn save_then_reopen_with_wrong_password_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let vault = Vault::create_empty(&options);
    vault.save(&path, b"right password").expect("save");

    let err = Vault::open(&path, b"wrong password").unwrap_err();
    assert!(matches!(err, pwsafe::Error::BadPassword));
}

#[test]
fn save_rewrapped_changes_the_master_password() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let mut vault = Vault::create_empty(&options);
    let mut record = Record::create();
    record.set_title("only entry");
    vault.records_mut().push(record);
    vault.save(&path, b"old password").expect("initial save");

    let opened = Vault::open(&path, b"old password").expect("open with old password");
    opened
        .save_rewrapped(&path, b"new password", &options)
        .expect("rewrap");

    assert!(Vault::open(&path, b"old password").is_err());
    let reopened = Vault::open(&path, b"new password").expect("open with new password");
    assert_eq!(reopened.records().len(), 1);
    assert_eq!(
        reopened.records()[0].title().unwrap().unwrap(),
        "only entry"
    );
}

#[test]
fn unicode_fields_round_trip_as_utf8() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.psafe3");

    let options = VaultOptions::default();
    let mut vault = Vault::create_empty(&options);
    let mut record = Record::create();
    record.set_title("café \u{1F511}");
    record.set_notes("multi\nline\nnotes with Üñïçødé");
    vault.records_mut().push(record);
    vault.save(&path, b"password").expect("save");

    let reopened = Vault::open(&path, b"password").expect("open");
    assert_eq!(
        reopened.records()[0].title().unwrap().unwrap(),
        "café \u{1F511}"
    );
    assert_eq!(
        reopened.records()[0].notes().unwrap().unwrap(),
        "multi\nline\nnotes with Üñïçødé"
    );
}
