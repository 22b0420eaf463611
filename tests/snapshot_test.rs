use std::path::Path;

use redline::snapshot;

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn backup_copies_without_touching_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_file(dir.path(), "report.json", b"{\"paragraphs\": []}");

    let backup = snapshot::backup(&doc).unwrap();

    assert!(backup.exists());
    let name = backup.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("report_backup_"));
    assert!(name.ends_with(".json"));
    assert_eq!(std::fs::read(&doc).unwrap(), std::fs::read(&backup).unwrap());
}

#[test]
fn checksum_is_stable_and_content_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.json", b"same bytes");
    let b = write_file(dir.path(), "b.json", b"same bytes");
    let c = write_file(dir.path(), "c.json", b"different bytes");

    let sum_a = snapshot::checksum(&a).unwrap();
    assert_eq!(sum_a, snapshot::checksum(&a).unwrap());
    assert_eq!(sum_a, snapshot::checksum(&b).unwrap());
    assert_ne!(sum_a, snapshot::checksum(&c).unwrap());
    // lowercase hex md5
    assert_eq!(sum_a.len(), 32);
    assert!(sum_a.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
}

#[test]
fn restore_overwrites_target_with_backup_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_file(dir.path(), "doc.json", b"original");
    let backup = snapshot::backup(&doc).unwrap();

    std::fs::write(&doc, b"mutated beyond recognition").unwrap();
    snapshot::restore(&backup, &doc).unwrap();

    assert_eq!(std::fs::read(&doc).unwrap(), b"original");
    assert_eq!(
        snapshot::checksum(&doc).unwrap(),
        snapshot::checksum(&backup).unwrap()
    );
}

#[test]
fn restore_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_file(dir.path(), "doc.json", b"original");
    let backup = snapshot::backup(&doc).unwrap();

    std::fs::write(&doc, b"changed").unwrap();
    snapshot::restore(&backup, &doc).unwrap();
    let once = std::fs::read(&doc).unwrap();
    snapshot::restore(&backup, &doc).unwrap();
    let twice = std::fs::read(&doc).unwrap();

    assert_eq!(once, twice);
    assert_eq!(once, b"original");
}

#[test]
fn restore_missing_backup_is_a_document_error() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_file(dir.path(), "doc.json", b"original");
    let missing = dir.path().join("nope_backup_20200101_000000.json");

    let err = snapshot::restore(&missing, &doc).unwrap_err();
    assert_eq!(err.code(), "DOC_001");
    // target untouched
    assert_eq!(std::fs::read(&doc).unwrap(), b"original");
}

#[test]
fn cleanup_only_removes_expired_backup_files() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_file(dir.path(), "doc.json", b"data");
    let backup = snapshot::backup(&doc).unwrap();
    let unrelated = write_file(dir.path(), "notes.txt", b"keep me");

    // retention window of 0 days: every backup is expired
    std::thread::sleep(std::time::Duration::from_millis(50));
    snapshot::cleanup_old_backups(dir.path(), 0);

    assert!(!backup.exists());
    assert!(doc.exists());
    assert!(unrelated.exists());
}
