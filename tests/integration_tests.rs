//! End-to-end synchronization tests.

use coresync::crypto;
use coresync::storage::fs::list_fanout_names;
use coresync::vault::Repository;
use coresync::{InitOptions, KdfParams, SyncReport, Vault};
use secrecy::SecretString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PASSPHRASE: &str = "correct horse battery staple";

/// Cheap key derivation so tests stay fast.
fn test_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 8,
        time_cost: 1,
        parallelism: 1,
    }
}

fn options(root: &Path, name: &str, vault_directory: Option<PathBuf>) -> InitOptions {
    InitOptions {
        vault_directory,
        secret_directory: Some(root.join("secrets").join(name)),
        kdf: test_kdf(),
        ..Default::default()
    }
}

/// Create a working directory and initialize it.
fn participant(root: &Path, name: &str, vault_directory: Option<PathBuf>) -> Vault {
    let work = root.join(name);
    fs::create_dir_all(&work).expect("Failed to create working directory");
    Vault::initialize(
        &work,
        SecretString::from(PASSPHRASE),
        options(root, name, vault_directory),
    )
    .expect("Failed to initialize")
}

fn write(vault: &Vault, relative: &str, content: &[u8]) {
    let path = vault.working_directory().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).expect("Failed to write plaintext");
}

fn read(vault: &Vault, relative: &str) -> Vec<u8> {
    fs::read(vault.working_directory().join(relative)).expect("Failed to read plaintext")
}

fn exists(vault: &Vault, relative: &str) -> bool {
    vault.working_directory().join(relative).exists()
}

/// Number of (head, file, data) objects in the vault.
fn object_counts(vault: &Vault) -> (usize, usize, usize) {
    let layout = vault.context().layout();
    (
        list_fanout_names(&layout.head_directory()).unwrap().len(),
        list_fanout_names(&layout.file_directory()).unwrap().len(),
        list_fanout_names(&layout.data_directory()).unwrap().len(),
    )
}

fn sync(vault: &mut Vault) -> SyncReport {
    vault.synchronize(None).expect("Failed to synchronize")
}

#[test]
fn test_single_file_lifecycle() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "docs/readme.txt", b"hello");

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 2);
    assert_eq!(object_counts(&vault), (2, 1, 1));

    let repository: Repository = vault.repository().unwrap();
    let heads = repository.head_entries();
    assert_eq!(heads.len(), 2);
    assert_eq!(heads[0].relative_path(), "docs");
    assert!(heads[0].is_directory());
    assert_eq!(heads[1].relative_path(), "docs/readme.txt");
    assert!(heads[1].is_file());

    let file_id = heads[1].file_id().unwrap();
    let file_entry = repository.file_entry(&file_id).unwrap();
    assert_eq!(
        file_entry.checksum(),
        crypto::checksum_reader(&b"hello"[..]).unwrap()
    );

    fs::remove_file(vault.working_directory().join("docs/readme.txt")).unwrap();
    fs::remove_dir(vault.working_directory().join("docs")).unwrap();

    let report = sync(&mut vault);
    assert_eq!(report.deleted_vault, 2);
    assert_eq!(report.purged, 1);
    assert_eq!(object_counts(&vault), (0, 0, 0));

    // Nothing left to remember
    let base = vault.context().base_directory();
    assert!(!Repository::file_path(&base).exists());
    assert!(!vault.context().layout().master_vault().exists());
}

#[test]
fn test_second_sync_is_idempotent() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"alpha");
    write(&vault, "nested/deeper/b.txt", b"beta");

    let first = sync(&mut vault);
    assert_eq!(first.encrypted, 4);

    let second = sync(&mut vault);
    assert_eq!(second, SyncReport::default());
    assert!(second.is_unchanged());
}

#[test]
fn test_identical_content_is_stored_once() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"same bytes");
    write(&vault, "copies/b.txt", b"same bytes");

    sync(&mut vault);
    assert_eq!(object_counts(&vault), (3, 1, 1));

    let repository = vault.repository().unwrap();
    let ids: Vec<_> = repository
        .head_entries()
        .iter()
        .filter_map(|e| e.file_id())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn test_rename_keeps_file_entry() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"content");
    sync(&mut vault);

    let before = vault.repository().unwrap().head_entries();
    let work = vault.working_directory().to_path_buf();
    fs::rename(work.join("a.txt"), work.join("a2.txt")).unwrap();

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(report.deleted_vault, 1);
    assert_eq!(report.purged, 0);

    let after = vault.repository().unwrap().head_entries();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].relative_path(), "a2.txt");
    assert_ne!(after[0].opaque_name(), before[0].opaque_name());
    assert_eq!(after[0].file_id(), before[0].file_id());
    assert_eq!(object_counts(&vault), (1, 1, 1));
}

#[test]
fn test_changed_content_replaces_and_purges() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"version 1");
    sync(&mut vault);

    write(&vault, "a.txt", b"version 2");
    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(report.deleted_vault, 1);
    assert_eq!(report.purged, 1);
    assert_eq!(object_counts(&vault), (1, 1, 1));

    assert!(sync(&mut vault).is_unchanged());
}

#[test]
fn test_filtered_paths_stay_out_of_the_vault() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    vault.add_filters(&["**/*.tmp".to_string()]).unwrap();

    write(&vault, "keep.txt", b"keep");
    write(&vault, "Thumbs.db", b"default filter");
    write(&vault, "build/out.tmp", b"custom filter");

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(object_counts(&vault), (1, 1, 1));

    let heads = vault.repository().unwrap().head_entries();
    assert_eq!(heads[0].relative_path(), "keep.txt");
}

#[test]
fn test_inclusion_filter_syncs_only_matching_paths() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    vault.add_filters(&["!docs/**".to_string()]).unwrap();

    write(&vault, "docs/a.txt", b"a");
    write(&vault, "docs/deep/b.txt", b"b");
    write(&vault, "notes/c.txt", b"c");
    write(&vault, "top.txt", b"top");

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 4);
    let paths: Vec<String> = vault
        .repository()
        .unwrap()
        .head_entries()
        .iter()
        .map(|e| e.relative_path().to_string())
        .collect();
    assert_eq!(paths, ["docs", "docs/a.txt", "docs/deep", "docs/deep/b.txt"]);
    assert!(sync(&mut vault).is_unchanged());
}

#[test]
fn test_participants_with_different_filters_settle() {
    let root = TempDir::new().unwrap();
    let shared = root.path().join("shared");
    let mut alice = participant(root.path(), "alice", Some(shared.clone()));
    let mut bob = participant(root.path(), "bob", Some(shared));
    bob.add_filters(&["d/secret*".to_string()]).unwrap();

    write(&alice, "d/secret.txt", b"only for alice");
    sync(&mut alice);

    // Neither the file nor its otherwise empty directory reach bob
    let report = sync(&mut bob);
    assert_eq!(report.decrypted, 0);
    assert_eq!(report.skipped, 2);
    assert!(!exists(&bob, "d"));

    assert!(sync(&mut bob).is_unchanged());
    assert!(sync(&mut alice).is_unchanged());
    assert!(sync(&mut bob).is_unchanged());
    assert_eq!(object_counts(&alice), (2, 1, 1));
    assert_eq!(read(&alice, "d/secret.txt"), b"only for alice");
}

#[test]
fn test_filter_added_after_sync_keeps_vault_entries() {
    let root = TempDir::new().unwrap();
    let shared = root.path().join("shared");
    let mut alice = participant(root.path(), "alice", Some(shared.clone()));
    let mut bob = participant(root.path(), "bob", Some(shared));

    write(&alice, "d/secret.txt", b"shared at first");
    sync(&mut alice);
    sync(&mut bob);

    bob.add_filters(&["d/secret*".to_string()]).unwrap();
    assert!(sync(&mut bob).is_unchanged());
    assert!(sync(&mut alice).is_unchanged());
    assert_eq!(object_counts(&alice), (2, 1, 1));
}

#[test]
fn test_empty_directories_are_not_synchronized() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    fs::create_dir_all(vault.working_directory().join("empty/inner")).unwrap();
    write(&vault, "docs/a.txt", b"a");

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 2);

    // The directory stays on disk but loses its last file
    fs::remove_file(vault.working_directory().join("docs/a.txt")).unwrap();
    let report = sync(&mut vault);
    assert_eq!(report.deleted_vault, 2);
    assert_eq!(object_counts(&vault).0, 0);
    assert!(exists(&vault, "docs"));
}

#[test]
fn test_two_participants_share_a_vault() {
    let root = TempDir::new().unwrap();
    let shared = root.path().join("shared");
    let mut alice = participant(root.path(), "alice", Some(shared.clone()));
    let mut bob = participant(root.path(), "bob", Some(shared));

    let large: Vec<u8> = (0..(1 << 20) + 7).map(|i| (i % 251) as u8).collect();
    write(&alice, "docs/readme.txt", b"hello");
    write(&alice, "empty.txt", b"");
    write(&alice, "media/large.bin", &large);
    sync(&mut alice);

    // Restore
    let report = sync(&mut bob);
    assert_eq!(report.decrypted, 5);
    assert_eq!(report.encrypted, 0);
    assert_eq!(read(&bob, "docs/readme.txt"), b"hello");
    assert_eq!(read(&bob, "empty.txt"), b"");
    assert_eq!(read(&bob, "media/large.bin"), large);
    assert!(sync(&mut bob).is_unchanged());

    // Remote deletion
    fs::remove_file(alice.working_directory().join("empty.txt")).unwrap();
    let report = sync(&mut alice);
    assert_eq!(report.deleted_vault, 1);

    let report = sync(&mut bob);
    assert_eq!(report.deleted_local, 1);
    assert!(!exists(&bob, "empty.txt"));

    // Remote creation
    write(&bob, "docs/from-bob.txt", b"bob was here");
    let report = sync(&mut bob);
    assert_eq!(report.encrypted, 1);

    let report = sync(&mut alice);
    assert_eq!(report.decrypted, 1);
    assert_eq!(read(&alice, "docs/from-bob.txt"), b"bob was here");

    assert!(sync(&mut alice).is_unchanged());
    assert!(sync(&mut bob).is_unchanged());
}

#[test]
fn test_remote_directory_deletion() {
    let root = TempDir::new().unwrap();
    let shared = root.path().join("shared");
    let mut alice = participant(root.path(), "alice", Some(shared.clone()));
    let mut bob = participant(root.path(), "bob", Some(shared));

    write(&alice, "keep.txt", b"keep");
    write(&alice, "old/a/b.txt", b"b");
    sync(&mut alice);
    sync(&mut bob);
    assert!(exists(&bob, "old/a/b.txt"));

    fs::remove_dir_all(alice.working_directory().join("old")).unwrap();
    sync(&mut alice);

    let report = sync(&mut bob);
    assert_eq!(report.deleted_local, 3);
    assert!(!exists(&bob, "old"));
    assert!(exists(&bob, "keep.txt"));
}

#[test]
fn test_subdirectory_sync_stays_in_scope() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "docs/a.txt", b"a");
    write(&vault, "notes/b.txt", b"b");
    sync(&mut vault);

    write(&vault, "docs/c.txt", b"c");
    write(&vault, "notes/d.txt", b"d");
    fs::remove_file(vault.working_directory().join("notes/b.txt")).unwrap();

    let report = vault.synchronize(Some(Path::new("docs"))).unwrap();
    assert_eq!(report.encrypted, 1);
    assert_eq!(report.deleted_vault, 0);

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(report.deleted_vault, 1);
}

#[test]
fn test_subdirectory_sync_reuses_content_stored_elsewhere() {
    let root = TempDir::new().unwrap();
    let shared = root.path().join("shared");
    let mut alice = participant(root.path(), "alice", Some(shared.clone()));
    let mut bob = participant(root.path(), "bob", Some(shared.clone()));

    write(&alice, "x/one.txt", b"same content");
    sync(&mut alice);

    // Bob never sees x/one.txt, yet stores the same content
    write(&bob, "sub/two.txt", b"same content");
    let report = bob.synchronize(Some(Path::new("sub"))).unwrap();
    assert_eq!(report.encrypted, 2);
    assert_eq!(object_counts(&bob), (4, 1, 1));

    let mut carol = participant(root.path(), "carol", Some(shared));
    let report = sync(&mut carol);
    assert_eq!(report.decrypted, 4);
    assert_eq!(report.failures, 0);
    assert_eq!(read(&carol, "x/one.txt"), b"same content");
    assert_eq!(read(&carol, "sub/two.txt"), b"same content");

    let report = sync(&mut alice);
    assert_eq!(report.decrypted, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(read(&alice, "sub/two.txt"), b"same content");
}

#[test]
fn test_subdirectory_must_be_inside_working_directory() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);

    assert!(vault.synchronize(Some(root.path())).is_err());
    assert!(vault.synchronize(Some(Path::new("missing"))).is_err());
    assert!(vault.synchronize(Some(Path::new(".coresync"))).is_err());
}

#[test]
fn test_passphrase_change_keeps_vault_readable() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"a");
    sync(&mut vault);

    vault
        .set_passphrase(SecretString::from("a new passphrase"))
        .unwrap();
    assert!(sync(&mut vault).is_unchanged());

    // A fresh process recovers the new passphrase from the protector
    let work = vault.working_directory().to_path_buf();
    drop(vault);
    let mut reopened = Vault::open(&work).unwrap();
    assert_eq!(reopened.configuration().passphrase().unwrap(), "a new passphrase");
    assert!(sync(&mut reopened).is_unchanged());
}

#[test]
fn test_same_passphrase_is_rejected() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);

    assert!(vault.set_passphrase(SecretString::from(PASSPHRASE)).is_err());
    assert!(vault.set_passphrase(SecretString::from("")).is_err());
}

#[test]
fn test_vault_directory_change_merges_into_new_vault() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"a");
    sync(&mut vault);

    let elsewhere = root.path().join("elsewhere");
    vault.set_vault_directory(&elsewhere).unwrap();
    assert_eq!(vault.context().layout().root(), elsewhere.as_path());
    assert!(vault.repository().unwrap().is_empty());

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(object_counts(&vault), (1, 1, 1));
}

#[test]
fn test_reset_starts_over() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"a");
    sync(&mut vault);

    let work = vault.working_directory().to_path_buf();
    drop(vault);

    let mut vault = Vault::reset(
        &work,
        SecretString::from("another passphrase"),
        options(root.path(), "w", None),
    )
    .unwrap();
    assert!(vault.repository().unwrap().is_empty());

    let report = sync(&mut vault);
    assert_eq!(report.encrypted, 1);
    assert_eq!(read(&vault, "a.txt"), b"a");
}

#[test]
fn test_detach_keeps_plaintext() {
    let root = TempDir::new().unwrap();
    let mut vault = participant(root.path(), "w", None);
    write(&vault, "a.txt", b"a");
    sync(&mut vault);

    let work = vault.working_directory().to_path_buf();
    drop(vault);
    Vault::detach(&work).unwrap();

    assert!(!Vault::is_initialized(&work));
    assert!(!work.join(".coresync").exists());
    assert_eq!(fs::read(work.join("a.txt")).unwrap(), b"a");
    assert!(Vault::open(&work).is_err());
}
