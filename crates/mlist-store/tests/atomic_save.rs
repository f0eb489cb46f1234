//! Save atomicity: a failed write never disturbs the previous file.

#![allow(unsafe_code)]

use mlist_schema::{Digest, Format, Index, ManifestEntry, MediaType, Platform};
use mlist_store::{IndexStore, StoreError, StoreLayout};
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// Root bypasses permission checks, so read-only directory tests are meaningless as uid 0.
fn skip_if_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

fn entry(seed: &[u8], os: &str, arch: &str) -> ManifestEntry {
    ManifestEntry {
        media_type: MediaType::DockerManifest,
        size: 528,
        digest: Digest::of(seed),
        platform: Some(Platform::new(os, arch)),
    }
}

const VALID_LOCAL_MANIFEST: &str = r#"{
    "schemaVersion": 2,
    "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
    "manifests": [
        {
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "size": 528,
            "digest": "sha256:b312e4b0e2c665d634602411fcb7c2699ba748c36f59324457bc17de485f36f6",
            "platform": {
                "architecture": "amd64",
                "os": "linux"
            }
        }
    ]
}
"#;

#[test]
fn loads_hand_written_file_and_rewrites_identically() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    let path = layout.index_path("pack/image:tag").unwrap();
    fs::write(&path, VALID_LOCAL_MANIFEST).unwrap();

    let store = IndexStore::new(layout);
    let index = store.load("pack/image:tag").unwrap();
    assert_eq!(index.name, "pack/image:tag");
    assert_eq!(index.manifests.len(), 1);

    store.save(&index).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), VALID_LOCAL_MANIFEST);
}

#[test]
fn failed_save_leaves_no_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();

    // A non-empty directory at the destination makes the final rename fail.
    let blocked = layout.index_path("blocked:1").unwrap();
    fs::create_dir_all(blocked.join("child")).unwrap();

    let store = IndexStore::new(layout.clone());
    let index = Index::new("blocked:1", Format::Docker).with_entry(entry(b"a", "linux", "amd64"));
    let err = store.save(&index).unwrap_err();
    assert!(matches!(err, StoreError::Write { .. }));
    assert!(err
        .to_string()
        .contains("could not be saved in the local storage"));

    let leftovers: Vec<_> = fs::read_dir(layout.manifests_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("blocked-1")]);
    assert!(blocked.is_dir());
}

#[test]
fn failed_save_keeps_previous_bytes() {
    if skip_if_root() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let store = IndexStore::new(layout.clone());

    let original = Index::new("app:1", Format::Docker).with_entry(entry(b"a", "linux", "amd64"));
    store.save(&original).unwrap();
    let path = layout.index_path("app:1").unwrap();
    let before = fs::read(&path).unwrap();

    let manifests = layout.manifests_dir();
    let mode = fs::metadata(&manifests).unwrap().permissions().mode();
    fs::set_permissions(&manifests, fs::Permissions::from_mode(0o555)).unwrap();

    let changed = original.clone().with_entry(entry(b"b", "linux", "arm64"));
    let result = store.save(&changed);

    fs::set_permissions(&manifests, fs::Permissions::from_mode(mode)).unwrap();

    assert!(matches!(result, Err(StoreError::Write { .. })));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn save_rejects_invalid_index_without_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = IndexStore::new(StoreLayout::new(dir.path()));
    let mut index = Index::new("app:1", Format::Docker).with_entry(entry(b"a", "linux", "amd64"));
    index.manifests[0].media_type = MediaType::OciImageManifest;
    assert!(matches!(store.save(&index), Err(StoreError::Schema(_))));
    assert!(!store.exists("app:1"));
}
