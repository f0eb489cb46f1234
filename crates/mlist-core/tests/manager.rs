#![allow(unsafe_code)]

use mlist_core::{
    CancelToken, CoreError, CreateOptions, ErrorKind, IndexManager, InspectionSource, PushOptions,
};
use mlist_remote::{MemoryTransport, RemoteError, Transport};
use mlist_schema::{
    Descriptor, Digest, Format, ImageReference, Index, ManifestEntry, MediaType, Platform,
    PlatformUpdate,
};
use mlist_store::{IndexStore, StoreLayout};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

const AMD64: &str = "sha256:c5c5fda71656f28e49ac9c5416b3643eaa6a108a8093151d6d1afc9463be8e33";
const ARM64: &str = "sha256:b312e4b0e2c665d634602411fcb7c2699ba748c36f59324457bc17de485f36f6";

/// Root bypasses permission checks, so read-only directory tests are meaningless as uid 0.
fn skip_if_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

/// Serves one fixed document as every published index.
struct FixedIndexTransport(Index);

impl Transport for FixedIndexTransport {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fetch(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError> {
        Err(RemoteError::NotFound(reference.full_reference()))
    }

    fn fetch_index(&self, _reference: &ImageReference) -> Result<Index, RemoteError> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    transport: Arc<MemoryTransport>,
    manager: IndexManager,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let transport = Arc::new(MemoryTransport::new());
    let manager = IndexManager::new(&root, Arc::clone(&transport) as Arc<dyn Transport>);
    Fixture {
        _dir: dir,
        root,
        transport,
        manager,
    }
}

impl Fixture {
    fn index_file(&self, name: &str) -> PathBuf {
        StoreLayout::new(&self.root).index_path(name).unwrap()
    }

    fn store(&self) -> IndexStore {
        IndexStore::new(StoreLayout::new(&self.root))
    }

    /// Register an image under `repo:tag` and by digest.
    fn image(&self, repo_tag: &str, digest: &str, platform: Option<Platform>) -> Descriptor {
        let d = Descriptor {
            media_type: MediaType::DockerManifest,
            digest: Digest::parse(digest).unwrap(),
            size: 528,
            platform,
        };
        self.transport.add_image(repo_tag, d.clone()).unwrap();
        d
    }

    fn two_platform_images(&self) {
        self.image("repo:amd64", AMD64, Some(Platform::new("linux", "amd64")));
        self.image("repo:arm64", ARM64, Some(Platform::new("linux", "arm64")));
    }

    fn create_local(&self, name: &str, refs: &[&str]) -> Result<Index, CoreError> {
        self.manager
            .create_index(name, refs, &CreateOptions::default(), &CancelToken::new())
            .map(|r| r.index)
    }
}

fn digest_ref(digest: &str) -> String {
    format!("repo@{digest}")
}

// Scenario 1
#[test]
fn create_from_digest_references_persists_manifest_list() {
    let f = fixture();
    f.two_platform_images();
    let refs = [digest_ref(AMD64), digest_ref(ARM64)];
    let refs: Vec<&str> = refs.iter().map(String::as_str).collect();

    let report = f
        .manager
        .create_index("repo:tag", &refs, &CreateOptions::default(), &CancelToken::new())
        .unwrap();
    assert!(report.digest.is_none());

    let written = fs::read_to_string(f.index_file("repo:tag")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(json["schemaVersion"], 2);
    assert_eq!(
        json["mediaType"],
        "application/vnd.docker.distribution.manifest.list.v2+json"
    );
    let manifests = json["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0]["digest"], AMD64);
    assert_eq!(manifests[0]["size"], 528);
    assert_eq!(manifests[0]["platform"]["architecture"], "amd64");
    assert_eq!(manifests[0]["platform"]["os"], "linux");
    assert_eq!(manifests[1]["digest"], ARM64);
    assert_eq!(manifests[1]["platform"]["architecture"], "arm64");
}

// Scenario 2
#[test]
fn create_without_platforms_fails_and_writes_nothing() {
    let f = fixture();
    f.image("repo:amd64", AMD64, None);
    f.image("repo:arm64", ARM64, None);

    let err = f
        .create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingPlatformInfo);
    assert!(err
        .to_string()
        .contains("missing either OS or Architecture information"));
    assert!(err.to_string().contains("repo:amd64"));
    assert!(!f.index_file("repo:tag").exists());
}

#[test]
fn create_with_one_incomplete_platform_fails() {
    let f = fixture();
    f.image("repo:amd64", AMD64, Some(Platform::new("linux", "amd64")));
    f.image(
        "repo:arm64",
        ARM64,
        Some(Platform {
            architecture: "arm64".to_owned(),
            ..Platform::default()
        }),
    );
    let err = f
        .create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingPlatformInfo);
    assert!(!f.index_file("repo:tag").exists());
}

#[test]
fn create_keeps_input_order_and_duplicates() {
    let f = fixture();
    f.two_platform_images();
    let index = f
        .create_local("repo:tag", &["repo:arm64", "repo:amd64", "repo:arm64"])
        .unwrap();
    let digests: Vec<&str> = index.manifests.iter().map(|m| m.digest.as_str()).collect();
    assert_eq!(digests, vec![ARM64, AMD64, ARM64]);

    let loaded = f.store().load("repo:tag").unwrap();
    assert_eq!(loaded, index);
}

#[test]
fn create_validates_everything_before_fetching() {
    let f = fixture();
    f.two_platform_images();

    let err = f
        .create_local("repo:tag", &["repo:amd64", "pack@@image"])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidReference);
    assert!(err.to_string().contains("is not a valid manifest reference"));

    let err = f.create_local("Bad Name", &["repo:amd64"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidReference);

    let err = f
        .manager
        .create_index(
            "repo:tag",
            &["repo:amd64"],
            &CreateOptions {
                format: Some("tarball".to_owned()),
                publish: false,
            },
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);

    assert_eq!(f.transport.fetch_count(), 0);
}

#[test]
fn create_rejects_mixed_media_type_family() {
    let f = fixture();
    f.two_platform_images();
    let err = f
        .manager
        .create_index(
            "repo:tag",
            &["repo:amd64"],
            &CreateOptions {
                format: Some("oci".to_owned()),
                publish: false,
            },
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
    assert!(!f.index_file("repo:tag").exists());
}

#[test]
fn create_unknown_image_is_image_not_found() {
    let f = fixture();
    let err = f.create_local("repo:tag", &["repo:missing"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert!(err.to_string().contains("does not exist in registry"));
}

#[test]
fn create_with_publish_pushes_without_local_file() {
    let f = fixture();
    f.image("repo:amd64", AMD64, None);
    f.image("repo:arm64", ARM64, None);

    let report = f
        .manager
        .create_index(
            "repo:tag",
            &["repo:amd64", "repo:arm64"],
            &CreateOptions {
                format: None,
                publish: true,
            },
            &CancelToken::new(),
        )
        .unwrap();
    let digest = report.digest.unwrap();
    assert_eq!(digest, report.index.digest().unwrap());
    assert!(!f.index_file("repo:tag").exists());

    let published = f
        .transport
        .fetch_index(&ImageReference::parse("repo:tag").unwrap())
        .unwrap();
    assert_eq!(published.manifests, report.index.manifests);
}

#[test]
fn cancelled_create_writes_nothing() {
    let f = fixture();
    f.two_platform_images();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = f
        .manager
        .create_index("repo:tag", &["repo:amd64"], &CreateOptions::default(), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!f.index_file("repo:tag").exists());
}

// Scenario 3
#[test]
fn annotate_changes_only_targeted_fields() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap();
    let before = f.store().load("repo:tag").unwrap();
    let fetches = f.transport.fetch_count();

    let update = PlatformUpdate {
        architecture: Some("arm64".to_owned()),
        variant: Some("v8".to_owned()),
        ..PlatformUpdate::default()
    };
    f.manager
        .annotate_manifest("repo:tag", &digest_ref(ARM64), &update, &CancelToken::new())
        .unwrap();

    // Digest-form references need no lookup.
    assert_eq!(f.transport.fetch_count(), fetches);

    let after = f.store().load("repo:tag").unwrap();
    assert_eq!(after.manifests[0], before.manifests[0]);
    let p = after.manifests[1].platform.as_ref().unwrap();
    assert_eq!(p.architecture, "arm64");
    assert_eq!(p.os, "linux");
    assert_eq!(p.variant.as_deref(), Some("v8"));
    assert_eq!(after.manifests[1].digest, before.manifests[1].digest);
    assert_eq!(after.manifests[1].size, before.manifests[1].size);
}

#[test]
fn annotate_by_tag_resolves_digest() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap();
    let update = PlatformUpdate {
        os_version: Some("10.0.17763".to_owned()),
        ..PlatformUpdate::default()
    };
    let index = f
        .manager
        .annotate_manifest("repo:tag", "repo:amd64", &update, &CancelToken::new())
        .unwrap();
    assert_eq!(
        index.manifests[0].platform.as_ref().unwrap().os_version.as_deref(),
        Some("10.0.17763")
    );
    let raw = fs::read_to_string(f.index_file("repo:tag")).unwrap();
    assert!(raw.contains("\"os.version\": \"10.0.17763\""));
}

#[test]
fn annotate_unknown_manifest_is_not_in_index() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let before = fs::read(f.index_file("repo:tag")).unwrap();
    let err = f
        .manager
        .annotate_manifest(
            "repo:tag",
            &digest_ref(ARM64),
            &PlatformUpdate::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestNotInIndex);
    assert_eq!(fs::read(f.index_file("repo:tag")).unwrap(), before);
}

#[test]
fn annotate_missing_index() {
    let f = fixture();
    let err = f
        .manager
        .annotate_manifest(
            "nope:tag",
            &digest_ref(AMD64),
            &PlatformUpdate::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexNotFound);
}

// Scenario 4
#[test]
fn add_unknown_image_leaves_file_unchanged() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let path = f.index_file("repo:tag");
    let before = fs::read(&path).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let err = f
        .manager
        .add_manifest(
            "repo:tag",
            "pack/image-not-found",
            &PlatformUpdate::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn add_appends_entry() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let index = f
        .manager
        .add_manifest("repo:tag", "repo:arm64", &PlatformUpdate::default(), &CancelToken::new())
        .unwrap();
    assert_eq!(index.manifests.len(), 2);
    assert_eq!(index.manifests[1].digest, ARM64);
    assert_eq!(f.store().load("repo:tag").unwrap(), index);
}

#[test]
fn add_uses_overrides_to_complete_platform() {
    let f = fixture();
    f.two_platform_images();
    f.image(
        "repo:riscv",
        "sha256:1111111111111111111111111111111111111111111111111111111111111111",
        None,
    );
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();

    let err = f
        .manager
        .add_manifest("repo:tag", "repo:riscv", &PlatformUpdate::default(), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingPlatformInfo);

    let overrides = PlatformUpdate {
        os: Some("linux".to_owned()),
        architecture: Some("riscv64".to_owned()),
        ..PlatformUpdate::default()
    };
    let index = f
        .manager
        .add_manifest("repo:tag", "repo:riscv", &overrides, &CancelToken::new())
        .unwrap();
    assert_eq!(
        index.manifests[1].platform,
        Some(Platform::new("linux", "riscv64"))
    );
}

#[test]
fn add_wrong_family_is_rejected() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    f.transport
        .add_image(
            "repo:oci",
            Descriptor {
                media_type: MediaType::OciImageManifest,
                digest: Digest::of(b"oci"),
                size: 400,
                platform: Some(Platform::new("linux", "s390x")),
            },
        )
        .unwrap();
    let before = fs::read(f.index_file("repo:tag")).unwrap();
    let err = f
        .manager
        .add_manifest("repo:tag", "repo:oci", &PlatformUpdate::default(), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
    assert_eq!(fs::read(f.index_file("repo:tag")).unwrap(), before);
}

#[test]
fn remove_drops_first_match() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64", "repo:arm64", "repo:amd64"])
        .unwrap();
    let index = f
        .manager
        .remove_manifest("repo:tag", &digest_ref(AMD64), &CancelToken::new())
        .unwrap();
    let digests: Vec<&str> = index.manifests.iter().map(|m| m.digest.as_str()).collect();
    assert_eq!(digests, vec![ARM64, AMD64]);

    let err = f
        .manager
        .remove_manifest(
            "repo:tag",
            &digest_ref("sha256:2222222222222222222222222222222222222222222222222222222222222222"),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManifestNotInIndex);
}

// Scenario 5
#[test]
fn failed_push_is_push_failure_and_keeps_local_file() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap();
    let path = f.index_file("repo:tag");
    let before = fs::read(&path).unwrap();

    f.transport.set_fail_pushes(true);
    let err = f
        .manager
        .push_index("repo:tag", PushOptions { purge: true }, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PushFailure);
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn push_publishes_structurally_equal_index() {
    let f = fixture();
    f.two_platform_images();
    let local = f
        .create_local("repo:tag", &["repo:amd64", "repo:arm64"])
        .unwrap();

    let report = f
        .manager
        .push_index("repo:tag", PushOptions::default(), &CancelToken::new())
        .unwrap();
    assert_eq!(report.manifests, 2);
    assert!(!report.purged);
    assert_eq!(report.reference, "docker.io/library/repo:tag");
    assert!(f.index_file("repo:tag").exists());

    let remote = f
        .transport
        .fetch_index(&ImageReference::parse("repo:tag").unwrap())
        .unwrap();
    assert_eq!(remote.manifests, local.manifests);
    assert_eq!(remote.media_type, local.media_type);
    assert_eq!(report.digest, local.digest().unwrap());
}

#[test]
fn push_with_purge_deletes_local_file() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let report = f
        .manager
        .push_index("repo:tag", PushOptions { purge: true }, &CancelToken::new())
        .unwrap();
    assert!(report.purged);
    assert!(!f.index_file("repo:tag").exists());
}

#[test]
fn cancelled_push_is_push_failure() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = f
        .manager
        .push_index("repo:tag", PushOptions::default(), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PushFailure);
    assert_eq!(f.transport.push_count(), 0);
}

#[test]
fn push_of_corrupt_file_is_corrupt() {
    let f = fixture();
    let path = f.index_file("repo:tag");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{\"schemaVersion\": 1}").unwrap();
    let err = f
        .manager
        .push_index("repo:tag", PushOptions::default(), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn inspect_prefers_local_then_remote() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();

    let local = f
        .manager
        .inspect_index("repo:tag", &CancelToken::new())
        .unwrap();
    assert_eq!(local.source, InspectionSource::Local);

    f.manager
        .push_index("repo:tag", PushOptions { purge: true }, &CancelToken::new())
        .unwrap();
    let remote = f
        .manager
        .inspect_index("repo:tag", &CancelToken::new())
        .unwrap();
    assert_eq!(remote.source, InspectionSource::Remote);
    assert_eq!(remote.index.manifests, local.index.manifests);

    let err = f
        .manager
        .inspect_index("repo:other", &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexNotFound);
}

#[test]
fn delete_local_and_published() {
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    f.manager
        .push_index("repo:tag", PushOptions::default(), &CancelToken::new())
        .unwrap();

    f.manager.delete_index("repo:tag").unwrap();
    assert!(!f.index_file("repo:tag").exists());
    assert_eq!(
        f.manager.delete_index("repo:tag").unwrap_err().kind(),
        ErrorKind::IndexNotFound
    );

    f.manager
        .delete_published_index("repo:tag", &CancelToken::new())
        .unwrap();
    let err = f
        .manager
        .delete_published_index("repo:tag", &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexNotFound);
}

#[test]
fn round_trip_preserves_every_field() {
    let f = fixture();
    let mut windows = Platform::new("windows", "amd64");
    windows.os_version = Some("10.0.17763.1817".to_owned());
    let index = Index::new("repo:tag", Format::Oci)
        .with_entry(ManifestEntry {
            media_type: MediaType::OciImageManifest,
            size: 1,
            digest: Digest::parse(AMD64).unwrap(),
            platform: Some(windows),
        })
        .with_entry(ManifestEntry {
            media_type: MediaType::OciImageIndex,
            size: 99,
            digest: Digest::parse(ARM64).unwrap(),
            platform: Some(Platform::new("linux", "arm").with_variant("v7")),
        });
    let store = f.store();
    store.save(&index).unwrap();
    assert_eq!(store.load("repo:tag").unwrap(), index);
}

#[test]
fn lock_is_exclusive_per_name() {
    let f = fixture();
    let _held = f.manager.lock("repo:tag").unwrap();
    let path = StoreLayout::new(&f.root).lock_path("repo:tag").unwrap();
    assert!(mlist_core::IndexLock::try_acquire(&path).unwrap().is_none());
    let other = StoreLayout::new(&f.root).lock_path("repo:other").unwrap();
    assert!(mlist_core::IndexLock::try_acquire(&other).unwrap().is_some());
}

#[test]
fn inspect_rejects_invalid_published_index() {
    let entry = ManifestEntry {
        media_type: MediaType::DockerManifest,
        size: 528,
        digest: Digest::parse(AMD64).unwrap(),
        platform: Some(Platform::new("linux", "amd64")),
    };
    let mut old_schema = Index::new("repo:tag", Format::Docker).with_entry(entry.clone());
    old_schema.schema_version = 1;
    let empty_entry = Index::new("repo:tag", Format::Docker).with_entry(ManifestEntry {
        size: 0,
        ..entry.clone()
    });
    let mixed = Index::new("repo:tag", Format::Docker).with_entry(ManifestEntry {
        media_type: MediaType::OciImageManifest,
        ..entry
    });

    for served in [old_schema, empty_entry, mixed] {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), Arc::new(FixedIndexTransport(served)));
        let err = manager
            .inspect_index("repo:tag", &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt, "{err}");
        assert!(err.to_string().contains("published index 'repo:tag' is invalid"));
    }
}

#[test]
fn failed_purge_after_push_reports_success() {
    if skip_if_root() {
        return;
    }
    let f = fixture();
    f.two_platform_images();
    f.create_local("repo:tag", &["repo:amd64"]).unwrap();
    let manifests_dir = f.index_file("repo:tag").parent().unwrap().to_path_buf();
    fs::set_permissions(&manifests_dir, fs::Permissions::from_mode(0o555)).unwrap();

    let result = f
        .manager
        .push_index("repo:tag", PushOptions { purge: true }, &CancelToken::new());
    fs::set_permissions(&manifests_dir, fs::Permissions::from_mode(0o755)).unwrap();

    let report = result.unwrap();
    assert!(!report.purged);
    assert!(f.index_file("repo:tag").exists());
    assert!(f
        .transport
        .fetch_index(&ImageReference::parse("repo:tag").unwrap())
        .is_ok());
}

#[test]
fn lock_rejects_invalid_name_before_touching_disk() {
    let f = fixture();
    let err = f.manager.lock("Bad Name!").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidReference);
    assert!(!f.root.join("locks").exists());
}
