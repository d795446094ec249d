// tests/pipeline.rs

//! End-to-end tests for the add / update / vendor pipeline.
//!
//! The scenarios run entirely offline: remote dependencies are exercised
//! through pre-seeded cache slots, everything else through local path
//! fixtures built in temp directories.

use kpkg::{AddOptions, Client, Settings, Source, MOD_FILE, MOD_LOCK_FILE};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
    home: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ws");
        let home = dir.path().join("kpkg-home");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&home).unwrap();
        Workspace { _dir: dir, root, home }
    }

    fn client(&self) -> Client {
        Client::new(Settings::with_home(&self.home)).unwrap()
    }

    /// Write a package: `[package]` plus raw dependency lines.
    fn write_pkg(&self, rel: &str, name: &str, version: &str, dep_lines: &[&str]) -> PathBuf {
        let dir = self.root.join(rel);
        fs::create_dir_all(&dir).unwrap();

        let mut manifest = format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\n");
        if !dep_lines.is_empty() {
            manifest.push_str("\n[dependencies]\n");
            for line in dep_lines {
                manifest.push_str(line);
                manifest.push('\n');
            }
        }
        fs::write(dir.join(MOD_FILE), manifest).unwrap();
        fs::write(dir.join("main.k"), format!("name = \"{name}\"\n")).unwrap();
        dir
    }

    /// Seed a cache slot as if a remote fetch had materialized it.
    fn seed_cache(&self, slot: &str, name: &str, version: &str) -> PathBuf {
        let dir = self.home.join(slot);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MOD_FILE),
            format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\n"),
        )
        .unwrap();
        fs::write(dir.join("main.k"), format!("name = \"{name}\"\n")).unwrap();
        dir
    }
}

#[test]
fn add_local_path_dependency_updates_mod_and_lock() {
    let ws = Workspace::new();
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &[]);
    let dep_dir = ws.write_pkg("greetings", "greetings", "0.1.0", &[]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    let options = AddOptions::new()
        .with_source_url(&dep_dir.to_string_lossy())
        .unwrap();
    client.add(&mut pkg, options).unwrap();

    // Manifest gained the dependency at the version its manifest declares.
    let mod_text = fs::read_to_string(root_dir.join(MOD_FILE)).unwrap();
    assert!(mod_text.contains("greetings"), "manifest was: {mod_text}");
    assert!(mod_text.contains("version = \"0.1.0\""), "manifest was: {mod_text}");

    // Lock entry carries a content sum.
    let lock_text = fs::read_to_string(root_dir.join(MOD_LOCK_FILE)).unwrap();
    assert!(lock_text.contains("name = \"greetings\""), "lock was: {lock_text}");
    assert!(lock_text.contains("sum = "), "lock was: {lock_text}");
}

#[test]
fn update_folds_transitive_deps_with_mvs() {
    let ws = Workspace::new();
    ws.write_pkg("common_v1", "common", "0.1.1", &[]);
    ws.write_pkg("common_v2", "common", "0.1.2", &[]);
    ws.write_pkg("a", "a", "0.1.0", &["common = { path = \"../common_v1\" }"]);
    ws.write_pkg("b", "b", "0.1.0", &["common = { path = \"../common_v2\" }"]);
    let root_dir = ws.write_pkg(
        "root",
        "root",
        "0.0.1",
        &["a = { path = \"../a\" }", "b = { path = \"../b\" }"],
    );

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.update(&mut pkg).unwrap();

    // Both direct deps and the MVS-selected transitive dep are locked.
    assert_eq!(pkg.lock_deps.get("a").unwrap().version, "0.1.0");
    assert_eq!(pkg.lock_deps.get("b").unwrap().version, "0.1.0");
    assert_eq!(pkg.lock_deps.get("common").unwrap().version, "0.1.2");

    let lock_text = fs::read_to_string(root_dir.join(MOD_LOCK_FILE)).unwrap();
    assert!(lock_text.contains("full_name = \"common_0.1.2\""), "lock was: {lock_text}");
    assert!(!lock_text.contains("common_0.1.1"), "lock was: {lock_text}");
}

#[test]
fn update_is_idempotent_after_first_run() {
    let ws = Workspace::new();
    ws.write_pkg("dep", "dep", "0.2.0", &[]);
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &["dep = { path = \"../dep\" }"]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.update(&mut pkg).unwrap();

    let mod_first = fs::read_to_string(root_dir.join(MOD_FILE)).unwrap();
    let lock_first = fs::read_to_string(root_dir.join(MOD_LOCK_FILE)).unwrap();

    // Run again from a fresh load; bytes must not move.
    let mut pkg = client.load(&root_dir).unwrap();
    client.update(&mut pkg).unwrap();
    assert_eq!(fs::read_to_string(root_dir.join(MOD_FILE)).unwrap(), mod_first);
    assert_eq!(
        fs::read_to_string(root_dir.join(MOD_LOCK_FILE)).unwrap(),
        lock_first
    );
}

#[test]
fn update_terminates_on_cyclic_graph() {
    let ws = Workspace::new();
    ws.write_pkg("a", "a", "0.1.0", &["b = { path = \"../b\" }"]);
    ws.write_pkg("b", "b", "0.1.0", &["a = { path = \"../a\" }"]);
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &["a = { path = \"../a\" }"]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.update(&mut pkg).unwrap();

    // Both cycle members are present in the lock.
    assert!(pkg.lock_deps.contains("a"));
    assert!(pkg.lock_deps.contains("b"));
}

#[test]
fn lock_sums_match_directory_hashes() {
    let ws = Workspace::new();
    let dep_dir = ws.write_pkg("dep", "dep", "0.2.0", &[]);
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &["dep = { path = \"../dep\" }"]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.update(&mut pkg).unwrap();

    let locked = pkg.lock_deps.get("dep").unwrap();
    assert_eq!(locked.sum, kpkg::hash::hash_dir(&dep_dir).unwrap());
}

#[test]
fn vendor_selects_greater_version_only() {
    let ws = Workspace::new();
    ws.write_pkg("common_v1", "common", "0.1.1", &[]);
    ws.write_pkg("common_v2", "common", "0.1.2", &[]);
    ws.write_pkg("a", "a", "0.1.0", &["common = { path = \"../common_v1\" }"]);
    ws.write_pkg("b", "b", "0.1.0", &["common = { path = \"../common_v2\" }"]);
    let root_dir = ws.write_pkg(
        "root",
        "root",
        "0.0.1",
        &["a = { path = \"../a\" }", "b = { path = \"../b\" }"],
    );

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.vendor_deps(&mut pkg).unwrap();

    let vendor = root_dir.join("vendor");
    assert!(vendor.join("common_0.1.2").join(MOD_FILE).exists());
    assert!(!vendor.join("common_0.1.1").exists());
    assert!(vendor.join("a_0.1.0").join(MOD_FILE).exists());
    assert!(vendor.join("b_0.1.0").join(MOD_FILE).exists());

    // The in-memory store now points at the vendored trees.
    let common = pkg.lock_deps.get("common").unwrap();
    assert_eq!(
        common.local_full_path.as_deref(),
        Some(vendor.join("common_0.1.2").as_path())
    );
}

#[test]
fn vendor_is_idempotent() {
    let ws = Workspace::new();
    ws.write_pkg("dep", "dep", "0.2.0", &[]);
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &["dep = { path = \"../dep\" }"]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.vendor_deps(&mut pkg).unwrap();

    let vendored_manifest = root_dir.join("vendor/dep_0.2.0").join(MOD_FILE);
    let before = fs::read_to_string(&vendored_manifest).unwrap();

    let mut pkg = client.load(&root_dir).unwrap();
    client.vendor_deps(&mut pkg).unwrap();
    assert_eq!(fs::read_to_string(&vendored_manifest).unwrap(), before);
    assert_eq!(pkg.lock_deps.len(), 1);
}

#[test]
fn vendor_from_preseeded_cache() {
    let ws = Workspace::new();
    ws.seed_cache("kcl1_0.0.1", "kcl1", "0.0.1");
    ws.seed_cache("kcl2_0.0.1", "kcl2", "0.0.1");
    let root_dir = ws.write_pkg(
        "root",
        "root",
        "0.0.1",
        &[
            "kcl1 = { oci = \"oci://ghcr.io/kcl-lang/kcl1\", tag = \"0.0.1\" }",
            "kcl2 = { oci = \"oci://ghcr.io/kcl-lang/kcl2\", tag = \"0.0.1\" }",
        ],
    );

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    client.vendor_deps(&mut pkg).unwrap();

    let vendor = root_dir.join("vendor");
    assert!(vendor.join("kcl1_0.0.1").join(MOD_FILE).exists());
    assert!(vendor.join("kcl2_0.0.1").join(MOD_FILE).exists());

    let map = client.resolve_deps_into_map(&pkg).unwrap();
    assert_eq!(map.len(), 2);
    assert!(map["kcl1"].ends_with("kcl1_0.0.1"));
    assert!(map["kcl2"].ends_with("kcl2_0.0.1"));
}

#[test]
fn add_oci_sub_package_from_cache() {
    let ws = Workspace::new();
    // The artifact bundles a sub-package next to the module root.
    let slot = ws.seed_cache("helloworld_0.1.4", "helloworld", "0.1.4");
    let sub = slot.join("subhelloworld");
    fs::create_dir_all(&sub).unwrap();
    fs::write(
        sub.join(MOD_FILE),
        "[package]\nname = \"subhelloworld\"\nversion = \"0.0.1\"\n",
    )
    .unwrap();
    fs::write(sub.join("main.k"), "res = \"Hello World!\"\n").unwrap();

    let root_dir = ws.write_pkg("root", "root", "0.0.1", &[]);

    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    let options = AddOptions::new()
        .with_source_url(
            "oci://ghcr.io/kcl-lang/helloworld?tag=0.1.4&name=subhelloworld&version=0.0.1",
        )
        .unwrap();
    client.add(&mut pkg, options).unwrap();

    // The manifest records the sub-package behind the module's oci tag.
    let mod_text = fs::read_to_string(root_dir.join(MOD_FILE)).unwrap();
    assert!(
        mod_text.contains(
            "subhelloworld = { oci = \"oci://ghcr.io/kcl-lang/helloworld\", tag = \"0.1.4\", version = \"0.0.1\" }"
        ),
        "manifest was: {mod_text}"
    );

    // The lock pins the sub-package with a non-empty sum.
    let locked = pkg.lock_deps.get("subhelloworld").unwrap();
    assert_eq!(locked.version, "0.0.1");
    assert!(!locked.sum.is_empty());
}

#[test]
fn add_from_local_archive() {
    let ws = Workspace::new();
    let content = ws.write_pkg("content", "archived", "0.3.0", &[]);

    // Pack the package into a plain tarball.
    let tar_path = ws.root.join("archived.tar");
    let file = fs::File::create(&tar_path).unwrap();
    let mut builder = tar::Builder::new(file);
    builder
        .append_path_with_name(content.join(MOD_FILE), MOD_FILE)
        .unwrap();
    builder
        .append_path_with_name(content.join("main.k"), "main.k")
        .unwrap();
    builder.finish().unwrap();

    let root_dir = ws.write_pkg("root", "root", "0.0.1", &[]);
    let client = ws.client();
    let mut pkg = client.load(&root_dir).unwrap();
    let options = AddOptions::new()
        .with_source_url(&tar_path.to_string_lossy())
        .unwrap();
    client.add(&mut pkg, options).unwrap();

    assert!(pkg.mod_file.deps.contains("archived"));
    assert_eq!(pkg.lock_deps.get("archived").unwrap().version, "0.3.0");
}

#[test]
fn virtual_directory_resolves_with_zero_deps() {
    let ws = Workspace::new();
    let bare = ws.root.join("bare-configs");
    fs::create_dir_all(&bare).unwrap();
    fs::write(bare.join("main.k"), "x = 1\n").unwrap();

    let client = ws.client();
    let source = Source::from_url(&bare.to_string_lossy()).unwrap();
    assert!(
        source.find_root_path().is_err(),
        "a manifest-less directory must not find a root"
    );

    // Adding it synthesizes a dependency with the sanitized dir name.
    let root_dir = ws.write_pkg("root", "root", "0.0.1", &[]);
    let mut pkg = client.load(&root_dir).unwrap();
    let options = AddOptions::new().with_source(source);
    client.add(&mut pkg, options).unwrap();
    assert!(pkg.mod_file.deps.contains("bare_configs"));
}
