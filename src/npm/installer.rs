//! Package installation pipeline
//!
//! Walks a package's transitive dependency graph depth-first, writing every
//! package's files under `/node_modules/` in the project tree. A per-run
//! visited set bounds the traversal to one visit per package name; the flat
//! layout holds exactly one version per package. Installs are idempotent on
//! `(name, version)` and a batch session buffers all file writes into one
//! bulk commit.

use crate::error::{Error, Result};
use crate::npm::lockfile::{LockedPackage, Lockfile};
use crate::npm::package_json::PackageJson;
use crate::npm::registry::{self, RegistryClient};
use crate::npm::tarball::FileData;
use crate::vfs::{path as vpath, FileKind, FileStore, NewFile};
use rustc_hash::FxHashSet as HashSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Root of the installed package tree
pub const NODE_MODULES: &str = "/node_modules";

/// Where bin shims are materialized
pub const BIN_DIR: &str = "/node_modules/.bin";

/// node_modules layout policy. Flat is the only implemented layout; the
/// enum is the configuration point for a future nested-conflict layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutPolicy {
    #[default]
    Flat,
}

/// Installer-wide options
#[derive(Debug, Clone, Default)]
pub struct InstallerOptions {
    pub layout: LayoutPolicy,
    /// Traverse `optionalDependencies` as well
    pub include_optional: bool,
}

/// Per-call install request
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallRequest {
    /// Register the package in the root manifest
    pub is_direct: bool,
    /// Register under `devDependencies` instead of `dependencies`
    pub save_dev: bool,
}

/// One package committed by an install run
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub is_direct: bool,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    pub dependencies: BTreeMap<String, String>,
}

type ProgressCallback = Box<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Orchestrates transitive installs, bin shims and uninstalls for one
/// project.
pub struct PackageInstaller {
    store: Arc<FileStore>,
    registry: Arc<RegistryClient>,
    project_id: String,
    options: InstallerOptions,
    /// `Some` while a batch session is open
    batch: Mutex<Option<Vec<NewFile>>>,
    progress: Mutex<Option<ProgressCallback>>,
    abort: AtomicBool,
}

impl PackageInstaller {
    pub fn new(store: Arc<FileStore>, registry: Arc<RegistryClient>, project_id: &str) -> Self {
        Self::with_options(store, registry, project_id, InstallerOptions::default())
    }

    pub fn with_options(
        store: Arc<FileStore>,
        registry: Arc<RegistryClient>,
        project_id: &str,
        options: InstallerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            project_id: project_id.to_string(),
            options,
            batch: Mutex::new(None),
            progress: Mutex::new(None),
            abort: AtomicBool::new(false),
        }
    }

    /// Invoked once per installed package, after its files are committed.
    pub fn set_install_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str, bool) + Send + Sync + 'static,
    {
        *self.progress.lock().expect("progress lock poisoned") = Some(Box::new(callback));
    }

    /// Ask the current traversal to stop at the next package boundary.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    // ── batch session ───────────────────────────────────────────────

    /// Begin buffering file writes. Until `finish_batch_processing`, no
    /// package file reaches the store.
    pub fn start_batch_processing(&self) {
        let mut batch = self.batch.lock().expect("batch lock poisoned");
        if batch.is_none() {
            *batch = Some(Vec::new());
        }
    }

    /// Commit the buffered writes in one bulk operation.
    pub fn finish_batch_processing(&self) -> Result<usize> {
        let buffered = self
            .batch
            .lock()
            .expect("batch lock poisoned")
            .take()
            .unwrap_or_default();
        if buffered.is_empty() {
            return Ok(0);
        }
        self.store.create_files_bulk(&self.project_id, buffered)
    }

    fn drop_batch(&self) {
        let mut batch = self.batch.lock().expect("batch lock poisoned");
        if batch.is_some() {
            *batch = Some(Vec::new());
        }
    }

    fn write_file(&self, row: NewFile) -> Result<()> {
        let mut batch = self.batch.lock().expect("batch lock poisoned");
        match batch.as_mut() {
            Some(buffer) => {
                buffer.push(row);
                Ok(())
            }
            None => {
                self.store.create_file_full(&self.project_id, row)?;
                Ok(())
            }
        }
    }

    // ── install ─────────────────────────────────────────────────────

    /// Install `name@range` and its transitive dependencies.
    ///
    /// Returns the packages this run committed (already-satisfied packages
    /// are skipped). A failure inside a batch session drops the buffered
    /// writes before surfacing.
    pub fn install_with_dependencies(
        &self,
        name: &str,
        range: &str,
        request: InstallRequest,
    ) -> Result<Vec<InstalledPackage>> {
        self.abort.store(false, Ordering::SeqCst);
        let mut visited = HashSet::default();
        let mut installed = Vec::new();

        let outcome =
            self.install_recursive(name, range, request.is_direct, &mut visited, &mut installed);
        if let Err(err) = outcome {
            self.drop_batch();
            return Err(err);
        }

        if request.is_direct {
            let resolved_range = installed
                .iter()
                .find(|p| p.name == name)
                .map(|p| format!("^{}", p.version))
                .or_else(|| self.installed_version(name).ok().flatten().map(|v| format!("^{}", v)));
            if let Some(resolved_range) = resolved_range {
                let mut manifest = self.read_root_manifest()?;
                manifest.set_dependency(name, &resolved_range, request.save_dev);
                self.save_root_manifest(&manifest)?;
            }
        }

        self.ensure_gitignore()?;
        self.record_installs(&installed)?;
        Ok(installed)
    }

    fn install_recursive(
        &self,
        name: &str,
        range: &str,
        is_direct: bool,
        visited: &mut HashSet<String>,
        installed: &mut Vec<InstalledPackage>,
    ) -> Result<()> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(Error::internal("install aborted"));
        }
        if !visited.insert(name.to_string()) {
            return Ok(());
        }

        // Idempotence: an installed version satisfying the range stays.
        if let Some(existing) = self.installed_version(name)? {
            if registry::version_satisfies(&existing, range) {
                tracing::debug!(package = name, version = %existing, "already satisfied, skipping");
                return Ok(());
            }
            // First-writer-wins applies within a run; an explicit new range
            // replaces the old tree wholesale.
            self.remove_directory(&format!("{}/{}/", NODE_MODULES, name))?;
        }

        let archive = self.registry.fetch_package(name, range)?;
        let version = archive.metadata.version.clone();
        tracing::info!(package = name, version = %version, "installing");

        let mut dependencies: BTreeMap<String, String> =
            archive.metadata.dependencies.clone();
        if self.options.include_optional {
            for (dep, dep_range) in &archive.metadata.optional_dependencies {
                dependencies
                    .entry(dep.clone())
                    .or_insert_with(|| dep_range.clone());
            }
        }

        // Dependencies commit before their dependent.
        for (dep_name, dep_range) in &dependencies {
            self.install_recursive(dep_name, dep_range, false, visited, installed)?;
        }

        let package_root = format!("{}/{}", NODE_MODULES, name);
        for entry in &archive.entries {
            let file_path = vpath::join(&package_root, &entry.path);
            let row = match &entry.data {
                FileData::Text(text) => NewFile::text(file_path, text.clone()),
                FileData::Binary(bytes) => NewFile::binary(file_path, bytes.clone()),
            };
            self.write_file(row)?;
        }

        let record = InstalledPackage {
            name: name.to_string(),
            version: version.clone(),
            is_direct,
            resolved: archive.metadata.dist.as_ref().and_then(|d| d.tarball.clone()),
            integrity: archive.metadata.dist.as_ref().and_then(|d| d.shasum.clone()),
            dependencies,
        };
        installed.push(record);

        if let Some(callback) = self.progress.lock().expect("progress lock poisoned").as_ref() {
            callback(name, &version, is_direct);
        }
        Ok(())
    }

    /// Version recorded in the installed package's manifest, if present.
    pub fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let manifest_path = format!("{}/{}/package.json", NODE_MODULES, name);
        match self.store.get_file_by_path(&self.project_id, &manifest_path)? {
            Some(entry) => Ok(PackageJson::from_json(&entry.content)
                .ok()
                .and_then(|pkg| pkg.version)),
            None => Ok(None),
        }
    }

    // ── bin shims ───────────────────────────────────────────────────

    /// Materialize `/node_modules/.bin/<name>` shims for every bin entry
    /// the installed package declares. Returns the shim names written.
    pub fn ensure_bins_for_package(&self, name: &str) -> Result<Vec<String>> {
        let manifest_path = format!("{}/{}/package.json", NODE_MODULES, name);
        let manifest_json = self
            .store
            .get_file_by_path(&self.project_id, &manifest_path)?
            .ok_or_else(|| Error::not_found(format!("'{}' is not installed", name)))?;
        let manifest = PackageJson::from_json(&manifest_json.content)?;

        let mut written = Vec::new();
        for (bin_name, target) in manifest.bin_entries() {
            let target = target.trim_start_matches("./");
            let shim = format!("#!/usr/bin/env node\nrequire('../{}/{}')", name, target);
            let shim_path = format!("{}/{}", BIN_DIR, bin_name);
            self.store
                .create_file(&self.project_id, &shim_path, &shim, FileKind::File)?;
            written.push(bin_name);
        }
        Ok(written)
    }

    // ── uninstall ───────────────────────────────────────────────────

    /// Delete every file whose path starts with `prefix`.
    pub fn remove_directory(&self, prefix: &str) -> Result<usize> {
        let doomed = self.store.get_files_by_prefix(&self.project_id, prefix)?;
        let count = doomed.len();
        for entry in doomed {
            self.store.delete_file(&entry.id)?;
        }
        Ok(count)
    }

    /// Uninstall `name`, then sweep packages no longer reachable from the
    /// root manifest's dependencies. Returns every removed package name.
    pub fn uninstall_with_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        if self
            .remove_directory(&format!("{}/{}/", NODE_MODULES, name))?
            > 0
        {
            removed.push(name.to_string());
        }

        let mut manifest = self.read_root_manifest()?;
        if manifest.remove_dependency(name) {
            self.save_root_manifest(&manifest)?;
        }

        for orphan in self.collect_orphans(&manifest)? {
            self.remove_directory(&format!("{}/{}/", NODE_MODULES, orphan))?;
            removed.push(orphan);
        }

        self.remove_stale_bins(&removed)?;
        self.forget_locked(&removed)?;
        tracing::info!(package = name, removed = removed.len(), "uninstalled");
        Ok(removed)
    }

    /// Installed packages not reachable from the root dependencies through
    /// the installed manifests' own `dependencies` edges.
    fn collect_orphans(&self, root: &PackageJson) -> Result<Vec<String>> {
        let installed = self.installed_packages()?;

        let mut reachable: HashSet<String> = HashSet::default();
        let mut queue: Vec<String> = root
            .dependency_names()
            .into_iter()
            .filter(|dep| installed.contains(dep))
            .collect();
        while let Some(current) = queue.pop() {
            if !reachable.insert(current.clone()) {
                continue;
            }
            let manifest_path = format!("{}/{}/package.json", NODE_MODULES, current);
            if let Some(entry) = self.store.get_file_by_path(&self.project_id, &manifest_path)? {
                if let Ok(pkg) = PackageJson::from_json(&entry.content) {
                    for dep in pkg.dependencies.unwrap_or_default().keys() {
                        if installed.contains(dep) && !reachable.contains(dep) {
                            queue.push(dep.clone());
                        }
                    }
                }
            }
        }

        let mut orphans: Vec<String> = installed
            .into_iter()
            .filter(|pkg| !reachable.contains(pkg))
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Names of every package directory holding a manifest.
    fn installed_packages(&self) -> Result<HashSet<String>> {
        let prefix = format!("{}/", NODE_MODULES);
        let mut names = HashSet::default();
        for entry in self.store.get_files_by_prefix(&self.project_id, &prefix)? {
            let Some(rest) = entry.path.strip_prefix(&prefix) else {
                continue;
            };
            let segments: Vec<&str> = rest.split('/').collect();
            let name = match segments.as_slice() {
                [pkg, "package.json"] if !pkg.starts_with('.') => pkg.to_string(),
                [scope, pkg, "package.json"] if scope.starts_with('@') => {
                    format!("{}/{}", scope, pkg)
                }
                _ => continue,
            };
            names.insert(name);
        }
        Ok(names)
    }

    fn remove_stale_bins(&self, removed: &[String]) -> Result<()> {
        let prefix = format!("{}/", BIN_DIR);
        for shim in self.store.get_files_by_prefix(&self.project_id, &prefix)? {
            let points_at_removed = removed
                .iter()
                .any(|name| shim.content.contains(&format!("require('../{}/", name)));
            if points_at_removed {
                self.store.delete_file(&shim.id)?;
            }
        }
        Ok(())
    }

    // ── manifest, lockfile, hygiene ─────────────────────────────────

    fn read_root_manifest(&self) -> Result<PackageJson> {
        match self.store.get_file_by_path(&self.project_id, "/package.json")? {
            Some(entry) => PackageJson::from_json(&entry.content),
            None => Ok(PackageJson::default()),
        }
    }

    fn save_root_manifest(&self, manifest: &PackageJson) -> Result<()> {
        let json = manifest.to_json_pretty()?;
        self.store
            .create_file(&self.project_id, "/package.json", &json, FileKind::File)?;
        Ok(())
    }

    /// Append `node_modules` to `/.gitignore` when absent.
    fn ensure_gitignore(&self) -> Result<()> {
        let existing = self.store.get_file_by_path(&self.project_id, "/.gitignore")?;
        let content = existing.as_ref().map(|e| e.content.as_str()).unwrap_or("");
        if content.lines().any(|line| line.trim() == "node_modules") {
            return Ok(());
        }
        let mut updated = content.to_string();
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str("node_modules\n");
        self.store
            .create_file(&self.project_id, "/.gitignore", &updated, FileKind::File)?;
        Ok(())
    }

    fn record_installs(&self, installed: &[InstalledPackage]) -> Result<()> {
        if installed.is_empty() {
            return Ok(());
        }
        let root = self.read_root_manifest()?;
        let mut lock = Lockfile::load(&self.store, &self.project_id)?.unwrap_or_else(|| {
            Lockfile::new(
                root.name.as_deref().unwrap_or("project"),
                root.version.as_deref().unwrap_or("0.0.0"),
            )
        });
        for package in installed {
            lock.add_package(
                &package.name,
                LockedPackage {
                    version: package.version.clone(),
                    resolved: package.resolved.clone(),
                    integrity: package.integrity.clone(),
                    dependencies: package.dependencies.clone(),
                },
            );
        }
        lock.save(&self.store, &self.project_id)
    }

    fn forget_locked(&self, removed: &[String]) -> Result<()> {
        if let Some(mut lock) = Lockfile::load(&self.store, &self.project_id)? {
            let mut changed = false;
            for name in removed {
                changed |= lock.remove_package(name);
            }
            if changed {
                lock.save(&self.store, &self.project_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npm::registry::Fetch;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rustc_hash::FxHashMap as HashMap;
    use std::io::Write;

    /// Registry fixture: packuments and tarballs served from memory.
    struct FixtureFetch {
        packuments: HashMap<String, serde_json::Value>,
        tarballs: HashMap<String, Vec<u8>>,
    }

    impl Fetch for FixtureFetch {
        fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
            let name = url.rsplit('/').next().unwrap_or_default().replace("%2f", "/");
            self.packuments
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::not_found(url.to_string()))
        }

        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            self.tarballs
                .get(url)
                .cloned()
                .ok_or_else(|| Error::not_found(url.to_string()))
        }
    }

    struct FixturePackage {
        name: &'static str,
        version: &'static str,
        dependencies: Vec<(&'static str, &'static str)>,
        bin: Option<serde_json::Value>,
        files: Vec<(&'static str, &'static str)>,
    }

    impl FixturePackage {
        fn new(name: &'static str, version: &'static str) -> Self {
            Self {
                name,
                version,
                dependencies: Vec::new(),
                bin: None,
                files: vec![("index.js", "module.exports = {};")],
            }
        }

        fn deps(mut self, deps: &[(&'static str, &'static str)]) -> Self {
            self.dependencies = deps.to_vec();
            self
        }

        fn bin(mut self, bin: serde_json::Value) -> Self {
            self.bin = Some(bin);
            self
        }

        fn file(mut self, path: &'static str, content: &'static str) -> Self {
            self.files.push((path, content));
            self
        }
    }

    fn gzip_tar(files: &[(String, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path.as_str(), content.as_slice())
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn fixture_registry(packages: Vec<FixturePackage>) -> Arc<RegistryClient> {
        let mut packuments: HashMap<String, serde_json::Value> = HashMap::default();
        let mut tarballs = HashMap::default();

        for pkg in packages {
            let tarball_url = format!(
                "https://registry.test/{}/-/{}-{}.tgz",
                pkg.name, pkg.name, pkg.version
            );
            let deps: serde_json::Map<String, serde_json::Value> = pkg
                .dependencies
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect();

            let mut manifest = serde_json::json!({
                "name": pkg.name,
                "version": pkg.version,
                "main": "index.js",
                "dependencies": deps,
            });
            if let Some(ref bin) = pkg.bin {
                manifest["bin"] = bin.clone();
            }

            let mut tar_files: Vec<(String, Vec<u8>)> = vec![(
                "package/package.json".to_string(),
                serde_json::to_vec_pretty(&manifest).unwrap(),
            )];
            for (path, content) in &pkg.files {
                tar_files.push((format!("package/{}", path), content.as_bytes().to_vec()));
            }
            tarballs.insert(tarball_url.clone(), gzip_tar(&tar_files));

            let version_meta = {
                let mut m = manifest.clone();
                m["dist"] = serde_json::json!({ "tarball": tarball_url, "shasum": "fixture" });
                m
            };
            let entry = packuments.entry(pkg.name.to_string()).or_insert_with(|| {
                serde_json::json!({
                    "name": pkg.name,
                    "dist-tags": {},
                    "versions": {}
                })
            });
            entry["versions"][pkg.version] = version_meta;
            entry["dist-tags"]["latest"] = serde_json::Value::String(pkg.version.to_string());
        }

        Arc::new(RegistryClient::with_fetcher(
            "https://registry.test",
            Box::new(FixtureFetch {
                packuments,
                tarballs,
            }),
        ))
    }

    fn uvu_like_registry() -> Arc<RegistryClient> {
        fixture_registry(vec![
            FixturePackage::new("kleur", "4.1.5"),
            FixturePackage::new("mri", "1.2.0"),
            FixturePackage::new("dequal", "2.0.3"),
            FixturePackage::new("diff", "5.0.0"),
            FixturePackage::new("uvu", "0.5.6")
                .deps(&[
                    ("kleur", "^4.0.0"),
                    ("mri", "^1.1.0"),
                    ("dequal", "^2.0.0"),
                    ("diff", "^5.0.0"),
                ])
                .bin(serde_json::json!({"uvu": "./bin.js"}))
                .file("bin.js", "#!/usr/bin/env node\nrequire('./run');"),
        ])
    }

    fn setup(registry: Arc<RegistryClient>) -> (Arc<FileStore>, String, PackageInstaller) {
        let store = Arc::new(FileStore::new());
        let project = store.create_empty_project("install-test").unwrap();
        let installer = PackageInstaller::new(Arc::clone(&store), registry, &project.id);
        (store, project.id, installer)
    }

    #[test]
    fn test_install_single_package() {
        let (store, project, installer) =
            setup(fixture_registry(vec![FixturePackage::new("kleur", "4.1.5")]));
        let installed = installer
            .install_with_dependencies("kleur", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].version, "4.1.5");

        let manifest = store.read_text(&project, "/package.json").unwrap();
        let pkg = PackageJson::from_json(&manifest).unwrap();
        assert_eq!(
            pkg.dependencies.unwrap().get("kleur").map(String::as_str),
            Some("^4.1.5")
        );
        assert!(store
            .file_exists(&project, "/node_modules/kleur/package.json")
            .unwrap());
        assert!(store
            .file_exists(&project, "/node_modules/kleur/index.js")
            .unwrap());
    }

    #[test]
    fn test_install_writes_gitignore() {
        let (store, project, installer) =
            setup(fixture_registry(vec![FixturePackage::new("kleur", "4.1.5")]));
        installer
            .install_with_dependencies("kleur", "latest", InstallRequest::default())
            .unwrap();
        let gitignore = store.read_text(&project, "/.gitignore").unwrap();
        assert!(gitignore.lines().any(|l| l == "node_modules"));

        // A second install must not duplicate the line
        installer
            .install_with_dependencies("kleur", "latest", InstallRequest::default())
            .unwrap();
        let gitignore = store.read_text(&project, "/.gitignore").unwrap();
        assert_eq!(
            gitignore.lines().filter(|l| *l == "node_modules").count(),
            1
        );
    }

    #[test]
    fn test_install_transitive() {
        let (store, project, installer) = setup(uvu_like_registry());
        let installed = installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        assert_eq!(installed.len(), 5);
        for name in ["uvu", "kleur", "mri", "dequal", "diff"] {
            assert!(
                store
                    .file_exists(&project, &format!("/node_modules/{}/package.json", name))
                    .unwrap(),
                "{} missing",
                name
            );
        }
        // Dependencies commit before their dependent
        let uvu_pos = installed.iter().position(|p| p.name == "uvu").unwrap();
        assert_eq!(uvu_pos, installed.len() - 1);
    }

    #[test]
    fn test_install_idempotent() {
        let (store, project, installer) = setup(uvu_like_registry());
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        let manifest_before = store.read_text(&project, "/package.json").unwrap();
        let files_before = store.get_files_by_prefix(&project, "/node_modules/").unwrap().len();

        let second = installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        assert!(second.is_empty());
        let manifest_after = store.read_text(&project, "/package.json").unwrap();
        let files_after = store.get_files_by_prefix(&project, "/node_modules/").unwrap().len();
        assert_eq!(manifest_before, manifest_after);
        assert_eq!(files_before, files_after);
    }

    #[test]
    fn test_diamond_dependency_installed_once() {
        let registry = fixture_registry(vec![
            FixturePackage::new("shared", "1.0.0"),
            FixturePackage::new("left", "1.0.0").deps(&[("shared", "^1.0.0")]),
            FixturePackage::new("right", "1.0.0").deps(&[("shared", "^1.0.0")]),
            FixturePackage::new("top", "1.0.0")
                .deps(&[("left", "^1.0.0"), ("right", "^1.0.0")]),
        ]);
        let (_store, _project, installer) = setup(registry);
        let installed = installer
            .install_with_dependencies("top", "latest", InstallRequest::default())
            .unwrap();
        let shared_count = installed.iter().filter(|p| p.name == "shared").count();
        assert_eq!(shared_count, 1);
        assert_eq!(installed.len(), 4);
    }

    #[test]
    fn test_batch_buffers_until_finish() {
        let (store, project, installer) =
            setup(fixture_registry(vec![FixturePackage::new("kleur", "4.1.5")]));
        installer.start_batch_processing();
        installer
            .install_with_dependencies("kleur", "latest", InstallRequest::default())
            .unwrap();
        assert!(!store
            .file_exists(&project, "/node_modules/kleur/index.js")
            .unwrap());

        let committed = installer.finish_batch_processing().unwrap();
        assert!(committed >= 2);
        assert!(store
            .file_exists(&project, "/node_modules/kleur/index.js")
            .unwrap());
    }

    #[test]
    fn test_batch_failure_drops_buffer() {
        let registry = fixture_registry(vec![FixturePackage::new("present", "1.0.0")
            .deps(&[("missing-dep", "^1.0.0")])]);
        let (store, project, installer) = setup(registry);

        installer.start_batch_processing();
        let err = installer
            .install_with_dependencies("present", "latest", InstallRequest::default())
            .unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(_)));

        let committed = installer.finish_batch_processing().unwrap();
        assert_eq!(committed, 0);
        assert!(store
            .get_files_by_prefix(&project, "/node_modules/")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_package_fails() {
        let (_store, _project, installer) = setup(fixture_registry(vec![]));
        let err = installer
            .install_with_dependencies("ghost", "latest", InstallRequest::default())
            .unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(_)));
    }

    #[test]
    fn test_ensure_bins_shim_format() {
        let (store, project, installer) = setup(uvu_like_registry());
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest::default())
            .unwrap();
        let written = installer.ensure_bins_for_package("uvu").unwrap();
        assert_eq!(written, vec!["uvu".to_string()]);

        let shim = store.read_text(&project, "/node_modules/.bin/uvu").unwrap();
        assert_eq!(shim, "#!/usr/bin/env node\nrequire('../uvu/bin.js')");
    }

    #[test]
    fn test_ensure_bins_requires_installed_package() {
        let (_store, _project, installer) = setup(fixture_registry(vec![]));
        assert!(matches!(
            installer.ensure_bins_for_package("uvu"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_directory() {
        let (store, project, installer) =
            setup(fixture_registry(vec![FixturePackage::new("kleur", "4.1.5")]));
        installer
            .install_with_dependencies("kleur", "latest", InstallRequest::default())
            .unwrap();
        let removed = installer.remove_directory("/node_modules/kleur/").unwrap();
        assert!(removed >= 2);
        assert!(store
            .get_files_by_prefix(&project, "/node_modules/kleur/")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_uninstall_collects_orphans() {
        let (store, project, installer) = setup(uvu_like_registry());
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        installer.ensure_bins_for_package("uvu").unwrap();

        let mut removed = installer.uninstall_with_dependencies("uvu").unwrap();
        removed.sort();
        assert_eq!(
            removed,
            vec!["dequal", "diff", "kleur", "mri", "uvu"]
        );
        assert!(store
            .get_files_by_prefix(&project, "/node_modules/uvu/")
            .unwrap()
            .is_empty());
        assert!(!store
            .file_exists(&project, "/node_modules/.bin/uvu")
            .unwrap());

        let manifest = store.read_text(&project, "/package.json").unwrap();
        assert!(!manifest.contains("\"uvu\""));
    }

    #[test]
    fn test_uninstall_keeps_shared_dependency() {
        // kleur is both a direct dependency and a transitive one of uvu
        let (store, project, installer) = setup(uvu_like_registry());
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        installer
            .install_with_dependencies("kleur", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();

        let removed = installer.uninstall_with_dependencies("uvu").unwrap();
        assert!(!removed.contains(&"kleur".to_string()));
        assert!(store
            .file_exists(&project, "/node_modules/kleur/package.json")
            .unwrap());
    }

    #[test]
    fn test_progress_callback_fires_per_package() {
        let (_store, _project, installer) = setup(uvu_like_registry());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        installer.set_install_progress_callback(move |name, version, is_direct| {
            sink.lock()
                .unwrap()
                .push((name.to_string(), version.to_string(), is_direct));
        });
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.iter().any(|(n, v, direct)| n == "uvu" && v == "0.5.6" && *direct));
        assert!(events.iter().any(|(n, _, direct)| n == "kleur" && !*direct));
    }

    #[test]
    fn test_lockfile_written_and_consistent() {
        let (store, project, installer) = setup(uvu_like_registry());
        installer
            .install_with_dependencies("uvu", "latest", InstallRequest { is_direct: true, save_dev: false })
            .unwrap();
        let lock = Lockfile::load(&store, &project).unwrap().unwrap();
        assert!(lock.get_package("uvu").is_some());
        assert!(lock.get_package("kleur").is_some());
        assert!(lock.is_consistent());

        installer.uninstall_with_dependencies("uvu").unwrap();
        let lock = Lockfile::load(&store, &project).unwrap().unwrap();
        assert!(lock.get_package("uvu").is_none());
    }

    #[test]
    fn test_save_dev_targets_dev_dependencies() {
        let (store, project, installer) =
            setup(fixture_registry(vec![FixturePackage::new("uvu-lite", "1.0.0")]));
        installer
            .install_with_dependencies(
                "uvu-lite",
                "latest",
                InstallRequest { is_direct: true, save_dev: true },
            )
            .unwrap();
        let manifest = store.read_text(&project, "/package.json").unwrap();
        let pkg = PackageJson::from_json(&manifest).unwrap();
        assert!(pkg.dev_dependencies.unwrap().contains_key("uvu-lite"));
    }
}
