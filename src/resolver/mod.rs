//! Node.js-compatible module resolution over the virtual filesystem
//!
//! Implements core-module lookup, relative/absolute probing with extension
//! and index fallback, the upward `node_modules` walk, `package.json`
//! entry-point fields and `exports` conditions. Resolution never fails for
//! "not found" — it returns `None`; only a malformed `package.json` is an
//! error.

use crate::error::{Error, Result};
use crate::npm::package_json::{PackageJson, RequesterKind};
use crate::vfs::{path as vpath, FileStore};
use rustc_hash::FxHashMap as HashMap;
use std::sync::{Arc, Mutex};

/// Reserved built-in module names; the runtime supplies implementations or
/// stubs for these.
pub const CORE_MODULES: &[&str] = &[
    "fs",
    "path",
    "os",
    "events",
    "stream",
    "buffer",
    "util",
    "crypto",
    "process",
    "child_process",
    "http",
    "https",
    "url",
    "querystring",
    "assert",
    "zlib",
    "tty",
    "vm",
    "module",
];

/// Probe order for extensionless paths
const EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".ts", ".tsx", ".jsx", ".json"];

/// Index files tried when a path is a directory
const INDEX_FILES: &[&str] = &["index.js", "index.ts", "index.tsx", "index.json"];

/// How the runtime must treat a resolved module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    CommonJs,
    EsModule,
    Json,
    Binary,
}

/// A successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    /// Absolute virtual path, or `node:<name>` for core modules
    pub path: String,
    pub kind: ModuleKind,
    /// Nearest ancestor directory containing a `package.json`
    pub package_boundary: Option<String>,
}

impl ResolvedModule {
    /// Whether this is a synthetic core-module result
    pub fn is_core(&self) -> bool {
        self.path.starts_with("node:")
    }
}

/// Whether `specifier` names a reserved built-in
pub fn is_core_module(specifier: &str) -> bool {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    CORE_MODULES.contains(&name)
}

/// Node-style resolver scoped to one project
pub struct ModuleResolver {
    store: Arc<FileStore>,
    project_id: String,
    /// (specifier, requester dir) → hit
    cache: Mutex<HashMap<(String, String), ResolvedModule>>,
}

impl ModuleResolver {
    pub fn new(store: Arc<FileStore>, project_id: &str) -> Self {
        Self {
            store,
            project_id: project_id.to_string(),
            cache: Mutex::new(HashMap::default()),
        }
    }

    /// Resolve `specifier` as required from `requester_path`.
    pub fn resolve(
        &self,
        specifier: &str,
        requester_path: &str,
    ) -> Result<Option<ResolvedModule>> {
        // 1. Core modules
        let bare_name = specifier.strip_prefix("node:").unwrap_or(specifier);
        if CORE_MODULES.contains(&bare_name) {
            return Ok(Some(ResolvedModule {
                path: format!("node:{}", bare_name),
                kind: ModuleKind::CommonJs,
                package_boundary: None,
            }));
        }

        let requester_dir = vpath::dirname(requester_path);
        let cache_key = (specifier.to_string(), requester_dir.clone());
        if let Some(cached) = self.cache_get(&cache_key)? {
            return Ok(Some(cached));
        }

        let requester_kind = self.requester_kind(requester_path)?;
        let hit = if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
        {
            // 2. Relative / absolute
            let target = vpath::join(&requester_dir, specifier);
            self.probe(&target)?
        } else {
            // 3. Bare specifier: node_modules walk
            self.resolve_bare(specifier, &requester_dir, requester_kind)?
        };

        let resolved = match hit {
            Some(path) => Some(self.finish(&path)?),
            None => None,
        };
        // Misses are not cached; a later install may fill them in.
        if let Some(ref hit) = resolved {
            self.cache
                .lock()
                .expect("resolver cache poisoned")
                .insert(cache_key, hit.clone());
        }
        Ok(resolved)
    }

    /// Drop every cached resolution.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("resolver cache poisoned").clear();
    }

    // ── probing ─────────────────────────────────────────────────────

    /// Exact path, then extensions, then directory entry point, then
    /// index files. First hit wins.
    fn probe(&self, target: &str) -> Result<Option<String>> {
        if self.is_file(target)? {
            return Ok(Some(target.to_string()));
        }
        for ext in EXTENSIONS {
            let with_ext = format!("{}{}", target, ext);
            if self.is_file(&with_ext)? {
                return Ok(Some(with_ext));
            }
        }
        if self.is_dir(target)? {
            if let Some(pkg) = self.load_package_json(&format!("{}/package.json", target))? {
                if let Some(entry) = pkg.directory_entry() {
                    let entry_target = vpath::join(target, &entry);
                    if let Some(hit) = self.probe_shallow(&entry_target)? {
                        return Ok(Some(hit));
                    }
                }
            }
            for index in INDEX_FILES {
                let candidate = format!("{}/{}", target, index);
                if self.is_file(&candidate)? {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Exact + extension + index probing without another package.json
    /// indirection (used for entry-point targets).
    fn probe_shallow(&self, target: &str) -> Result<Option<String>> {
        if self.is_file(target)? {
            return Ok(Some(target.to_string()));
        }
        for ext in EXTENSIONS {
            let with_ext = format!("{}{}", target, ext);
            if self.is_file(&with_ext)? {
                return Ok(Some(with_ext));
            }
        }
        if self.is_dir(target)? {
            for index in INDEX_FILES {
                let candidate = format!("{}/{}", target, index);
                if self.is_file(&candidate)? {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &str,
        requester_kind: RequesterKind,
    ) -> Result<Option<String>> {
        let (package_name, subpath) = split_bare_specifier(specifier);

        for level in vpath::ancestors(from_dir) {
            let package_dir = if level == "/" {
                format!("/node_modules/{}", package_name)
            } else {
                format!("{}/node_modules/{}", level, package_name)
            };
            if !self.is_dir(&package_dir)? {
                continue;
            }

            let manifest = self.load_package_json(&format!("{}/package.json", package_dir))?;

            if let Some(ref sub) = subpath {
                if let Some(pkg) = &manifest {
                    if let Some(target) = pkg.subpath_export(sub, requester_kind) {
                        let export_target = vpath::join(&package_dir, &target);
                        if let Some(hit) = self.probe_shallow(&export_target)? {
                            return Ok(Some(hit));
                        }
                    }
                }
                // No exports match: treat the subpath as a package-relative
                // file and fall back to the full probe rules.
                return self.probe(&vpath::join(&package_dir, sub));
            }

            if let Some(pkg) = &manifest {
                if let Some(entry) = pkg.root_entry(requester_kind) {
                    let entry_target = vpath::join(&package_dir, &entry);
                    if let Some(hit) = self.probe_shallow(&entry_target)? {
                        return Ok(Some(hit));
                    }
                }
            }
            return self.probe_shallow(&format!("{}/index", package_dir));
        }
        Ok(None)
    }

    // ── classification ──────────────────────────────────────────────

    fn finish(&self, path: &str) -> Result<ResolvedModule> {
        Ok(ResolvedModule {
            kind: self.classify(path)?,
            package_boundary: self.package_boundary(path)?,
            path: path.to_string(),
        })
    }

    /// Kind by extension, binary marker, then nearest `type` field.
    fn classify(&self, path: &str) -> Result<ModuleKind> {
        if let Some(entry) = self.store.get_file_by_path(&self.project_id, path)? {
            if entry.is_binary {
                return Ok(ModuleKind::Binary);
            }
        }
        match vpath::extname(path).as_str() {
            ".mjs" => return Ok(ModuleKind::EsModule),
            ".cjs" => return Ok(ModuleKind::CommonJs),
            ".json" => return Ok(ModuleKind::Json),
            _ => {}
        }
        if let Some(boundary) = self.package_boundary(path)? {
            if let Some(pkg) = self.load_package_json(&format!("{}/package.json", boundary))? {
                if pkg.is_esm() {
                    return Ok(ModuleKind::EsModule);
                }
            }
        }
        Ok(ModuleKind::CommonJs)
    }

    /// Nearest ancestor directory holding a `package.json`.
    fn package_boundary(&self, path: &str) -> Result<Option<String>> {
        for dir in vpath::ancestors(&vpath::dirname(path)) {
            let manifest = if dir == "/" {
                "/package.json".to_string()
            } else {
                format!("{}/package.json", dir)
            };
            if self.is_file(&manifest)? {
                return Ok(Some(dir));
            }
        }
        Ok(None)
    }

    /// Whether the requesting file itself is ESM, for `exports` conditions.
    fn requester_kind(&self, requester_path: &str) -> Result<RequesterKind> {
        match vpath::extname(requester_path).as_str() {
            ".mjs" => return Ok(RequesterKind::EsModule),
            ".cjs" => return Ok(RequesterKind::CommonJs),
            _ => {}
        }
        if let Some(boundary) = self.package_boundary(requester_path)? {
            if let Some(pkg) = self.load_package_json(&format!("{}/package.json", boundary))? {
                if pkg.is_esm() {
                    return Ok(RequesterKind::EsModule);
                }
            }
        }
        Ok(RequesterKind::CommonJs)
    }

    // ── store access ────────────────────────────────────────────────

    fn is_file(&self, path: &str) -> Result<bool> {
        self.store.file_exists(&self.project_id, path)
    }

    /// A directory exists when a folder entry is present or any file lives
    /// beneath it — the store tolerates missing intermediate folders.
    fn is_dir(&self, path: &str) -> Result<bool> {
        if let Some(entry) = self.store.get_file_by_path(&self.project_id, path)? {
            if entry.kind == crate::vfs::FileKind::Folder {
                return Ok(true);
            }
        }
        let prefix = format!("{}/", path);
        Ok(!self
            .store
            .get_files_by_prefix(&self.project_id, &prefix)?
            .is_empty())
    }

    fn load_package_json(&self, manifest_path: &str) -> Result<Option<PackageJson>> {
        match self.store.get_file_by_path(&self.project_id, manifest_path)? {
            Some(entry) if entry.is_text_file() => {
                let pkg = PackageJson::from_json(&entry.content).map_err(|_| {
                    Error::invalid_manifest(format!("malformed '{}'", manifest_path))
                })?;
                Ok(Some(pkg))
            }
            _ => Ok(None),
        }
    }

    /// Cache hits are revalidated against the store so a stale entry never
    /// resolves to a path that no longer exists.
    fn cache_get(&self, key: &(String, String)) -> Result<Option<ResolvedModule>> {
        let cached = self
            .cache
            .lock()
            .expect("resolver cache poisoned")
            .get(key)
            .cloned();
        match cached {
            Some(resolved) => {
                if self.is_file(&resolved.path)? {
                    Ok(Some(resolved))
                } else {
                    self.cache
                        .lock()
                        .expect("resolver cache poisoned")
                        .remove(key);
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

/// Split a bare specifier into package name and optional subpath; scoped
/// names keep their first two segments.
fn split_bare_specifier(specifier: &str) -> (String, Option<String>) {
    if specifier.starts_with('@') {
        let parts: Vec<&str> = specifier.splitn(3, '/').collect();
        if parts.len() >= 2 {
            let name = format!("{}/{}", parts[0], parts[1]);
            let subpath = parts.get(2).map(|s| s.to_string());
            (name, subpath)
        } else {
            (specifier.to_string(), None)
        }
    } else {
        match specifier.split_once('/') {
            Some((name, sub)) => (name.to_string(), Some(sub.to_string())),
            None => (specifier.to_string(), None),
        }
    }
}
