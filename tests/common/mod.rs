//! Shared fixtures: an in-memory registry serving packuments and tarballs.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use modbox::npm::registry::Fetch;
use modbox::npm::RegistryClient;
use modbox::vfs::FileStore;
use modbox::{Error, Result};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// One publishable package for the fixture registry.
pub struct FixturePackage {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<(String, String)>,
    pub bin: Option<serde_json::Value>,
    /// `(path, contents)` relative to the package root; a `package.json`
    /// is generated automatically.
    pub files: Vec<(String, String)>,
    pub main: String,
}

impl FixturePackage {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            dependencies: Vec::new(),
            bin: None,
            files: vec![("index.js".to_string(), "module.exports = {};".to_string())],
            main: "index.js".to_string(),
        }
    }

    pub fn deps(mut self, deps: &[(&str, &str)]) -> Self {
        self.dependencies = deps
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn bin(mut self, bin: serde_json::Value) -> Self {
        self.bin = Some(bin);
        self
    }

    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.to_string()));
        self
    }

    pub fn entry(mut self, main: &str, contents: &str) -> Self {
        self.main = main.to_string();
        self.files = vec![(main.to_string(), contents.to_string())];
        self
    }
}

struct FixtureFetch {
    packuments: HashMap<String, serde_json::Value>,
    tarballs: HashMap<String, Vec<u8>>,
}

impl Fetch for FixtureFetch {
    fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        let name = url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .replace("%2f", "/");
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

fn gzip_tar(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path.as_str(), contents.as_slice())
            .unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Build a registry client backed entirely by the given fixtures.
pub fn fixture_registry(packages: Vec<FixturePackage>) -> Arc<RegistryClient> {
    let mut packuments: HashMap<String, serde_json::Value> = HashMap::new();
    let mut tarballs = HashMap::new();

    for pkg in packages {
        let tarball_url = format!(
            "https://registry.test/{}/-/{}-{}.tgz",
            pkg.name, pkg.name, pkg.version
        );
        let deps: serde_json::Map<String, serde_json::Value> = pkg
            .dependencies
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let mut manifest = serde_json::json!({
            "name": pkg.name,
            "version": pkg.version,
            "main": pkg.main,
            "dependencies": deps,
        });
        if let Some(ref bin) = pkg.bin {
            manifest["bin"] = bin.clone();
        }

        let mut tar_files: Vec<(String, Vec<u8>)> = vec![(
            "package/package.json".to_string(),
            serde_json::to_vec_pretty(&manifest).unwrap(),
        )];
        for (path, contents) in &pkg.files {
            tar_files.push((format!("package/{}", path), contents.clone().into_bytes()));
        }
        tarballs.insert(tarball_url.clone(), gzip_tar(&tar_files));

        let mut version_meta = manifest.clone();
        version_meta["dist"] =
            serde_json::json!({ "tarball": tarball_url, "shasum": "fixture-sha" });

        let packument = packuments.entry(pkg.name.clone()).or_insert_with(|| {
            serde_json::json!({ "name": pkg.name, "dist-tags": {}, "versions": {} })
        });
        packument["versions"][&pkg.version] = version_meta;
        packument["dist-tags"]["latest"] = serde_json::Value::String(pkg.version.clone());
    }

    Arc::new(RegistryClient::with_fetcher(
        "https://registry.test",
        Box::new(FixtureFetch {
            packuments,
            tarballs,
        }),
    ))
}

/// The uvu dependency cluster used across scenarios.
pub fn uvu_registry() -> Arc<RegistryClient> {
    fixture_registry(vec![
        FixturePackage::new("kleur", "4.1.5"),
        FixturePackage::new("mri", "1.2.0"),
        FixturePackage::new("dequal", "2.0.3"),
        FixturePackage::new("diff", "5.1.0"),
        FixturePackage::new("uvu", "0.5.6")
            .deps(&[
                ("kleur", "^4.0.0"),
                ("mri", "^1.1.0"),
                ("dequal", "^2.0.0"),
                ("diff", "^5.0.0"),
            ])
            .bin(serde_json::json!({ "uvu": "./bin.js" }))
            .file("bin.js", "#!/usr/bin/env node\nconsole.log('uvu');"),
    ])
}

/// A fresh store with an empty project named `name`.
pub fn project(name: &str) -> (Arc<FileStore>, String) {
    let store = Arc::new(FileStore::new());
    store.init().unwrap();
    let project = store.create_empty_project(name).unwrap();
    (store, project.id)
}
