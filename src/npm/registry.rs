//! npm registry client
//!
//! Fetches packuments and tarballs over HTTP, resolves dist-tags and semver
//! ranges, and keeps a per-client metadata cache so one install session
//! fetches each packument at most once. Transport failures are retried
//! once; HTTP 404 is terminal and maps to `PackageNotFound`.

use crate::error::{Error, Result};
use crate::npm::package_json::{BinField, ExportsField};
use crate::npm::tarball::{self, ArchiveEntry};
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

/// Per-request deadline for registry fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Cap on tarball size read into memory
const MAX_TARBALL_BYTES: u64 = 256 * 1024 * 1024;

/// Transport abstraction so the client is testable offline
pub trait Fetch: Send + Sync {
    fn fetch_json(&self, url: &str) -> Result<serde_json::Value>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Production transport on ureq
pub struct HttpFetch {
    agent: ureq::Agent,
}

impl HttpFetch {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(FETCH_TIMEOUT)
                .build(),
        }
    }

    fn classify(err: ureq::Error, url: &str) -> Error {
        match err {
            ureq::Error::Status(404, _) => Error::not_found(url.to_string()),
            ureq::Error::Status(code, _) => {
                Error::network(format!("GET {} returned HTTP {}", url, code))
            }
            ureq::Error::Transport(t) => Error::network(format!("GET {}: {}", url, t)),
        }
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetch {
    fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        let bytes = self.fetch_bytes(url)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::network(format!("GET {}: invalid JSON body: {}", url, e)))
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| Self::classify(e, url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_TARBALL_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::network(format!("GET {}: {}", url, e)))?;
        Ok(bytes)
    }
}

// ── metadata model ──────────────────────────────────────────────────

/// A packument: everything the registry knows about one package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, VersionMetadata>,
}

/// Manifest of a single published version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "optionalDependencies", default)]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<ExportsField>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<DistInfo>,
}

/// Tarball location and checksum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

/// A resolved version plus its unpacked file set
#[derive(Debug)]
pub struct PackageArchive {
    pub metadata: VersionMetadata,
    pub entries: Vec<ArchiveEntry>,
}

// ── client ──────────────────────────────────────────────────────────

/// npm registry client
pub struct RegistryClient {
    registry_url: String,
    fetcher: Box<dyn Fetch>,
    cache: Mutex<HashMap<String, PackageMetadata>>,
}

impl RegistryClient {
    /// Client against `url` using the HTTP transport.
    pub fn new(url: &str) -> Self {
        Self::with_fetcher(url, Box::new(HttpFetch::new()))
    }

    /// Client with an injected transport (tests, offline mirrors).
    pub fn with_fetcher(url: &str, fetcher: Box<dyn Fetch>) -> Self {
        Self {
            registry_url: url.trim_end_matches('/').to_string(),
            fetcher,
            cache: Mutex::new(HashMap::default()),
        }
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Fetch (or reuse) the packument for `name`.
    pub fn packument(&self, name: &str) -> Result<PackageMetadata> {
        if let Some(meta) = self.cached(name) {
            return Ok(meta);
        }
        let url = format!("{}/{}", self.registry_url, encode_name(name));
        let body = self
            .with_retry(|| self.fetcher.fetch_json(&url))
            .map_err(|e| match e {
                Error::NotFound(_) => Error::PackageNotFound(name.to_string()),
                other => other,
            })?;
        let meta: PackageMetadata = serde_json::from_value(body)
            .map_err(|e| Error::invalid_manifest(format!("packument for '{}': {}", name, e)))?;
        self.cache
            .lock()
            .expect("metadata cache poisoned")
            .insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    /// Resolve `range` against the published versions of `name`.
    ///
    /// Dist-tags resolve first (`latest`, `next`, …); otherwise the highest
    /// published version satisfying the range wins.
    pub fn resolve(&self, name: &str, range: &str) -> Result<VersionMetadata> {
        let meta = self.packument(name)?;
        let version = select_version(&meta, range).ok_or_else(|| Error::NoMatchingVersion {
            name: name.to_string(),
            range: range.to_string(),
        })?;
        meta.versions
            .get(&version)
            .cloned()
            .ok_or_else(|| Error::invalid_manifest(format!("'{}@{}' has no manifest", name, version)))
    }

    /// Resolve, download and unpack one package.
    pub fn fetch_package(&self, name: &str, range: &str) -> Result<PackageArchive> {
        let metadata = self.resolve(name, range)?;
        let tarball_url = metadata
            .dist
            .as_ref()
            .and_then(|d| d.tarball.clone())
            .ok_or_else(|| {
                Error::invalid_manifest(format!(
                    "'{}@{}' has no tarball URL",
                    name, metadata.version
                ))
            })?;
        tracing::debug!(package = name, version = %metadata.version, url = %tarball_url, "downloading tarball");
        let bytes = self.with_retry(|| self.fetcher.fetch_bytes(&tarball_url))?;
        let entries = tarball::unpack(&bytes)?;
        Ok(PackageArchive { metadata, entries })
    }

    fn cached(&self, name: &str) -> Option<PackageMetadata> {
        self.cache
            .lock()
            .expect("metadata cache poisoned")
            .get(name)
            .cloned()
    }

    fn with_retry<T>(&self, op: impl Fn() -> Result<T>) -> Result<T> {
        match op() {
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "retrying registry fetch");
                op()
            }
            other => other,
        }
    }
}

/// Scoped names carry an escaped slash in registry URLs.
fn encode_name(name: &str) -> String {
    name.replace('/', "%2f")
}

// ── version selection ───────────────────────────────────────────────

/// Pick the version of `meta` matching `range`, if any.
pub fn select_version(meta: &PackageMetadata, range: &str) -> Option<String> {
    let range = range.trim();

    // Dist-tag reference ("latest", "next", …)
    if let Some(tagged) = meta.dist_tags.get(range) {
        if meta.versions.contains_key(tagged) {
            return Some(tagged.clone());
        }
    }

    // Wildcard prefers the latest tag, then the highest release
    if range.is_empty() || range == "*" || range == "x" {
        if let Some(latest) = meta.dist_tags.get("latest") {
            if meta.versions.contains_key(latest) {
                return Some(latest.clone());
            }
        }
    }

    let mut best: Option<(SemVer, &String)> = None;
    for candidate in meta.versions.keys() {
        let Some(version) = SemVer::parse(candidate) else {
            continue;
        };
        if !range_matches(range, &version) {
            continue;
        }
        match best {
            Some((ref b, _)) if !version.gt(b) => {}
            _ => best = Some((version, candidate)),
        }
    }
    best.map(|(_, v)| v.clone())
}

/// Whether an installed `version` string satisfies `range`; used by the
/// installer's idempotence check. Unknown tags never satisfy.
pub fn version_satisfies(version: &str, range: &str) -> bool {
    match SemVer::parse(version) {
        Some(v) => range_matches(range.trim(), &v),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SemVer {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: bool,
}

impl SemVer {
    fn parse(v: &str) -> Option<Self> {
        let v = v.trim().trim_start_matches('v');
        let (core, prerelease) = match v.split_once(['-', '+']) {
            Some((core, _)) => (core, v.contains('-')),
            None => (v, false),
        };
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }

    fn tuple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    fn gt(&self, other: &Self) -> bool {
        self.tuple() > other.tuple()
    }
}

fn range_matches(range: &str, version: &SemVer) -> bool {
    if range.is_empty() || range == "*" || range == "x" {
        return !version.prerelease;
    }

    let (op, base_str) = if let Some(rest) = range.strip_prefix(">=") {
        (RangeOp::Gte, rest)
    } else if let Some(rest) = range.strip_prefix('>') {
        (RangeOp::Gt, rest)
    } else if let Some(rest) = range.strip_prefix('^') {
        (RangeOp::Caret, rest)
    } else if let Some(rest) = range.strip_prefix('~') {
        (RangeOp::Tilde, rest)
    } else if let Some(rest) = range.strip_prefix('=') {
        (RangeOp::Exact, rest)
    } else {
        // Bare partials widen: "1" ≈ ^1.0.0, "1.2" ≈ ~1.2.0
        let dots = range.matches('.').count();
        match dots {
            0 => (RangeOp::Caret, range),
            1 => (RangeOp::Tilde, range),
            _ => (RangeOp::Exact, range),
        }
    };

    let Some(base) = SemVer::parse(base_str.trim()) else {
        return false;
    };

    // Pre-releases only match an exactly requested pre-release
    if version.prerelease && !(op == RangeOp::Exact && base.prerelease) {
        return false;
    }

    let v = version.tuple();
    let b = base.tuple();
    match op {
        RangeOp::Exact => v == b,
        RangeOp::Gte => v >= b,
        RangeOp::Gt => v > b,
        RangeOp::Tilde => version.major == base.major && version.minor == base.minor && v >= b,
        RangeOp::Caret => {
            if v < b {
                return false;
            }
            if base.major > 0 {
                version.major == base.major
            } else if base.minor > 0 {
                version.major == 0 && version.minor == base.minor
            } else {
                v == b
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOp {
    Exact,
    Caret,
    Tilde,
    Gte,
    Gt,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, versions: &[&str], latest: &str) -> PackageMetadata {
        let mut version_map = HashMap::default();
        for v in versions {
            version_map.insert(
                v.to_string(),
                VersionMetadata {
                    version: v.to_string(),
                    dependencies: BTreeMap::new(),
                    optional_dependencies: BTreeMap::new(),
                    bin: None,
                    main: Some("index.js".to_string()),
                    module: None,
                    exports: None,
                    package_type: None,
                    dist: None,
                },
            );
        }
        let mut dist_tags = HashMap::default();
        dist_tags.insert("latest".to_string(), latest.to_string());
        PackageMetadata {
            name: name.to_string(),
            dist_tags,
            versions: version_map,
        }
    }

    #[test]
    fn test_select_dist_tag() {
        let m = meta("kleur", &["4.1.4", "4.1.5"], "4.1.5");
        assert_eq!(select_version(&m, "latest").as_deref(), Some("4.1.5"));
    }

    #[test]
    fn test_select_exact() {
        let m = meta("kleur", &["4.1.4", "4.1.5"], "4.1.5");
        assert_eq!(select_version(&m, "4.1.4").as_deref(), Some("4.1.4"));
        assert_eq!(select_version(&m, "9.9.9"), None);
    }

    #[test]
    fn test_select_caret_highest() {
        let m = meta("lodash", &["4.17.20", "4.17.21", "4.18.0", "5.0.0"], "4.18.0");
        assert_eq!(select_version(&m, "^4.17.20").as_deref(), Some("4.18.0"));
    }

    #[test]
    fn test_select_tilde() {
        let m = meta("lodash", &["4.17.20", "4.17.21", "4.18.0"], "4.18.0");
        assert_eq!(select_version(&m, "~4.17.20").as_deref(), Some("4.17.21"));
    }

    #[test]
    fn test_select_gte() {
        let m = meta("lodash", &["4.18.0", "5.0.0"], "5.0.0");
        assert_eq!(select_version(&m, ">=4.18.0").as_deref(), Some("5.0.0"));
    }

    #[test]
    fn test_select_wildcard_prefers_latest_tag() {
        let m = meta("lodash", &["4.17.21", "5.0.0"], "4.17.21");
        assert_eq!(select_version(&m, "*").as_deref(), Some("4.17.21"));
    }

    #[test]
    fn test_caret_zero_major_stays_in_minor() {
        let m = meta("mri", &["0.5.0", "0.5.3", "0.6.0"], "0.6.0");
        assert_eq!(select_version(&m, "^0.5.0").as_deref(), Some("0.5.3"));
    }

    #[test]
    fn test_prerelease_skipped_unless_exact() {
        let m = meta("beta-pkg", &["1.0.0", "2.0.0-beta.1"], "1.0.0");
        assert_eq!(select_version(&m, "^1.0.0").as_deref(), Some("1.0.0"));
        assert_eq!(select_version(&m, ">=1.0.0").as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_partial_ranges() {
        let m = meta("pkg", &["1.0.0", "1.2.0", "1.9.4", "2.0.0"], "2.0.0");
        assert_eq!(select_version(&m, "1").as_deref(), Some("1.9.4"));
        assert_eq!(select_version(&m, "1.2").as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_version_satisfies() {
        assert!(version_satisfies("4.1.5", "^4.1.0"));
        assert!(!version_satisfies("4.1.5", "latest"));
        assert!(!version_satisfies("5.0.0", "^4.1.0"));
        assert!(version_satisfies("0.5.6", "~0.5.0"));
    }

    #[test]
    fn test_encode_scoped_name() {
        assert_eq!(encode_name("@scope/pkg"), "@scope%2fpkg");
        assert_eq!(encode_name("kleur"), "kleur");
    }

    struct FailingFetch {
        calls: Mutex<u32>,
    }

    impl Fetch for FailingFetch {
        fn fetch_json(&self, _url: &str) -> Result<serde_json::Value> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err(Error::network("connection reset"))
            } else {
                Ok(serde_json::json!({
                    "name": "flaky",
                    "dist-tags": {"latest": "1.0.0"},
                    "versions": {"1.0.0": {"version": "1.0.0"}}
                }))
            }
        }

        fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>> {
            Err(Error::network("unreachable"))
        }
    }

    #[test]
    fn test_transport_errors_retry_once() {
        let client = RegistryClient::with_fetcher(
            "https://registry.example.com",
            Box::new(FailingFetch {
                calls: Mutex::new(0),
            }),
        );
        let meta = client.packument("flaky").unwrap();
        assert_eq!(meta.name, "flaky");
    }

    struct NotFoundFetch;

    impl Fetch for NotFoundFetch {
        fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
            Err(Error::not_found(url.to_string()))
        }
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::not_found(url.to_string()))
        }
    }

    #[test]
    fn test_missing_package_maps_to_package_not_found() {
        let client =
            RegistryClient::with_fetcher("https://registry.example.com", Box::new(NotFoundFetch));
        let err = client.packument("no-such-package").unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(ref name) if name == "no-such-package"));
    }

    struct OnceFetch {
        calls: Mutex<u32>,
    }

    impl Fetch for OnceFetch {
        fn fetch_json(&self, _url: &str) -> Result<serde_json::Value> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(serde_json::json!({
                    "name": "once",
                    "dist-tags": {"latest": "1.0.0"},
                    "versions": {"1.0.0": {"version": "1.0.0"}}
                }))
            } else {
                Err(Error::PackageNotFound("once".to_string()))
            }
        }

        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::not_found(url.to_string()))
        }
    }

    #[test]
    fn test_packument_cached_after_first_fetch() {
        let client = RegistryClient::with_fetcher(
            "https://registry.example.com",
            Box::new(OnceFetch {
                calls: Mutex::new(0),
            }),
        );
        client.packument("once").unwrap();
        // Second lookup must come from cache; a fresh fetch would error
        client.packument("once").unwrap();
    }
}
