//! package.json model
//!
//! Serde representation of the manifest fields the resolver and installer
//! honor (`name`, `version`, `dependencies`, `devDependencies`, `bin`,
//! `main`, `module`, `exports`, `type`). Everything else is carried through
//! `rest` so a mutate-and-save round trip preserves fields we ignore.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed package.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackageJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<ExportsField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    #[serde(rename = "devDependencies", skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// `exports` field — a bare target string or a key map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportsField {
    Target(String),
    Map(serde_json::Map<String, serde_json::Value>),
}

/// `bin` field — a single path or a name→path map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Single(String),
    Map(BTreeMap<String, String>),
}

/// Which module system the requesting file uses; selects between the
/// `import` and `require` export conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterKind {
    CommonJs,
    EsModule,
}

impl PackageJson {
    /// Parse a manifest from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::invalid_manifest(format!("invalid package.json: {}", e)))
    }

    /// Serialize back to pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("package.json serialization: {}", e)))?;
        out.push('\n');
        Ok(out)
    }

    /// Whether the package declares `"type": "module"`.
    pub fn is_esm(&self) -> bool {
        self.package_type.as_deref() == Some("module")
    }

    /// Root entry point priority used in the node_modules walk:
    /// `exports["."]` → `module` → `main`.
    pub fn root_entry(&self, kind: RequesterKind) -> Option<String> {
        if let Some(ref exports) = self.exports {
            if let Some(target) = exports.resolve(".", kind) {
                return Some(target);
            }
        }
        self.module.clone().or_else(|| self.main.clone())
    }

    /// Directory entry priority used when probing a relative/absolute path
    /// that lands on a directory: `main` → `module`.
    pub fn directory_entry(&self) -> Option<String> {
        self.main.clone().or_else(|| self.module.clone())
    }

    /// Resolve a package-relative subpath through `exports`, or `None`
    /// when the field is absent or has no matching key.
    pub fn subpath_export(&self, subpath: &str, kind: RequesterKind) -> Option<String> {
        let key = format!("./{}", subpath);
        self.exports.as_ref()?.resolve(&key, kind)
    }

    /// Bin entries as `(bin name, target path)` pairs. A bare string bin is
    /// keyed by the package's unscoped name.
    pub fn bin_entries(&self) -> Vec<(String, String)> {
        match &self.bin {
            Some(BinField::Single(target)) => {
                let name = self
                    .name
                    .as_deref()
                    .map(unscoped_name)
                    .unwrap_or_default();
                if name.is_empty() {
                    Vec::new()
                } else {
                    vec![(name.to_string(), target.clone())]
                }
            }
            Some(BinField::Map(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Register `name` at `range` under `dependencies` (or
    /// `devDependencies` when `dev`).
    pub fn set_dependency(&mut self, name: &str, range: &str, dev: bool) {
        let table = if dev {
            self.dev_dependencies.get_or_insert_with(BTreeMap::new)
        } else {
            self.dependencies.get_or_insert_with(BTreeMap::new)
        };
        table.insert(name.to_string(), range.to_string());
    }

    /// Drop `name` from both dependency tables; true when it was present.
    pub fn remove_dependency(&mut self, name: &str) -> bool {
        let mut removed = false;
        if let Some(ref mut deps) = self.dependencies {
            removed |= deps.remove(name).is_some();
        }
        if let Some(ref mut deps) = self.dev_dependencies {
            removed |= deps.remove(name).is_some();
        }
        removed
    }

    /// Names listed in `dependencies` (not dev), for orphan reachability.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ExportsField {
    /// Resolve an exports key (`"."` or `"./sub"`) to a target path.
    ///
    /// Condition maps are consulted in the order `node`, then `import` or
    /// `require` by requester kind, then `default`; nested maps recurse.
    /// Pattern keys are not matched — callers fall through to
    /// `main`/`module` when this returns `None`.
    pub fn resolve(&self, key: &str, kind: RequesterKind) -> Option<String> {
        match self {
            ExportsField::Target(target) => {
                if key == "." {
                    Some(target.clone())
                } else {
                    None
                }
            }
            ExportsField::Map(map) => {
                let is_subpath_map = map.keys().any(|k| k.starts_with('.'));
                if is_subpath_map {
                    map.get(key).and_then(|v| resolve_conditions(v, kind))
                } else if key == "." {
                    // Bare condition map stands for the root entry
                    resolve_conditions(&serde_json::Value::Object(map.clone()), kind)
                } else {
                    None
                }
            }
        }
    }
}

fn resolve_conditions(value: &serde_json::Value, kind: RequesterKind) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            let kind_key = match kind {
                RequesterKind::EsModule => "import",
                RequesterKind::CommonJs => "require",
            };
            for condition in ["node", kind_key, "default"] {
                if let Some(inner) = map.get(condition) {
                    if let Some(target) = resolve_conditions(inner, kind) {
                        return Some(target);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// The part of a package name after its scope, if any.
pub fn unscoped_name(name: &str) -> &str {
    match name.rsplit_once('/') {
        Some((_, tail)) => tail,
        None => name,
    }
}
