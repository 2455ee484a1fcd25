//! Package lock file
//!
//! Records the exact versions an install session committed so a later
//! session can validate what is on disk. Lives at `/package-lock.json`
//! inside the project tree.

use crate::error::{Error, Result};
use crate::vfs::{FileKind, FileStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Virtual path of the lock file
pub const LOCKFILE_PATH: &str = "/package-lock.json";

/// The lock file for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub name: String,
    pub version: String,
    #[serde(rename = "lockfileVersion")]
    pub lockfile_version: u32,
    pub packages: BTreeMap<String, LockedPackage>,
}

/// A single locked package entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPackage {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    /// Dependency name → requested range
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl Lockfile {
    /// New empty lock for the named root package
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            lockfile_version: 3,
            packages: BTreeMap::new(),
        }
    }

    /// Add or replace an entry
    pub fn add_package(&mut self, name: &str, package: LockedPackage) {
        self.packages.insert(name.to_string(), package);
    }

    /// Drop an entry; true when it was present
    pub fn remove_package(&mut self, name: &str) -> bool {
        self.packages.remove(name).is_some()
    }

    pub fn get_package(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(name)
    }

    /// Write the lock into the project tree
    pub fn save(&self, store: &FileStore, project_id: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("lockfile serialization: {}", e)))?;
        store.create_file(project_id, LOCKFILE_PATH, &json, FileKind::File)?;
        Ok(())
    }

    /// Read the lock from the project tree, or `None` when absent
    pub fn load(store: &FileStore, project_id: &str) -> Result<Option<Self>> {
        match store.get_file_by_path(project_id, LOCKFILE_PATH)? {
            Some(entry) => {
                let lock: Lockfile = serde_json::from_str(&entry.content)
                    .map_err(|e| Error::invalid_manifest(format!("invalid lock file: {}", e)))?;
                Ok(Some(lock))
            }
            None => Ok(None),
        }
    }

    /// Every recorded dependency edge must point at a recorded package
    /// whose locked version satisfies the recorded range.
    pub fn is_consistent(&self) -> bool {
        self.packages.values().all(|pkg| {
            pkg.dependencies.iter().all(|(dep_name, dep_range)| {
                self.packages
                    .get(dep_name)
                    .is_some_and(|dep| super::registry::version_satisfies(&dep.version, dep_range))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(version: &str, deps: &[(&str, &str)]) -> LockedPackage {
        LockedPackage {
            version: version.to_string(),
            resolved: None,
            integrity: None,
            dependencies: deps
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_new_lock() {
        let lock = Lockfile::new("app", "1.0.0");
        assert_eq!(lock.lockfile_version, 3);
        assert!(lock.packages.is_empty());
    }

    #[test]
    fn test_consistency() {
        let mut lock = Lockfile::new("app", "1.0.0");
        lock.add_package("uvu", locked("0.5.6", &[("kleur", "^4.0.0")]));
        lock.add_package("kleur", locked("4.1.5", &[]));
        assert!(lock.is_consistent());

        lock.remove_package("kleur");
        assert!(!lock.is_consistent());
    }

    #[test]
    fn test_consistency_version_mismatch() {
        let mut lock = Lockfile::new("app", "1.0.0");
        lock.add_package("uvu", locked("0.5.6", &[("kleur", "^4.0.0")]));
        lock.add_package("kleur", locked("3.0.0", &[]));
        assert!(!lock.is_consistent());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = FileStore::new();
        let project = store.create_project("lock-demo", None).unwrap();

        let mut lock = Lockfile::new("lock-demo", "1.0.0");
        lock.add_package("kleur", locked("4.1.5", &[]));
        lock.save(&store, &project.id).unwrap();

        let loaded = Lockfile::load(&store, &project.id).unwrap().unwrap();
        assert_eq!(loaded.name, "lock-demo");
        assert_eq!(loaded.get_package("kleur").unwrap().version, "4.1.5");
    }

    #[test]
    fn test_load_absent_is_none() {
        let store = FileStore::new();
        let project = store.create_project("empty", None).unwrap();
        assert!(Lockfile::load(&store, &project.id).unwrap().is_none());
    }
}
