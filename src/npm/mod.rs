//! npm compatibility layer
//!
//! Registry client, tarball unpacking, transitive installation and the
//! package manifest / lock file models. Everything operates against the
//! virtual filesystem; installed packages land under `/node_modules/`.

pub mod installer;
pub mod lockfile;
pub mod package_json;
pub mod registry;
pub mod tarball;

pub use installer::{InstallRequest, InstalledPackage, PackageInstaller};
pub use lockfile::Lockfile;
pub use package_json::PackageJson;
pub use registry::RegistryClient;

/// Default public registry endpoint
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
