//! Modbox: a Node.js-compatible package and module runtime over a virtual
//! filesystem
//!
//! Modbox hosts projects in an in-memory filesystem, installs npm packages
//! into them with full transitive dependency resolution, resolves
//! CommonJS/ESM specifiers the way Node does, transpiles TypeScript/JSX off
//! the calling thread, and executes entry files with a Node-like
//! `require`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modbox::npm::{PackageInstaller, RegistryClient};
//! use modbox::runtime::ModuleRuntime;
//! use modbox::vfs::{FileKind, FileStore};
//!
//! fn main() -> modbox::Result<()> {
//!     let store = Arc::new(FileStore::new());
//!     let project = store.create_empty_project("demo")?;
//!
//!     let registry = Arc::new(RegistryClient::new(modbox::npm::DEFAULT_REGISTRY));
//!     let installer = PackageInstaller::new(Arc::clone(&store), registry, &project.id);
//!     installer.install_with_dependencies("kleur", "latest", Default::default())?;
//!
//!     store.create_file(
//!         &project.id,
//!         "/main.js",
//!         "const kleur = require('kleur'); console.log(typeof kleur);",
//!         FileKind::File,
//!     )?;
//!     let runtime = ModuleRuntime::new(store, &project.id);
//!     runtime.execute("/main.js", &[])?;
//!     Ok(())
//! }
//! ```

pub mod npm;
pub mod resolver;
pub mod runtime;
pub mod transpiler;
pub mod vfs;

mod error;

pub use error::{Error, ErrorKind, Result};
pub use resolver::{ModuleKind, ModuleResolver, ResolvedModule};
pub use runtime::{ModuleRuntime, Value};
pub use vfs::FileStore;

/// Modbox version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
