//! Modbox CLI
//!
//! Mirrors a project directory into the virtual filesystem, runs the
//! requested operation (install / uninstall / run / resolve / transpile),
//! and writes install results back to disk.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use modbox::npm::{InstallRequest, PackageInstaller, RegistryClient, DEFAULT_REGISTRY};
use modbox::runtime::ModuleRuntime;
use modbox::transpiler;
use modbox::vfs::{ChangeKind, FileKind, FileStore, NewFile};
use modbox::ModuleResolver;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "modbox")]
#[command(author, version, about = "A Node.js-compatible package and module runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory to operate on
    #[arg(long, default_value = ".", global = true)]
    dir: PathBuf,

    /// Registry endpoint
    #[arg(long, default_value = DEFAULT_REGISTRY, global = true)]
    registry: String,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages (name or name@range) with their dependencies
    Install {
        /// Packages to install, e.g. `kleur` or `uvu@^0.5.0`
        packages: Vec<String>,

        /// Register under devDependencies
        #[arg(long)]
        save_dev: bool,
    },

    /// Remove a package and any orphaned dependencies
    Uninstall {
        /// Package name
        package: String,
    },

    /// Execute a file with the module runtime
    Run {
        /// Entry file, relative to the project directory
        file: String,

        /// Arguments passed to the script (after --)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Resolve a specifier and print the matching virtual path
    Resolve {
        /// The specifier to resolve
        specifier: String,

        /// Requesting file, relative to the project directory
        #[arg(long, default_value = "/index.js")]
        from: String,
    },

    /// Transpile a TS/TSX/JSX file and print the resulting JavaScript
    Transpile {
        /// Source file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Install {
            ref packages,
            save_dev,
        } => cmd_install(&cli, packages, save_dev),
        Commands::Uninstall { ref package } => cmd_uninstall(&cli, package),
        Commands::Run { ref file, ref args } => cmd_run(&cli, file, args),
        Commands::Resolve {
            ref specifier,
            ref from,
        } => cmd_resolve(&cli, specifier, from),
        Commands::Transpile { ref file } => cmd_transpile(file),
    };

    if let Err(err) = outcome {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modbox={}", filter)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── commands ────────────────────────────────────────────────────────

fn cmd_install(cli: &Cli, packages: &[String], save_dev: bool) -> anyhow::Result<()> {
    if packages.is_empty() {
        bail!("nothing to install");
    }
    let (store, project_id) = mirror_project(&cli.dir)?;
    let touched = track_changes(&store);

    let registry = Arc::new(RegistryClient::new(&cli.registry));
    let installer = PackageInstaller::new(Arc::clone(&store), registry, &project_id);
    installer.set_install_progress_callback(|name, version, _is_direct| {
        println!("+ {}@{}", name, version);
    });

    for request in packages {
        let (name, range) = split_package_spec(request);
        installer.start_batch_processing();
        match installer.install_with_dependencies(
            &name,
            &range,
            InstallRequest {
                is_direct: true,
                save_dev,
            },
        ) {
            Ok(_) => {
                installer.finish_batch_processing()?;
                installer.ensure_bins_for_package(&name)?;
            }
            Err(err) => {
                let _ = installer.finish_batch_processing();
                eprintln!("ERR {}: {}", err.kind(), err);
                bail!("install of '{}' failed", name);
            }
        }
    }

    write_back(&store, &project_id, &cli.dir, &touched)?;
    Ok(())
}

fn cmd_uninstall(cli: &Cli, package: &str) -> anyhow::Result<()> {
    let (store, project_id) = mirror_project(&cli.dir)?;
    let registry = Arc::new(RegistryClient::new(&cli.registry));
    let installer = PackageInstaller::new(Arc::clone(&store), registry, &project_id);

    let removed = installer.uninstall_with_dependencies(package)?;
    for name in &removed {
        println!("- {}", name);
        let disk_dir = cli.dir.join("node_modules").join(name);
        if disk_dir.is_dir() {
            std::fs::remove_dir_all(&disk_dir)
                .with_context(|| format!("removing {}", disk_dir.display()))?;
        }
    }

    // Manifest and lock changed; push them back out
    for path in ["/package.json", "/package-lock.json"] {
        if let Some(entry) = store.get_file_by_path(&project_id, path)? {
            std::fs::write(cli.dir.join(&path[1..]), entry.content)?;
        }
    }
    Ok(())
}

fn cmd_run(cli: &Cli, file: &str, args: &[String]) -> anyhow::Result<()> {
    let (store, project_id) = mirror_project(&cli.dir)?;
    let entry = to_virtual_path(file);
    let runtime = ModuleRuntime::new(store, &project_id);
    runtime
        .execute(&entry, args)
        .map_err(|err| anyhow::anyhow!("{}", err))?;
    Ok(())
}

fn cmd_resolve(cli: &Cli, specifier: &str, from: &str) -> anyhow::Result<()> {
    let (store, project_id) = mirror_project(&cli.dir)?;
    let resolver = ModuleResolver::new(store, &project_id);
    match resolver.resolve(specifier, &to_virtual_path(from))? {
        Some(resolved) => {
            println!("{}", resolved.path);
            Ok(())
        }
        None => bail!("cannot resolve '{}' from '{}'", specifier, from),
    }
}

fn cmd_transpile(file: &Path) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let virtual_path = to_virtual_path(&file.to_string_lossy());
    let output = transpiler::transform(&transpiler::TranspileRequest::for_file(
        &virtual_path,
        &code,
    ))?;
    println!("{}", output.code);
    if !output.dependencies.is_empty() {
        eprintln!("// dependencies: {}", output.dependencies.join(", "));
    }
    Ok(())
}

// ── project mirroring ───────────────────────────────────────────────

/// Read a host directory into a fresh virtual project.
fn mirror_project(dir: &Path) -> anyhow::Result<(Arc<FileStore>, String)> {
    let store = Arc::new(FileStore::new());
    store.init()?;
    let name = dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "project".to_string());
    let project = store.create_project(&name, None)?;

    let mut rows = Vec::new();
    collect_files(dir, dir, &mut rows)?;
    if !rows.is_empty() {
        store.create_files_bulk(&project.id, rows)?;
    }
    if store.get_file_by_path(&project.id, "/package.json")?.is_none() {
        store.create_file(
            &project.id,
            "/package.json",
            &format!(
                "{{\n  \"name\": \"{}\",\n  \"version\": \"1.0.0\",\n  \"dependencies\": {{}}\n}}\n",
                name
            ),
            FileKind::File,
        )?;
    }
    Ok((store, project.id))
}

fn collect_files(root: &Path, dir: &Path, rows: &mut Vec<NewFile>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == ".git" || name == "target" {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, rows)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let virtual_path = format!("/{}", relative);
            let bytes = std::fs::read(&path)?;
            match String::from_utf8(bytes) {
                Ok(text) => rows.push(NewFile::text(virtual_path, text)),
                Err(err) => rows.push(NewFile::binary(virtual_path, err.into_bytes())),
            }
        }
    }
    Ok(())
}

/// Record every path an operation touches so write-back is incremental.
fn track_changes(store: &FileStore) -> Arc<Mutex<BTreeMap<String, ChangeKind>>> {
    let touched = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = Arc::clone(&touched);
    // Keep the subscription alive for the process lifetime
    std::mem::forget(store.add_change_listener(move |event| {
        sink.lock()
            .expect("change log poisoned")
            .insert(event.path.clone(), event.kind);
    }));
    touched
}

fn write_back(
    store: &FileStore,
    project_id: &str,
    dir: &Path,
    touched: &Arc<Mutex<BTreeMap<String, ChangeKind>>>,
) -> anyhow::Result<()> {
    let changes = touched.lock().expect("change log poisoned").clone();
    for (virtual_path, kind) in changes {
        let disk_path = dir.join(&virtual_path[1..]);
        match kind {
            ChangeKind::Deleted => {
                if disk_path.is_file() {
                    std::fs::remove_file(&disk_path)?;
                }
            }
            ChangeKind::Created | ChangeKind::Updated => {
                let Some(entry) = store.get_file_by_path(project_id, &virtual_path)? else {
                    continue;
                };
                if entry.kind != FileKind::File {
                    continue;
                }
                if let Some(parent) = disk_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if entry.is_binary {
                    std::fs::write(&disk_path, entry.binary_content.unwrap_or_default())?;
                } else {
                    std::fs::write(&disk_path, entry.content)?;
                }
            }
        }
    }
    Ok(())
}

// ── helpers ─────────────────────────────────────────────────────────

/// Split `name@range` (scoped names keep their leading `@`).
fn split_package_spec(spec: &str) -> (String, String) {
    match spec[1..].rfind('@') {
        Some(idx) => {
            let split = idx + 1;
            (spec[..split].to_string(), spec[split + 1..].to_string())
        }
        None => (spec.to_string(), "latest".to_string()),
    }
}

fn to_virtual_path(file: &str) -> String {
    let trimmed = file.trim_start_matches("./");
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_package_spec() {
        assert_eq!(
            split_package_spec("kleur"),
            ("kleur".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_package_spec("uvu@^0.5.0"),
            ("uvu".to_string(), "^0.5.0".to_string())
        );
        assert_eq!(
            split_package_spec("@scope/pkg@1.2.3"),
            ("@scope/pkg".to_string(), "1.2.3".to_string())
        );
        assert_eq!(
            split_package_spec("@scope/pkg"),
            ("@scope/pkg".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn test_to_virtual_path() {
        assert_eq!(to_virtual_path("test.js"), "/test.js");
        assert_eq!(to_virtual_path("./src/app.ts"), "/src/app.ts");
        assert_eq!(to_virtual_path("/abs.js"), "/abs.js");
    }

    #[test]
    fn test_mirror_project_seeds_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "module.exports = 1;").unwrap();
        let (store, project_id) = mirror_project(dir.path()).unwrap();
        assert!(store.file_exists(&project_id, "/index.js").unwrap());
        assert!(store.file_exists(&project_id, "/package.json").unwrap());
    }
}
