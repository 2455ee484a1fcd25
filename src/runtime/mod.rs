//! Module runtime
//!
//! Executes resolved modules with a Node-like `require`. The loader
//! resolves a specifier, reads the bytes, transpiles when needed, installs
//! a cache entry *before* evaluation (so cycles observe partial exports)
//! and publishes `module.exports` afterwards. Static dependencies reported
//! by the transpiler are pre-loaded before a module's own evaluation;
//! dynamic requires of uncached specifiers load in-line.

pub mod engine;
pub mod globals;
pub mod value;

pub use globals::{CollectingConsole, ConsoleAdapter, StdioConsole};
pub use value::Value;

use crate::error::{Error, Result};
use crate::resolver::{ModuleKind, ModuleResolver, ResolvedModule};
use crate::transpiler::{self, TranspileRequest, TranspilerPool};
use crate::vfs::{path as vpath, FileStore};
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

struct CacheSlot {
    exports: Value,
    loading: bool,
}

/// Per-execution module runtime; two instances share nothing.
pub struct ModuleRuntime {
    store: Arc<FileStore>,
    project_id: String,
    resolver: ModuleResolver,
    transpiler: Arc<TranspilerPool>,
    console: Arc<dyn ConsoleAdapter>,
    env: BTreeMap<String, String>,
    cache: RefCell<HashMap<String, CacheSlot>>,
    argv: RefCell<Vec<String>>,
}

impl ModuleRuntime {
    pub fn new(store: Arc<FileStore>, project_id: &str) -> Self {
        Self::with_transpiler(store, project_id, Arc::new(TranspilerPool::new(2)))
    }

    /// Share a transpiler pool across runtimes; the module cache stays
    /// instance-private.
    pub fn with_transpiler(
        store: Arc<FileStore>,
        project_id: &str,
        transpiler: Arc<TranspilerPool>,
    ) -> Self {
        let resolver = ModuleResolver::new(Arc::clone(&store), project_id);
        Self {
            store,
            project_id: project_id.to_string(),
            resolver,
            transpiler,
            console: Arc::new(StdioConsole),
            env: BTreeMap::new(),
            cache: RefCell::new(HashMap::default()),
            argv: RefCell::new(Vec::new()),
        }
    }

    /// Route the `console` global to the embedder.
    pub fn set_console(&mut self, console: Arc<dyn ConsoleAdapter>) {
        self.console = console;
    }

    /// Seed `process.env`.
    pub fn set_env(&mut self, env: BTreeMap<String, String>) {
        self.env = env;
    }

    /// Drop every cached module.
    pub fn reset(&self) {
        self.cache.borrow_mut().clear();
        self.resolver.clear_cache();
    }

    /// Resolve and run `entry_path`, returning its exports.
    pub fn execute(&self, entry_path: &str, argv: &[String]) -> Result<Value> {
        {
            let mut stored = self.argv.borrow_mut();
            stored.clear();
            stored.push("node".to_string());
            stored.push(entry_path.to_string());
            stored.extend(argv.iter().cloned());
        }
        let resolved = self
            .resolver
            .resolve(entry_path, entry_path)?
            .ok_or_else(|| Error::module_not_found(entry_path, entry_path))?;
        tracing::debug!(entry = %resolved.path, "executing");
        self.load_module(&resolved)
    }

    /// The loader behind `require(specifier)` issued from `requester`.
    pub fn require_from(&self, specifier: &str, requester: &str) -> Result<Value> {
        let resolved = self
            .resolver
            .resolve(specifier, requester)?
            .ok_or_else(|| Error::module_not_found(specifier, requester))?;
        self.load_module(&resolved)
    }

    fn load_module(&self, resolved: &ResolvedModule) -> Result<Value> {
        // Cache first — a loading entry returns its partial exports, which
        // is what makes cyclic requires terminate.
        if let Some(slot) = self.cache.borrow().get(&resolved.path) {
            if slot.loading {
                tracing::debug!(module = %resolved.path, "cycle: serving partial exports");
            }
            return Ok(slot.exports.clone());
        }

        if let Some(core_name) = resolved.path.strip_prefix("node:") {
            let exports = globals::core_module(core_name);
            self.cache.borrow_mut().insert(
                resolved.path.clone(),
                CacheSlot {
                    exports: exports.clone(),
                    loading: false,
                },
            );
            return Ok(exports);
        }

        match resolved.kind {
            ModuleKind::Json => self.load_json(&resolved.path),
            ModuleKind::Binary => self.load_binary(&resolved.path),
            ModuleKind::CommonJs | ModuleKind::EsModule => self.load_text(resolved),
        }
    }

    fn load_json(&self, path: &str) -> Result<Value> {
        let content = self.store.read_text(&self.project_id, path)?;
        let parsed: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| Error::evaluation(path, format!("invalid JSON: {}", e)))?;
        let exports = Value::from_json(&parsed);
        self.cache.borrow_mut().insert(
            path.to_string(),
            CacheSlot {
                exports: exports.clone(),
                loading: false,
            },
        );
        Ok(exports)
    }

    fn load_binary(&self, path: &str) -> Result<Value> {
        let entry = self
            .store
            .get_file_by_path(&self.project_id, path)?
            .ok_or_else(|| Error::not_found(format!("file '{}'", path)))?;
        let bytes = entry.binary_content.unwrap_or_default();
        let exports = Value::Bytes(Rc::new(bytes));
        self.cache.borrow_mut().insert(
            path.to_string(),
            CacheSlot {
                exports: exports.clone(),
                loading: false,
            },
        );
        Ok(exports)
    }

    fn load_text(&self, resolved: &ResolvedModule) -> Result<Value> {
        let path = resolved.path.clone();
        let content = self.store.read_text(&self.project_id, &path)?;

        let (code, dependencies) = if resolved.kind == ModuleKind::EsModule
            || transpiler::needs_transpile(&path, &content)
        {
            let output = self
                .transpiler
                .transpile(TranspileRequest::for_file(&path, &content))?;
            (output.code, output.dependencies)
        } else {
            let dependencies = transpiler::normalize::extract_dependencies(&content);
            (content, dependencies)
        };

        // Install the (empty) exports object before evaluation begins.
        let exports = Value::new_object();
        self.cache.borrow_mut().insert(
            path.clone(),
            CacheSlot {
                exports: exports.clone(),
                loading: true,
            },
        );

        // Pre-load the static dependency closure. Specifiers that do not
        // resolve are left for evaluation-time `require` to report, so a
        // guarded dynamic import cannot fail the whole module.
        for dependency in &dependencies {
            let already_loaded = match self.resolver.resolve(dependency, &path) {
                Ok(Some(dep_resolved)) => self.cache.borrow().contains_key(&dep_resolved.path),
                Ok(None) => {
                    tracing::debug!(specifier = %dependency, from = %path, "static dependency unresolved");
                    continue;
                }
                Err(err) => {
                    self.cache.borrow_mut().remove(&path);
                    return Err(err);
                }
            };
            if !already_loaded {
                if let Err(err) = self.require_from(dependency, &path) {
                    self.cache.borrow_mut().remove(&path);
                    return Err(err);
                }
            }
        }

        // Evaluate against the populated cache.
        let module = Value::new_object();
        module.set_property("exports", exports.clone());
        let argv = self.argv.borrow().clone();
        let globals: Vec<(String, Value)> = vec![
            ("console".to_string(), globals::build_console(Arc::clone(&self.console))),
            (
                "process".to_string(),
                globals::build_process(&self.env, &argv, &vpath::dirname(&path)),
            ),
            ("Buffer".to_string(), globals::build_buffer()),
        ]
        .into_iter()
        .chain(
            globals::build_timers()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value)),
        )
        .collect();

        let requester = path.clone();
        let mut require = |specifier: &str| self.require_from(specifier, &requester);
        let mut ctx = engine::EvalContext {
            module: module.clone(),
            exports: exports.clone(),
            filename: path.clone(),
            dirname: vpath::dirname(&path),
            globals,
            require: &mut require,
        };

        if let Err(err) = engine::evaluate_module(&code, &mut ctx) {
            // Failed modules leave the cache so a retry can start clean.
            self.cache.borrow_mut().remove(&path);
            return Err(attach_path(err, &path));
        }

        let final_exports = module.get_property("exports").unwrap_or(Value::Undefined);
        self.cache.borrow_mut().insert(
            path,
            CacheSlot {
                exports: final_exports.clone(),
                loading: false,
            },
        );
        Ok(final_exports)
    }
}

/// Rewrites the engine's placeholder file name with the real module path.
fn attach_path(err: Error, path: &str) -> Error {
    match err {
        Error::EvaluationError { message, .. } => Error::evaluation(path, message),
        Error::ModuleNotFound {
            specifier,
            requester,
        } => Error::ModuleNotFound {
            specifier,
            requester,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::FileKind;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<FileStore>, String) {
        let store = Arc::new(FileStore::new());
        let project = store.create_empty_project("run-test").unwrap();
        (store, project.id)
    }

    fn write(store: &FileStore, project: &str, path: &str, content: &str) {
        store
            .create_file(project, path, content, FileKind::File)
            .unwrap();
    }

    fn runtime_with_console(
        store: &Arc<FileStore>,
        project: &str,
    ) -> (ModuleRuntime, Arc<CollectingConsole>) {
        let console = Arc::new(CollectingConsole::new());
        let mut runtime = ModuleRuntime::new(Arc::clone(store), project);
        runtime.set_console(console.clone());
        (runtime, console)
    }

    #[test]
    fn test_resolve_and_execute_package_require() {
        let (store, project) = setup();
        write(
            &store,
            &project,
            "/node_modules/prettier/package.json",
            r#"{"name":"prettier","version":"3.0.0","main":"index.js"}"#,
        );
        write(
            &store,
            &project,
            "/node_modules/prettier/index.js",
            "module.exports = { format: function (source) { return source; } };",
        );
        write(
            &store,
            &project,
            "/test.js",
            "const pr = require('prettier');\nconsole.log(typeof pr.format);",
        );

        let (runtime, console) = runtime_with_console(&store, &project);
        runtime.execute("/test.js", &[]).unwrap();
        assert_eq!(console.stdout(), "function");
        assert_eq!(console.stderr(), "");
    }

    #[test]
    fn test_missing_specifier_is_module_not_found() {
        let (store, project) = setup();
        write(&store, &project, "/app.js", "require('ghost-package');");
        let (runtime, _console) = runtime_with_console(&store, &project);
        let err = runtime.execute("/app.js", &[]).unwrap_err();
        match err {
            Error::ModuleNotFound {
                specifier,
                requester,
            } => {
                assert_eq!(specifier, "ghost-package");
                assert_eq!(requester, "/app.js");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_json_module_caches_parsed_value() {
        let (store, project) = setup();
        write(&store, &project, "/config.json", r#"{"port": 8080}"#);
        write(
            &store,
            &project,
            "/app.js",
            "const config = require('./config');\nexports.port = config.port;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert_eq!(
            exports.get_property("port").unwrap().to_display_string(),
            "8080"
        );
    }

    #[test]
    fn test_binary_require_returns_bytes() {
        let (store, project) = setup();
        store
            .create_binary_file(&project, "/logo.png", vec![1, 2, 3, 4])
            .unwrap();
        write(
            &store,
            &project,
            "/app.js",
            "const img = require('./logo.png');\nexports.img = img;\nexports.kind = typeof img;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert_eq!(
            exports.get_property("kind").unwrap().to_display_string(),
            "object"
        );
        match exports.get_property("img").unwrap() {
            Value::Bytes(bytes) => assert_eq!(bytes.len(), 4),
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_module_cache_returns_same_object() {
        let (store, project) = setup();
        write(&store, &project, "/dep.js", "module.exports = { tag: 'dep' };");
        write(
            &store,
            &project,
            "/app.js",
            "const first = require('./dep');\nconst second = require('./dep');\nexports.same = first === second;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert!(exports.get_property("same").unwrap().truthy());
    }

    #[test]
    fn test_cycle_completes_with_partial_exports() {
        let (store, project) = setup();
        // Dependencies are pre-loaded before their dependent evaluates, so
        // b runs first, observing a's not-yet-populated exports object.
        write(
            &store,
            &project,
            "/a.js",
            "exports.name = 'a';\nconst b = require('./b.js');\nexports.partner = b.name;",
        );
        write(
            &store,
            &project,
            "/b.js",
            "const a = require('./a.js');\nexports.name = 'b';\nexports.partner = a.name;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let a_exports = runtime.execute("/a.js", &[]).unwrap();
        assert_eq!(
            a_exports.get_property("partner").unwrap().to_display_string(),
            "b"
        );
        let b_exports = runtime.require_from("./b.js", "/a.js").unwrap();
        assert_eq!(b_exports.get_property("name").unwrap().to_display_string(), "b");
        // b read a.name before a evaluated; the shared object was empty then
        assert_eq!(
            b_exports.get_property("partner").unwrap().to_display_string(),
            "undefined"
        );
    }

    #[test]
    fn test_typescript_module_transpiled() {
        let (store, project) = setup();
        write(&store, &project, "/lib.ts", "export const n: number = 7;");
        write(
            &store,
            &project,
            "/app.js",
            "const lib = require('./lib');\nexports.n = lib.n;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert_eq!(exports.get_property("n").unwrap().to_display_string(), "7");
    }

    #[test]
    fn test_esm_package_normalized() {
        let (store, project) = setup();
        write(
            &store,
            &project,
            "/node_modules/esmpkg/package.json",
            r#"{"name":"esmpkg","version":"1.0.0","type":"module","main":"index.js"}"#,
        );
        write(
            &store,
            &project,
            "/node_modules/esmpkg/index.js",
            "export const flag = 'esm';\nexport default 41;",
        );
        write(
            &store,
            &project,
            "/app.js",
            "const m = require('esmpkg');\nexports.flag = m.flag;\nexports.d = m.default;",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert_eq!(
            exports.get_property("flag").unwrap().to_display_string(),
            "esm"
        );
        assert_eq!(exports.get_property("d").unwrap().to_display_string(), "41");
    }

    #[test]
    fn test_bin_shim_runs_as_cjs() {
        let (store, project) = setup();
        write(
            &store,
            &project,
            "/node_modules/uvu/package.json",
            r#"{"name":"uvu","version":"0.5.6","main":"index.js"}"#,
        );
        write(&store, &project, "/node_modules/uvu/bin.js", "console.log('uvu cli');");
        write(
            &store,
            &project,
            "/node_modules/.bin/uvu",
            "#!/usr/bin/env node\nrequire('../uvu/bin.js')",
        );
        let (runtime, console) = runtime_with_console(&store, &project);
        runtime.execute("/node_modules/.bin/uvu", &[]).unwrap();
        assert_eq!(console.stdout(), "uvu cli");
    }

    #[test]
    fn test_core_module_require() {
        let (store, project) = setup();
        write(
            &store,
            &project,
            "/app.js",
            "const path = require('path');\nexports.joined = path.join('/a', 'b.js');",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let exports = runtime.execute("/app.js", &[]).unwrap();
        assert_eq!(
            exports.get_property("joined").unwrap().to_display_string(),
            "/a/b.js"
        );
    }

    #[test]
    fn test_process_argv_and_env() {
        let (store, project) = setup();
        write(
            &store,
            &project,
            "/app.js",
            "exports.mode = process.env.NODE_ENV;\nexports.argc = process.argv.length;\nexports.platform = process.platform;",
        );
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());

        let console = Arc::new(CollectingConsole::new());
        let mut runtime = ModuleRuntime::new(Arc::clone(&store), &project);
        runtime.set_console(console);
        runtime.set_env(env);

        let exports = runtime
            .execute("/app.js", &["--flag".to_string()])
            .unwrap();
        assert_eq!(
            exports.get_property("mode").unwrap().to_display_string(),
            "production"
        );
        // node + entry + one argument
        assert_eq!(exports.get_property("argc").unwrap().to_display_string(), "3");
        assert_eq!(
            exports.get_property("platform").unwrap().to_display_string(),
            "linux"
        );
    }

    #[test]
    fn test_evaluation_error_carries_path() {
        let (store, project) = setup();
        write(&store, &project, "/boom.js", "throw new Error('kaput');");
        let (runtime, _console) = runtime_with_console(&store, &project);
        let err = runtime.execute("/boom.js", &[]).unwrap_err();
        match err {
            Error::EvaluationError { file, message } => {
                assert_eq!(file, "/boom.js");
                assert!(message.contains("kaput"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reset_clears_cache() {
        let (store, project) = setup();
        write(&store, &project, "/dep.js", "module.exports = { n: 1 };");
        write(
            &store,
            &project,
            "/app.js",
            "exports.dep = require('./dep');",
        );
        let (runtime, _console) = runtime_with_console(&store, &project);
        let first = runtime.execute("/app.js", &[]).unwrap();
        runtime.reset();
        let second = runtime.execute("/app.js", &[]).unwrap();
        // A fresh cache produces a fresh exports object
        assert!(!first
            .get_property("dep")
            .unwrap()
            .strict_equals(&second.get_property("dep").unwrap()));
    }

    #[test]
    fn test_two_runtimes_do_not_share_cache() {
        let (store, project) = setup();
        write(&store, &project, "/dep.js", "module.exports = { n: 1 };");
        write(&store, &project, "/app.js", "exports.dep = require('./dep');");

        let (runtime_a, _ca) = runtime_with_console(&store, &project);
        let (runtime_b, _cb) = runtime_with_console(&store, &project);
        let a = runtime_a.execute("/app.js", &[]).unwrap();
        let b = runtime_b.execute("/app.js", &[]).unwrap();
        assert!(!a
            .get_property("dep")
            .unwrap()
            .strict_equals(&b.get_property("dep").unwrap()));
    }
}
