//! Scope globals for CommonJS evaluation
//!
//! Builds the `process` and `console` values seeded into every module
//! scope, and the stub objects served for core-module requires.

use crate::error::Result;
use crate::runtime::value::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Sink for the `console` global; the embedder decides where lines go.
pub trait ConsoleAdapter: Send + Sync {
    fn log(&self, line: &str);
    fn error(&self, line: &str);
    fn warn(&self, line: &str);
    fn clear(&self);
}

/// Console that writes to the host's stdout/stderr.
pub struct StdioConsole;

impl ConsoleAdapter for StdioConsole {
    fn log(&self, line: &str) {
        println!("{}", line);
    }
    fn error(&self, line: &str) {
        eprintln!("{}", line);
    }
    fn warn(&self, line: &str) {
        eprintln!("{}", line);
    }
    fn clear(&self) {}
}

/// Console that buffers output for inspection (tests, UI panes).
#[derive(Default, Debug)]
pub struct CollectingConsole {
    lines: Mutex<Vec<(ConsoleLevel, String)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Error,
    Warn,
}

impl CollectingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> String {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .iter()
            .filter(|(level, _)| *level == ConsoleLevel::Log)
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stderr(&self) -> String {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .iter()
            .filter(|(level, _)| *level != ConsoleLevel::Log)
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ConsoleAdapter for CollectingConsole {
    fn log(&self, line: &str) {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .push((ConsoleLevel::Log, line.to_string()));
    }
    fn error(&self, line: &str) {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .push((ConsoleLevel::Error, line.to_string()));
    }
    fn warn(&self, line: &str) {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .push((ConsoleLevel::Warn, line.to_string()));
    }
    fn clear(&self) {
        self.lines.lock().expect("console buffer poisoned").clear();
    }
}

fn format_args(args: &[Value]) -> String {
    args.iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The `console` object bound into module scopes.
pub fn build_console(adapter: Arc<dyn ConsoleAdapter>) -> Value {
    let console = Value::new_object();
    let sink = Arc::clone(&adapter);
    console.set_property(
        "log",
        Value::native_fn("log", move |args| {
            sink.log(&format_args(args));
            Ok(Value::Undefined)
        }),
    );
    let sink = Arc::clone(&adapter);
    console.set_property(
        "error",
        Value::native_fn("error", move |args| {
            sink.error(&format_args(args));
            Ok(Value::Undefined)
        }),
    );
    let sink = Arc::clone(&adapter);
    console.set_property(
        "warn",
        Value::native_fn("warn", move |args| {
            sink.warn(&format_args(args));
            Ok(Value::Undefined)
        }),
    );
    let sink = adapter;
    console.set_property(
        "clear",
        Value::native_fn("clear", move |_args| {
            sink.clear();
            Ok(Value::Undefined)
        }),
    );
    console
}

/// The `process` object: `env`, `argv`, `cwd()`, `platform`.
pub fn build_process(env: &BTreeMap<String, String>, argv: &[String], cwd: &str) -> Value {
    let process = Value::new_object();

    let env_object = Value::new_object();
    for (key, value) in env {
        env_object.set_property(key, Value::String(value.clone()));
    }
    process.set_property("env", env_object);

    process.set_property(
        "argv",
        Value::new_array(argv.iter().map(|a| Value::String(a.clone())).collect()),
    );

    let cwd = cwd.to_string();
    process.set_property(
        "cwd",
        Value::native_fn("cwd", move |_args| Ok(Value::String(cwd.clone()))),
    );

    process.set_property("platform", Value::String("linux".to_string()));
    process.set_property("version", Value::String("v20.0.0".to_string()));

    process.set_property(
        "exit",
        Value::native_fn("exit", |_args| Ok(Value::Undefined)),
    );
    process
}

/// Timer stand-ins. Scheduling has no event loop to land on; the handles
/// returned are inert.
pub fn build_timers() -> Vec<(&'static str, Value)> {
    fn schedule(_args: &[Value]) -> Result<Value> {
        Ok(Value::Number(0.0))
    }
    fn clear(_args: &[Value]) -> Result<Value> {
        Ok(Value::Undefined)
    }
    vec![
        ("setTimeout", Value::native_fn("setTimeout", schedule)),
        ("setInterval", Value::native_fn("setInterval", schedule)),
        ("clearTimeout", Value::native_fn("clearTimeout", clear)),
        ("clearInterval", Value::native_fn("clearInterval", clear)),
    ]
}

/// The `Buffer` namespace with the handful of statics loaders meet.
pub fn build_buffer() -> Value {
    let buffer = Value::new_object();
    buffer.set_property(
        "from",
        Value::native_fn("from", |args| {
            let bytes = match args.first() {
                Some(Value::String(s)) => s.clone().into_bytes(),
                Some(Value::Bytes(b)) => b.as_ref().clone(),
                _ => Vec::new(),
            };
            Ok(Value::Bytes(std::rc::Rc::new(bytes)))
        }),
    );
    buffer.set_property(
        "isBuffer",
        Value::native_fn("isBuffer", |args| {
            Ok(Value::Boolean(matches!(args.first(), Some(Value::Bytes(_)))))
        }),
    );
    buffer
}

/// Stub object served for a `require('node:<name>')`.
pub fn core_module(name: &str) -> Value {
    match name {
        "path" => build_path_module(),
        "process" => build_process(&BTreeMap::new(), &[], "/"),
        "buffer" => {
            let module = Value::new_object();
            module.set_property("Buffer", build_buffer());
            module
        }
        _ => {
            let module = Value::new_object();
            module.set_property("__core__", Value::String(name.to_string()));
            module
        }
    }
}

fn build_path_module() -> Value {
    use crate::vfs::path as vpath;
    let module = Value::new_object();
    module.set_property(
        "join",
        Value::native_fn("join", |args| {
            let mut joined = String::new();
            for arg in args {
                if let Value::String(part) = arg {
                    if joined.is_empty() {
                        joined = part.clone();
                    } else {
                        joined = vpath::join(&joined, part);
                    }
                }
            }
            Ok(Value::String(joined))
        }),
    );
    module.set_property(
        "dirname",
        Value::native_fn("dirname", |args| {
            let input = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            Ok(Value::String(vpath::dirname(&input)))
        }),
    );
    module.set_property(
        "basename",
        Value::native_fn("basename", |args| {
            let input = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            Ok(Value::String(vpath::basename(&input)))
        }),
    );
    module.set_property(
        "extname",
        Value::native_fn("extname", |args| {
            let input = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            Ok(Value::String(vpath::extname(&input)))
        }),
    );
    module.set_property("sep", Value::String("/".to_string()));
    module
}
