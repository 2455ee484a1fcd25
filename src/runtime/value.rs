//! Dynamically-typed module values
//!
//! `Value` is what `require` returns and what modules export. Objects and
//! arrays are shared mutable cells so a partially-populated exports object
//! can be observed mid-cycle, matching CommonJS semantics. Values pass
//! through the runtime unchanged; no structural validation happens here.

use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A JavaScript-ish value
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Opaque byte container (binary `require` results)
    Bytes(Rc<Vec<u8>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectData>>),
    Function(Rc<FunctionValue>),
}

/// Property table of an object value; insertion order preserved.
#[derive(Debug, Default)]
pub struct ObjectData {
    properties: HashMap<String, Value>,
    order: Vec<String>,
}

impl ObjectData {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: Value) {
        if !self.properties.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.properties.insert(key.to_string(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A function value: either a host binding or captured script source that
/// the evaluator treats as opaque.
pub struct FunctionValue {
    pub name: String,
    pub kind: FunctionKind,
}

pub enum FunctionKind {
    Native(Box<dyn Fn(&[Value]) -> crate::error::Result<Value>>),
    Script { source: String },
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FunctionKind::Native(_) => write!(f, "[native {}]", self.name),
            FunctionKind::Script { .. } => write!(f, "[function {}]", self.name),
        }
    }
}

impl Value {
    pub fn new_object() -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectData::default())))
    }

    pub fn new_array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn native_fn<F>(name: &str, body: F) -> Value
    where
        F: Fn(&[Value]) -> crate::error::Result<Value> + 'static,
    {
        Value::Function(Rc::new(FunctionValue {
            name: name.to_string(),
            kind: FunctionKind::Native(Box::new(body)),
        }))
    }

    pub fn script_fn(name: &str, source: &str) -> Value {
        Value::Function(Rc::new(FunctionValue {
            name: name.to_string(),
            kind: FunctionKind::Script {
                source: source.to_string(),
            },
        }))
    }

    /// Property lookup on objects, arrays (`length`) and strings (`length`).
    pub fn get_property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(data) => data.borrow().get(key),
            Value::Array(items) => match key {
                "length" => Some(Value::Number(items.borrow().len() as f64)),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.borrow().get(i).cloned()),
            },
            Value::String(s) => match key {
                "length" => Some(Value::Number(s.chars().count() as f64)),
                _ => None,
            },
            Value::Bytes(bytes) => match key {
                "length" => Some(Value::Number(bytes.len() as f64)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Property write; a no-op on non-objects, like sloppy-mode JS.
    pub fn set_property(&self, key: &str, value: Value) {
        if let Value::Object(data) = self {
            data.borrow_mut().set(key, value);
        }
    }

    /// `typeof` semantics.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) | Value::Array(_) | Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Strict equality; reference identity for objects and functions.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Convert a parsed JSON document (JSON modules) into a value tree.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::new_array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let object = Value::new_object();
                for (key, inner) in map {
                    object.set_property(key, Value::from_json(inner));
                }
                object
            }
        }
    }

    /// Console-style rendering.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Bytes(bytes) => format!("<Buffer {} bytes>", bytes.len()),
            Value::Array(items) => {
                let rendered: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| v.to_quoted_string())
                    .collect();
                format!("[ {} ]", rendered.join(", "))
            }
            Value::Object(data) => {
                let data = data.borrow();
                if data.is_empty() {
                    return "{}".to_string();
                }
                let rendered: Vec<String> = data
                    .keys()
                    .iter()
                    .map(|k| {
                        let value = data.get(k).unwrap_or(Value::Undefined);
                        format!("{}: {}", k, value.to_quoted_string())
                    })
                    .collect();
                format!("{{ {} }}", rendered.join(", "))
            }
            Value::Function(f) => format!("[Function: {}]", f.name),
        }
    }

    fn to_quoted_string(&self) -> String {
        match self {
            Value::String(s) => format!("'{}'", s),
            other => other.to_display_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
