//! CommonJS evaluator
//!
//! **Status:** ⚠️ Partial — statement evaluator for loader-level CommonJS
//!
//! Executes the module shapes the loader cares about: declarations,
//! `require(…)` calls, `module.exports`/`exports` assignment, literals,
//! member access, calls into host-provided functions, `typeof`, template
//! strings and a few binary operators. Script-defined function bodies are
//! captured as opaque values; calling them is out of scope — a host JS
//! engine plugs in at exactly this seam.

use crate::error::{Error, Result};
use crate::runtime::value::{FunctionKind, Value};
use rustc_hash::FxHashMap as HashMap;
use unicode_xid::UnicodeXID;

/// Everything a module body may reach while it runs.
pub struct EvalContext<'a> {
    /// The `module` object; its `exports` property is the live exports cell
    pub module: Value,
    /// Alias to `module.exports` at entry
    pub exports: Value,
    pub filename: String,
    pub dirname: String,
    /// Extra globals: `console`, `process`, `Buffer`, timers
    pub globals: Vec<(String, Value)>,
    /// Recursive loader entry point
    pub require: &'a mut dyn FnMut(&str) -> Result<Value>,
}

/// Evaluate a CommonJS module body against `ctx`.
pub fn evaluate_module(source: &str, ctx: &mut EvalContext<'_>) -> Result<()> {
    let body = skip_shebang(source);
    let tokens = lex(body)?;
    let mut evaluator = Evaluator {
        src: body,
        tokens,
        pos: 0,
        vars: HashMap::default(),
        ctx,
    };
    evaluator.run()
}

fn skip_shebang(source: &str) -> &str {
    if let Some(rest) = source.strip_prefix("#!") {
        match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        source
    }
}

// ── lexer ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Str(String),
    Template(Vec<TplPart>),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum TplPart {
    Text(String),
    Expr(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    /// Byte span in the source, for capturing function bodies verbatim
    start: usize,
    end: usize,
}

const PUNCTS: &[&str] = &[
    "===", "!==", "...", "=>", "==", "!=", "&&", "||", "?.", "(", ")", "[", "]", "{", "}", ",",
    ";", ":", ".", "=", "+", "-", "*", "/", "!", "<", ">", "?",
];

fn lex(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '/' && bytes.get(pos + 1) == Some(&b'/') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        if c == '/' && bytes.get(pos + 1) == Some(&b'*') {
            pos += 2;
            while pos + 1 < bytes.len() && !(bytes[pos] == b'*' && bytes[pos + 1] == b'/') {
                pos += 1;
            }
            pos = (pos + 2).min(bytes.len());
            continue;
        }

        let start = pos;
        if c == '"' || c == '\'' {
            let (text, end) = lex_string(source, pos)?;
            tokens.push(Token {
                tok: Tok::Str(text),
                start,
                end,
            });
            pos = end;
            continue;
        }
        if c == '`' {
            let (parts, end) = lex_template(source, pos)?;
            tokens.push(Token {
                tok: Tok::Template(parts),
                start,
                end,
            });
            pos = end;
            continue;
        }
        if c.is_ascii_digit() {
            let mut end = pos;
            while end < bytes.len()
                && ((bytes[end] as char).is_ascii_alphanumeric()
                    || bytes[end] == b'.'
                    || bytes[end] == b'_')
            {
                // Stop a trailing `.` that begins a method call (`1 .toFixed`)
                if bytes[end] == b'.'
                    && end + 1 < bytes.len()
                    && !(bytes[end + 1] as char).is_ascii_digit()
                {
                    break;
                }
                end += 1;
            }
            let text = source[pos..end].replace('_', "");
            let number = lexical_core::parse::<f64>(text.as_bytes())
                .map_err(|_| eval_err(format!("bad number literal '{}'", text)))?;
            tokens.push(Token {
                tok: Tok::Number(number),
                start,
                end,
            });
            pos = end;
            continue;
        }
        if c.is_xid_start() || c == '_' || c == '$' {
            let mut end = pos;
            for ch in source[pos..].chars() {
                if ch.is_xid_continue() || ch == '$' {
                    end += ch.len_utf8();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Ident(source[pos..end].to_string()),
                start,
                end,
            });
            pos = end;
            continue;
        }

        let mut matched = false;
        for punct in PUNCTS {
            if source[pos..].starts_with(punct) {
                tokens.push(Token {
                    tok: Tok::Punct(punct),
                    start,
                    end: pos + punct.len(),
                });
                pos += punct.len();
                matched = true;
                break;
            }
        }
        if !matched {
            return Err(eval_err(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize)> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => {
                let escaped = bytes.get(pos + 1).copied().unwrap_or(b'\\') as char;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                pos += 2;
            }
            b if b == quote => return Ok((out, pos + 1)),
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('\0');
                out.push(ch);
                pos += ch.len_utf8();
            }
        }
    }
    Err(eval_err("unterminated string literal"))
}

fn lex_template(source: &str, start: usize) -> Result<(Vec<TplPart>, usize)> {
    let bytes = source.as_bytes();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => {
                let escaped = bytes.get(pos + 1).copied().unwrap_or(b'\\') as char;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                pos += 2;
            }
            b'`' => {
                if !text.is_empty() {
                    parts.push(TplPart::Text(text));
                }
                return Ok((parts, pos + 1));
            }
            b'$' if bytes.get(pos + 1) == Some(&b'{') => {
                if !text.is_empty() {
                    parts.push(TplPart::Text(std::mem::take(&mut text)));
                }
                let expr_start = pos + 2;
                let mut depth = 1;
                pos = expr_start;
                while pos < bytes.len() && depth > 0 {
                    match bytes[pos] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    }
                    pos += 1;
                }
                parts.push(TplPart::Expr(source[expr_start..pos - 1].to_string()));
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('\0');
                text.push(ch);
                pos += ch.len_utf8();
            }
        }
    }
    Err(eval_err("unterminated template literal"))
}

// ── evaluator ───────────────────────────────────────────────────────

struct Evaluator<'a, 'b> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    vars: HashMap<String, Value>,
    ctx: &'a mut EvalContext<'b>,
}

impl<'a, 'b> Evaluator<'a, 'b> {
    fn run(&mut self) -> Result<()> {
        while self.pos < self.tokens.len() {
            self.statement()?;
        }
        Ok(())
    }

    // ── statements ──────────────────────────────────────────────────

    fn statement(&mut self) -> Result<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        if self.at_ident("const") || self.at_ident("let") || self.at_ident("var") {
            self.pos += 1;
            return self.declaration();
        }
        if self.at_ident("function") {
            return self.function_declaration();
        }
        if self.at_ident("class") {
            let (name, value) = self.class_value()?;
            if let Some(name) = name {
                self.vars.insert(name, value);
            }
            return Ok(());
        }
        if self.at_ident("throw") {
            self.pos += 1;
            let value = self.expression()?;
            self.eat_punct(";");
            return Err(eval_err(thrown_message(&value)));
        }
        for unsupported in ["if", "for", "while", "switch", "return", "try", "do"] {
            if self.at_ident(unsupported) {
                return Err(eval_err(format!(
                    "'{}' statements are not supported by the bundled evaluator",
                    unsupported
                )));
            }
        }

        // Assignment to a member chain, or a plain expression statement
        let checkpoint = self.pos;
        if let Some(()) = self.try_assignment()? {
            return Ok(());
        }
        self.pos = checkpoint;
        self.expression()?;
        self.eat_punct(";");
        Ok(())
    }

    fn declaration(&mut self) -> Result<()> {
        loop {
            if self.at_punct("{") {
                // const { a, b: c } = expr;
                let fields = self.object_pattern()?;
                self.expect_punct("=")?;
                let source_value = self.expression()?;
                for (key, binding) in fields {
                    let value = source_value.get_property(&key).unwrap_or(Value::Undefined);
                    self.vars.insert(binding, value);
                }
            } else if self.at_punct("[") {
                // const [a, b] = expr;
                let bindings = self.array_pattern()?;
                self.expect_punct("=")?;
                let source_value = self.expression()?;
                for (index, binding) in bindings.into_iter().enumerate() {
                    let value = source_value
                        .get_property(&index.to_string())
                        .unwrap_or(Value::Undefined);
                    self.vars.insert(binding, value);
                }
            } else {
                let name = self.expect_ident()?;
                if self.eat_punct("=") {
                    let value = self.expression()?;
                    self.vars.insert(name, value);
                } else {
                    self.vars.insert(name, Value::Undefined);
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.eat_punct(";");
        Ok(())
    }

    fn object_pattern(&mut self) -> Result<Vec<(String, String)>> {
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        while !self.eat_punct("}") {
            let key = self.expect_ident()?;
            let binding = if self.eat_punct(":") {
                self.expect_ident()?
            } else {
                key.clone()
            };
            fields.push((key, binding));
            self.eat_punct(",");
        }
        Ok(fields)
    }

    fn array_pattern(&mut self) -> Result<Vec<String>> {
        self.expect_punct("[")?;
        let mut bindings = Vec::new();
        while !self.eat_punct("]") {
            bindings.push(self.expect_ident()?);
            self.eat_punct(",");
        }
        Ok(bindings)
    }

    fn function_declaration(&mut self) -> Result<()> {
        let span_start = self.tokens[self.pos].start;
        self.pos += 1; // function
        let name = self.expect_ident()?;
        self.skip_balanced("(", ")")?;
        let span_end = self.skip_balanced("{", "}")?;
        self.vars.insert(
            name.clone(),
            Value::script_fn(&name, &self.src[span_start..span_end]),
        );
        Ok(())
    }

    /// `class Name extends Base { … }` captured as an opaque function-like
    /// value; returns the binding name when one is present.
    fn class_value(&mut self) -> Result<(Option<String>, Value)> {
        let span_start = self.tokens[self.pos].start;
        self.pos += 1; // class
        let name = match self.peek_tok() {
            Some(Tok::Ident(n)) => {
                let n = n.clone();
                self.pos += 1;
                Some(n)
            }
            _ => None,
        };
        // Heritage clause flows into the body
        while !self.at_punct("{") {
            if self.pos >= self.tokens.len() {
                return Err(eval_err("unterminated class declaration"));
            }
            self.pos += 1;
        }
        let span_end = self.skip_balanced("{", "}")?;
        let display_name = name.clone().unwrap_or_else(|| "<class>".to_string());
        Ok((
            name,
            Value::script_fn(&display_name, &self.src[span_start..span_end]),
        ))
    }

    /// `a.b.c = expr;` — returns `Some(())` when the statement really was
    /// an assignment, `None` when the caller should re-parse.
    fn try_assignment(&mut self) -> Result<Option<()>> {
        let Some(Tok::Ident(base)) = self.peek_tok().cloned() else {
            return Ok(None);
        };
        let base_name = base;
        self.pos += 1;

        let mut chain: Vec<String> = Vec::new();
        loop {
            if self.eat_punct(".") {
                chain.push(self.expect_ident()?);
            } else if self.at_punct("[") {
                self.pos += 1;
                let key = self.expression()?;
                self.expect_punct("]")?;
                chain.push(match key {
                    Value::String(s) => s,
                    other => other.to_display_string(),
                });
            } else {
                break;
            }
        }

        if !self.at_punct("=") {
            return Ok(None);
        }
        self.pos += 1;
        let value = self.expression()?;
        self.eat_punct(";");

        if chain.is_empty() {
            self.vars.insert(base_name, value);
            return Ok(Some(()));
        }

        let mut target = self
            .lookup(&base_name)
            .ok_or_else(|| eval_err(format!("'{}' is not defined", base_name)))?;
        for segment in &chain[..chain.len() - 1] {
            target = target
                .get_property(segment)
                .ok_or_else(|| eval_err(format!("cannot read property '{}'", segment)))?;
        }
        target.set_property(&chain[chain.len() - 1], value);
        Ok(Some(()))
    }

    // ── expressions ─────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Value> {
        let condition = self.binary(0)?;
        if self.eat_punct("?") {
            // Only the taken arm evaluates; the other is consumed unparsed
            return if condition.truthy() {
                let consequent = self.expression()?;
                self.expect_punct(":")?;
                self.skip_expression()?;
                Ok(consequent)
            } else {
                self.skip_expression()?;
                self.expect_punct(":")?;
                self.expression()
            };
        }
        Ok(condition)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            let Some(Tok::Punct(op)) = self.peek_tok() else {
                break;
            };
            let op = *op;
            let Some(precedence) = binary_precedence(op) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            // Logical operators short-circuit: when the left operand
            // decides, the right-hand side is consumed without evaluating
            if op == "&&" && !left.truthy() {
                self.skip_binary(precedence + 1)?;
                continue;
            }
            if op == "||" && left.truthy() {
                self.skip_binary(precedence + 1)?;
                continue;
            }
            let right = self.binary(precedence + 1)?;
            left = apply_binary(op, &left, &right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value> {
        if self.at_ident("typeof") {
            self.pos += 1;
            let value = self.unary()?;
            return Ok(Value::String(value.type_of().to_string()));
        }
        if self.eat_punct("!") {
            let value = self.unary()?;
            return Ok(Value::Boolean(!value.truthy()));
        }
        if self.eat_punct("-") {
            let value = self.unary()?;
            return match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(eval_err("unary '-' on a non-number")),
            };
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Value> {
        let mut value = self.primary()?;
        loop {
            if self.eat_punct(".") || self.eat_punct("?.") {
                let key = self.expect_ident()?;
                if self.at_punct("(") {
                    let args = self.arguments()?;
                    value = call_function(
                        &value.get_property(&key).unwrap_or(Value::Undefined),
                        &key,
                        &args,
                    )?;
                } else {
                    value = value.get_property(&key).unwrap_or(Value::Undefined);
                }
            } else if self.at_punct("[") {
                self.pos += 1;
                let key = self.expression()?;
                self.expect_punct("]")?;
                let key = match key {
                    Value::String(s) => s,
                    other => other.to_display_string(),
                };
                value = value.get_property(&key).unwrap_or(Value::Undefined);
            } else if self.at_punct("(") {
                let args = self.arguments()?;
                value = call_function(&value, "<anonymous>", &args)?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<Value> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(eval_err("unexpected end of input"));
        };
        match token.tok {
            Tok::Number(n) => {
                self.pos += 1;
                Ok(Value::Number(n))
            }
            Tok::Str(s) => {
                self.pos += 1;
                Ok(Value::String(s))
            }
            Tok::Template(parts) => {
                self.pos += 1;
                self.template_value(&parts)
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => {
                    self.pos += 1;
                    Ok(Value::Boolean(true))
                }
                "false" => {
                    self.pos += 1;
                    Ok(Value::Boolean(false))
                }
                "null" => {
                    self.pos += 1;
                    Ok(Value::Null)
                }
                "undefined" => {
                    self.pos += 1;
                    Ok(Value::Undefined)
                }
                "require" => {
                    self.pos += 1;
                    let args = self.arguments()?;
                    let Some(Value::String(specifier)) = args.first() else {
                        return Err(eval_err("require expects a string specifier"));
                    };
                    (self.ctx.require)(specifier)
                }
                "function" => self.function_expression(),
                "class" => {
                    let (_, value) = self.class_value()?;
                    Ok(value)
                }
                "new" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    let args = if self.at_punct("(") {
                        self.arguments()?
                    } else {
                        Vec::new()
                    };
                    let object = Value::new_object();
                    object.set_property("name", Value::String(name));
                    if let Some(first) = args.into_iter().next() {
                        object.set_property("message", first);
                    }
                    Ok(object)
                }
                _ => {
                    // Arrow function `x => …`
                    if matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.tok),
                        Some(Tok::Punct("=>"))
                    ) {
                        return self.arrow_from(self.pos);
                    }
                    self.pos += 1;
                    Ok(self.lookup(&name).unwrap_or(Value::Undefined))
                }
            },
            Tok::Punct("(") => {
                // Either a parenthesized expression or an arrow's parameters
                if let Some(close) = self.matching_paren(self.pos) {
                    if matches!(
                        self.tokens.get(close + 1).map(|t| &t.tok),
                        Some(Tok::Punct("=>"))
                    ) {
                        return self.arrow_from(self.pos);
                    }
                }
                self.pos += 1;
                let value = self.expression()?;
                self.expect_punct(")")?;
                Ok(value)
            }
            Tok::Punct("{") => self.object_literal(),
            Tok::Punct("[") => self.array_literal(),
            other => Err(eval_err(format!("unsupported syntax near {:?}", other))),
        }
    }

    // ── untaken branches ────────────────────────────────────────────
    // Mirrors of the expression grammar that move the cursor without
    // evaluating anything. Used for the dead side of `&&`/`||` and `?:`.

    fn skip_expression(&mut self) -> Result<()> {
        self.skip_binary(0)?;
        if self.eat_punct("?") {
            self.skip_expression()?;
            self.expect_punct(":")?;
            self.skip_expression()?;
        }
        Ok(())
    }

    fn skip_binary(&mut self, min_precedence: u8) -> Result<()> {
        self.skip_unary()?;
        loop {
            let Some(Tok::Punct(op)) = self.peek_tok() else {
                break;
            };
            let op = *op;
            let Some(precedence) = binary_precedence(op) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            self.skip_binary(precedence + 1)?;
        }
        Ok(())
    }

    fn skip_unary(&mut self) -> Result<()> {
        if self.at_ident("typeof") {
            self.pos += 1;
            return self.skip_unary();
        }
        if self.eat_punct("!") || self.eat_punct("-") {
            return self.skip_unary();
        }
        self.skip_postfix()
    }

    fn skip_postfix(&mut self) -> Result<()> {
        self.skip_primary()?;
        loop {
            if self.eat_punct(".") || self.eat_punct("?.") {
                self.expect_ident()?;
                if self.at_punct("(") {
                    self.skip_balanced("(", ")")?;
                }
            } else if self.at_punct("[") {
                self.skip_balanced("[", "]")?;
            } else if self.at_punct("(") {
                self.skip_balanced("(", ")")?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn skip_primary(&mut self) -> Result<()> {
        let Some(tok) = self.tokens.get(self.pos).map(|t| t.tok.clone()) else {
            return Err(eval_err("unexpected end of input"));
        };
        match tok {
            Tok::Number(_) | Tok::Str(_) | Tok::Template(_) => {
                self.pos += 1;
                Ok(())
            }
            Tok::Ident(name) => match name.as_str() {
                // Function and class bodies are already opaque captures
                "function" => self.function_expression().map(|_| ()),
                "class" => self.class_value().map(|_| ()),
                "new" => {
                    self.pos += 1;
                    self.expect_ident()?;
                    if self.at_punct("(") {
                        self.skip_balanced("(", ")")?;
                    }
                    Ok(())
                }
                _ => {
                    // Covers `require(…)` too: a skipped require must not
                    // load its module
                    if matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.tok),
                        Some(Tok::Punct("=>"))
                    ) {
                        return self.arrow_from(self.pos).map(|_| ());
                    }
                    self.pos += 1;
                    Ok(())
                }
            },
            Tok::Punct("(") => {
                if let Some(close) = self.matching_paren(self.pos) {
                    if matches!(
                        self.tokens.get(close + 1).map(|t| &t.tok),
                        Some(Tok::Punct("=>"))
                    ) {
                        return self.arrow_from(self.pos).map(|_| ());
                    }
                }
                self.skip_balanced("(", ")")?;
                Ok(())
            }
            Tok::Punct("{") => {
                self.skip_balanced("{", "}")?;
                Ok(())
            }
            Tok::Punct("[") => {
                self.skip_balanced("[", "]")?;
                Ok(())
            }
            other => Err(eval_err(format!("unsupported syntax near {:?}", other))),
        }
    }

    fn object_literal(&mut self) -> Result<Value> {
        self.expect_punct("{")?;
        let object = Value::new_object();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                let spread = self.expression()?;
                if let Value::Object(data) = &spread {
                    let data = data.borrow();
                    for key in data.keys() {
                        object.set_property(&key, data.get(&key).unwrap_or(Value::Undefined));
                    }
                }
            } else {
                let key = match self.tokens.get(self.pos).map(|t| t.tok.clone()) {
                    Some(Tok::Ident(name)) => {
                        self.pos += 1;
                        name
                    }
                    Some(Tok::Str(s)) => {
                        self.pos += 1;
                        s
                    }
                    Some(Tok::Number(n)) => {
                        self.pos += 1;
                        Value::Number(n).to_display_string()
                    }
                    _ => return Err(eval_err("bad object literal key")),
                };
                if self.eat_punct(":") {
                    let value = self.expression()?;
                    object.set_property(&key, value);
                } else if self.at_punct("(") {
                    // Method shorthand `{ format() { … } }`
                    let span_start = self.tokens[self.pos].start;
                    self.skip_balanced("(", ")")?;
                    let span_end = self.skip_balanced("{", "}")?;
                    object.set_property(
                        &key,
                        Value::script_fn(&key, &self.src[span_start..span_end]),
                    );
                } else {
                    // Shorthand `{ name }`
                    let value = self.lookup(&key).unwrap_or(Value::Undefined);
                    object.set_property(&key, value);
                }
            }
            self.eat_punct(",");
        }
        Ok(object)
    }

    fn array_literal(&mut self) -> Result<Value> {
        self.expect_punct("[")?;
        let mut items = Vec::new();
        while !self.eat_punct("]") {
            items.push(self.expression()?);
            self.eat_punct(",");
        }
        Ok(Value::new_array(items))
    }

    fn function_expression(&mut self) -> Result<Value> {
        let span_start = self.tokens[self.pos].start;
        self.pos += 1; // function
        let name = if let Some(Tok::Ident(n)) = self.peek_tok() {
            let n = n.clone();
            self.pos += 1;
            n
        } else {
            "<anonymous>".to_string()
        };
        self.skip_balanced("(", ")")?;
        let span_end = self.skip_balanced("{", "}")?;
        Ok(Value::script_fn(&name, &self.src[span_start..span_end]))
    }

    /// Arrow function starting at token `start` (parameter list or single
    /// identifier). Captured as opaque source.
    fn arrow_from(&mut self, start: usize) -> Result<Value> {
        let span_start = self.tokens[start].start;
        // Move past parameters
        if self.at_punct("(") {
            self.skip_balanced("(", ")")?;
        } else {
            self.pos += 1;
        }
        self.expect_punct("=>")?;
        let span_end = if self.at_punct("{") {
            self.skip_balanced("{", "}")?
        } else {
            self.skip_expression_span()?
        };
        Ok(Value::script_fn("<arrow>", &self.src[span_start..span_end]))
    }

    /// Consume an expression without evaluating it, returning its end
    /// offset. Used for arrow bodies, which stay opaque.
    fn skip_expression_span(&mut self) -> Result<usize> {
        let mut depth = 0i32;
        let mut end = self
            .tokens
            .get(self.pos)
            .map(|t| t.end)
            .unwrap_or_else(|| self.src.len());
        while let Some(token) = self.tokens.get(self.pos) {
            match token.tok {
                Tok::Punct("(") | Tok::Punct("[") | Tok::Punct("{") => depth += 1,
                Tok::Punct(")") | Tok::Punct("]") | Tok::Punct("}") => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Tok::Punct(",") | Tok::Punct(";") if depth == 0 => break,
                _ => {}
            }
            end = token.end;
            self.pos += 1;
        }
        Ok(end)
    }

    fn template_value(&mut self, parts: &[TplPart]) -> Result<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                TplPart::Text(text) => out.push_str(text),
                TplPart::Expr(expr_src) => {
                    let tokens = lex(expr_src)?;
                    let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let saved_pos = std::mem::replace(&mut self.pos, 0);
                    let saved_src = self.src;
                    // Spans inside the nested parse refer to the expression
                    // text; nothing captures them, so the swap is safe.
                    let value = self.expression();
                    self.tokens = saved_tokens;
                    self.pos = saved_pos;
                    let _ = saved_src;
                    out.push_str(&value?.to_display_string());
                }
            }
        }
        Ok(Value::String(out))
    }

    fn arguments(&mut self) -> Result<Vec<Value>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.expression()?);
            self.eat_punct(",");
        }
        Ok(args)
    }

    // ── environment ─────────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        match name {
            "module" => Some(self.ctx.module.clone()),
            "exports" => Some(self.ctx.exports.clone()),
            "__filename" => Some(Value::String(self.ctx.filename.clone())),
            "__dirname" => Some(Value::String(self.ctx.dirname.clone())),
            _ => self
                .ctx
                .globals
                .iter()
                .find(|(global, _)| global == name)
                .map(|(_, value)| value.clone()),
        }
    }

    // ── token helpers ───────────────────────────────────────────────

    fn peek_tok(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn at_ident(&self, name: &str) -> bool {
        matches!(self.peek_tok(), Some(Tok::Ident(n)) if n == name)
    }

    fn at_punct(&self, punct: &str) -> bool {
        matches!(self.peek_tok(), Some(Tok::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(eval_err(format!(
                "expected '{}', found {:?}",
                punct,
                self.peek_tok()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek_tok() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => Err(eval_err(format!("expected identifier, found {:?}", other))),
        }
    }

    /// Skip a balanced token run, returning the end byte offset.
    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<usize> {
        if !self.at_punct(open) {
            return Err(eval_err(format!("expected '{}'", open)));
        }
        let mut depth = 0;
        while let Some(token) = self.tokens.get(self.pos) {
            if matches!(&token.tok, Tok::Punct(p) if *p == open) {
                depth += 1;
            } else if matches!(&token.tok, Tok::Punct(p) if *p == close) {
                depth -= 1;
                if depth == 0 {
                    let end = token.end;
                    self.pos += 1;
                    return Ok(end);
                }
            }
            self.pos += 1;
        }
        Err(eval_err(format!("unbalanced '{}'", open)))
    }

    fn matching_paren(&self, open_index: usize) -> Option<usize> {
        let mut depth = 0;
        let mut index = open_index;
        while let Some(token) = self.tokens.get(index) {
            match token.tok {
                Tok::Punct("(") => depth += 1,
                Tok::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(index);
                    }
                }
                _ => {}
            }
            index += 1;
        }
        None
    }
}

// ── operations ──────────────────────────────────────────────────────

fn binary_precedence(op: &str) -> Option<u8> {
    match op {
        "||" => Some(1),
        "&&" => Some(2),
        "===" | "!==" | "==" | "!=" => Some(3),
        "<" | ">" => Some(4),
        "+" | "-" => Some(5),
        "*" | "/" => Some(6),
        _ => None,
    }
}

fn apply_binary(op: &str, left: &Value, right: &Value) -> Result<Value> {
    match op {
        "&&" | "||" => Ok(right.clone()),
        "===" | "==" => Ok(Value::Boolean(left.strict_equals(right))),
        "!==" | "!=" => Ok(Value::Boolean(!left.strict_equals(right))),
        "+" => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (a, b) => Ok(Value::String(format!(
                "{}{}",
                a.to_display_string(),
                b.to_display_string()
            ))),
        },
        "-" | "*" | "/" => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
                "-" => a - b,
                "*" => a * b,
                _ => a / b,
            })),
            _ => Err(eval_err(format!("'{}' expects numbers", op))),
        },
        "<" | ">" => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(if op == "<" {
                a < b
            } else {
                a > b
            })),
            _ => Err(eval_err(format!("'{}' expects numbers", op))),
        },
        _ => Err(eval_err(format!("unsupported operator '{}'", op))),
    }
}

fn call_function(callee: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match callee {
        Value::Function(function) => match &function.kind {
            FunctionKind::Native(body) => body(args),
            FunctionKind::Script { .. } => Err(eval_err(format!(
                "calling script-defined function '{}' is not supported by the bundled evaluator",
                function.name
            ))),
        },
        _ => Err(eval_err(format!("'{}' is not a function", name))),
    }
}

fn thrown_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other
            .get_property("message")
            .map(|m| m.to_display_string())
            .unwrap_or_else(|| other.to_display_string()),
    }
}

fn eval_err(message: impl Into<String>) -> Error {
    Error::evaluation("<module>", message)
}
