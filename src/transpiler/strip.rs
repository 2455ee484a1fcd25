//! TypeScript type stripping
//!
//! Single-pass scanner that removes type-level syntax and leaves runtime
//! JavaScript behind: annotations, interfaces, type aliases, generics,
//! access modifiers, assertions, `import type` statements. Enums lower to
//! the standard object-literal IIFE. String, template and comment spans are
//! copied verbatim, never inspected.

use crate::error::{Error, Result};
use unicode_xid::UnicodeXID;

/// Strip TypeScript syntax from `source`, producing plain JavaScript.
pub fn strip_types(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut pos = 0;
    // Open ternary `?`s whose `:` must survive
    let mut ternary_depth = 0usize;

    while pos < bytes.len() {
        let ws_start = pos;
        pos = skip_ws(source, pos);
        out.push_str(&source[ws_start..pos]);
        if pos >= bytes.len() {
            break;
        }

        // Comments: copied through
        if bytes[pos] == b'/' && pos + 1 < bytes.len() {
            if bytes[pos + 1] == b'/' {
                let start = pos;
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
                out.push_str(&source[start..pos]);
                continue;
            }
            if bytes[pos + 1] == b'*' {
                let start = pos;
                pos = skip_block_comment(source, pos);
                out.push_str(&source[start..pos]);
                continue;
            }
        }

        // String and template literals: copied through
        if bytes[pos] == b'"' || bytes[pos] == b'\'' || bytes[pos] == b'`' {
            let start = pos;
            pos = skip_string(source, pos);
            out.push_str(&source[start..pos]);
            continue;
        }

        // Declarations that vanish entirely
        if at_keyword(source, pos, "interface") {
            pos = skip_interface(source, pos)?;
            continue;
        }
        if at_keyword(source, pos, "type") && is_type_alias(source, pos) {
            pos = skip_type_alias(source, pos)?;
            continue;
        }
        if at_keyword(source, pos, "declare") {
            pos = skip_declare(source, pos)?;
            continue;
        }
        if at_keyword(source, pos, "namespace") {
            pos = skip_namespace(source, pos)?;
            continue;
        }

        // `import type …` / `export type …` statements, and `export`
        // prefixes on type-only declarations
        if at_keyword(source, pos, "import") || at_keyword(source, pos, "export") {
            let is_export = at_keyword(source, pos, "export");
            let after = skip_ws(source, skip_ident(source, pos));
            if at_keyword(source, after, "type") && !is_type_alias(source, after) {
                // `import type {X} from 'm'` — but `export type X = …` is an
                // alias and was handled above only for bare `type`.
                pos = skip_statement(source, pos);
                continue;
            }
            if is_export && at_keyword(source, after, "type") {
                pos = skip_statement(source, pos);
                continue;
            }
            // `export interface …` etc.: drop the `export`, let the
            // declaration handlers consume the rest
            if is_export
                && (at_keyword(source, after, "interface")
                    || at_keyword(source, after, "declare")
                    || at_keyword(source, after, "namespace")
                    || at_keyword(source, after, "enum"))
            {
                pos = after;
                continue;
            }
        }

        // Enums lower to object literals
        if at_keyword(source, pos, "enum") {
            pos = emit_enum(&mut out, source, pos)?;
            continue;
        }
        if at_keyword(source, pos, "const") {
            let after = skip_ws(source, pos + "const".len());
            if at_keyword(source, after, "enum") {
                pos = emit_enum(&mut out, source, after)?;
                continue;
            }
        }

        // Member modifiers that drop
        if at_keyword(source, pos, "public")
            || at_keyword(source, pos, "private")
            || at_keyword(source, pos, "protected")
            || at_keyword(source, pos, "readonly")
            || at_keyword(source, pos, "override")
        {
            pos = skip_ws(source, skip_ident(source, pos));
            continue;
        }
        if at_keyword(source, pos, "abstract") {
            pos = skip_ws(source, skip_ident(source, pos));
            continue;
        }

        // `x as T` / `x satisfies T` — but `import { x as y }` keeps its `as`
        if (at_keyword(source, pos, "as") || at_keyword(source, pos, "satisfies"))
            && follows_expression(source, pos)
            && !in_import_braces(source, pos)
        {
            pos = skip_ident(source, pos);
            pos = skip_type_expression(source, skip_ws(source, pos));
            continue;
        }

        // `?` family: optional markers drop, `??`/`?.` copy through, and a
        // lone `?` opens a ternary whose `:` must not read as an annotation
        if bytes[pos] == b'?' {
            let next_ws = skip_ws(source, pos + 1);
            if next_ws < bytes.len() && matches!(bytes[next_ws], b':' | b')' | b',') {
                pos += 1;
                continue;
            }
            match bytes.get(pos + 1) {
                Some(&b'?') => {
                    out.push_str("??");
                    pos += 2;
                }
                Some(&b'.') => {
                    out.push_str("?.");
                    pos += 2;
                }
                _ => {
                    ternary_depth += 1;
                    out.push('?');
                    pos += 1;
                }
            }
            continue;
        }

        // Type annotation `: T` — but never a ternary arm or a case label
        if bytes[pos] == b':' {
            if ternary_depth > 0 {
                ternary_depth -= 1;
                out.push(':');
                pos += 1;
                continue;
            }
            if is_annotation_context(source, pos) && !is_label_colon(source, pos) {
                pos = skip_type_expression(source, skip_ws(source, pos + 1));
                // Keep tokens apart when the annotation sat between them
                if let Some(&next) = bytes.get(pos) {
                    let next = next as char;
                    if next.is_alphanumeric() || next == '=' || next == '{' {
                        out.push(' ');
                    }
                }
                continue;
            }
        }

        // Generic parameter list `<T, U>` in declaration/call position
        if bytes[pos] == b'<' && is_type_params_context(source, pos) {
            pos = skip_balanced(source, pos, b'<', b'>')?;
            continue;
        }

        // Non-null assertion `x!` (never `!=`)
        if bytes[pos] == b'!' && follows_expression(source, pos) {
            let next = pos + 1;
            if next >= bytes.len() || !matches!(bytes[next], b'=') {
                pos += 1;
                continue;
            }
        }

        let ch = source[pos..].chars().next().unwrap_or('\0');
        out.push(ch);
        pos += ch.len_utf8();
    }

    Ok(out)
}

// ── cursor helpers ──────────────────────────────────────────────────

fn skip_ws(source: &str, mut pos: usize) -> usize {
    let bytes = source.as_bytes();
    while pos < bytes.len() && (bytes[pos] as char).is_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_ident(source: &str, mut pos: usize) -> usize {
    for ch in source[pos..].chars() {
        if ch.is_xid_continue() || ch == '$' {
            pos += ch.len_utf8();
        } else {
            break;
        }
    }
    pos
}

fn skip_string(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'$' if quote == b'`' && bytes.get(pos + 1) == Some(&b'{') => {
                pos += 2;
                let mut depth = 1;
                while pos < bytes.len() && depth > 0 {
                    match bytes[pos] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        b'"' | b'\'' | b'`' => {
                            pos = skip_string(source, pos);
                            continue;
                        }
                        _ => {}
                    }
                    pos += 1;
                }
            }
            b if b == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    pos
}

fn skip_block_comment(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let mut pos = start + 2;
    while pos + 1 < bytes.len() {
        if bytes[pos] == b'*' && bytes[pos + 1] == b'/' {
            return pos + 2;
        }
        pos += 1;
    }
    bytes.len()
}

fn at_keyword(source: &str, pos: usize, keyword: &str) -> bool {
    if !source[pos..].starts_with(keyword) {
        return false;
    }
    // Must not be the tail of a longer identifier
    if pos > 0 {
        if let Some(prev) = source[..pos].chars().next_back() {
            if prev.is_xid_continue() || prev == '$' || prev == '.' {
                return false;
            }
        }
    }
    match source[pos + keyword.len()..].chars().next() {
        Some(next) => !(next.is_xid_continue() || next == '$'),
        None => true,
    }
}

fn skip_balanced(source: &str, start: usize, open: u8, close: u8) -> Result<usize> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let mut depth = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        if b == b'"' || b == b'\'' || b == b'`' {
            pos = skip_string(source, pos);
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok(pos + 1);
            }
        }
        pos += 1;
    }
    Err(Error::transpile(
        "<input>",
        format!("unbalanced '{}'", open as char),
    ))
}

/// End of the current statement: past the next `;` or, for block-bodied
/// statements, past the closing `}`.
fn skip_statement(source: &str, mut pos: usize) -> usize {
    let bytes = source.as_bytes();
    while pos < bytes.len() {
        match bytes[pos] {
            b';' | b'\n' => return pos + 1,
            b'"' | b'\'' | b'`' => pos = skip_string(source, pos),
            b'{' => match skip_balanced(source, pos, b'{', b'}') {
                Ok(end) => pos = end,
                Err(_) => return bytes.len(),
            },
            _ => pos += 1,
        }
    }
    pos
}

fn prev_meaningful(source: &str, pos: usize) -> Option<char> {
    source[..pos].chars().rev().find(|c| !c.is_whitespace())
}

fn follows_expression(source: &str, pos: usize) -> bool {
    matches!(
        prev_meaningful(source, pos),
        Some(c) if c.is_xid_continue() || c == '$' || c == ')' || c == ']' || c == '"' || c == '\'' || c == '`'
    )
}

// ── skip rules ──────────────────────────────────────────────────────

fn skip_interface(source: &str, mut pos: usize) -> Result<usize> {
    pos = skip_ws(source, skip_ident(source, pos)); // interface
    pos = skip_ws(source, skip_ident(source, pos)); // name
    if source.as_bytes().get(pos) == Some(&b'<') {
        pos = skip_ws(source, skip_balanced(source, pos, b'<', b'>')?);
    }
    // extends clause: everything up to the body
    while pos < source.len() && source.as_bytes()[pos] != b'{' {
        pos += 1;
    }
    skip_balanced(source, pos, b'{', b'}')
}

fn is_type_alias(source: &str, pos: usize) -> bool {
    let after_kw = skip_ws(source, skip_ident(source, pos));
    let name_end = skip_ident(source, after_kw);
    if name_end == after_kw {
        return false;
    }
    let next = skip_ws(source, name_end);
    matches!(source.as_bytes().get(next), Some(&b'=') | Some(&b'<'))
}

fn skip_type_alias(source: &str, mut pos: usize) -> Result<usize> {
    pos = skip_ws(source, skip_ident(source, pos)); // type
    pos = skip_ws(source, skip_ident(source, pos)); // name
    if source.as_bytes().get(pos) == Some(&b'<') {
        pos = skip_ws(source, skip_balanced(source, pos, b'<', b'>')?);
    }
    if source.as_bytes().get(pos) == Some(&b'=') {
        pos += 1;
    }
    pos = skip_type_expression(source, skip_ws(source, pos));
    if source.as_bytes().get(pos) == Some(&b';') {
        pos += 1;
    }
    Ok(pos)
}

fn skip_declare(source: &str, mut pos: usize) -> Result<usize> {
    pos = skip_ws(source, skip_ident(source, pos)); // declare
    if at_keyword(source, pos, "global") {
        pos = skip_ws(source, skip_ident(source, pos));
    }
    if at_keyword(source, pos, "namespace") || at_keyword(source, pos, "module") {
        return skip_namespace(source, pos);
    }
    if source.as_bytes().get(pos) == Some(&b'{') {
        return skip_balanced(source, pos, b'{', b'}');
    }
    Ok(skip_statement(source, pos))
}

fn skip_namespace(source: &str, mut pos: usize) -> Result<usize> {
    pos = skip_ws(source, skip_ident(source, pos)); // namespace | module
    while pos < source.len() && source.as_bytes()[pos] != b'{' {
        pos += 1;
    }
    skip_balanced(source, pos, b'{', b'}')
}

/// Consume a type expression up to the first delimiter at bracket depth 0.
fn skip_type_expression(source: &str, mut pos: usize) -> usize {
    let bytes = source.as_bytes();
    let mut depth = 0i32;
    let mut angle = 0i32;
    while pos < bytes.len() {
        match bytes[pos] {
            b'"' | b'\'' | b'`' => {
                pos = skip_string(source, pos);
                continue;
            }
            b'(' | b'[' => depth += 1,
            b'{' => {
                if depth == 0 && angle == 0 {
                    break;
                }
                depth += 1;
            }
            b')' | b']' | b'}' => {
                if depth == 0 && angle == 0 {
                    break;
                }
                depth -= 1;
            }
            b'<' => angle += 1,
            b'>' => {
                if angle > 0 {
                    angle -= 1;
                } else if depth == 0 {
                    break;
                }
            }
            b',' | b';' | b'=' => {
                if depth == 0 && angle == 0 {
                    break;
                }
            }
            b'\n' => {
                if depth == 0 && angle == 0 {
                    // A union/intersection may continue on the next line
                    let next = skip_ws(source, pos + 1);
                    if !matches!(bytes.get(next), Some(&b'|') | Some(&b'&')) {
                        break;
                    }
                }
            }
            _ => {}
        }
        pos += 1;
    }
    pos
}

/// `: T` only counts as an annotation after a binding, parameter list or
/// return-type position — object-literal values stay untouched.
fn is_annotation_context(source: &str, pos: usize) -> bool {
    let Some(prev) = prev_meaningful(source, pos) else {
        return false;
    };
    let prev_ok = prev.is_xid_continue()
        || prev == '$'
        || prev == ')'
        || prev == ']'
        || prev == '}'
        || prev == '?'
        || prev == '>';
    if !prev_ok {
        return false;
    }

    let bytes = source.as_bytes();
    let after = skip_ws(source, pos + 1);
    match bytes.get(after) {
        // A literal value, not a type
        Some(&b'"') | Some(&b'\'') | Some(&b'`') => false,
        Some(&b) if (b as char).is_ascii_digit() => {
            in_declaration(source, pos) && !in_object_literal(source, pos)
        }
        Some(&b'[') | Some(&b'{') => !in_object_literal(source, pos),
        Some(_) => !in_object_literal(source, pos),
        None => false,
    }
}

/// `case expr:` and `default:` keep their colon.
fn is_label_colon(source: &str, pos: usize) -> bool {
    let start = source[..pos]
        .rfind(|c: char| matches!(c, ';' | '{' | '}' | '\n' | '('))
        .map(|i| i + 1)
        .unwrap_or(0);
    let stmt = source[start..pos].trim();
    stmt.starts_with("case ") || stmt.starts_with("case(") || stmt == "default"
}

/// Rough check for `let|const|var x:` / parameter `(x:` / `, x:` context.
fn in_declaration(source: &str, pos: usize) -> bool {
    let mut i = pos;
    let bytes = source.as_bytes();
    while i > 0 {
        let c = bytes[i - 1] as char;
        if c.is_whitespace() || c.is_xid_continue() || c == '$' || c == '?' {
            i -= 1;
        } else {
            break;
        }
    }
    let head = source[..i].trim_end();
    head.ends_with("let")
        || head.ends_with("const")
        || head.ends_with("var")
        || head.ends_with('(')
        || head.ends_with(',')
}

/// Walk back for an unmatched `{` and judge whether it opens an object
/// literal (preceded by `=`, `(`, `[`, `,`, `:` or `return`).
fn in_object_literal(source: &str, pos: usize) -> bool {
    let bytes = source.as_bytes();
    let mut depth = 0;
    let mut i = pos;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                if depth > 0 {
                    depth -= 1;
                    continue;
                }
                let before = source[..i].trim_end();
                return before.ends_with('=')
                    || before.ends_with('(')
                    || before.ends_with('[')
                    || before.ends_with(',')
                    || before.ends_with(':')
                    || before.ends_with("return");
            }
            _ => {}
        }
    }
    false
}

/// Inside the brace list of an `import`/`export` statement, where `as` is
/// a binding rename rather than an assertion.
fn in_import_braces(source: &str, pos: usize) -> bool {
    let bytes = source.as_bytes();
    let mut depth = 0;
    let mut i = pos;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                if depth > 0 {
                    depth -= 1;
                    continue;
                }
                let stmt_start = source[..i]
                    .rfind(|c: char| matches!(c, ';' | '\n' | '}'))
                    .map(|b| b + 1)
                    .unwrap_or(0);
                let stmt = source[stmt_start..i].trim_start();
                return stmt.starts_with("import") || stmt.starts_with("export");
            }
            _ => {}
        }
    }
    false
}

/// `<` opens type parameters after `function f`, `class C`, or a call-ish
/// identifier whose balanced `<…>` is followed by `(`.
fn is_type_params_context(source: &str, pos: usize) -> bool {
    let Some(prev) = prev_meaningful(source, pos) else {
        return false;
    };
    if !(prev.is_xid_continue() || prev == '$') {
        return false;
    }

    // Identifier immediately before the angle bracket
    let head = source[..pos].trim_end();
    let ident_start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_xid_continue() || *c == '$')
        .map(|(i, _)| i)
        .last()
        .unwrap_or(head.len());
    let ident = &head[ident_start..];
    let before_ident = head[..ident_start].trim_end();
    if before_ident.ends_with("function")
        || before_ident.ends_with("class")
        || ident == "function"
        || ident == "class"
    {
        return true;
    }

    // Tentatively balance the brackets; `ident<…>(` reads as type args
    match try_skip_angles(source, pos) {
        Some(end) => {
            let next = skip_ws(source, end);
            source.as_bytes().get(next) == Some(&b'(')
        }
        None => false,
    }
}

fn try_skip_angles(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut pos = start + 1;
    let mut depth = 1;
    while pos < bytes.len() && depth > 0 {
        match bytes[pos] {
            b'<' => depth += 1,
            b'>' => depth -= 1,
            // Operators rule out a type parameter list
            b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'!' => return None,
            b'"' | b'\'' | b'`' => {
                pos = skip_string(source, pos);
                continue;
            }
            _ => {}
        }
        pos += 1;
    }
    (depth == 0).then_some(pos)
}

// ── enum lowering ───────────────────────────────────────────────────

fn emit_enum(out: &mut String, source: &str, mut pos: usize) -> Result<usize> {
    pos = skip_ws(source, skip_ident(source, pos)); // enum
    let name_start = pos;
    pos = skip_ident(source, pos);
    let name = &source[name_start..pos];
    pos = skip_ws(source, pos);

    let bytes = source.as_bytes();
    if bytes.get(pos) != Some(&b'{') {
        return Err(Error::transpile("<input>", "expected '{' after enum name"));
    }
    pos += 1;

    let mut members: Vec<(String, String)> = Vec::new();
    let mut next_value = 0i64;
    loop {
        pos = skip_ws(source, pos);
        if bytes.get(pos) == Some(&b'}') {
            pos += 1;
            break;
        }
        if pos >= bytes.len() {
            return Err(Error::transpile("<input>", "unterminated enum body"));
        }

        let member_start = pos;
        pos = skip_ident(source, pos);
        let member = source[member_start..pos].to_string();
        pos = skip_ws(source, pos);

        let value = if bytes.get(pos) == Some(&b'=') {
            pos = skip_ws(source, pos + 1);
            let value_start = pos;
            while pos < bytes.len() && !matches!(bytes[pos], b',' | b'}') {
                if matches!(bytes[pos], b'"' | b'\'' | b'`') {
                    pos = skip_string(source, pos);
                } else {
                    pos += 1;
                }
            }
            let text = source[value_start..pos].trim().to_string();
            if let Ok(n) = text.parse::<i64>() {
                next_value = n + 1;
            }
            text
        } else {
            let v = next_value.to_string();
            next_value += 1;
            v
        };
        members.push((member, value));

        if bytes.get(pos) == Some(&b',') {
            pos += 1;
        }
    }

    out.push_str(&format!("var {};\n(function ({}) {{\n", name, name));
    for (member, value) in &members {
        let is_string = value.starts_with('"') || value.starts_with('\'');
        if is_string {
            out.push_str(&format!("    {}[\"{}\"] = {};\n", name, member, value));
        } else {
            out.push_str(&format!(
                "    {}[{}[\"{}\"] = {}] = \"{}\";\n",
                name, name, member, value, member
            ));
        }
    }
    out.push_str(&format!("}})({} || ({} = {{}}));", name, name));
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_annotation() {
        let js = strip_types("let x: number = 42;").unwrap();
        assert!(js.contains("let x = 42;"), "got: {}", js);
        assert!(!js.contains("number"));
    }

    #[test]
    fn test_function_annotations() {
        let js = strip_types("function add(a: number, b: number): number { return a + b; }")
            .unwrap();
        assert!(js.contains("function add(a, b)"), "got: {}", js);
        assert!(js.contains("return a + b"));
    }

    #[test]
    fn test_function_generics() {
        let js = strip_types("function identity<T>(value: T): T { return value; }").unwrap();
        assert!(!js.contains("<T>"), "got: {}", js);
        assert!(js.contains("identity(value)"), "got: {}", js);
        assert!(js.contains("return value;"), "got: {}", js);
    }

    #[test]
    fn test_interface_removed() {
        let src = "interface User { name: string; age: number }\nconst u: User = { name: 'a', age: 1 };";
        let js = strip_types(src).unwrap();
        assert!(!js.contains("interface"), "got: {}", js);
        assert!(js.contains("name: 'a'"), "got: {}", js);
        assert!(js.contains("age: 1"), "got: {}", js);
    }

    #[test]
    fn test_type_alias_removed() {
        let js = strip_types("type Id = string | number;\nlet a: Id = 1;").unwrap();
        assert!(!js.contains("type Id"), "got: {}", js);
        assert!(js.contains("let a = 1;"), "got: {}", js);
    }

    #[test]
    fn test_as_assertion_removed() {
        let js = strip_types("const n = value as number;").unwrap();
        assert!(js.contains("const n = value ;") || js.contains("const n = value;"),
            "got: {}", js);
    }

    #[test]
    fn test_non_null_removed_but_not_negation() {
        let js = strip_types("const a = maybe!.field; if (a != b && !c) {}").unwrap();
        assert!(js.contains("maybe.field"), "got: {}", js);
        assert!(js.contains("a != b"), "got: {}", js);
        assert!(js.contains("!c"), "got: {}", js);
    }

    #[test]
    fn test_optional_parameter() {
        let js = strip_types("function f(a?: string, b: number = 1) {}").unwrap();
        assert!(js.contains("function f(a, b = 1)"), "got: {}", js);
    }

    #[test]
    fn test_access_modifiers() {
        let src = "class P { private name: string; public greet(): void {} }";
        let js = strip_types(src).unwrap();
        assert!(!js.contains("private"), "got: {}", js);
        assert!(!js.contains("public"), "got: {}", js);
        assert!(js.contains("greet()"), "got: {}", js);
    }

    #[test]
    fn test_enum_lowering() {
        let js = strip_types("enum Color { Red, Green = 5, Blue }").unwrap();
        assert!(js.contains("var Color;"), "got: {}", js);
        assert!(js.contains("Color[\"Red\"] = 0"), "got: {}", js);
        assert!(js.contains("Color[\"Green\"] = 5"), "got: {}", js);
        assert!(js.contains("Color[\"Blue\"] = 6"), "got: {}", js);
    }

    #[test]
    fn test_string_enum() {
        let js = strip_types("enum Dir { Up = \"up\", Down = \"down\" }").unwrap();
        assert!(js.contains("Dir[\"Up\"] = \"up\";"), "got: {}", js);
    }

    #[test]
    fn test_import_type_removed() {
        let js = strip_types("import type { Foo } from './types';\nconst x = 1;").unwrap();
        assert!(!js.contains("Foo"), "got: {}", js);
        assert!(js.contains("const x = 1;"), "got: {}", js);
    }

    #[test]
    fn test_object_literal_values_untouched() {
        let src = "const style = { color: 'red', width: 10, nested: { a: 1 } };";
        let js = strip_types(src).unwrap();
        assert_eq!(js, src);
    }

    #[test]
    fn test_strings_untouched() {
        let src = "const s = \"let x: number\"; const t = `a: ${b}`;";
        let js = strip_types(src).unwrap();
        assert_eq!(js, src);
    }

    #[test]
    fn test_ternary_untouched() {
        let src = "const r = cond ? left : right;";
        let js = strip_types(src).unwrap();
        assert!(js.contains("? left : right"), "got: {}", js);
    }

    #[test]
    fn test_declare_removed() {
        let js = strip_types("declare const window: any;\nconst y = 2;").unwrap();
        assert!(!js.contains("declare"), "got: {}", js);
        assert!(js.contains("const y = 2;"), "got: {}", js);
    }

    #[test]
    fn test_generic_call() {
        let js = strip_types("const list = makeList<string>(seed);").unwrap();
        assert!(js.contains("makeList(seed)"), "got: {}", js);
    }

    #[test]
    fn test_comparison_not_eaten() {
        let src = "if (a < b && c > d) { run(); }";
        let js = strip_types(src).unwrap();
        assert_eq!(js, src);
    }

    #[test]
    fn test_export_interface_fully_removed() {
        let src = "export interface Props { title: string }\nexport const x = 1;";
        let js = strip_types(src).unwrap();
        assert!(!js.contains("interface"), "got: {}", js);
        assert!(!js.contains("Props"), "got: {}", js);
        assert!(js.contains("export const x = 1;"), "got: {}", js);
    }

    #[test]
    fn test_import_alias_preserved() {
        let src = "import { deepEqual as eq } from 'dequal';";
        let js = strip_types(src).unwrap();
        assert_eq!(js, src);
    }

    #[test]
    fn test_switch_case_labels_preserved() {
        let src = "switch (v) { case 1: run(); break; default: halt(); }";
        let js = strip_types(src).unwrap();
        assert_eq!(js, src);
    }
}
