//! JSX lowering
//!
//! Rewrites JSX elements into `React.createElement` calls: tags starting
//! with a lower-case letter become string tags, capitalized (or dotted)
//! names stay identifier expressions, `<>…</>` fragments use
//! `React.Fragment`. Expression containers are lowered recursively so
//! nested JSX inside callbacks works.

use crate::error::{Error, Result};
use unicode_xid::UnicodeXID;

/// Lower every JSX element in `source` to plain ES2020 calls.
pub fn lower_jsx(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'"' | b'\'' | b'`' => {
                let start = pos;
                pos = skip_string(source, pos);
                out.push_str(&source[start..pos]);
            }
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                let start = pos;
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
                out.push_str(&source[start..pos]);
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                let start = pos;
                pos += 2;
                while pos + 1 < bytes.len() && !(bytes[pos] == b'*' && bytes[pos + 1] == b'/') {
                    pos += 1;
                }
                pos = (pos + 2).min(bytes.len());
                out.push_str(&source[start..pos]);
            }
            b'<' if opens_jsx(source, pos) => {
                let (expr, next) = parse_element(source, pos)?;
                out.push_str(&expr);
                pos = next;
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('\0');
                out.push(ch);
                pos += ch.len_utf8();
            }
        }
    }
    Ok(out)
}

/// A `<` begins JSX only in expression position and only when followed by
/// a tag name or `>` (fragment).
fn opens_jsx(source: &str, pos: usize) -> bool {
    let next = match source[pos + 1..].chars().next() {
        Some(c) => c,
        None => return false,
    };
    if !(next.is_xid_start() || next == '>' || next == '_' || next == '$') {
        return false;
    }

    let head = source[..pos].trim_end();
    if head.is_empty() || head.ends_with("=>") || head.ends_with("return") {
        return true;
    }
    matches!(
        head.chars().next_back(),
        Some('(' | ',' | '=' | '?' | ':' | '[' | '{' | ';' | '&' | '|' | '!')
    )
}

fn parse_element(source: &str, start: usize) -> Result<(String, usize)> {
    let bytes = source.as_bytes();
    let mut pos = start + 1; // past '<'

    // Fragment: <>children</>
    if bytes.get(pos) == Some(&b'>') {
        let (children, end) = parse_children(source, pos + 1, "")?;
        return Ok((build_call("React.Fragment", "null", &children), end));
    }

    let name_start = pos;
    pos = skip_tag_name(source, pos);
    let tag = &source[name_start..pos];
    if tag.is_empty() {
        return Err(Error::transpile("<input>", "expected JSX tag name"));
    }
    let tag_expr = tag_expression(tag);

    let mut props: Vec<String> = Vec::new();
    loop {
        pos = skip_ws(source, pos);
        match bytes.get(pos) {
            Some(&b'/') if bytes.get(pos + 1) == Some(&b'>') => {
                // Self-closing
                let props_expr = build_props(&props);
                return Ok((build_call(&tag_expr, &props_expr, &[]), pos + 2));
            }
            Some(&b'>') => {
                let (children, end) = parse_children(source, pos + 1, tag)?;
                let props_expr = build_props(&props);
                return Ok((build_call(&tag_expr, &props_expr, &children), end));
            }
            Some(&b'{') => {
                // Spread attribute {...expr}
                let end = skip_braces(source, pos)?;
                let inner = source[pos + 1..end - 1].trim();
                props.push(lower_jsx(inner)?);
                pos = end;
            }
            Some(_) => {
                let (prop, next) = parse_attribute(source, pos)?;
                props.push(prop);
                pos = next;
            }
            None => {
                return Err(Error::transpile("<input>", "unterminated JSX element"));
            }
        }
    }
}

fn parse_attribute(source: &str, mut pos: usize) -> Result<(String, usize)> {
    let bytes = source.as_bytes();
    let name_start = pos;
    while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_alphanumeric() || c == '_' || c == '$' || c == '-' {
            pos += 1;
        } else {
            break;
        }
    }
    let name = &source[name_start..pos];
    if name.is_empty() {
        return Err(Error::transpile("<input>", "expected JSX attribute name"));
    }
    let key = prop_key(name);

    pos = skip_ws(source, pos);
    if bytes.get(pos) != Some(&b'=') {
        // Bare attribute: truthy flag
        return Ok((format!("{}: true", key), pos));
    }
    pos = skip_ws(source, pos + 1);

    match bytes.get(pos) {
        Some(&b'"') | Some(&b'\'') => {
            let end = skip_string(source, pos);
            Ok((format!("{}: {}", key, &source[pos..end]), end))
        }
        Some(&b'{') => {
            let end = skip_braces(source, pos)?;
            let inner = source[pos + 1..end - 1].trim();
            Ok((format!("{}: {}", key, lower_jsx(inner)?), end))
        }
        _ => Err(Error::transpile(
            "<input>",
            format!("bad value for JSX attribute '{}'", name),
        )),
    }
}

fn parse_children(source: &str, mut pos: usize, tag: &str) -> Result<(Vec<String>, usize)> {
    let bytes = source.as_bytes();
    let mut children = Vec::new();
    let mut text = String::new();

    loop {
        if pos >= bytes.len() {
            return Err(Error::transpile(
                "<input>",
                format!("unterminated JSX children of <{}>", tag),
            ));
        }
        match bytes[pos] {
            b'<' if bytes.get(pos + 1) == Some(&b'/') => {
                flush_text(&mut children, &mut text);
                // Closing tag: consume `</name>` loosely
                pos += 2;
                pos = skip_tag_name(source, pos);
                pos = skip_ws(source, pos);
                if bytes.get(pos) != Some(&b'>') {
                    return Err(Error::transpile(
                        "<input>",
                        format!("malformed closing tag for <{}>", tag),
                    ));
                }
                return Ok((children, pos + 1));
            }
            b'<' => {
                flush_text(&mut children, &mut text);
                let (expr, next) = parse_element(source, pos)?;
                children.push(expr);
                pos = next;
            }
            b'{' => {
                flush_text(&mut children, &mut text);
                let end = skip_braces(source, pos)?;
                let inner = source[pos + 1..end - 1].trim();
                // {/* comment */} and empty containers contribute nothing
                if !inner.is_empty() && !inner.starts_with("/*") {
                    children.push(lower_jsx(inner)?);
                }
                pos = end;
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('\0');
                text.push(ch);
                pos += ch.len_utf8();
            }
        }
    }
}

fn flush_text(children: &mut Vec<String>, text: &mut String) {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        children.push(js_string(&collapsed));
    }
    text.clear();
}

// ── builders ────────────────────────────────────────────────────────

fn tag_expression(tag: &str) -> String {
    let first = tag.chars().next().unwrap_or('a');
    if first.is_uppercase() || tag.contains('.') {
        tag.to_string()
    } else {
        js_string(tag)
    }
}

fn build_props(props: &[String]) -> String {
    if props.is_empty() {
        "null".to_string()
    } else {
        format!("{{ {} }}", props.join(", "))
    }
}

fn build_call(tag_expr: &str, props_expr: &str, children: &[String]) -> String {
    if children.is_empty() {
        format!("React.createElement({}, {})", tag_expr, props_expr)
    } else {
        format!(
            "React.createElement({}, {}, {})",
            tag_expr,
            props_expr,
            children.join(", ")
        )
    }
}

fn prop_key(name: &str) -> String {
    let plain_ident = name
        .chars()
        .enumerate()
        .all(|(i, c)| if i == 0 { c.is_xid_start() || c == '_' || c == '$' } else { c.is_xid_continue() || c == '$' });
    if plain_ident {
        name.to_string()
    } else {
        js_string(name)
    }
}

fn js_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── cursor helpers ──────────────────────────────────────────────────

fn skip_ws(source: &str, mut pos: usize) -> usize {
    let bytes = source.as_bytes();
    while pos < bytes.len() && (bytes[pos] as char).is_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_tag_name(source: &str, mut pos: usize) -> usize {
    for ch in source[pos..].chars() {
        if ch.is_xid_continue() || ch == '$' || ch == '.' || ch == '-' {
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
            b if b == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    pos
}

/// Balanced `{…}` respecting strings; returns the index past the close.
fn skip_braces(source: &str, start: usize) -> Result<usize> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let mut depth = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'"' | b'\'' | b'`' => {
                pos = skip_string(source, pos);
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(pos + 1);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    Err(Error::transpile("<input>", "unbalanced '{' in JSX"))
}
