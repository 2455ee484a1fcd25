//! ESM → CommonJS normalization and dependency extraction
//!
//! A text-level transform that rewrites ES `import`/`export` statements
//! into `require`/`module.exports` equivalents, preserving default, named
//! and namespace semantics. Statements are handled line-wise with a
//! merge pre-pass for multi-line import lists; code inside string
//! literals on ordinary lines is never touched because rewrites anchor at
//! the start of a statement.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static RE_IMPORT_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+[^'";]*?from\s*['"]([^'"]+)['"]"#).unwrap());
static RE_IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s*['"]([^'"]+)['"]"#).unwrap());
static RE_EXPORT_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*export\s+[^'";]*?from\s*['"]([^'"]+)['"]"#).unwrap());
static RE_DYNAMIC_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

/// Rewrite every ES module form in `source` into CommonJS.
pub fn normalize_cjs_esm(source: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut tail: Vec<String> = Vec::new();
    let mut temp_counter = 0usize;

    for statement in merge_statements(source) {
        let trimmed = statement.trim_start();
        let is_import = trimmed.starts_with("import ")
            || trimmed.starts_with("import'")
            || trimmed.starts_with("import\"")
            || trimmed.starts_with("import{");
        let is_export = trimmed.starts_with("export ") || trimmed.starts_with("export{");
        if !is_import && !is_export {
            out.push(statement);
            continue;
        }
        // A line may carry several statements (`import …; export …;`)
        for segment in split_statements(&statement) {
            let seg_trimmed = segment.trim_start();
            if seg_trimmed.starts_with("import") {
                out.push(rewrite_import(&segment, &mut temp_counter));
            } else if seg_trimmed.starts_with("export") {
                rewrite_export(&segment, &mut out, &mut tail, &mut temp_counter);
            } else if !seg_trimmed.is_empty() {
                out.push(segment);
            }
        }
    }

    out.extend(tail);
    let mut code = out.join("\n");
    if source.ends_with('\n') && !code.ends_with('\n') {
        code.push('\n');
    }
    code
}

/// Unique specifiers pulled from `require(…)`, static and dynamic
/// `import` forms, and `export … from`.
pub fn extract_dependencies(code: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut deps = Vec::new();
    for re in [
        &*RE_REQUIRE,
        &*RE_IMPORT_FROM,
        &*RE_IMPORT_BARE,
        &*RE_EXPORT_FROM,
        &*RE_DYNAMIC_IMPORT,
    ] {
        for capture in re.captures_iter(code) {
            let spec = capture[1].to_string();
            if seen.insert(spec.clone()) {
                deps.push(spec);
            }
        }
    }
    deps
}

// ── statement assembly ──────────────────────────────────────────────

/// Group lines so a multi-line `import {…} from '…'` (or export list)
/// reaches the rewriters as one statement.
fn merge_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut pending = String::new();

    for line in source.lines() {
        if pending.is_empty() {
            let trimmed = line.trim_start();
            let starts_module_statement = trimmed.starts_with("import ")
                || trimmed.starts_with("import{")
                || trimmed.starts_with("export {")
                || trimmed.starts_with("export{")
                || trimmed.starts_with("export *");
            if starts_module_statement && statement_incomplete(line) {
                pending.push_str(line);
                continue;
            }
            statements.push(line.to_string());
        } else {
            pending.push(' ');
            pending.push_str(line.trim());
            if !statement_incomplete(&pending) {
                statements.push(std::mem::take(&mut pending));
            }
        }
    }
    if !pending.is_empty() {
        statements.push(pending);
    }
    statements
}

/// Split a module-statement line at depth-0 `;`, string-aware, keeping the
/// semicolon with its statement.
fn split_statements(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b';' if depth == 0 => {
                parts.push(line[start..=i].to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < line.len() {
        parts.push(line[start..].to_string());
    }
    if parts.is_empty() {
        parts.push(line.to_string());
    }
    parts
}

fn statement_incomplete(text: &str) -> bool {
    let opens = text.matches('{').count();
    let closes = text.matches('}').count();
    if opens > closes {
        return true;
    }
    let trimmed = text.trim_end();
    trimmed.ends_with(',') || trimmed.ends_with("from") || trimmed.ends_with("import")
}

// ── import rewriting ────────────────────────────────────────────────

fn rewrite_import(statement: &str, temp_counter: &mut usize) -> String {
    let indent_len = statement.len() - statement.trim_start().len();
    let indent = &statement[..indent_len];
    let body = statement.trim().trim_end_matches(';').trim();

    // Side-effect import: `import 'mod'`
    let after_kw = body["import".len()..].trim_start();
    if after_kw.starts_with('\'') || after_kw.starts_with('"') {
        let spec = read_quoted(after_kw);
        return format!("{}require('{}');", indent, spec);
    }

    let Some(from_idx) = find_from(body) else {
        // Not a static import we understand; leave untouched
        return statement.to_string();
    };
    let clause = body["import".len()..from_idx].trim();
    let spec = read_quoted(body[from_idx + "from".len()..].trim_start());

    let temp = format!("__mbx_m{}", *temp_counter);
    *temp_counter += 1;

    let mut lines = vec![format!("{}const {} = require('{}');", indent, temp, spec)];
    for part in split_import_clause(clause) {
        match part {
            ImportBinding::Namespace(name) => {
                lines.push(format!("{}const {} = {};", indent, name, temp));
            }
            ImportBinding::Default(name) => {
                lines.push(format!(
                    "{}const {} = {}.default !== undefined ? {}.default : {};",
                    indent, name, temp, temp, temp
                ));
            }
            ImportBinding::Named(items) => {
                let fields: Vec<String> = items
                    .iter()
                    .map(|(imported, local)| {
                        if imported == local {
                            imported.clone()
                        } else {
                            format!("{}: {}", imported, local)
                        }
                    })
                    .collect();
                lines.push(format!(
                    "{}const {{ {} }} = {};",
                    indent,
                    fields.join(", "),
                    temp
                ));
            }
        }
    }
    lines.join("\n")
}

enum ImportBinding {
    Default(String),
    Namespace(String),
    Named(Vec<(String, String)>),
}

fn split_import_clause(clause: &str) -> Vec<ImportBinding> {
    let mut bindings = Vec::new();
    let mut rest = clause.trim();

    while !rest.is_empty() {
        if let Some(star) = rest.strip_prefix('*') {
            let after_as = star.trim_start().strip_prefix("as").unwrap_or(star);
            let name = leading_ident(after_as.trim_start());
            if !name.is_empty() {
                bindings.push(ImportBinding::Namespace(name.to_string()));
            }
            rest = skip_past_binding(after_as);
        } else if let Some(brace) = rest.strip_prefix('{') {
            let close = brace.find('}').unwrap_or(brace.len());
            let items = brace[..close]
                .split(',')
                .filter_map(parse_named_item)
                .collect::<Vec<_>>();
            if !items.is_empty() {
                bindings.push(ImportBinding::Named(items));
            }
            rest = brace[close..].trim_start_matches('}').trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        } else {
            let name = leading_ident(rest);
            if name.is_empty() {
                break;
            }
            bindings.push(ImportBinding::Default(name.to_string()));
            rest = rest[name.len()..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }
    }
    bindings
}

fn parse_named_item(item: &str) -> Option<(String, String)> {
    let item = item.trim();
    if item.is_empty() {
        return None;
    }
    match item.split_once(" as ") {
        Some((imported, local)) => Some((imported.trim().to_string(), local.trim().to_string())),
        None => Some((item.to_string(), item.to_string())),
    }
}

fn skip_past_binding(rest: &str) -> &str {
    let rest = rest.trim_start();
    let name = leading_ident(rest);
    let rest = rest[name.len()..].trim_start();
    rest.strip_prefix(',').unwrap_or(rest).trim_start()
}

// ── export rewriting ────────────────────────────────────────────────

fn rewrite_export(
    statement: &str,
    out: &mut Vec<String>,
    tail: &mut Vec<String>,
    temp_counter: &mut usize,
) {
    let indent_len = statement.len() - statement.trim_start().len();
    let indent = statement[..indent_len].to_string();
    let trimmed = statement.trim_start();
    let body = trimmed.strip_prefix("export").unwrap_or(trimmed).trim_start();

    // export * from 'mod'
    if body.starts_with('*') {
        if let Some(from_idx) = find_from(trimmed) {
            let spec = read_quoted(trimmed[from_idx + "from".len()..].trim_start());
            out.push(format!(
                "{}Object.assign(module.exports, require('{}'));",
                indent, spec
            ));
            return;
        }
    }

    // export default …
    if let Some(value) = body.strip_prefix("default") {
        if value.starts_with(char::is_whitespace) || value.starts_with('{') || value.starts_with('(')
        {
            out.push(format!(
                "{}module.exports.default ={}",
                indent,
                restore_tail(statement, "default")
            ));
            return;
        }
    }

    // export { a, b as c } [from 'mod']
    if body.starts_with('{') {
        let close = body.find('}').unwrap_or(body.len());
        let items: Vec<(String, String)> = body[1..close]
            .split(',')
            .filter_map(parse_named_item)
            .collect();
        if let Some(from_idx) = find_from(body) {
            let spec = read_quoted(body[from_idx + "from".len()..].trim_start());
            let temp = format!("__mbx_m{}", *temp_counter);
            *temp_counter += 1;
            out.push(format!("{}const {} = require('{}');", indent, temp, spec));
            for (local, exported) in &items {
                out.push(format!(
                    "{}module.exports.{} = {}.{};",
                    indent, exported, temp, local
                ));
            }
        } else {
            for (local, exported) in &items {
                out.push(format!("{}module.exports.{} = {};", indent, exported, local));
            }
        }
        return;
    }

    // export const|let|var / function / class declarations
    for keyword in ["const", "let", "var", "async function", "function", "class"] {
        if body.starts_with(keyword) {
            let after = &body[keyword.len()..];
            if !after.starts_with(char::is_whitespace) && !after.starts_with('*') {
                continue;
            }
            out.push(format!("{}{}", indent, body));
            for name in declared_names(keyword, after) {
                tail.push(format!("module.exports.{} = {};", name, name));
            }
            return;
        }
    }

    // Unrecognized export shape: pass through unchanged
    out.push(statement.to_string());
}

/// Everything after the `export default` prefix, preserving spacing.
fn restore_tail<'a>(statement: &'a str, marker: &str) -> &'a str {
    let idx = statement.find(marker).map(|i| i + marker.len()).unwrap_or(0);
    &statement[idx..]
}

/// Binding names introduced by an exported declaration's first line.
fn declared_names(keyword: &str, after: &str) -> Vec<String> {
    let after = after.trim_start().trim_start_matches('*').trim_start();
    if keyword == "function" || keyword == "async function" || keyword == "class" {
        let name = leading_ident(after);
        return if name.is_empty() {
            Vec::new()
        } else {
            vec![name.to_string()]
        };
    }

    // const/let/var: top-level declarators, destructuring included
    let mut names = Vec::new();
    for declarator in split_top_level(after) {
        let declarator = declarator.trim();
        if let Some(inner) = declarator.strip_prefix('{') {
            let close = inner.find('}').unwrap_or(inner.len());
            for item in inner[..close].split(',') {
                // `{ a, b: local }` binds the right-hand name
                let binding = item.rsplit(':').next().unwrap_or(item).trim();
                let name = leading_ident(binding);
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        } else if let Some(inner) = declarator.strip_prefix('[') {
            let close = inner.find(']').unwrap_or(inner.len());
            for item in inner[..close].split(',') {
                let name = leading_ident(item.trim());
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        } else {
            let name = leading_ident(declarator);
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Split `a = f(1, 2), b = 3` into declarators at depth-0 commas.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b',' if depth == 0 => {
                parts.push(text[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[start..].to_string());
    parts
}

// ── small text helpers ──────────────────────────────────────────────

/// Index of the ` from ` keyword outside any braces.
fn find_from(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b'f' if depth == 0
                && text[i..].starts_with("from")
                && i > 0
                && (bytes[i - 1] as char).is_whitespace() =>
            {
                let after = i + 4;
                if after >= bytes.len() || !(bytes[after] as char).is_alphanumeric() {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn read_quoted(text: &str) -> String {
    let text = text.trim_start();
    let Some(quote) = text.chars().next().filter(|c| *c == '\'' || *c == '"') else {
        return String::new();
    };
    text[1..]
        .split(quote)
        .next()
        .unwrap_or_default()
        .to_string()
}

fn leading_ident(text: &str) -> &str {
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}
