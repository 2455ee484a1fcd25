//! Source transforms
//!
//! Turns TypeScript/JSX sources into executable CommonJS: type stripping,
//! JSX lowering, ESM→CJS normalization and static dependency extraction.
//! The pipeline itself is pure; `pool` runs it off-thread with deadlines.

pub mod jsx;
pub mod normalize;
pub mod pool;
pub mod strip;

pub use pool::TranspilerPool;

use crate::error::Result;
use crate::vfs::path as vpath;

/// One unit of work for the transpiler
#[derive(Debug, Clone)]
pub struct TranspileRequest {
    pub code: String,
    pub file_path: String,
    pub is_typescript: bool,
    pub is_jsx: bool,
}

impl TranspileRequest {
    /// Request with transform flags inferred from the file extension.
    pub fn for_file(file_path: &str, code: &str) -> Self {
        let (is_typescript, is_jsx) = flags_for_path(file_path);
        Self {
            code: code.to_string(),
            file_path: file_path.to_string(),
            is_typescript,
            is_jsx,
        }
    }
}

/// Transform result: executable CJS plus its static specifiers
#[derive(Debug, Clone)]
pub struct TranspileOutput {
    pub code: String,
    pub dependencies: Vec<String>,
}

/// `(is_typescript, is_jsx)` for a path, by extension.
pub fn flags_for_path(file_path: &str) -> (bool, bool) {
    match vpath::extname(file_path).as_str() {
        ".ts" => (true, false),
        ".tsx" => (true, true),
        ".jsx" => (false, true),
        _ => (false, false),
    }
}

/// Whether the file needs any transform before evaluation.
pub fn needs_transpile(file_path: &str, code: &str) -> bool {
    let (is_typescript, is_jsx) = flags_for_path(file_path);
    is_typescript || is_jsx || looks_like_esm(code)
}

/// Statement-position `import`/`export` marks a source as ESM.
pub fn looks_like_esm(code: &str) -> bool {
    code.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("import ")
            || trimmed.starts_with("import{")
            || trimmed.starts_with("import'")
            || trimmed.starts_with("import\"")
            || trimmed.starts_with("export ")
            || trimmed.starts_with("export{")
    })
}

/// The full synchronous pipeline: strip types, lower JSX, normalize module
/// syntax, extract dependencies.
pub fn transform(request: &TranspileRequest) -> Result<TranspileOutput> {
    let mut code = request.code.clone();
    if request.is_typescript {
        code = strip::strip_types(&code)
            .map_err(|e| attach_file(e, &request.file_path))?;
    }
    if request.is_jsx {
        code = jsx::lower_jsx(&code).map_err(|e| attach_file(e, &request.file_path))?;
    }
    code = normalize::normalize_cjs_esm(&code);
    let dependencies = normalize::extract_dependencies(&code);
    Ok(TranspileOutput { code, dependencies })
}

fn attach_file(err: crate::error::Error, file_path: &str) -> crate::error::Error {
    match err {
        crate::error::Error::TranspileError { message, .. } => {
            crate::error::Error::transpile(file_path, message)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_for_path() {
        assert_eq!(flags_for_path("/a.ts"), (true, false));
        assert_eq!(flags_for_path("/a.tsx"), (true, true));
        assert_eq!(flags_for_path("/a.jsx"), (false, true));
        assert_eq!(flags_for_path("/a.js"), (false, false));
    }

    #[test]
    fn test_looks_like_esm() {
        assert!(looks_like_esm("import x from 'y';"));
        assert!(looks_like_esm("export const a = 1;"));
        assert!(!looks_like_esm("const s = 'import fake';\nmodule.exports = s;"));
    }

    #[test]
    fn test_tsx_pipeline_end_to_end() {
        let request = TranspileRequest {
            code: "import React, {useState} from 'react'; export const F = () => <div/>;"
                .to_string(),
            file_path: "/components/F.tsx".to_string(),
            is_typescript: true,
            is_jsx: true,
        };
        let output = transform(&request).unwrap();
        assert!(!output.code.contains('<'), "got: {}", output.code);
        assert!(output.code.contains("React.createElement(\"div\", null)"));
        assert!(output.code.contains("const { useState }"), "got: {}", output.code);
        assert!(output.code.contains("module.exports.F = F;"));
        assert!(output.dependencies.contains(&"react".to_string()));
    }

    #[test]
    fn test_plain_cjs_passthrough() {
        let request = TranspileRequest::for_file("/index.js", "module.exports = 1;");
        let output = transform(&request).unwrap();
        assert_eq!(output.code, "module.exports = 1;");
        assert!(output.dependencies.is_empty());
    }
}
