//! Symbol extraction contract.
//!
//! Language-specific AST parsers are external collaborators; the index
//! pipeline only sees this trait. [`BasicExtractor`] is a line/regex
//! extractor covering common declaration forms, good enough for plain
//! indexing and tests.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::types::Edge;
use crate::types::Symbol;
use crate::types::SymbolKind;
use crate::types::content_hash;
use crate::types::detect_language;
use crate::types::now_unix;

/// Parses one file into symbols with deterministic ids and contiguous line
/// ranges.
pub trait SymbolExtractor: Send + Sync {
    /// Extract all symbols from one file. Ids must be deterministic for
    /// unchanged input.
    fn extract_from_file(
        &self,
        path: &Path,
        content: &str,
        branch: &str,
        is_external: bool,
    ) -> Result<Vec<Symbol>>;

    /// Language for a path, `None` when unrecognized.
    fn language(&self, path: &Path) -> Option<String> {
        detect_language(path)
    }
}

/// Infers import/call edges between extracted symbols.
///
/// The real resolver is an external collaborator; the manager accepts any
/// implementation and persists whatever it returns.
pub trait EdgeExtractor: Send + Sync {
    fn extract_edges(
        &self,
        path: &Path,
        content: &str,
        symbols: &HashMap<String, Symbol>,
        branch: &str,
    ) -> Vec<Edge>;
}

struct DeclPattern {
    regex: &'static Lazy<Regex>,
    kind: SymbolKind,
}

static FN_TS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)").unwrap());
static CLASS_TS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap());
static INTERFACE_TS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?interface\s+(\w+)").unwrap());
static TYPE_TS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?type\s+(\w+)\s*=").unwrap());
static DEF_PY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:async\s+)?def\s+(\w+)").unwrap());
static CLASS_PY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*class\s+(\w+)").unwrap());
static FN_RS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)").unwrap());
static STRUCT_RS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)").unwrap());
static TRAIT_RS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)").unwrap());
static FN_GO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s+(?:\([^)]*\)\s*)?(\w+)").unwrap());
static TYPE_GO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^type\s+(\w+)").unwrap());

fn patterns_for(language: &str) -> &'static [DeclPattern] {
    static TS: Lazy<Vec<DeclPattern>> = Lazy::new(|| {
        vec![
            DeclPattern { regex: &FN_TS, kind: SymbolKind::Function },
            DeclPattern { regex: &CLASS_TS, kind: SymbolKind::Class },
            DeclPattern { regex: &INTERFACE_TS, kind: SymbolKind::Interface },
            DeclPattern { regex: &TYPE_TS, kind: SymbolKind::TypeAlias },
        ]
    });
    static PY: Lazy<Vec<DeclPattern>> = Lazy::new(|| {
        vec![
            DeclPattern { regex: &DEF_PY, kind: SymbolKind::Function },
            DeclPattern { regex: &CLASS_PY, kind: SymbolKind::Class },
        ]
    });
    static RS: Lazy<Vec<DeclPattern>> = Lazy::new(|| {
        vec![
            DeclPattern { regex: &FN_RS, kind: SymbolKind::Function },
            DeclPattern { regex: &STRUCT_RS, kind: SymbolKind::Struct },
            DeclPattern { regex: &TRAIT_RS, kind: SymbolKind::Trait },
        ]
    });
    static GO: Lazy<Vec<DeclPattern>> = Lazy::new(|| {
        vec![
            DeclPattern { regex: &FN_GO, kind: SymbolKind::Function },
            DeclPattern { regex: &TYPE_GO, kind: SymbolKind::Struct },
        ]
    });
    static NONE: Lazy<Vec<DeclPattern>> = Lazy::new(Vec::new);

    match language {
        "typescript" => TS.as_slice(),
        "python" => PY.as_slice(),
        "rust" => RS.as_slice(),
        "go" => GO.as_slice(),
        _ => NONE.as_slice(),
    }
}

/// Regex-based declaration extractor.
///
/// Each matched declaration opens a symbol; its range extends to the line
/// before the next declaration (or end of file), keeping ranges contiguous
/// and deterministic.
#[derive(Debug, Default)]
pub struct BasicExtractor;

impl BasicExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolExtractor for BasicExtractor {
    fn extract_from_file(
        &self,
        path: &Path,
        content: &str,
        branch: &str,
        is_external: bool,
    ) -> Result<Vec<Symbol>> {
        let Some(language) = self.language(path) else {
            return Ok(Vec::new());
        };
        let patterns = patterns_for(&language);
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let file_path = path.to_string_lossy().to_string();
        let lines: Vec<&str> = content.lines().collect();
        let now = now_unix();

        // First pass: declaration starts.
        let mut decls: Vec<(usize, String, SymbolKind)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            for pattern in patterns {
                if let Some(captures) = pattern.regex.captures(line) {
                    decls.push((idx, captures[1].to_string(), pattern.kind));
                    break;
                }
            }
        }

        // Second pass: ranges run to the next declaration.
        let mut symbols = Vec::with_capacity(decls.len());
        for (i, (start_idx, name, kind)) in decls.iter().enumerate() {
            let end_idx = decls
                .get(i + 1)
                .map(|(next, _, _)| next.saturating_sub(1))
                .unwrap_or(lines.len().saturating_sub(1));
            let start_line = (*start_idx + 1) as i32;
            let end_line = (end_idx.max(*start_idx) + 1) as i32;
            let slice = lines[*start_idx..=end_idx.max(*start_idx)].join("\n");

            symbols.push(Symbol {
                id: Symbol::compute_id(name, &file_path, start_line),
                name: name.clone(),
                qualified_name: name.clone(),
                kind: *kind,
                language: language.clone(),
                file_path: file_path.clone(),
                start_line,
                end_line,
                signature: Some(lines[*start_idx].trim().to_string()),
                docstring: None,
                content_hash: content_hash(&slice),
                content: slice,
                is_external,
                branch: branch.to_string(),
                updated_at: now,
                revision_id: None,
                embedding_model_id: None,
            });
        }

        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_typescript_declarations() {
        let content = "export function login(user) {\n  return user;\n}\n\nclass Session {\n  create() {}\n}\n";
        let symbols = BasicExtractor::new()
            .extract_from_file(Path::new("src/auth.ts"), content, "main", false)
            .unwrap();

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "login");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert_eq!(symbols[0].start_line, 1);
        assert_eq!(symbols[1].name, "Session");
        assert_eq!(symbols[1].kind, SymbolKind::Class);
        // Ranges are contiguous: first symbol ends where the next begins.
        assert_eq!(symbols[0].end_line + 1, symbols[1].start_line);
    }

    #[test]
    fn extracts_python_declarations() {
        let content = "class User:\n    pass\n\ndef make_user(name):\n    return User()\n";
        let symbols = BasicExtractor::new()
            .extract_from_file(Path::new("models.py"), content, "main", false)
            .unwrap();

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].kind, SymbolKind::Class);
        assert_eq!(symbols[1].name, "make_user");
    }

    #[test]
    fn deterministic_ids() {
        let content = "def f():\n    pass\n";
        let a = BasicExtractor::new()
            .extract_from_file(Path::new("a.py"), content, "main", false)
            .unwrap();
        let b = BasicExtractor::new()
            .extract_from_file(Path::new("a.py"), content, "main", false)
            .unwrap();
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn unrecognized_extension_yields_nothing() {
        let symbols = BasicExtractor::new()
            .extract_from_file(Path::new("README.md"), "def f():", "main", false)
            .unwrap();
        assert!(symbols.is_empty());
    }

    #[test]
    fn external_flag_propagates() {
        let symbols = BasicExtractor::new()
            .extract_from_file(
                Path::new("node_modules/lib/index.ts"),
                "function vendored() {}\n",
                "main",
                true,
            )
            .unwrap();
        assert!(symbols[0].is_external);
    }
}
