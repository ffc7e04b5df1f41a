//! Query rewriting: synonym expansion, file pattern extraction, language
//! hints.
//!
//! `rewrite` is a pure function; `original` is always byte-identical to the
//! input and `expanded` equals `original` whenever no synonym applies.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Outcome of rewriting one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteResult {
    /// The input, verbatim.
    pub original: String,
    /// FTS match expression with `OR` groups, or `original` when nothing
    /// expanded.
    pub expanded: String,
    /// Extracted glob patterns (keyword table + explicit filenames).
    pub file_patterns: Vec<String>,
    /// Languages hinted at by the query.
    pub languages: Vec<String>,
    /// Lower-cased terms of length >= 3.
    pub terms: Vec<String>,
    /// Synonyms applied per term.
    pub expansions: HashMap<String, Vec<String>>,
}

/// Code-synonym table: actions, data-structure words, common nouns.
static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        // Actions
        ("create", &["add", "new", "insert", "make"]),
        ("add", &["create", "insert", "append"]),
        ("delete", &["remove", "drop", "destroy"]),
        ("remove", &["delete", "drop", "unlink"]),
        ("get", &["fetch", "retrieve", "find"]),
        ("fetch", &["get", "retrieve", "load"]),
        ("update", &["modify", "change", "edit"]),
        ("find", &["search", "locate", "lookup"]),
        ("search", &["find", "query", "lookup"]),
        ("send", &["emit", "dispatch", "publish"]),
        ("read", &["load", "parse", "decode"]),
        ("write", &["save", "store", "persist"]),
        ("save", &["store", "persist", "write"]),
        ("run", &["execute", "start", "launch"]),
        ("init", &["initialize", "setup", "bootstrap"]),
        ("check", &["validate", "verify", "assert"]),
        ("handle", &["process", "manage", "dispatch"]),
        ("parse", &["decode", "read", "tokenize"]),
        // Data-structure words
        ("list", &["array", "vector", "collection"]),
        ("array", &["list", "vector", "slice"]),
        ("map", &["dictionary", "hashmap", "record"]),
        ("dict", &["map", "dictionary", "hashmap"]),
        ("string", &["str", "text"]),
        ("queue", &["deque", "buffer", "channel"]),
        ("cache", &["store", "memo", "buffer"]),
        // Common nouns
        ("error", &["err", "exception", "failure"]),
        ("function", &["method", "func", "procedure"]),
        ("class", &["type", "struct", "object"]),
        ("user", &["account", "member", "profile"]),
        ("auth", &["authentication", "login", "session"]),
        ("login", &["auth", "signin", "session"]),
        ("config", &["configuration", "settings", "options"]),
        ("database", &["db", "storage", "store"]),
        ("request", &["req", "call", "query"]),
        ("response", &["res", "reply", "result"]),
        ("test", &["spec", "check", "assert"]),
        ("server", &["service", "backend", "daemon"]),
        ("client", &["frontend", "consumer", "caller"]),
    ];
    entries.iter().copied().collect()
});

/// Keyword -> glob table for file pattern extraction.
static KEYWORD_GLOBS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let entries: &[(&str, &str)] = &[
        ("test", "**/*test*"),
        ("tests", "**/*test*"),
        ("spec", "**/*spec*"),
        ("config", "**/*config*"),
        ("types", "**/types/**"),
        ("schema", "**/*schema*"),
        ("migration", "**/migrations/**"),
        ("migrations", "**/migrations/**"),
        ("component", "**/components/**"),
        ("components", "**/components/**"),
        ("hook", "**/hooks/**"),
        ("hooks", "**/hooks/**"),
        ("util", "**/utils/**"),
        ("utils", "**/utils/**"),
        ("model", "**/models/**"),
        ("models", "**/models/**"),
        ("route", "**/routes/**"),
        ("routes", "**/routes/**"),
        ("style", "**/*.css"),
        ("styles", "**/*.css"),
        ("readme", "**/README*"),
    ];
    entries.iter().copied().collect()
});

/// Keywords whose glob extraction is suppressed in bare-text queries: they
/// are too common as plain English to imply a path filter on their own.
static BARE_TEXT_EXCLUSIONS: &[&str] = &[
    "test", "tests", "config", "types", "model", "models", "util", "utils",
];

/// Language hint keywords.
static LANGUAGE_HINTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let entries: &[(&str, &str)] = &[
        ("typescript", "typescript"),
        ("javascript", "typescript"),
        ("tsx", "typescript"),
        ("python", "python"),
        ("rust", "rust"),
        ("golang", "go"),
        ("java", "java"),
        ("ruby", "ruby"),
        ("kotlin", "kotlin"),
        ("swift", "swift"),
    ];
    entries.iter().copied().collect()
});

/// Language -> glob used when a language hint is present.
static LANGUAGE_GLOBS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let entries: &[(&str, &str)] = &[
        ("typescript", "**/*.{ts,tsx,js,jsx}"),
        ("python", "**/*.py"),
        ("rust", "**/*.rs"),
        ("go", "**/*.go"),
        ("java", "**/*.java"),
        ("ruby", "**/*.rb"),
        ("kotlin", "**/*.kt"),
        ("swift", "**/*.swift"),
    ];
    entries.iter().copied().collect()
});

/// Explicit filename mention, e.g. `session.ts` or `src/auth/login.py`.
static EXPLICIT_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([\w./-]+\.(?:ts|tsx|js|jsx|mjs|cjs|py|pyw|rs|go|java|rb|php|cs|c|h|cpp|kt|swift))\b")
        .unwrap()
});

/// Synonym-expanding, pattern-extracting query rewriter.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    /// Synonyms appended per term.
    pub max_synonyms: usize,
    /// When false, `expanded` always equals `original`.
    pub enable_expansion: bool,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self {
            max_synonyms: 3,
            enable_expansion: true,
        }
    }
}

impl QueryRewriter {
    pub fn new(max_synonyms: usize) -> Self {
        Self {
            max_synonyms,
            ..Self::default()
        }
    }

    /// Rewrite one query.
    pub fn rewrite(&self, query: &str) -> RewriteResult {
        let tokens = tokenize(query);
        let terms: Vec<String> = tokens.iter().filter(|t| t.len() >= 3).cloned().collect();

        // Synonym expansion over terms.
        let mut expansions: HashMap<String, Vec<String>> = HashMap::new();
        if self.enable_expansion {
            for term in &terms {
                if let Some(synonyms) = SYNONYMS.get(term.as_str()) {
                    let picked: Vec<String> = synonyms
                        .iter()
                        .take(self.max_synonyms)
                        .map(|s| s.to_string())
                        .collect();
                    if !picked.is_empty() {
                        expansions.insert(term.clone(), picked);
                    }
                }
            }
        }

        let expanded = if expansions.is_empty() {
            query.to_string()
        } else {
            tokens
                .iter()
                .map(|token| match expansions.get(token.as_str()) {
                    Some(synonyms) => {
                        let mut group = vec![format!("\"{token}\"")];
                        group.extend(synonyms.iter().map(|s| format!("\"{s}\"")));
                        format!("({})", group.join(" OR "))
                    }
                    None => format!("(\"{token}\")"),
                })
                .collect::<Vec<_>>()
                .join(" ")
        };

        // Explicit filename mentions always win.
        let mut file_patterns = Vec::new();
        let mut has_explicit_file = false;
        for captures in EXPLICIT_FILE.captures_iter(query) {
            has_explicit_file = true;
            let name = &captures[1];
            let pattern = if name.contains('/') {
                format!("**/{}", name.trim_start_matches("./"))
            } else {
                format!("**/{name}")
            };
            push_unique(&mut file_patterns, pattern);
        }

        // Keyword-derived globs, suppressed for excluded keywords when the
        // query is bare text (no path syntax anywhere).
        let has_path_syntax = has_explicit_file || query.contains('/');
        for term in &tokens {
            if let Some(glob) = KEYWORD_GLOBS.get(term.as_str()) {
                if !has_path_syntax && BARE_TEXT_EXCLUSIONS.contains(&term.as_str()) {
                    continue;
                }
                push_unique(&mut file_patterns, glob.to_string());
            }
        }

        // Language hints.
        let mut languages = Vec::new();
        for term in &tokens {
            if let Some(language) = LANGUAGE_HINTS.get(term.as_str()) {
                push_unique(&mut languages, language.to_string());
                if let Some(glob) = LANGUAGE_GLOBS.get(language) {
                    push_unique(&mut file_patterns, glob.to_string());
                }
            }
        }

        RewriteResult {
            original: query.to_string(),
            expanded,
            file_patterns,
            languages,
            terms,
            expansions,
        }
    }
}

fn tokenize(query: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
    {
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rewrite(query: &str) -> RewriteResult {
        QueryRewriter::default().rewrite(query)
    }

    #[test]
    fn original_is_verbatim() {
        let query = "  Create User Session  ";
        assert_eq!(rewrite(query).original, query);
    }

    #[test]
    fn rewrite_is_a_fixed_point_on_original() {
        let query = "create user session";
        let first = rewrite(query);
        let second = rewrite(&first.original);
        assert_eq!(first, second);
    }

    #[test]
    fn expanded_equals_original_without_expansions() {
        let result = rewrite("frobnicate widget");
        assert_eq!(result.expanded, result.original);
        assert!(result.expansions.is_empty());
    }

    #[test]
    fn expansion_disabled_keeps_original() {
        let rewriter = QueryRewriter {
            enable_expansion: false,
            ..QueryRewriter::default()
        };
        let result = rewriter.rewrite("create user");
        assert_eq!(result.expanded, "create user");
    }

    #[test]
    fn synonyms_become_or_groups() {
        let result = rewrite("create user");
        assert!(result.expanded.contains("(\"create\" OR \"add\" OR \"new\" OR \"insert\")"));
        assert!(result.expanded.contains("(\"user\" OR \"account\""));
        assert_eq!(result.expansions["create"].len(), 3);
    }

    #[test]
    fn synonym_cap_respected() {
        let rewriter = QueryRewriter::new(1);
        let result = rewriter.rewrite("create");
        assert_eq!(result.expanded, "(\"create\" OR \"add\")");
    }

    #[test]
    fn short_tokens_survive_expansion() {
        let result = rewrite("create tx");
        assert!(result.expanded.contains("(\"tx\")"));
        // But short tokens are not terms.
        assert_eq!(result.terms, vec!["create"]);
    }

    #[test]
    fn explicit_filename_extracted() {
        let result = rewrite("where is session.ts defined");
        assert!(result.file_patterns.contains(&"**/session.ts".to_string()));
    }

    #[test]
    fn explicit_path_extracted() {
        let result = rewrite("look at src/auth/login.py");
        assert!(result.file_patterns.contains(&"**/src/auth/login.py".to_string()));
    }

    #[test]
    fn bare_text_exclusion_suppresses_common_keywords() {
        // "test" alone in bare text: no glob.
        let bare = rewrite("test the login flow");
        assert!(!bare.file_patterns.iter().any(|p| p.contains("test")));

        // Explicit path syntax elsewhere re-enables it.
        let with_path = rewrite("test the login flow in src/auth/session.ts");
        assert!(with_path.file_patterns.iter().any(|p| p.contains("test")));
    }

    #[test]
    fn non_excluded_keywords_extract_in_bare_text() {
        let result = rewrite("migration ordering bug");
        assert!(result
            .file_patterns
            .contains(&"**/migrations/**".to_string()));
    }

    #[test]
    fn language_hints_detected() {
        let result = rewrite("python retry helper");
        assert_eq!(result.languages, vec!["python"]);
        assert!(result.file_patterns.contains(&"**/*.py".to_string()));
    }
}
