//! Core data types for the index and search pipeline.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use std::path::Path;

/// Indexing level of a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Symbol,
    Chunk,
    File,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Symbol => "symbol",
            Granularity::Chunk => "chunk",
            Granularity::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "symbol" => Some(Granularity::Symbol),
            "chunk" => Some(Granularity::Chunk),
            "file" => Some(Granularity::File),
            _ => None,
        }
    }
}

/// Kind of a parsed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    TypeAlias,
    Enum,
    Trait,
    Module,
    Constant,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Enum => "enum",
            SymbolKind::Trait => "trait",
            SymbolKind::Module => "module",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            "struct" => Some(SymbolKind::Struct),
            "interface" => Some(SymbolKind::Interface),
            "type_alias" => Some(SymbolKind::TypeAlias),
            "enum" => Some(SymbolKind::Enum),
            "trait" => Some(SymbolKind::Trait),
            "module" => Some(SymbolKind::Module),
            "constant" => Some(SymbolKind::Constant),
            "variable" => Some(SymbolKind::Variable),
            _ => None,
        }
    }
}

/// A named program entity extracted from one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// Stable hash of qualified name + file + position.
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub language: String,
    /// Relative to the workspace root.
    pub file_path: String,
    /// 1-indexed, inclusive.
    pub start_line: i32,
    pub end_line: i32,
    /// Source slice covering the symbol.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub content_hash: String,
    /// True for third-party/vendored code.
    pub is_external: bool,
    pub branch: String,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model_id: Option<String>,
}

impl Symbol {
    /// Compute a stable symbol id from its identity triple.
    pub fn compute_id(qualified_name: &str, file_path: &str, start_line: i32) -> String {
        let digest = Sha256::digest(format!("{qualified_name}\n{file_path}\n{start_line}"));
        format!("{digest:x}")[..16].to_string()
    }
}

/// Kind of a chunk row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Symbol,
    Block,
    File,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Symbol => "symbol",
            ChunkType::Block => "block",
            ChunkType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "symbol" => Some(ChunkType::Symbol),
            "block" => Some(ChunkType::Block),
            "file" => Some(ChunkType::File),
            _ => None,
        }
    }
}

/// A text chunk of a source file.
///
/// `chunk_type = file` rows hold the whole file (possibly truncated) and use
/// a deterministic id derived from the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    /// 1-indexed, inclusive.
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_symbol_id: Option<String>,
    pub language: String,
    pub content_hash: String,
    pub branch: String,
    pub updated_at: i64,
}

impl Chunk {
    /// Deterministic id for the whole-file chunk of a path.
    pub fn file_chunk_id(file_path: &str) -> String {
        let digest = Sha256::digest(file_path.as_bytes());
        format!("file:{}", &format!("{digest:x}")[..16])
    }
}

/// Index status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Indexed,
    Error,
    Stale,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Error => "error",
            FileStatus::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "indexed" => Some(FileStatus::Indexed),
            "error" => Some(FileStatus::Error),
            "stale" => Some(FileStatus::Stale),
            _ => None,
        }
    }
}

/// Per-file index bookkeeping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub file_hash: String,
    pub mtime: i64,
    pub size: i64,
    pub last_indexed: i64,
    pub language: String,
    pub branch: String,
    pub status: FileStatus,
    pub symbol_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Relationship kind between two symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Imports,
    Calls,
    Extends,
    Implements,
    References,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Extends => "EXTENDS",
            EdgeKind::Implements => "IMPLEMENTS",
            EdgeKind::References => "REFERENCES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IMPORTS" => Some(EdgeKind::Imports),
            "CALLS" => Some(EdgeKind::Calls),
            "EXTENDS" => Some(EdgeKind::Extends),
            "IMPLEMENTS" => Some(EdgeKind::Implements),
            "REFERENCES" => Some(EdgeKind::References),
            _ => None,
        }
    }
}

/// Directed relation between two symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_symbol_id: String,
    pub target_symbol_id: String,
    pub kind: EdgeKind,
    pub branch: String,
    pub confidence: f32,
}

/// One full-text hit as returned by the FTS store.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub content_id: String,
    pub content_type: Granularity,
    pub file_path: String,
    pub name: String,
    pub content: String,
    /// BM25 rank from the FTS engine; negative, lower is better.
    pub rank: f64,
}

/// One nearest-neighbor hit as returned by the vector store.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub content_id: String,
    pub granularity: Granularity,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// One fused, ranked result flowing through RRF, boosting and reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub score: f32,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i32>,
}

/// Per-file aggregate score in the extracted views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileScore {
    pub file_path: String,
    pub score: f32,
}

/// Compute the canonical content hash of a text unit (full sha256 hex).
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

/// Current Unix timestamp in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Detect programming language from a file extension.
pub fn detect_language(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let lang = match ext {
        "py" | "pyw" => "python",
        "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" | "mts" | "cts" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        _ => return None,
    };
    Some(lang.to_string())
}

/// File extensions the walker recognizes, matching [`detect_language`].
pub const RECOGNIZED_EXTENSIONS: &[&str] = &[
    "py", "pyw", "ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "rs", "go", "java", "c",
    "h", "cpp", "cc", "cxx", "hpp", "cs", "rb", "php", "swift", "kt", "kts", "scala", "lua", "sh",
    "bash", "sql",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_id_is_stable() {
        let a = Symbol::compute_id("mod::foo", "src/lib.rs", 10);
        let b = Symbol::compute_id("mod::foo", "src/lib.rs", 10);
        let c = Symbol::compute_id("mod::foo", "src/lib.rs", 11);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn file_chunk_id_is_deterministic() {
        let a = Chunk::file_chunk_id("src/main.rs");
        let b = Chunk::file_chunk_id("src/main.rs");
        assert_eq!(a, b);
        assert!(a.starts_with("file:"));
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = content_hash("fn main() {}");
        let b = content_hash("fn main() { }");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn language_detection() {
        assert_eq!(
            detect_language(Path::new("a.py")).as_deref(),
            Some("python")
        );
        assert_eq!(
            detect_language(Path::new("a.pyw")).as_deref(),
            Some("python")
        );
        assert_eq!(
            detect_language(Path::new("a.tsx")).as_deref(),
            Some("typescript")
        );
        assert_eq!(
            detect_language(Path::new("a.jsx")).as_deref(),
            Some("typescript")
        );
        assert_eq!(detect_language(Path::new("a.bin")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn granularity_round_trip() {
        for g in [Granularity::Symbol, Granularity::Chunk, Granularity::File] {
            assert_eq!(Granularity::parse(g.as_str()), Some(g));
        }
        assert_eq!(Granularity::parse("word"), None);
    }
}
