//! Chunker: splits one file into symbol, block and whole-file chunks.
//!
//! Every non-empty file yields exactly one `file` chunk (possibly truncated),
//! zero or more `symbol` chunks (one per extracted symbol) and zero or more
//! fixed-size `block` chunks covering the file in line windows.

use sha2::Digest;
use sha2::Sha256;

use crate::config::ChunkingConfig;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::Symbol;
use crate::types::content_hash;
use crate::types::now_unix;

/// Splits file content into multi-granular chunks.
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Chunk one file. `symbols` are the freshly extracted symbols for it.
    pub fn chunk_file(
        &self,
        file_path: &str,
        content: &str,
        language: &str,
        symbols: &[Symbol],
        branch: &str,
    ) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let now = now_unix();
        let lines: Vec<&str> = content.lines().collect();
        let line_count = lines.len().max(1);
        let mut chunks = Vec::new();

        for symbol in symbols {
            chunks.push(Chunk {
                id: format!("sym:{}", symbol.id),
                file_path: file_path.to_string(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                content: symbol.content.clone(),
                chunk_type: ChunkType::Symbol,
                parent_symbol_id: Some(symbol.id.clone()),
                language: language.to_string(),
                content_hash: symbol.content_hash.clone(),
                branch: branch.to_string(),
                updated_at: now,
            });
        }

        chunks.extend(self.block_chunks(file_path, &lines, language, branch, now));

        // Whole-file chunk, truncated past the configured budget.
        let file_content = truncate_chars(content, self.config.file_chunk_max_chars);
        chunks.push(Chunk {
            id: Chunk::file_chunk_id(file_path),
            file_path: file_path.to_string(),
            start_line: 1,
            end_line: line_count as i32,
            content_hash: content_hash(&file_content),
            content: file_content,
            chunk_type: ChunkType::File,
            parent_symbol_id: None,
            language: language.to_string(),
            branch: branch.to_string(),
            updated_at: now,
        });

        chunks
    }

    fn block_chunks(
        &self,
        file_path: &str,
        lines: &[&str],
        language: &str,
        branch: &str,
        now: i64,
    ) -> Vec<Chunk> {
        let block_lines = self.config.block_lines.max(1);
        let overlap = self.config.block_overlap.min(block_lines - 1);
        let step = block_lines - overlap;

        // Files shorter than one block are fully covered by the file chunk.
        if lines.len() <= block_lines {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < lines.len() {
            let end = (start + block_lines).min(lines.len());
            let content = lines[start..end].join("\n");
            let hash = content_hash(&content);
            chunks.push(Chunk {
                id: block_chunk_id(file_path, start + 1, &hash),
                file_path: file_path.to_string(),
                start_line: (start + 1) as i32,
                end_line: end as i32,
                content,
                chunk_type: ChunkType::Block,
                parent_symbol_id: None,
                language: language.to_string(),
                content_hash: hash,
                branch: branch.to_string(),
                updated_at: now,
            });
            if end == lines.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Deterministic block chunk id from path, position and content.
fn block_chunk_id(file_path: &str, start_line: usize, content_hash: &str) -> String {
    let digest = Sha256::digest(format!("{file_path}\n{start_line}\n{content_hash}"));
    format!("blk:{}", &format!("{digest:x}")[..16])
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn chunker() -> Chunker {
        Chunker::new(ChunkingConfig::default())
    }

    fn symbol(name: &str, start: i32, end: i32, content: &str) -> Symbol {
        Symbol {
            id: Symbol::compute_id(name, "src/a.ts", start),
            name: name.to_string(),
            qualified_name: name.to_string(),
            kind: SymbolKind::Function,
            language: "typescript".to_string(),
            file_path: "src/a.ts".to_string(),
            start_line: start,
            end_line: end,
            content: content.to_string(),
            signature: None,
            docstring: None,
            content_hash: content_hash(content),
            is_external: false,
            branch: "main".to_string(),
            updated_at: 0,
            revision_id: None,
            embedding_model_id: None,
        }
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let chunks = chunker().chunk_file("src/a.ts", "", "typescript", &[], "main");
        assert!(chunks.is_empty());
    }

    #[test]
    fn non_empty_file_has_exactly_one_file_chunk() {
        let chunks = chunker().chunk_file("src/a.ts", "const a = 1;\n", "typescript", &[], "main");
        let file_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::File)
            .collect();
        assert_eq!(file_chunks.len(), 1);
        assert_eq!(file_chunks[0].start_line, 1);
        assert!(file_chunks[0].end_line >= 1);
        assert_eq!(file_chunks[0].id, Chunk::file_chunk_id("src/a.ts"));
    }

    #[test]
    fn symbol_chunks_carry_parent_id() {
        let sym = symbol("foo", 1, 2, "function foo() {\n}");
        let chunks = chunker().chunk_file(
            "src/a.ts",
            "function foo() {\n}\n",
            "typescript",
            std::slice::from_ref(&sym),
            "main",
        );
        let symbol_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Symbol)
            .collect();
        assert_eq!(symbol_chunks.len(), 1);
        assert_eq!(symbol_chunks[0].parent_symbol_id.as_deref(), Some(sym.id.as_str()));
        assert_eq!(symbol_chunks[0].content_hash, sym.content_hash);
    }

    #[test]
    fn long_file_gets_block_chunks_covering_all_lines() {
        let content = (1..=100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker().chunk_file("src/a.ts", &content, "typescript", &[], "main");
        let blocks: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Block)
            .collect();
        assert!(!blocks.is_empty());
        assert_eq!(blocks[0].start_line, 1);
        assert_eq!(blocks.last().unwrap().end_line, 100);
        // Consecutive blocks overlap by the configured amount.
        assert!(blocks[1].start_line <= blocks[0].end_line);
    }

    #[test]
    fn short_file_has_no_block_chunks() {
        let chunks = chunker().chunk_file("src/a.ts", "a\nb\nc\n", "typescript", &[], "main");
        assert!(chunks.iter().all(|c| c.chunk_type != ChunkType::Block));
    }

    #[test]
    fn file_chunk_content_is_truncated() {
        let config = ChunkingConfig {
            file_chunk_max_chars: 10,
            ..ChunkingConfig::default()
        };
        let chunks = Chunker::new(config).chunk_file(
            "src/a.ts",
            "0123456789abcdef",
            "typescript",
            &[],
            "main",
        );
        let file_chunk = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::File)
            .unwrap();
        assert_eq!(file_chunk.content, "0123456789");
    }

    #[test]
    fn same_content_same_block_ids() {
        let content = (1..=100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let a = chunker().chunk_file("src/a.ts", &content, "typescript", &[], "main");
        let b = chunker().chunk_file("src/a.ts", &content, "typescript", &[], "main");
        let ids_a: Vec<_> = a.iter().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
