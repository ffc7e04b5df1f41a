//! Workspace file enumeration.
//!
//! Walks the workspace recursively, keeping files with recognized
//! extensions, applying the configured ignore globs, and excluding nested
//! git worktrees so their files are not indexed twice.

use std::path::Path;
use std::path::PathBuf;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;

use crate::config::IndexingConfig;
use crate::error::Result;
use crate::types::RECOGNIZED_EXTENSIONS;

/// Recursive workspace walker.
pub struct FileWalker {
    ignore_globs: Vec<String>,
    max_file_size: u64,
}

impl FileWalker {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            ignore_globs: config.ignore_globs.clone(),
            max_file_size: config.max_file_size,
        }
    }

    /// Enumerate indexable files under `root`, returned as sorted
    /// workspace-relative paths. `excluded_dirs` are worktree roots relative
    /// to `root`.
    pub fn walk(&self, root: &Path, excluded_dirs: &[PathBuf]) -> Result<Vec<String>> {
        let mut overrides = OverrideBuilder::new(root);
        for glob in &self.ignore_globs {
            // Inverted override = exclusion.
            let _ = overrides.add(&format!("!{glob}"));
        }
        for dir in excluded_dirs {
            let _ = overrides.add(&format!("!{}/**", dir.display()));
        }
        let overrides = overrides
            .build()
            .map_err(|e| crate::error::CodeIntelErr::Config {
                field: "indexing.ignore_globs".to_string(),
                cause: e.to_string(),
            })?;

        let walker = WalkBuilder::new(root)
            .overrides(overrides)
            .follow_links(false)
            .build();

        let mut paths = Vec::new();
        for entry in walker {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if !has_recognized_extension(path) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() > self.max_file_size {
                    continue;
                }
            }
            if let Ok(rel) = path.strip_prefix(root) {
                paths.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }

        paths.sort();
        Ok(paths)
    }
}

fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RECOGNIZED_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}
