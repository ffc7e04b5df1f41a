//! Sync cache: tiered change detection for incremental refresh.
//!
//! Persists one JSON document mapping file paths to their last observed
//! `(content_hash, mtime, size)`. The check is tiered: a matching
//! `(mtime, size)` pair declares a file unchanged without reading it; only on
//! a mismatch is the content hashed and compared.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;
use crate::git;

/// Cached observation for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncEntry {
    pub content_hash: String,
    /// Modification time in Unix milliseconds.
    pub mtime: i64,
    pub size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncCacheDoc {
    version: u32,
    entries: HashMap<String, SyncEntry>,
}

/// Partition of candidate paths produced by [`SyncCache::find_changed`].
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Observed cheap-path hit rate.
#[derive(Debug, Clone, Copy)]
pub struct SyncStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl SyncStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Persistent change-detection cache for one workspace.
pub struct SyncCache {
    path: PathBuf,
    workspace: PathBuf,
    use_git_hash: bool,
    entries: HashMap<String, SyncEntry>,
    dirty: bool,
    hits: u64,
    misses: u64,
}

impl SyncCache {
    /// Load the cache document, or start empty when none exists.
    ///
    /// `path` is the JSON document location; `workspace` is the root that
    /// entry keys are relative to. Hashing uses the git blob hash inside a
    /// git repo, sha256 otherwise.
    pub fn load(path: PathBuf, workspace: PathBuf) -> Self {
        let use_git_hash = git::is_git_repo(&workspace);
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<SyncCacheDoc>(&text).ok())
            .map(|doc| doc.entries)
            .unwrap_or_default();

        Self {
            path,
            workspace,
            use_git_hash,
            entries,
            dirty: false,
            hits: 0,
            misses: 0,
        }
    }

    /// Persist the current entry set. After this the on-disk document
    /// represents exactly what the cache serves in memory.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let doc = SyncCacheDoc {
            version: 1,
            entries: self.entries.clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&doc)?.as_bytes())?;
        self.dirty = false;
        Ok(())
    }

    /// Whether a save is required.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Hash content the same way change detection does.
    pub fn hash_content(&self, bytes: &[u8]) -> String {
        if self.use_git_hash {
            git::blob_hash(bytes)
        } else {
            use sha2::Digest;
            let digest = sha2::Sha256::digest(bytes);
            format!("{digest:x}")
        }
    }

    /// Partition candidate paths into added / modified / removed / unchanged.
    ///
    /// `paths` are workspace-relative. Entries cached for paths no longer in
    /// `paths` are reported removed (and dropped from the cache). A file whose
    /// mtime moved but whose hash is unchanged is reported unchanged and has
    /// its cached `(mtime, size)` refreshed.
    pub fn find_changed(&mut self, paths: &[String]) -> ChangeSet {
        let mut change_set = ChangeSet::default();
        let candidate_set: HashSet<&str> = paths.iter().map(String::as_str).collect();

        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|path| !candidate_set.contains(path.as_str()))
            .cloned()
            .collect();
        for path in &removed {
            self.entries.remove(path);
            self.dirty = true;
        }
        change_set.removed = removed;

        for path in paths {
            match self.check_one(path) {
                FileCheck::Added => change_set.added.push(path.clone()),
                FileCheck::Modified => change_set.modified.push(path.clone()),
                FileCheck::Unchanged => change_set.unchanged.push(path.clone()),
            }
        }

        change_set
    }

    fn check_one(&mut self, path: &str) -> FileCheck {
        let Some(cached) = self.entries.get(path) else {
            return FileCheck::Added;
        };

        let abs = self.workspace.join(path);
        let Ok((mtime, size)) = file_meta(&abs) else {
            // Unreadable now; treat as modified and let the pipeline record
            // the error status.
            return FileCheck::Modified;
        };

        // Cheap tier: mtime + size.
        if cached.mtime == mtime && cached.size == size {
            self.hits += 1;
            return FileCheck::Unchanged;
        }

        // Expensive tier: content hash.
        self.misses += 1;
        let Ok(bytes) = std::fs::read(&abs) else {
            return FileCheck::Modified;
        };
        let hash = self.hash_content(&bytes);
        if hash == cached.content_hash {
            // Touched but identical; refresh the cheap-tier key.
            self.entries.insert(
                path.to_string(),
                SyncEntry {
                    content_hash: hash,
                    mtime,
                    size,
                },
            );
            self.dirty = true;
            FileCheck::Unchanged
        } else {
            FileCheck::Modified
        }
    }

    /// Record the observation for a freshly indexed file.
    pub fn update(&mut self, path: &str, content_hash: String, mtime: i64, size: u64) {
        self.entries.insert(
            path.to_string(),
            SyncEntry {
                content_hash,
                mtime,
                size,
            },
        );
        self.dirty = true;
    }

    /// Drop the entry for a removed file.
    pub fn remove(&mut self, path: &str) {
        if self.entries.remove(path).is_some() {
            self.dirty = true;
        }
    }

    /// Drop every entry (rebuild).
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// Look up the cached entry for a path.
    pub fn get(&self, path: &str) -> Option<&SyncEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

enum FileCheck {
    Added,
    Modified,
    Unchanged,
}

/// Read `(mtime_millis, size)` for a file.
pub fn file_meta(path: &Path) -> Result<(i64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((mtime, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn cache_for(dir: &TempDir) -> SyncCache {
        SyncCache::load(
            dir.path().join("cache.json"),
            dir.path().to_path_buf(),
        )
    }

    #[test]
    fn new_files_are_added() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let mut cache = cache_for(&dir);

        let changes = cache.find_changed(&["a.rs".to_string()]);
        assert_eq!(changes.added, vec!["a.rs"]);
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn unchanged_via_cheap_tier() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let mut cache = cache_for(&dir);

        let (mtime, size) = file_meta(&dir.path().join("a.rs")).unwrap();
        let hash = cache.hash_content(b"fn a() {}");
        cache.update("a.rs", hash, mtime, size);

        let changes = cache.find_changed(&["a.rs".to_string()]);
        assert_eq!(changes.unchanged, vec!["a.rs"]);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn touched_but_identical_refreshes_entry() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let mut cache = cache_for(&dir);

        let (mtime, size) = file_meta(&dir.path().join("a.rs")).unwrap();
        let hash = cache.hash_content(b"fn a() {}");
        // Stale mtime in the cache forces the expensive tier.
        cache.update("a.rs", hash, mtime - 10_000, size);

        let changes = cache.find_changed(&["a.rs".to_string()]);
        assert_eq!(changes.unchanged, vec!["a.rs"]);
        assert_eq!(cache.stats().misses, 1);
        // Cached mtime was refreshed to the observed one.
        assert_eq!(cache.get("a.rs").unwrap().mtime, mtime);
        assert!(cache.is_dirty());
    }

    #[test]
    fn content_change_is_modified() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let mut cache = cache_for(&dir);

        let (mtime, size) = file_meta(&dir.path().join("a.rs")).unwrap();
        let hash = cache.hash_content(b"fn a() {}");
        cache.update("a.rs", hash, mtime, size);

        write_file(dir.path(), "a.rs", "fn a() { panic!() }");
        let changes = cache.find_changed(&["a.rs".to_string()]);
        assert_eq!(changes.modified, vec!["a.rs"]);
    }

    #[test]
    fn missing_paths_are_removed() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_for(&dir);
        cache.update("gone.rs", "hash".to_string(), 1, 1);

        let changes = cache.find_changed(&[]);
        assert_eq!(changes.removed, vec!["gone.rs"]);
        assert!(cache.get("gone.rs").is_none());
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_for(&dir);
        cache.update("a.rs", "h1".to_string(), 42, 7);
        cache.save().unwrap();
        assert!(!cache.is_dirty());

        let reloaded = cache_for(&dir);
        let entry = reloaded.get("a.rs").unwrap();
        assert_eq!(entry.content_hash, "h1");
        assert_eq!(entry.mtime, 42);
        assert_eq!(entry.size, 7);
    }

    #[test]
    fn second_pass_reports_no_changes() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        write_file(dir.path(), "b.rs", "fn b() {}");
        let mut cache = cache_for(&dir);

        let paths = vec!["a.rs".to_string(), "b.rs".to_string()];
        let first = cache.find_changed(&paths);
        assert_eq!(first.added.len(), 2);
        for path in &first.added {
            let abs = dir.path().join(path);
            let (mtime, size) = file_meta(&abs).unwrap();
            let bytes = std::fs::read(&abs).unwrap();
            let hash = cache.hash_content(&bytes);
            cache.update(path, hash, mtime, size);
        }

        let second = cache.find_changed(&paths);
        assert!(second.added.is_empty());
        assert!(second.modified.is_empty());
        assert!(second.removed.is_empty());
        assert_eq!(second.unchanged.len(), 2);
    }
}
