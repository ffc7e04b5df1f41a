//! Git integration: branch detection, worktree enumeration, blob hashing.

use sha1::Digest;
use sha1::Sha1;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

/// Branch label used when no git branch can be resolved.
pub const DEFAULT_BRANCH: &str = "main";

/// Resolve the current branch name for a workspace.
///
/// Reads `.git/HEAD` directly when it carries a `ref: refs/heads/<name>`
/// line, falls back to `git rev-parse --abbrev-ref HEAD`, then to `"main"`.
pub fn current_branch(workspace: &Path) -> String {
    if let Some(branch) = branch_from_head_file(workspace) {
        return branch;
    }

    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(workspace)
        .output();
    if let Ok(output) = output {
        if output.status.success() {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !branch.is_empty() {
                return branch;
            }
        }
    }

    DEFAULT_BRANCH.to_string()
}

fn branch_from_head_file(workspace: &Path) -> Option<String> {
    let head = std::fs::read_to_string(workspace.join(".git/HEAD")).ok()?;
    let rest = head.trim().strip_prefix("ref: refs/heads/")?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Check whether a path is inside a git repository.
pub fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
        || Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

/// Enumerate worktrees nested inside the workspace root.
///
/// Calls `git worktree list --porcelain` and keeps only paths strictly inside
/// `workspace`, returned relative to it. These must be excluded from the file
/// walk to avoid double-indexing.
pub fn nested_worktrees(workspace: &Path) -> Vec<PathBuf> {
    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(workspace)
        .output();

    let output = match output {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_nested_worktrees(&stdout, workspace)
}

/// Parse porcelain worktree output, keeping paths strictly inside `root`.
pub fn parse_nested_worktrees(porcelain: &str, root: &Path) -> Vec<PathBuf> {
    porcelain
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .filter_map(|path| relative_inside(&path, root))
        .collect()
}

/// Return `path` relative to `root` when strictly inside it.
///
/// The prefix match respects path separators: `/repo-extra` is not inside
/// `/repo`.
fn relative_inside(path: &Path, root: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(rel.to_path_buf())
}

/// Git blob object hash of a byte buffer (`sha1("blob {len}\0" + bytes)`).
///
/// This is the canonical content identity inside a git repo; outside one the
/// sync cache uses sha256 instead.
pub fn blob_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("{digest:x}")
}
