//! Worker executable discovery.
//!
//! Tries an ordered list of candidate names on the search path, then falls
//! back to a bounded directory-tree scan under a small set of well-known
//! install roots. The first hit is cached for the process lifetime so
//! repeated launches (watchdog restarts) do not re-resolve.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Candidate names the stock softphone binary ships under.
pub const DEFAULT_CANDIDATES: &[&str] = &["pjsua", "pjsua-cli"];

/// Install roots scanned when the search-path lookup comes up empty.
const DEFAULT_SEARCH_ROOTS: &[&str] = &["/usr/local", "/opt/pjsip"];

/// How deep the fallback tree scan descends below each root.
const MAX_SCAN_DEPTH: usize = 4;

use crate::error::SupervisorError;

/// Resolves the worker executable from a prioritized candidate list.
#[derive(Debug)]
pub struct WorkerLocator {
    candidates: Vec<String>,
    search_roots: Vec<PathBuf>,
    cached: OnceLock<PathBuf>,
}

impl Default for WorkerLocator {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect())
    }
}

impl WorkerLocator {
    /// Create a locator with the given ordered candidate names.
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            search_roots: DEFAULT_SEARCH_ROOTS.iter().map(PathBuf::from).collect(),
            cached: OnceLock::new(),
        }
    }

    /// Replace the fallback install roots (mainly for tests).
    pub fn with_search_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.search_roots = roots;
        self
    }

    /// Resolve the worker executable, caching the first successful result.
    pub fn locate(&self) -> Result<PathBuf, SupervisorError> {
        if let Some(path) = self.cached.get() {
            return Ok(path.clone());
        }

        let path = self.resolve()?;
        // A concurrent caller may have raced us; either value is the same
        // resolution, so the losing set is harmless.
        let _ = self.cached.set(path.clone());
        Ok(path)
    }

    fn resolve(&self) -> Result<PathBuf, SupervisorError> {
        for name in &self.candidates {
            if let Ok(path) = which::which(name) {
                tracing::info!(worker = %path.display(), "worker executable found on PATH");
                return Ok(path);
            }
        }

        for root in &self.search_roots {
            if let Some(path) = scan_tree(root, &self.candidates, MAX_SCAN_DEPTH) {
                tracing::info!(worker = %path.display(), "worker executable found under install root");
                return Ok(path);
            }
        }

        Err(SupervisorError::WorkerNotFound {
            tried: self.candidates.clone(),
        })
    }
}

/// Depth-bounded scan for a file whose name matches one of `names`.
fn scan_tree(root: &Path, names: &[String], depth: usize) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if names.iter().any(|n| n == file_name) && is_executable(&path) {
                return Some(path);
            }
        }
    }

    if depth > 0 {
        for dir in subdirs {
            if let Some(found) = scan_tree(&dir, names, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
