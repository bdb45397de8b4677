//! Search for local source files below configured roots.

use ferry_core::config::PathSubstitution;
use std::path::{Path, PathBuf};

/// Finds `root/relative_path/filename` under an ordered list of roots.
#[derive(Clone, Debug, Default)]
pub struct LocalResolver {
    roots: Vec<PathBuf>,
    substitutions: Vec<PathSubstitution>,
}

impl LocalResolver {
    pub fn new(roots: Vec<PathBuf>, substitutions: Vec<PathSubstitution>) -> Self {
        Self {
            roots,
            substitutions,
        }
    }

    /// Candidate paths in search order: for each root the path as recorded,
    /// then with each substitution applied to the relative path.
    pub fn candidates(&self, relative_path: &Path, filename: &str) -> Vec<PathBuf> {
        let relative = relative_path.to_string_lossy();
        let mut candidates = Vec::new();
        for root in &self.roots {
            candidates.push(root.join(relative_path).join(filename));
            for sub in &self.substitutions {
                if sub.from.is_empty() || !relative.contains(sub.from.as_str()) {
                    continue;
                }
                let replaced = relative.replacen(sub.from.as_str(), &sub.to, 1);
                candidates.push(root.join(replaced).join(filename));
            }
        }
        candidates
    }

    /// First candidate that exists as a regular file.
    pub async fn resolve(&self, relative_path: &Path, filename: &str) -> Option<PathBuf> {
        for candidate in self.candidates(relative_path, filename) {
            if tokio::fs::metadata(&candidate)
                .await
                .is_ok_and(|m| m.is_file())
            {
                return Some(candidate);
            }
        }
        None
    }
}
