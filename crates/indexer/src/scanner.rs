use crate::error::{IndexerError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Include/exclude matcher shared by the scanner and the watcher. Include
/// patterns are file-name globs (`*.rs`); exclude patterns match the
/// repository-relative path and win on conflict.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl PathMatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            include: build_globset(include_patterns)?,
            exclude: build_globset(exclude_patterns)?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether an absolute path is indexable under this repository.
    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if self.exclude.is_match(relative) {
            return false;
        }
        path.file_name().is_some_and(|name| self.include.is_match(name))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexerError::InvalidPattern(format!("{pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexerError::InvalidPattern(e.to_string()))
}

/// Streams absolute paths of indexable files under a repository root.
/// Symbolic links are not followed, `.gitignore` rules apply, and the
/// candidate list is never collected eagerly here; callers decide.
#[derive(Debug)]
pub struct FileScanner {
    matcher: PathMatcher,
}

impl FileScanner {
    pub fn new(
        root: impl Into<PathBuf>,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            matcher: PathMatcher::new(root, include_patterns, exclude_patterns)?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.matcher.root()
    }

    /// Lazy iterator over indexable files, in deterministic name order.
    #[must_use]
    pub fn scan(&self) -> ScanIter<'_> {
        let walker = ignore::WalkBuilder::new(self.matcher.root())
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        ScanIter {
            matcher: &self.matcher,
            walker,
            reported: HashSet::new(),
        }
    }
}

pub struct ScanIter<'a> {
    matcher: &'a PathMatcher,
    walker: ignore::Walk,
    reported: HashSet<String>,
}

impl Iterator for ScanIter<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next()? {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|t| t.is_file()) {
                        continue;
                    }
                    let path = entry.into_path();
                    if self.matcher.accepts(&path) {
                        return Some(path);
                    }
                }
                Err(err) => {
                    // Report unreadable subtrees once and keep walking.
                    let key = err.to_string();
                    if self.reported.insert(key.clone()) {
                        log::warn!("scan error under {}: {key}", self.matcher.root().display());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn scan_relative(scanner: &FileScanner) -> Vec<String> {
        scanner
            .scan()
            .map(|p| {
                p.strip_prefix(scanner.root())
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn include_patterns_select_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        write(dir.path(), "a.rs", "fn main() {}");
        write(dir.path(), "b.md", "# hi");
        write(dir.path(), "c.bin", "xx");

        let scanner = FileScanner::new(
            dir.path(),
            &["*.rs".to_string(), "*.md".to_string()],
            &[],
        )
        .unwrap();
        let mut found = scan_relative(&scanner);
        found.sort();
        assert_eq!(found, vec!["a.rs", "b.md"]);
    }

    #[test]
    fn exclude_wins_over_include() {
        let dir = tempfile::TempDir::new().unwrap();
        write(dir.path(), "src/keep.rs", "");
        write(dir.path(), "vendor/skip.rs", "");

        let scanner = FileScanner::new(
            dir.path(),
            &["*.rs".to_string()],
            &["vendor/**".to_string()],
        )
        .unwrap();
        assert_eq!(scan_relative(&scanner), vec!["src/keep.rs"]);
    }

    #[test]
    fn gitignore_is_respected() {
        let dir = tempfile::TempDir::new().unwrap();
        // The ignore walker applies .gitignore inside git repositories.
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        write(dir.path(), ".gitignore", "generated.rs\n");
        write(dir.path(), "kept.rs", "");
        write(dir.path(), "generated.rs", "");

        let scanner = FileScanner::new(dir.path(), &["*.rs".to_string()], &[]).unwrap();
        assert_eq!(scan_relative(&scanner), vec!["kept.rs"]);
    }

    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        write(outside.path(), "outside.rs", "");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
        write(dir.path(), "inside.rs", "");

        let scanner = FileScanner::new(dir.path(), &["*.rs".to_string()], &[]).unwrap();
        assert_eq!(scan_relative(&scanner), vec!["inside.rs"]);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = FileScanner::new(dir.path(), &["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidPattern(_)));
    }

    #[test]
    fn matcher_accepts_mirrors_scanner_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let matcher = PathMatcher::new(
            dir.path(),
            &["*.rs".to_string()],
            &["target/**".to_string()],
        )
        .unwrap();

        assert!(matcher.accepts(&dir.path().join("src/lib.rs")));
        assert!(!matcher.accepts(&dir.path().join("target/debug/lib.rs")));
        assert!(!matcher.accepts(&dir.path().join("README.txt")));
    }

    #[test]
    fn scan_order_is_deterministic() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["z.rs", "a.rs", "m.rs"] {
            write(dir.path(), name, "");
        }
        let scanner = FileScanner::new(dir.path(), &["*.rs".to_string()], &[]).unwrap();
        let first = scan_relative(&scanner);
        assert_eq!(first, vec!["a.rs", "m.rs", "z.rs"]);
        assert_eq!(scan_relative(&scanner), first);
    }
}
