//! Finding archive request files that need processing.
//!
//! Both strategies walk `root` with an extended glob (`*` stays within one
//! directory, `**` spans any depth) and report paths relative to `root`.

use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ChangeError {
    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ChangeError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait ChangeDetector: Send + Sync {
    fn root(&self) -> &Path;

    /// Matching files that changed, relative to [`ChangeDetector::root`], sorted.
    fn changed_files(&self) -> Result<Vec<PathBuf>, ChangeError>;

    /// Records that `relative` was processed successfully.
    fn commit(&self, _relative: &Path) -> Result<(), ChangeError> {
        Ok(())
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// All files under `root` matching `pattern`, relative to `root`.
pub fn matching_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ChangeError> {
    let full = format!(
        "{}/{}",
        Pattern::escape(&root.to_string_lossy()).trim_end_matches('/'),
        pattern.trim_start_matches('/')
    );
    let paths = glob::glob_with(&full, MATCH_OPTIONS).map_err(|source| ChangeError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable path {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();
    Ok(files)
}

/// Files modified within the last `ignore_older`.
#[derive(Debug, Clone)]
pub struct MtimeDetector {
    root: PathBuf,
    pattern: String,
    ignore_older: Duration,
}

impl MtimeDetector {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>, ignore_older: Duration) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
            ignore_older,
        }
    }

    pub fn changed_at(&self, now: SystemTime) -> Result<Vec<PathBuf>, ChangeError> {
        let mut changed = Vec::new();
        let mut ignored = 0usize;
        for relative in matching_files(&self.root, &self.pattern)? {
            let absolute = self.root.join(&relative);
            let modified = fs::metadata(&absolute)
                .and_then(|m| m.modified())
                .map_err(|e| ChangeError::io(&absolute, e))?;
            let age = now
                .duration_since(modified)
                .unwrap_or_else(|e| e.duration());
            if age > self.ignore_older {
                ignored += 1;
            } else {
                debug!("Adding file {} modified {:?} ago", absolute.display(), age);
                changed.push(relative);
            }
        }
        debug!("Ignored {} files older than {:?}", ignored, self.ignore_older);
        Ok(changed)
    }
}

impl ChangeDetector for MtimeDetector {
    fn root(&self) -> &Path {
        &self.root
    }

    fn changed_files(&self) -> Result<Vec<PathBuf>, ChangeError> {
        self.changed_at(SystemTime::now())
    }
}

/// Files whose content differs from the copy kept under `cache_dir`.
#[derive(Debug, Clone)]
pub struct CachedCopyDetector {
    root: PathBuf,
    pattern: String,
    cache_dir: PathBuf,
}

impl CachedCopyDetector {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
            cache_dir: cache_dir.into(),
        }
    }

    fn is_changed(&self, relative: &Path) -> Result<bool, ChangeError> {
        let current_path = self.root.join(relative);
        let current = fs::read(&current_path).map_err(|e| ChangeError::io(&current_path, e))?;
        match fs::read(self.cache_dir.join(relative)) {
            Ok(cached) => Ok(cached != current),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(ChangeError::io(&self.cache_dir.join(relative), e)),
        }
    }
}

impl ChangeDetector for CachedCopyDetector {
    fn root(&self) -> &Path {
        &self.root
    }

    fn changed_files(&self) -> Result<Vec<PathBuf>, ChangeError> {
        let mut changed = Vec::new();
        for relative in matching_files(&self.root, &self.pattern)? {
            if self.is_changed(&relative)? {
                debug!("{} differs from its cached copy", relative.display());
                changed.push(relative);
            }
        }
        Ok(changed)
    }

    fn commit(&self, relative: &Path) -> Result<(), ChangeError> {
        let target = self.cache_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ChangeError::io(parent, e))?;
        }
        fs::copy(self.root.join(relative), &target).map_err(|e| ChangeError::io(&target, e))?;
        Ok(())
    }
}
