// src/template/pattern.rs

use globset::{Glob, GlobMatcher};

use crate::template::paths::{normalize, split_parent, strip_base};

/// A template's source side: base directory plus a glob matched against
/// paths relative to that directory.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    base: String,
    raw: String,
    matcher: GlobMatcher,
}

/// A path accepted by a [`SourcePattern`], split into the parts used for
/// placeholder rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    /// Full endpoint-relative path.
    pub path: String,
    /// Path relative to the pattern base.
    pub relative: String,
    pub filename: String,
    /// Directory of the file relative to the pattern base ("" at the base).
    pub dir: String,
}

impl SourcePattern {
    pub fn new(base: &str, pattern: &str) -> Result<Self, String> {
        let glob = Glob::new(pattern)
            .map_err(|e| format!("invalid source pattern '{pattern}': {e}"))?;
        Ok(Self {
            base: normalize(base),
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a full endpoint-relative path.
    pub fn matches(&self, path: &str) -> Option<MatchedFile> {
        let relative = strip_base(&self.base, path)?;
        if !self.matcher.is_match(&relative) {
            return None;
        }
        let (dir, filename) = split_parent(&relative);
        Some(MatchedFile {
            path: normalize(path),
            relative,
            filename,
            dir,
        })
    }

    /// Match a path already relative to the base (used during enumeration).
    pub fn matches_relative(&self, relative: &str) -> bool {
        self.matcher.is_match(normalize(relative))
    }
}
