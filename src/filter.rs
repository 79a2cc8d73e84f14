//! Eligibility filters over relative paths.
//!
//! Every configured pattern is a glob and states a condition a path must
//! meet. A plain glob excludes what it matches; a glob prefixed with `!` is
//! an inclusion and requires a match. A file is eligible when it matches
//! every inclusion and no exclusion. Directories are only checked against
//! exclusions, since they carry no content of their own and are kept when an
//! eligible file lies below them.
//!
//! Paths are relative to the working directory with `/` separators, and `*`
//! also matches across `/`, so `*.db` excludes database files at any depth.

use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Prefix turning a pattern into an inclusion.
pub const INCLUDE_PREFIX: char = '!';

/// Compiled eligibility patterns.
#[derive(Debug, Clone)]
pub struct FilterSet {
    patterns: Vec<String>,
    excludes: GlobSet,
    includes: GlobSet,
    include_count: usize,
}

impl FilterSet {
    /// Compile a list of patterns.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut excludes = GlobSetBuilder::new();
        let mut includes = GlobSetBuilder::new();
        let mut include_count = 0;
        for pattern in patterns {
            match Self::compile(pattern)? {
                (glob, true) => {
                    includes.add(glob);
                    include_count += 1;
                }
                (glob, false) => {
                    excludes.add(glob);
                }
            }
        }

        Ok(Self {
            patterns: patterns.to_vec(),
            excludes: excludes
                .build()
                .map_err(|e| Error::InvalidFilter(e.to_string()))?,
            includes: includes
                .build()
                .map_err(|e| Error::InvalidFilter(e.to_string()))?,
            include_count,
        })
    }

    /// Check that a pattern compiles.
    pub fn validate(pattern: &str) -> Result<()> {
        Self::compile(pattern).map(|_| ())
    }

    /// The compiled glob and whether it is an inclusion.
    fn compile(pattern: &str) -> Result<(Glob, bool)> {
        let (glob, include) = match pattern.strip_prefix(INCLUDE_PREFIX) {
            Some(rest) => (rest, true),
            None => (pattern, false),
        };
        if glob.trim().is_empty() {
            return Err(Error::InvalidFilter(format!("empty pattern \"{pattern}\"")));
        }
        let glob = Glob::new(glob).map_err(|e| Error::InvalidFilter(format!("{pattern}: {e}")))?;
        Ok((glob, include))
    }

    /// True when a file at the relative path matches every inclusion and no exclusion.
    pub fn is_eligible_file(&self, relative_path: &str) -> bool {
        self.is_eligible_directory(relative_path)
            && (self.include_count == 0
                || self.includes.matches(relative_path).len() == self.include_count)
    }

    /// True when a directory at the relative path matches no exclusion.
    pub fn is_eligible_directory(&self, relative_path: &str) -> bool {
        !self.excludes.is_match(relative_path)
    }

    /// The source patterns, in order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FILTERS;

    fn defaults() -> FilterSet {
        let patterns: Vec<String> = DEFAULT_FILTERS.iter().map(|p| p.to_string()).collect();
        FilterSet::new(&patterns).unwrap()
    }

    #[test]
    fn test_default_filters() {
        let filters = defaults();

        assert!(filters.is_eligible_file("docs/readme.txt"));
        assert!(filters.is_eligible_directory("photos"));

        assert!(!filters.is_eligible_file("desktop.ini"));
        assert!(!filters.is_eligible_file("music/desktop.ini"));
        assert!(!filters.is_eligible_file("Thumbs.db"));
        assert!(!filters.is_eligible_file("a/b/cache.db"));
        assert!(!filters.is_eligible_file("~lock.docx"));
        assert!(!filters.is_eligible_file("docs/~$report.docx"));
        assert!(!filters.is_eligible_file("docs/.~lock.report.odt#"));
    }

    #[test]
    fn test_empty_set_accepts_everything() {
        let filters = FilterSet::new(&[]).unwrap();
        assert!(filters.is_eligible_file("anything/at/all.db"));
    }

    #[test]
    fn test_user_pattern() {
        let filters = FilterSet::new(&["build/**".to_string(), "*.tmp".to_string()]).unwrap();

        assert!(!filters.is_eligible_file("build/out.bin"));
        assert!(!filters.is_eligible_file("notes/draft.tmp"));
        assert!(filters.is_eligible_file("src/build.rs"));
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(matches!(
            FilterSet::validate("[unclosed"),
            Err(Error::InvalidFilter(_))
        ));
        assert!(FilterSet::validate("   ").is_err());
        assert!(FilterSet::validate("!").is_err());
        assert!(FilterSet::validate("![unclosed").is_err());
        assert!(FilterSet::new(&["ok".to_string(), "{a,".to_string()]).is_err());
    }

    #[test]
    fn test_inclusion_pattern() {
        let filters = FilterSet::new(&["!docs/**".to_string()]).unwrap();

        assert!(filters.is_eligible_file("docs/a.txt"));
        assert!(filters.is_eligible_file("docs/deep/b.txt"));
        assert!(!filters.is_eligible_file("notes.txt"));
        assert!(!filters.is_eligible_file("src/docs.txt"));

        // Directories are not held to inclusions
        assert!(filters.is_eligible_directory("src"));
    }

    #[test]
    fn test_every_pattern_must_hold() {
        let patterns = ["!docs/**", "!**/*.md", "**/draft*"].map(String::from);
        let filters = FilterSet::new(&patterns).unwrap();

        assert!(filters.is_eligible_file("docs/guide.md"));
        assert!(!filters.is_eligible_file("docs/guide.txt"));
        assert!(!filters.is_eligible_file("readme.md"));
        assert!(!filters.is_eligible_file("docs/draft-guide.md"));
        assert!(!filters.is_eligible_directory("docs/drafts"));
    }
}
