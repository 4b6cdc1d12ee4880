//! `.augmentignore` / `.gitignore` evaluation.
//!
//! Priority, highest first:
//!
//! 1. `.augmentignore`: an ignored path is never indexed; a whitelisted
//!    (`!pattern`) path skips the `.gitignore` check entirely.
//! 2. The file filter ([`crate::file_filter`]), applied by the caller.
//! 3. `.gitignore`, with caller-supplied patterns folded in at the lowest
//!    priority.
//!
//! Only the ignore files at the source root are read.

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

pub const GITIGNORE: &str = ".gitignore";
pub const AUGMENTIGNORE: &str = ".augmentignore";

/// Compiled ignore rules for one source root.
#[derive(Debug, Default)]
pub struct IgnoreRules {
    augment: Option<Gitignore>,
    git: Option<Gitignore>,
}

impl IgnoreRules {
    /// Rules that ignore nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build rules from ignore-file contents.
    ///
    /// `extra_patterns` are appended before the `.gitignore` lines so that
    /// the repository's own rules (including negations) win over them.
    pub fn from_contents(
        augmentignore: Option<&str>,
        gitignore: Option<&str>,
        extra_patterns: &[String],
    ) -> Result<Self> {
        let augment = match augmentignore {
            Some(text) => Some(compile(AUGMENTIGNORE, text.lines())?),
            None => None,
        };

        let git = if gitignore.is_some() || !extra_patterns.is_empty() {
            let lines = extra_patterns
                .iter()
                .map(String::as_str)
                .chain(gitignore.into_iter().flat_map(str::lines));
            Some(compile(GITIGNORE, lines)?)
        } else {
            None
        };

        Ok(Self { augment, git })
    }

    /// Read `.augmentignore` and `.gitignore` from a directory, if present.
    pub fn load_from_dir(root: &Path, extra_patterns: &[String]) -> Result<Self> {
        let augment = read_optional(&root.join(AUGMENTIGNORE))?;
        let git = read_optional(&root.join(GITIGNORE))?;
        Self::from_contents(augment.as_deref(), git.as_deref(), extra_patterns)
    }

    /// True if `.augmentignore` excludes the path (or one of its parents).
    pub fn augment_ignored(&self, path: &str, is_dir: bool) -> bool {
        self.augment
            .as_ref()
            .map(|gi| gi.matched_path_or_any_parents(path, is_dir).is_ignore())
            .unwrap_or(false)
    }

    /// True if `.augmentignore` explicitly re-includes the path.
    pub fn augment_whitelisted(&self, path: &str, is_dir: bool) -> bool {
        self.augment
            .as_ref()
            .map(|gi| gi.matched_path_or_any_parents(path, is_dir).is_whitelist())
            .unwrap_or(false)
    }

    /// True if `.gitignore` (or a custom pattern) excludes the path and
    /// `.augmentignore` does not whitelist it.
    pub fn git_ignored(&self, path: &str, is_dir: bool) -> bool {
        if self.augment_whitelisted(path, is_dir) {
            return false;
        }
        self.git
            .as_ref()
            .map(|gi| gi.matched_path_or_any_parents(path, is_dir).is_ignore())
            .unwrap_or(false)
    }
}

/// True if a changed path is an ignore file, which invalidates earlier
/// inclusion decisions.
pub fn is_ignore_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name == GITIGNORE || name == AUGMENTIGNORE
}

fn compile<'a>(name: &str, lines: impl Iterator<Item = &'a str>) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new("");
    for line in lines {
        builder
            .add_line(None, line)
            .with_context(|| format!("Invalid pattern in {}: {}", name, line))?;
    }
    builder
        .build()
        .with_context(|| format!("Failed to compile {}", name))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
