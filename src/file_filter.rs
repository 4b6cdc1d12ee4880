//! Per-file inclusion rules applied before anything is indexed.
//!
//! [`should_filter_file`] is pure and deterministic. Checks run in a fixed
//! order and stop at the first match:
//!
//! | Order | Check | Reason |
//! |-------|-------|--------|
//! | 1 | Path has a `..` segment | `path_contains_dotdot` |
//! | 2 | Content larger than `max_file_size` | `file_too_large (<n> bytes)` |
//! | 3 | File name looks like a key or secret | `keyish_pattern` |
//! | 4 | Content is not valid UTF-8 | `binary_file` |
//!
//! Ignore files (`.augmentignore`, `.gitignore`) are evaluated by the
//! caller around this filter; see [`crate::ignore_rules`].

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Default maximum file size: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 1024 * 1024;

static KEYISH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\.git|\.env|\.env\..+|.*\.pem|.*\.key|.*\.pfx|.*\.p12|.*\.jks|.*\.keystore|.*\.pkcs12|.*\.crt|.*\.cer|id_rsa|id_ed25519|id_ecdsa|id_dsa)$",
    )
    .expect("keyish pattern is valid")
});

/// Input to [`should_filter_file`].
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub path: &'a str,
    pub content: &'a [u8],
    /// Overrides [`DEFAULT_MAX_FILE_SIZE`] when set.
    pub max_file_size: Option<usize>,
}

/// Decision returned by [`should_filter_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterResult {
    pub filtered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FilterResult {
    fn keep() -> Self {
        Self {
            filtered: false,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            filtered: true,
            reason: Some(reason.into()),
        }
    }
}

/// True if any segment of `path` is `..`. Cannot be disabled.
pub fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}

/// True if the file name matches a secret/credential pattern.
pub fn is_keyish_path(path: &str) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    KEYISH_PATTERN.is_match(name)
}

pub fn is_valid_file_size(size: usize, max_file_size: usize) -> bool {
    size <= max_file_size
}

pub fn is_valid_utf8(content: &[u8]) -> bool {
    std::str::from_utf8(content).is_ok()
}

/// Decide whether a file must be excluded, and why.
pub fn should_filter_file(input: FilterInput<'_>) -> FilterResult {
    let max_file_size = input.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE);

    if has_parent_segment(input.path) {
        return FilterResult::reject("path_contains_dotdot");
    }

    if !is_valid_file_size(input.content.len(), max_file_size) {
        return FilterResult::reject(format!("file_too_large ({} bytes)", input.content.len()));
    }

    if is_keyish_path(input.path) {
        return FilterResult::reject("keyish_pattern");
    }

    if !is_valid_utf8(input.content) {
        return FilterResult::reject("binary_file");
    }

    FilterResult::keep()
}

/// Path-only subset of the checks, for listings where content is not at hand.
pub fn should_filter_path(path: &str, size: Option<usize>, max_file_size: Option<usize>) -> bool {
    if has_parent_segment(path) || is_keyish_path(path) {
        return true;
    }
    match size {
        Some(size) => !is_valid_file_size(size, max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE)),
        None => false,
    }
}
