//! Repository archive handling shared by the GitHub and GitLab sources.
//!
//! Both providers serve a zip whose entries live under a single top-level
//! directory (`<repo>-<sha>/`). That component is stripped so paths are
//! relative to the repository root.
//!
//! Archives only contain committed content, so `.gitignore` is not applied.
//! `.augmentignore` from the archive root is.

use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use tracing::debug;

use crate::file_filter::{should_filter_file, FilterInput};
use crate::ignore_rules::{IgnoreRules, AUGMENTIGNORE};
use crate::models::FileEntry;

/// A regular file extracted from an archive.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Extract every regular file, stripping the leading path component.
///
/// Entries larger than `max_file_size` are skipped without being
/// decompressed. The declared size is not trusted: reads stop one byte past
/// the limit.
pub fn extract_zip(bytes: &[u8], max_file_size: usize) -> Result<Vec<ArchiveFile>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to open repository archive")?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {}", i))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().replace('\\', "/");
        let Some((_, relative)) = name.split_once('/') else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let relative = relative.to_string();

        let limit = max_file_size as u64;
        if entry.size() > limit {
            debug!(path = %relative, size = entry.size(), "filtered: file_too_large");
            continue;
        }

        let mut buf = Vec::new();
        (&mut entry)
            .take(limit + 1)
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to decompress {}", relative))?;
        if buf.len() as u64 > limit {
            debug!(path = %relative, "filtered: file_too_large");
            continue;
        }
        files.push(ArchiveFile {
            path: relative,
            bytes: buf,
        });
    }
    Ok(files)
}

/// Apply `.augmentignore` and the file filter, in that order.
pub fn select_files(files: Vec<ArchiveFile>, max_file_size: usize) -> Result<Vec<FileEntry>> {
    let augmentignore = files
        .iter()
        .find(|f| f.path == AUGMENTIGNORE)
        .map(|f| String::from_utf8_lossy(&f.bytes).into_owned());
    let rules = IgnoreRules::from_contents(augmentignore.as_deref(), None, &[])?;

    let mut entries = Vec::new();
    for file in files {
        if let Some(entry) = accept_file(&rules, &file.path, file.bytes, max_file_size) {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Run one file through `.augmentignore` and the filter. `None` means it
/// must not be indexed.
pub fn accept_file(
    rules: &IgnoreRules,
    path: &str,
    bytes: Vec<u8>,
    max_file_size: usize,
) -> Option<FileEntry> {
    if rules.augment_ignored(path, false) {
        debug!(path, "skipped by .augmentignore");
        return None;
    }
    let result = should_filter_file(FilterInput {
        path,
        content: &bytes,
        max_file_size: Some(max_file_size),
    });
    if result.filtered {
        debug!(path, reason = result.reason.as_deref().unwrap_or(""), "filtered");
        return None;
    }
    let contents = String::from_utf8(bytes).ok()?;
    Some(FileEntry::new(path, contents))
}
