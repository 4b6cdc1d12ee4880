//! Website crawler source.
//!
//! Breadth-first crawl from `url`, bounded by `max_depth` and `max_pages`,
//! staying on the same origin and honoring `robots.txt` `Disallow` rules
//! for `User-agent: *`.
//!
//! `include`/`exclude` globs (matched against the URL path) decide which
//! pages are *indexed*. They never stop link discovery, so a page under an
//! included subtree stays reachable through pages that are excluded.
//!
//! # Configuration
//!
//! ```toml
//! [sources.site]
//! type = "website"
//! url = "https://docs.example.com"
//! max_depth = 3
//! max_pages = 100
//! include = ["/guide/**"]
//! exclude = ["/guide/legacy/**"]
//! delay_ms = 250
//! ```
//!
//! Pages become plain text: scripts, styles, and comments are dropped, tags
//! stripped, and common entities decoded. The crawl runs at most once per
//! source instance; listings and reads reuse it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use reqwest::{Client, Url};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{dir_prefix, listing_under, Source};
use crate::config::WebsiteSourceConfig;
use crate::file_filter::{has_parent_segment, should_filter_file, FilterInput};
use crate::models::{ChangeDetection, FileEntry, FileInfo, SourceMetadata, SourceType};

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).expect("link pattern is valid")
});
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});
static DROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<!--.*?-->|<head[^>]*>.*?</head>")
        .expect("drop pattern is valid")
});
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|pre|section|article|blockquote)>")
        .expect("break pattern is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"));

pub struct WebsiteSource {
    config: WebsiteSourceConfig,
    start: Url,
    client: Client,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    pages: OnceCell<Vec<FileEntry>>,
}

impl WebsiteSource {
    pub fn new(config: WebsiteSourceConfig) -> Result<Self> {
        let start = Url::parse(&config.url)
            .with_context(|| format!("Invalid website url: {}", config.url))?;
        if !matches!(start.scheme(), "http" | "https") {
            anyhow::bail!("Website url must be http or https: {}", config.url);
        }
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        let include = build_globset(&config.include)?;
        let exclude = build_globset(&config.exclude)?;
        Ok(Self {
            config,
            start,
            client,
            include,
            exclude,
            pages: OnceCell::new(),
        })
    }

    /// Whether a page at `path` is indexed. Does not affect traversal.
    fn should_index(&self, path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(path),
            None => true,
        }
    }

    async fn pages(&self) -> Result<&Vec<FileEntry>> {
        self.pages.get_or_try_init(|| self.crawl()).await
    }

    async fn robots(&self) -> Robots {
        let Ok(url) = self.start.join("/robots.txt") else {
            return Robots::default();
        };
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => Robots::parse(&body),
                Err(_) => Robots::default(),
            },
            _ => Robots::default(),
        }
    }

    async fn crawl(&self) -> Result<Vec<FileEntry>> {
        let robots = self.robots().await;
        let mut queue = VecDeque::from([(self.start.clone(), 0usize)]);
        let mut visited = HashSet::from([normalize(&self.start)]);
        let mut seen_paths = HashSet::new();
        let mut pages = Vec::new();
        let mut fetched = 0usize;

        while let Some((url, depth)) = queue.pop_front() {
            if fetched >= self.config.max_pages {
                break;
            }
            if !robots.allows(url.path()) {
                debug!(url = %url, "disallowed by robots.txt");
                continue;
            }
            if fetched > 0 && self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
            fetched += 1;

            let html = match self.fetch_page(&url).await {
                Ok(Some(html)) => html,
                Ok(None) => continue,
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to fetch page");
                    continue;
                }
            };

            if depth < self.config.max_depth {
                for link in extract_links(&url, &html) {
                    if link.origin() != self.start.origin() {
                        continue;
                    }
                    if visited.insert(normalize(&link)) {
                        queue.push_back((link, depth + 1));
                    }
                }
            }

            if !self.should_index(url.path()) {
                continue;
            }
            let path = page_path(&url);
            if !seen_paths.insert(path.clone()) {
                continue;
            }

            let contents = render_page(&html);
            let result = should_filter_file(FilterInput {
                path: &path,
                content: contents.as_bytes(),
                max_file_size: Some(self.config.max_file_size),
            });
            if result.filtered {
                debug!(url = %url, reason = result.reason.as_deref().unwrap_or(""), "filtered");
                continue;
            }
            pages.push(FileEntry::new(path, contents));
        }

        pages.sort_by(|a, b| a.path.cmp(&b.path));
        info!(url = %self.start, fetched, indexed = pages.len(), "crawl finished");
        Ok(pages)
    }

    /// HTML body of `url`, or `None` for non-HTML responses.
    async fn fetch_page(&self, url: &Url) -> Result<Option<String>> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("HTTP {}", resp.status());
        }
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);
        if !is_html {
            return Ok(None);
        }
        Ok(Some(resp.text().await?))
    }
}

#[async_trait]
impl Source for WebsiteSource {
    fn source_type(&self) -> SourceType {
        SourceType::Website
    }

    async fn fetch_all(&self) -> Result<Vec<FileEntry>> {
        Ok(self.pages().await?.clone())
    }

    async fn fetch_changes(&self, _previous: &SourceMetadata) -> Result<ChangeDetection> {
        Ok(ChangeDetection::unsupported(
            "websites have no stable identity across crawls",
        ))
    }

    async fn metadata(&self) -> Result<SourceMetadata> {
        Ok(SourceMetadata {
            source_type: SourceType::Website,
            identifier: self.config.url.clone(),
            git_ref: None,
            synced_at: Utc::now(),
        })
    }

    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        let Some(prefix) = dir_prefix(dir) else {
            return Ok(Vec::new());
        };
        let pages = self.pages().await?;
        Ok(listing_under(pages.iter().map(|p| p.path.as_str()), &prefix))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        if has_parent_segment(path) {
            return Ok(None);
        }
        let path = path.trim_start_matches('/');
        let pages = self.pages().await?;
        Ok(pages
            .iter()
            .find(|p| p.path == path)
            .map(|p| p.contents.clone()))
    }
}

// ============ robots.txt ============

/// `Disallow` prefixes for `User-agent: *`.
#[derive(Debug, Default)]
struct Robots {
    disallow: Vec<String>,
}

impl Robots {
    fn parse(body: &str) -> Self {
        let mut disallow = Vec::new();
        let mut in_wildcard_group = false;
        let mut last_was_agent = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    if !last_was_agent {
                        in_wildcard_group = false;
                    }
                    if value == "*" {
                        in_wildcard_group = true;
                    }
                    last_was_agent = true;
                }
                "disallow" => {
                    last_was_agent = false;
                    if in_wildcard_group && !value.is_empty() {
                        disallow.push(value.to_string());
                    }
                }
                _ => last_was_agent = false,
            }
        }
        Self { disallow }
    }

    fn allows(&self, path: &str) -> bool {
        !self.disallow.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

// ============ HTML helpers ============

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(Some(builder.build()?))
}

fn normalize(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn extract_links(page: &Url, html: &str) -> Vec<Url> {
    LINK_RE
        .captures_iter(html)
        .filter_map(|cap| {
            let href = cap.get(1)?.as_str().trim();
            if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
                return None;
            }
            let mut url = page.join(href).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            url.set_fragment(None);
            Some(url)
        })
        .collect()
}

/// File path for a page: `/` is `index`, a trailing `/` gets `index`.
fn page_path(url: &Url) -> String {
    let path = url.path();
    if path == "/" || path.is_empty() {
        return "index".to_string();
    }
    let trimmed = path.trim_start_matches('/');
    if trimmed.ends_with('/') {
        format!("{}index", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn html_title(html: &str) -> Option<String> {
    let raw = TITLE_RE.captures(html)?.get(1)?.as_str();
    let title = decode_entities(raw.trim());
    (!title.is_empty()).then_some(title)
}

fn html_to_text(html: &str) -> String {
    let without_noise = DROP_RE.replace_all(html, "");
    let with_breaks = BREAK_RE.replace_all(&without_noise, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);

    let mut out = String::new();
    let mut blank = false;
    for line in decoded.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank = !out.is_empty();
            continue;
        }
        if blank {
            out.push('\n');
            blank = false;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn render_page(html: &str) -> String {
    let text = html_to_text(html);
    match html_title(html) {
        Some(title) => format!("# {}\n\n{}", title, text),
        None => text,
    }
}
