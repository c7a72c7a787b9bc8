//! Webpage scraper: title, visible paragraph text and absolute image URLs.

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::info;

use crate::error::{QuillError, Result};
use crate::tool::{ParamSpec, ParamType, Tool, ToolArguments};

use super::{html_decode, truncate_chars};

const TOOL_NAME: &str = "scrape_webpage";
const MAX_IMAGES: usize = 20;

static HIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>").unwrap()
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").unwrap());
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub url: String,
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
    pub images: Vec<String>,
}

impl PageContent {
    /// Extracts the page parts from raw HTML. Relative image sources are
    /// resolved against `base`; `data:` URIs are dropped.
    pub fn parse(base: &Url, html: &str) -> Self {
        let visible = HIDDEN_RE.replace_all(html, " ");

        let title = TITLE_RE
            .captures(&visible)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty());

        let paragraphs = PARAGRAPH_RE
            .captures_iter(&visible)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty())
            .collect();

        let mut images: Vec<String> = Vec::new();
        for captures in IMAGE_RE.captures_iter(&visible) {
            let src = html_decode(captures[1].trim());
            if src.starts_with("data:") {
                continue;
            }
            if let Ok(resolved) = base.join(&src) {
                let resolved = resolved.to_string();
                if !images.contains(&resolved) {
                    images.push(resolved);
                }
            }
            if images.len() >= MAX_IMAGES {
                break;
            }
        }

        Self {
            url: base.to_string(),
            title,
            paragraphs,
            images,
        }
    }

    /// Plain-text rendering handed to the model, content capped at
    /// `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Title: {}", self.title.as_deref().unwrap_or("(none)"));
        let _ = writeln!(out, "URL: {}", self.url);

        out.push_str("\nContent:\n");
        if self.paragraphs.is_empty() {
            out.push_str("(no paragraph text found)\n");
        } else {
            out.push_str(&truncate_chars(&self.paragraphs.join("\n"), max_chars));
            out.push('\n');
        }

        out.push_str("\nImages:\n");
        if self.images.is_empty() {
            out.push_str("(none)\n");
        }
        for image in &self.images {
            let _ = writeln!(out, "- {image}");
        }
        out
    }
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    let decoded = html_decode(&stripped);
    SPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

pub struct ScrapeWebpageTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl ScrapeWebpageTool {
    pub fn new(client: reqwest::Client, max_chars: usize) -> Self {
        Self { client, max_chars }
    }

    pub async fn scrape(&self, url: &str) -> Result<PageContent> {
        let target = Url::parse(url).map_err(|e| QuillError::InvalidArguments {
            name: TOOL_NAME.into(),
            reason: format!("`{url}` is not a valid URL: {e}"),
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(QuillError::InvalidArguments {
                name: TOOL_NAME.into(),
                reason: format!("unsupported URL scheme `{}`", target.scheme()),
            });
        }
        info!(url, "scraping webpage");

        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(QuillError::tool(TOOL_NAME, format!("{url} answered {status}")));
        }

        // Redirects change the base for relative image URLs.
        let base = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;
        Ok(PageContent::parse(&base, &html))
    }
}

#[async_trait]
impl Tool for ScrapeWebpageTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Scrape a webpage and return its title, main paragraph text and image URLs."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "url",
            ParamType::String,
            "Absolute http(s) URL of the page",
        )]
    }

    async fn call(&self, args: ToolArguments) -> Result<String> {
        let page = self.scrape(args.require_str("url")?).await?;
        Ok(page.render(self.max_chars))
    }
}
