//! Built-in research tools for the blog writer:
//! - Exa: recent web search
//! - Scraper: page title, paragraphs and image URLs
//! - Wikipedia: article summary and plain-text content

use std::time::Duration;

use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::error::{QuillError, Result};
use crate::tool::ToolRegistry;

pub mod exa;
pub mod scraper;
pub mod wikipedia;

pub use exa::ExaSearchTool;
pub use scraper::{PageContent, ScrapeWebpageTool};
pub use wikipedia::WikipediaTool;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Registers the built-in tools enabled by `cfg`. `exa_search` needs an API
/// key and is skipped without one.
pub fn register_builtin_tools(registry: &mut ToolRegistry, cfg: &ToolsConfig) -> Result<()> {
    if !cfg.builtin {
        return Ok(());
    }

    let client = http_client(&cfg.user_agent)?;
    match cfg.exa_api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => registry.register(ExaSearchTool::new(client.clone(), key, cfg))?,
        None => warn!("EXA_API_KEY not set; exa_search is disabled"),
    }
    registry.register(ScrapeWebpageTool::new(client.clone(), cfg.max_content_chars))?;
    registry.register(WikipediaTool::new(client, cfg))?;

    info!(tools = ?registry.names(), "built-in tools registered");
    Ok(())
}

pub(crate) fn http_client(user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(user_agent)
        .build()
        .map_err(|e| QuillError::Config(format!("failed to build HTTP client: {e}")))
}

/// Simple HTML entity decoding
pub(crate) fn html_decode(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Cuts `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_common_entities() {
        assert_eq!(
            html_decode("Tom &amp; Jerry&#39;s &quot;show&quot; &lt;b&gt;"),
            "Tom & Jerry's \"show\" <b>"
        );
        assert_eq!(html_decode("&amp;lt;"), "&lt;");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé... [truncated]");
    }

    #[test]
    fn exa_is_skipped_without_a_key() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, &ToolsConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["scrape_webpage", "scrape_wikipedia"]);

        let mut registry = ToolRegistry::new();
        let cfg = ToolsConfig {
            exa_api_key: Some("exa-key".into()),
            ..ToolsConfig::default()
        };
        register_builtin_tools(&mut registry, &cfg).unwrap();
        assert_eq!(
            registry.names(),
            vec!["exa_search", "scrape_webpage", "scrape_wikipedia"]
        );
    }

    #[test]
    fn builtin_tools_can_be_disabled() {
        let mut registry = ToolRegistry::new();
        let cfg = ToolsConfig {
            builtin: false,
            ..ToolsConfig::default()
        };
        register_builtin_tools(&mut registry, &cfg).unwrap();
        assert!(registry.is_empty());
    }
}
