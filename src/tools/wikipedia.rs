//! Wikipedia lookup.
//!
//! Resolves a topic to an article through the REST summary endpoint, falling
//! back to the search API when the topic is not an exact title, then fetches
//! the plain-text article body.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::error::{QuillError, Result};
use crate::tool::{ParamSpec, ParamType, Tool, ToolArguments};

use super::truncate_chars;

const TOOL_NAME: &str = "scrape_wikipedia";

#[derive(Debug, Clone, PartialEq)]
pub struct WikipediaArticle {
    pub title: String,
    pub summary: String,
    pub content: String,
    pub url: String,
}

impl WikipediaArticle {
    pub fn render(&self, max_chars: usize) -> String {
        format!(
            "Title: {}\nURL: {}\n\nSummary:\n{}\n\nContent:\n{}\n",
            self.title,
            self.url,
            self.summary,
            truncate_chars(&self.content, max_chars)
        )
    }
}

pub struct WikipediaTool {
    client: reqwest::Client,
    endpoint: String,
    max_chars: usize,
}

impl WikipediaTool {
    pub fn new(client: reqwest::Client, cfg: &ToolsConfig) -> Self {
        Self {
            client,
            endpoint: cfg.wikipedia_endpoint.trim_end_matches('/').to_string(),
            max_chars: cfg.max_content_chars,
        }
    }

    pub async fn lookup(&self, topic: &str) -> Result<WikipediaArticle> {
        info!(topic, "looking up Wikipedia");

        let summary = match self.fetch_summary(topic).await? {
            Some(summary) => summary,
            None => {
                let title = self.search_title(topic).await?.ok_or_else(|| {
                    QuillError::tool(TOOL_NAME, format!("No Wikipedia article found for `{topic}`"))
                })?;
                debug!(topic, title = %title, "resolved topic through search");
                self.fetch_summary(&title).await?.ok_or_else(|| {
                    QuillError::tool(TOOL_NAME, format!("Wikipedia page `{title}` could not be loaded"))
                })?
            }
        };

        let title = summary["title"].as_str().unwrap_or(topic).to_string();
        let url = summary["content_urls"]["desktop"]["page"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "{}/wiki/{}",
                    self.endpoint,
                    urlencoding::encode(&title.replace(' ', "_"))
                )
            });
        let summary_text = summary["extract"]
            .as_str()
            .unwrap_or("No summary available")
            .to_string();
        let content = self.fetch_content(&title).await?.unwrap_or_else(|| summary_text.clone());

        Ok(WikipediaArticle {
            title,
            summary: summary_text,
            content,
            url,
        })
    }

    /// `None` when the title does not resolve to a standard article.
    async fn fetch_summary(&self, title: &str) -> Result<Option<Value>> {
        let url = format!(
            "{}/api/rest_v1/page/summary/{}",
            self.endpoint,
            urlencoding::encode(title)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;

        if !response.status().is_success() {
            return Ok(None);
        }
        let json: Value = response.json().await.map_err(|e| QuillError::tool(TOOL_NAME, e))?;
        // Disambiguation pages carry no usable article body.
        if json["type"].as_str() == Some("disambiguation") {
            return Ok(None);
        }
        Ok(Some(json))
    }

    async fn search_title(&self, topic: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/w/api.php?action=query&list=search&srsearch={}&format=json&srlimit=1",
            self.endpoint,
            urlencoding::encode(topic)
        );
        let json: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?
            .json()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;

        Ok(json["query"]["search"]
            .as_array()
            .and_then(|results| results.first())
            .and_then(|first| first["title"].as_str())
            .map(str::to_string))
    }

    async fn fetch_content(&self, title: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/w/api.php?action=query&prop=extracts&explaintext=1&redirects=1&format=json&titles={}",
            self.endpoint,
            urlencoding::encode(title)
        );
        let json: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?
            .json()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;

        Ok(json["query"]["pages"]
            .as_object()
            .and_then(|pages| pages.values().next())
            .and_then(|page| page["extract"].as_str())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Retrieve the summary, full plain-text content and URL of the Wikipedia article for a topic."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "topic",
            ParamType::String,
            "Topic or article title to look up",
        )]
    }

    async fn call(&self, args: ToolArguments) -> Result<String> {
        let article = self.lookup(args.require_str("topic")?).await?;
        Ok(article.render(self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_part() {
        let article = WikipediaArticle {
            title: "Sea otter".into(),
            summary: "A marine mammal.".into(),
            content: "The sea otter is a marine mammal native to the North Pacific.".into(),
            url: "https://en.wikipedia.org/wiki/Sea_otter".into(),
        };
        let text = article.render(20);
        assert!(text.starts_with("Title: Sea otter\nURL: https://en.wikipedia.org/wiki/Sea_otter"));
        assert!(text.contains("Summary:\nA marine mammal."));
        assert!(text.contains("The sea otter is a m... [truncated]"));
    }

    #[cfg(feature = "server")]
    mod http {
        use super::*;
        use crate::tools::test_support::serve;
        use axum::{
            extract::{Path, Query},
            http::StatusCode,
            response::IntoResponse,
            routing::get,
            Json, Router,
        };
        use serde_json::json;
        use std::collections::HashMap;

        fn fake_wikipedia() -> Router {
            Router::new()
                .route(
                    "/api/rest_v1/page/summary/:title",
                    get(|Path(title): Path<String>| async move {
                        if title == "Sea otter" {
                            Json(json!({
                                "type": "standard",
                                "title": "Sea otter",
                                "extract": "The sea otter is a marine mammal."
                            }))
                            .into_response()
                        } else {
                            StatusCode::NOT_FOUND.into_response()
                        }
                    }),
                )
                .route(
                    "/w/api.php",
                    get(|Query(params): Query<HashMap<String, String>>| async move {
                        if params.get("list").map(String::as_str) == Some("search") {
                            let hits = if params["srsearch"].contains("otter") {
                                json!([{"title": "Sea otter"}])
                            } else {
                                json!([])
                            };
                            Json(json!({"query": {"search": hits}}))
                        } else {
                            Json(json!({"query": {"pages": {"123": {
                                "title": params["titles"],
                                "extract": "Sea otters live along the coasts of the North Pacific."
                            }}}}))
                        }
                    }),
                )
        }

        fn tool(base: String) -> WikipediaTool {
            let cfg = ToolsConfig {
                wikipedia_endpoint: base,
                ..ToolsConfig::default()
            };
            WikipediaTool::new(reqwest::Client::new(), &cfg)
        }

        #[tokio::test]
        async fn resolves_exact_titles() {
            let base = serve(fake_wikipedia()).await;
            let article = tool(base.clone()).lookup("Sea otter").await.unwrap();

            assert_eq!(article.title, "Sea otter");
            assert_eq!(article.summary, "The sea otter is a marine mammal.");
            assert!(article.content.contains("North Pacific"));
            assert_eq!(article.url, format!("{base}/wiki/Sea_otter"));
        }

        #[tokio::test]
        async fn falls_back_to_search() {
            let base = serve(fake_wikipedia()).await;
            let article = tool(base).lookup("otters").await.unwrap();
            assert_eq!(article.title, "Sea otter");
        }

        #[tokio::test]
        async fn unknown_topics_fail() {
            let base = serve(fake_wikipedia()).await;
            let err = tool(base).lookup("zzqx").await.unwrap_err();
            assert!(err.to_string().contains("No Wikipedia article found for `zzqx`"));
        }
    }
}
