//! Exa web search restricted to recently published pages.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::ToolsConfig;
use crate::error::{QuillError, Result};
use crate::tool::{ParamSpec, ParamType, Tool, ToolArguments};

use super::truncate_chars;

const TOOL_NAME: &str = "exa_search";
const RESULT_TEXT_CHARS: usize = 1_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaResult {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

pub struct ExaSearchTool {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    window_days: i64,
    default_results: u64,
}

impl ExaSearchTool {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, cfg: &ToolsConfig) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: cfg.exa_endpoint.trim_end_matches('/').to_string(),
            window_days: cfg.search_window_days,
            default_results: cfg.default_num_results,
        }
    }

    pub async fn search(&self, query: &str, num_results: u64) -> Result<Vec<ExaResult>> {
        let since = (Utc::now() - Duration::days(self.window_days))
            .format("%Y-%m-%d")
            .to_string();
        info!(query, num_results, since = %since, "searching Exa");

        let response = self
            .client
            .post(format!("{}/search", self.endpoint))
            .header("x-api-key", &self.api_key)
            .json(&json!({
                "query": query,
                "numResults": num_results,
                "startPublishedDate": since,
                "contents": { "text": true, "highlights": true }
            }))
            .send()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuillError::tool(
                TOOL_NAME,
                format!("Exa answered {status}: {}", body.trim()),
            ));
        }

        let parsed: ExaResponse = response
            .json()
            .await
            .map_err(|e| QuillError::tool(TOOL_NAME, e))?;
        Ok(parsed.results)
    }
}

/// Renders results as numbered plain text for the model.
pub fn format_results(query: &str, results: &[ExaResult]) -> String {
    if results.is_empty() {
        return format!("No recent results found for \"{query}\".");
    }

    let mut out = format!("Search results for \"{query}\":\n");
    for (index, result) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "\n{}. {}\n   URL: {}",
            index + 1,
            result.title.as_deref().unwrap_or("(untitled)"),
            result.url
        );
        if let Some(date) = &result.published_date {
            let _ = writeln!(out, "   Published: {date}");
        }
        if let Some(author) = result.author.as_deref().filter(|a| !a.is_empty()) {
            let _ = writeln!(out, "   Author: {author}");
        }
        if !result.highlights.is_empty() {
            let _ = writeln!(out, "   Highlights: {}", result.highlights.join(" ... "));
        }
        if let Some(text) = result.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "   Text: {}", truncate_chars(text, RESULT_TEXT_CHARS));
        }
    }
    out
}

#[async_trait]
impl Tool for ExaSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web with Exa and return recent results (title, URL, date, highlights and text). \
         Use it to find the latest, most relevant pages about a topic."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("query", ParamType::String, "What to search for"),
            ParamSpec::optional("num_results", ParamType::Integer, "How many results to return")
                .with_default(json!(self.default_results)),
        ]
    }

    async fn call(&self, args: ToolArguments) -> Result<String> {
        let query = args.require_str("query")?;
        let num_results = args.u64("num_results").unwrap_or(self.default_results).clamp(1, 25);
        let results = self.search(query, num_results).await?;
        Ok(format_results(query, &results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: &str) -> ExaResult {
        ExaResult {
            title: Some(title.into()),
            url: url.into(),
            published_date: Some("2026-10-15".into()),
            author: None,
            text: Some("Sea otters hold hands while sleeping.".into()),
            highlights: vec!["hold hands".into()],
        }
    }

    #[test]
    fn formats_results_as_text() {
        let text = format_results(
            "otters",
            &[
                result("Otter facts", "https://a.example/otters"),
                result("Otters in the news", "https://b.example/news"),
            ],
        );
        assert!(text.starts_with("Search results for \"otters\":"));
        assert!(text.contains("1. Otter facts\n   URL: https://a.example/otters"));
        assert!(text.contains("2. Otters in the news"));
        assert!(text.contains("Highlights: hold hands"));
        assert!(text.contains("Published: 2026-10-15"));
    }

    #[test]
    fn empty_results_are_reported() {
        assert_eq!(
            format_results("nothing", &[]),
            "No recent results found for \"nothing\"."
        );
    }

    #[cfg(feature = "server")]
    mod http {
        use super::super::*;
        use crate::tools::test_support::serve;
        use axum::{http::HeaderMap, routing::post, Json, Router};
        use serde_json::Value;

        #[tokio::test]
        async fn sends_key_window_and_count() {
            let router = Router::new().route(
                "/search",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(headers["x-api-key"], "exa-key");
                    assert_eq!(body["numResults"], 2);
                    assert_eq!(body["contents"]["highlights"], true);
                    assert!(body["startPublishedDate"].as_str().unwrap().len() == 10);
                    Json(json!({"results": [
                        {"title": "Otters", "url": "https://otters.example", "highlights": ["cute"]}
                    ]}))
                }),
            );
            let base = serve(router).await;
            let cfg = ToolsConfig {
                exa_endpoint: base,
                ..ToolsConfig::default()
            };
            let tool = ExaSearchTool::new(reqwest::Client::new(), "exa-key", &cfg);

            let args = tool
                .spec()
                .validate(json!({"query": "otters", "num_results": 2}))
                .unwrap();
            let text = tool.call(args).await.unwrap();
            assert!(text.contains("1. Otters\n   URL: https://otters.example"));
        }

        #[tokio::test]
        async fn api_errors_become_tool_failures() {
            let router = Router::new().route(
                "/search",
                post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
            );
            let base = serve(router).await;
            let cfg = ToolsConfig {
                exa_endpoint: base,
                ..ToolsConfig::default()
            };
            let tool = ExaSearchTool::new(reqwest::Client::new(), "wrong", &cfg);

            let err = tool.search("otters", 1).await.unwrap_err();
            assert!(matches!(err, QuillError::ToolExecution { .. }));
            assert!(err.to_string().contains("401"));
        }
    }
}
