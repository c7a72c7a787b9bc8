use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::tool::ToolSpec;

const GUIDELINES: &str = r#"Use these tools strategically to gather reliable information and enrich the blog content.

Your output must follow these guidelines:
1. Use semantic HTML tags: <h1>, <h2>, <p>, <img>, etc.
2. Add inline CSS styling inside a <style> block in <head> to control layout, typography, image sizes (max-width: 100%; height: auto), padding, and margins.
3. Include at least 2 relevant images using <img src="image_url">, choosing the best images from scraped content.
4. Follow blogging best practices: clear introduction, logical subheadings, short paragraphs, good readability, conclusion.
5. Ensure valid HTML structure.

Example output structure:

```html
<!DOCTYPE html>
<html>
<head>
  <title>Blog Title</title>
  <style>
     body { font-family: Arial, sans-serif; line-height: 1.6; max-width: 800px; margin: auto; padding: 20px; }
     img { max-width: 100%; height: auto; display: block; margin: 20px 0; }
     h1, h2 { color: #333; }
     p { color: #555; }
  </style>
</head>
<body>
  <h1>Blog Title</h1>
  <p>Introduction paragraph...</p>
  <h2>Subheading 1</h2>
  <p>Content paragraph...</p>
  <img src="image_url_1">
  <h2>Subheading 2</h2>
  <p>More content...</p>
  <img src="image_url_2">
  <p>Conclusion paragraph...</p>
</body>
</html>
```"#;

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:html|HTML)?\s*\n(.*?)```").unwrap());

/// System prompt for the blog-writing assistant, listing every tool the model
/// may call.
pub fn blog_writer_prompt(tools: &[ToolSpec]) -> String {
    let mut prompt = String::from(
        "You are an AI research assistant and professional blog writer. Your task is to \
         create high-quality, well-researched, original blog posts in HTML format with \
         embedded CSS styling.\n\n",
    );

    if tools.is_empty() {
        prompt.push_str("No tools are available; rely on your own knowledge.\n\n");
    } else {
        prompt.push_str("You have access to the following tools:\n\n");
        for (index, tool) in tools.iter().enumerate() {
            let params = tool
                .parameters
                .iter()
                .map(|p| format!("{}: {}", p.name, p.kind))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                prompt,
                "{}. `{}({})`\n   -> {}\n",
                index + 1,
                tool.name,
                params,
                tool.description
            );
        }
    }

    prompt.push_str(GUIDELINES);
    prompt
}

/// Pulls the HTML document out of a model reply. Fenced ```html blocks win,
/// then a bare `<!DOCTYPE html>`/`<html>` document. `None` when the reply has
/// no HTML.
pub fn extract_html(reply: &str) -> Option<String> {
    for captures in FENCED_RE.captures_iter(reply) {
        let body = captures[1].trim();
        if looks_like_html(body) {
            return Some(body.to_string());
        }
    }

    let lower = reply.to_ascii_lowercase();
    let start = lower
        .find("<!doctype html")
        .or_else(|| lower.find("<html"))?;
    let end = lower
        .rfind("</html>")
        .map(|pos| pos + "</html>".len())
        .unwrap_or(reply.len());
    if end <= start {
        return None;
    }
    Some(reply[start..end].trim().to_string())
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<!doctype html") || lower.contains("<body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParamSpec, ParamType};

    #[test]
    fn prompt_lists_registered_tools() {
        let tools = vec![
            ToolSpec::new("exa_search", "Search the web for recent pages")
                .with_param(ParamSpec::required("query", ParamType::String, "Search query"))
                .with_param(ParamSpec::optional(
                    "num_results",
                    ParamType::Integer,
                    "How many results",
                )),
            ToolSpec::new("scrape_webpage", "Scrape a page"),
        ];

        let prompt = blog_writer_prompt(&tools);
        assert!(prompt.contains("1. `exa_search(query: string, num_results: integer)`"));
        assert!(prompt.contains("2. `scrape_webpage()`"));
        assert!(prompt.contains("at least 2 relevant images"));
    }

    #[test]
    fn prompt_without_tools_says_so() {
        assert!(blog_writer_prompt(&[]).contains("No tools are available"));
    }

    #[test]
    fn extracts_fenced_html() {
        let reply = "Here is your post:\n```html\n<!DOCTYPE html>\n<html><body><h1>Otters</h1></body></html>\n```\nEnjoy!";
        assert_eq!(
            extract_html(reply).as_deref(),
            Some("<!DOCTYPE html>\n<html><body><h1>Otters</h1></body></html>")
        );
    }

    #[test]
    fn extracts_bare_html() {
        let reply = "Sure! <html><head></head><body><p>Hi</p></body></html> Done.";
        assert_eq!(
            extract_html(reply).as_deref(),
            Some("<html><head></head><body><p>Hi</p></body></html>")
        );
    }

    #[test]
    fn plain_text_has_no_html() {
        assert_eq!(extract_html("Just a sentence about otters."), None);
        assert_eq!(extract_html("```rust\nfn main() {}\n```"), None);
    }
}
