//! Website scraping tool
//!
//! Fetches a page and returns its visible text, with script and style
//! content removed and whitespace collapsed.

use super::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_MAX_LENGTH: usize = 2000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ScrapeWebsiteTool {
    client: reqwest::Client,
}

impl Default for ScrapeWebsiteTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(concat!("archer/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeInput {
    url: String,
    #[serde(default)]
    max_length: Option<usize>,
}

#[async_trait]
impl Tool for ScrapeWebsiteTool {
    fn name(&self) -> &'static str {
        "scrape_website"
    }

    fn description(&self) -> String {
        "Fetch a web page and return its readable text content.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http(s) URL of the page"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters of text to return (default 2000)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: ScrapeInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let url = match reqwest::Url::parse(&input.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => return ToolOutput::error("Invalid URL provided."),
        };

        let fetch = async {
            let response = self.client.get(url.clone()).send().await?;
            response.error_for_status()?.text().await
        };

        let body = tokio::select! {
            () = ctx.cancel.cancelled() => return ToolOutput::error("Fetch cancelled"),
            result = fetch => match result {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Website fetch failed");
                    return ToolOutput::error(format!("Error accessing website {url}: {e}"));
                }
            },
        };

        let text = truncate(
            &extract_text(&body),
            input.max_length.unwrap_or(DEFAULT_MAX_LENGTH),
        );
        ToolOutput::success(format!("Content from {url}:\n\n{text}"))
    }
}

/// Strip markup, dropping the contents of `<script>` and `<style>` elements
fn extract_text(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len() / 2);
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];
        if rest.starts_with('<') {
            let tag = &lower[i..];
            let skip_from = ["script", "style"]
                .iter()
                .find(|name| tag[1..].starts_with(**name))
                .and_then(|name| tag.find(&format!("</{name}")))
                .map_or(i, |close| i + close);
            match html[skip_from..].find('>') {
                Some(end) => i = skip_from + end + 1,
                None => break,
            }
            out.push(' ');
        } else {
            let next = rest.find('<').unwrap_or(rest.len());
            out.push_str(&rest[..next]);
            i += next;
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
