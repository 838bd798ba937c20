//! Wikipedia lookup tool
//!
//! Searches the MediaWiki API and returns plain-text extracts of the top
//! matches, capped in length so a single lookup cannot flood the model's
//! context.

use async_trait::async_trait;
use ensemble_core::{Result, Tool, ToolResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const API_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Number of pages fetched per lookup
const TOP_K_RESULTS: usize = 3;

/// Cap on the total extract text returned
const MAX_CONTENT_LENGTH: usize = 4000;

/// Wikipedia query tool
pub struct WikipediaTool {
    client: Client,
}

impl WikipediaTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// Create with custom client (for testing)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Find the titles of the top matching pages
    async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}?action=query&list=search&srsearch={}&srlimit={}&format=json",
            API_URL,
            urlencoding::encode(query),
            TOP_K_RESULTS
        );

        let response: SearchResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                ensemble_core::Error::ToolExecution(format!("Wikipedia request failed: {}", e))
            })?
            .json()
            .await
            .map_err(|e| {
                ensemble_core::Error::ToolExecution(format!(
                    "Failed to parse Wikipedia search response: {}",
                    e
                ))
            })?;

        Ok(response
            .query
            .search
            .into_iter()
            .map(|r| r.title)
            .collect())
    }

    /// Fetch plain-text extracts for the given titles
    async fn fetch_extracts(&self, titles: &[String]) -> Result<Vec<(String, String)>> {
        let url = format!(
            "{}?action=query&prop=extracts&explaintext=1&exintro=1&titles={}&format=json",
            API_URL,
            urlencoding::encode(&titles.join("|"))
        );

        let response: ExtractResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                ensemble_core::Error::ToolExecution(format!("Wikipedia request failed: {}", e))
            })?
            .json()
            .await
            .map_err(|e| {
                ensemble_core::Error::ToolExecution(format!(
                    "Failed to parse Wikipedia extract response: {}",
                    e
                ))
            })?;

        let mut extracts: Vec<(String, String)> = response
            .query
            .pages
            .into_values()
            .filter(|p| !p.extract.is_empty())
            .map(|p| (p.title, p.extract))
            .collect();

        // the pages map comes back unordered; restore search ranking
        extracts.sort_by_key(|(title, _)| titles.iter().position(|t| t == title));
        Ok(extracts)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: SearchQuery,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    query: ExtractQuery,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    extract: String,
}

/// Format page extracts, truncating to the content cap
fn format_pages(pages: &[(String, String)], query: &str) -> String {
    if pages.is_empty() {
        return format!("No Wikipedia pages found for '{}'.", query);
    }

    let mut output = String::new();
    for (title, extract) in pages {
        let section = format!("Page: {}\nSummary: {}\n\n", title, extract);
        if output.len() + section.len() > MAX_CONTENT_LENGTH {
            let remaining = MAX_CONTENT_LENGTH.saturating_sub(output.len());
            output.push_str(&truncate_at_char_boundary(&section, remaining));
            break;
        }
        output.push_str(&section);
    }

    output.trim_end().to_string()
}

fn truncate_at_char_boundary(text: &str, mut limit: usize) -> &str {
    if limit >= text.len() {
        return text;
    }
    while limit > 0 && !text.is_char_boundary(limit) {
        limit -= 1;
    }
    &text[..limit]
}

/// Lookup input parameters
#[derive(Debug, Deserialize)]
struct WikipediaInput {
    /// The topic to look up
    query: String,
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Look up a topic on Wikipedia. Returns plain-text summaries of the top matching pages."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The topic to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let input: WikipediaInput = serde_json::from_value(input).map_err(|e| {
            ensemble_core::Error::ToolExecution(format!("Invalid input parameters: {}", e))
        })?;

        if input.query.trim().is_empty() {
            return Ok(ToolResult::error("Query cannot be empty"));
        }

        tracing::info!(query = %input.query, "Executing Wikipedia lookup");

        let titles = self.search_titles(&input.query).await?;
        if titles.is_empty() {
            return Ok(ToolResult::success(format!(
                "No Wikipedia pages found for '{}'.",
                input.query
            )));
        }

        let pages = self.fetch_extracts(&titles).await?;
        Ok(ToolResult::success(format_pages(&pages, &input.query)))
    }
}

impl Default for WikipediaTool {
    fn default() -> Self {
        Self::new()
    }
}
