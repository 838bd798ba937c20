//! Web search tool backed by the Tavily search API

use async_trait::async_trait;
use ensemble_core::{Result, Tool, ToolResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Web search tool for looking up current information
pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
}

impl WebSearchTool {
    /// Create a new WebSearchTool instance
    pub fn new() -> Self {
        let api_key = env::var("TAVILY_API_KEY").ok();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Create with custom client (for testing)
    pub fn with_client(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ensemble_core::Error::ToolExecution("TAVILY_API_KEY not configured".to_string())
        })?;

        let body = json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
        });

        let response = self
            .client
            .post(TAVILY_URL)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ensemble_core::Error::ToolExecution(format!("Tavily request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ensemble_core::Error::ToolExecution(format!(
                "Tavily API error ({}): {}",
                status, body
            )));
        }

        let tavily: TavilyResponse = response.json().await.map_err(|e| {
            ensemble_core::Error::ToolExecution(format!("Failed to parse Tavily response: {}", e))
        })?;

        if tavily.results.is_empty() {
            return Ok(format!(
                "No results found for '{}'. Try a different query.",
                query
            ));
        }

        Ok(format_results(&tavily.results, query))
    }
}

/// Tavily API response structure
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: Option<String>,
    url: String,
    #[serde(default)]
    content: String,
}

/// Format search results for the model
fn format_results(results: &[TavilyResult], query: &str) -> String {
    let mut output = format!("Search results for: \"{}\"\n\n", query);

    for (i, result) in results.iter().enumerate() {
        output.push_str(&format!(
            "## [{}] {}\n",
            i + 1,
            result.title.as_deref().unwrap_or("No title")
        ));
        output.push_str(&format!("URL: {}\n", result.url));
        output.push_str(&format!("{}\n\n", result.content));
    }

    output.push_str(&format!("Found {} results.\n", results.len()));
    output
}

/// Search input parameters
#[derive(Debug, Deserialize)]
struct SearchInput {
    /// The search query
    query: String,
    /// Maximum number of results (default: 5)
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    5
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns relevant results with titles, URLs, and content snippets."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to look up"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5, max: 10)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let input: SearchInput = serde_json::from_value(input).map_err(|e| {
            ensemble_core::Error::ToolExecution(format!("Invalid input parameters: {}", e))
        })?;

        if input.query.trim().is_empty() {
            return Ok(ToolResult::error("Query cannot be empty"));
        }

        let max_results = input.max_results.clamp(1, 10);

        tracing::info!(
            query = %input.query,
            max_results = max_results,
            "Executing web search"
        );

        self.search(&input.query, max_results)
            .await
            .map(ToolResult::success)
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}
