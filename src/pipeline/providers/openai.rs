// src/pipeline/providers/openai.rs
//! OpenAI summarizer. The model reports each snippet through a `save_news`
//! function tool; every tool call becomes one candidate item.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::pipeline::types::{ContentRecord, Summarizer};
use crate::pipeline::{contract_violation, MAX_DESCRIPTION_WORDS, MAX_TITLE_WORDS};
use crate::store::NewsItem;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const SAVE_TOOL: &str = "save_news";
/// Prompt budget for article text, across all records.
const MAX_PROMPT_TEXT_CHARS: usize = 24_000;

const SYSTEM_PROMPT: &str = "You extract short, factual news snippets from scraped articles. \
For every distinct newsworthy event call the save_news tool once. \
Titles have at most 5 words. Descriptions have at most 15 words and must contain concrete facts \
(names, numbers, places, dates). Skip opinion pieces, ads, and anything you cannot state concretely. \
Never save an event whose title is in the excluded list.";

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("news-pulse/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(90))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// User message: articles first, then the exclusion list (if any).
pub fn build_prompt(records: &[ContentRecord], exclusion_titles: &[String]) -> String {
    let mut out = String::new();
    let per_record = MAX_PROMPT_TEXT_CHARS / records.len().max(1);
    for (i, r) in records.iter().enumerate() {
        let text: String = r.text.chars().take(per_record).collect();
        out.push_str(&format!(
            "### Article {}: {}\nSource: {}\n{}\n\n",
            i + 1,
            r.title,
            r.reference,
            text
        ));
    }
    if !exclusion_titles.is_empty() {
        out.push_str("Already collected (do not save again):\n");
        for t in exclusion_titles {
            out.push_str("- ");
            out.push_str(t);
            out.push('\n');
        }
    }
    out
}

fn save_tool_schema() -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": SAVE_TOOL,
            "description": "Invoke this tool to save news snippets",
            "parameters": {
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": format!("The title of the news snippet, at most {MAX_TITLE_WORDS} words")
                    },
                    "description": {
                        "type": "string",
                        "description": format!("The description of the news snippet, at most {MAX_DESCRIPTION_WORDS} words with concrete facts")
                    }
                },
                "required": ["title", "description"],
                "additionalProperties": false
            }
        }
    })
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}
#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}
#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}
#[derive(Deserialize)]
struct SaveArgs {
    title: String,
    description: String,
}

/// Candidate items from a chat completion body. Malformed tool arguments
/// and contract violations are dropped, not errors.
pub fn parse_tool_calls(body: &str) -> Result<Vec<NewsItem>> {
    let resp: Resp = serde_json::from_str(body).context("parsing chat completion")?;
    let mut out = Vec::new();
    for call in resp
        .choices
        .into_iter()
        .flat_map(|c| c.message.tool_calls)
        .filter(|c| c.function.name == SAVE_TOOL)
    {
        let Ok(args) = serde_json::from_str::<SaveArgs>(&call.function.arguments) else {
            tracing::debug!(target: "pipeline", "unparseable save_news arguments dropped");
            continue;
        };
        let item = NewsItem::new(args.title.trim(), args.description.trim());
        if let Some(reason) = contract_violation(&item) {
            tracing::debug!(target: "pipeline", title = %item.title, reason, "summarizer item dropped");
            continue;
        }
        out.push(item);
    }
    Ok(out)
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        records: &[ContentRecord],
        exclusion_titles: &[String],
    ) -> Result<Vec<NewsItem>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let req = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(records, exclusion_titles) }
            ],
            "tools": [save_tool_schema()],
            "tool_choice": "auto"
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai request")?;
        let status = resp.status();
        if !status.is_success() {
            let msg = resp.text().await.unwrap_or_default();
            bail!("openai returned {status}: {}", msg.chars().take(200).collect::<String>());
        }
        let body = resp.text().await.context("openai body")?;
        let items = parse_tool_calls(&body)?;
        tracing::info!(target: "pipeline", model = %self.model, items = items.len(), "summarizer answered");
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
