//! The text-generation collaborator.
//!
//! Every call can fail or time out. Callers that must always produce an
//! answer fall back to a fixed string; generated summaries and tech stacks
//! are only persisted when the call succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    config::GeneratorConfig,
    error::{Error, Result},
    text_util::truncate_chars,
};

pub const SUMMARY_INPUT_CHARS: usize = 4000;
pub const TECH_STACK_INPUT_CHARS: usize = 2000;
pub const EXPLAIN_INPUT_CHARS: usize = 3000;

pub const SUMMARY_FALLBACK: &str = "Analysis failed.";
pub const TECH_STACK_FALLBACK: &str = "Unknown";
pub const EXPLAIN_FALLBACK: &str = "Context analysis failed.";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
    async fn refine(&self, summary: &str, instruction: &str) -> Result<String>;
    async fn detect_tech_stack(&self, text: &str) -> Result<String>;
    async fn explain_match(&self, text: &str, term: &str) -> Result<String>;
    /// Raw reply to the intent-extraction prompt. Decoding it is the
    /// caller's job.
    async fn extract_intent(
        &self,
        query: &str,
        today: NaiveDate,
    ) -> Result<String>;
}

pub type SharedGenerator = Arc<dyn TextGenerator>;

pub async fn refine_or_fallback(
    generator: &dyn TextGenerator,
    summary: &str,
    instruction: &str,
) -> String {
    generator
        .refine(summary, instruction)
        .await
        .unwrap_or_else(|e| format!("Error refining: {e}"))
}

pub async fn explanation_or_fallback(
    generator: &dyn TextGenerator,
    text: &str,
    term: &str,
) -> String {
    generator.explain_match(text, term).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "match explanation failed");
        EXPLAIN_FALLBACK.to_string()
    })
}

pub mod prompts {
    use chrono::NaiveDate;

    use super::{
        EXPLAIN_INPUT_CHARS,
        SUMMARY_INPUT_CHARS,
        TECH_STACK_INPUT_CHARS,
        truncate_chars,
    };

    pub fn summary(text: &str) -> String {
        format!(
            "Analyze the following text and provide a specific, high-density summary.\n\n\
             RULES:\n\
             1. IF IT IS CODE/CONFIG: Identify the project name, key tech stack (versions), and the specific logic implemented.\n\
             2. IF IT IS PROSE/TEXT: Identify the core subject, key entities, and the purpose.\n\n\
             Output a single paragraph (max 50 words). Be direct.\n\n\
             --- CONTENT START ---\n{}\n--- CONTENT END ---\n",
            truncate_chars(text, SUMMARY_INPUT_CHARS)
        )
    }

    pub fn refine(summary: &str, instruction: &str) -> String {
        format!(
            "You are a text editor. Update the following summary based on the user's instruction.\n\
             Keep the tone professional. Output ONLY the new summary.\n\n\
             --- CURRENT SUMMARY ---\n{summary}\n\n\
             --- USER INSTRUCTION ---\n{instruction}\n"
        )
    }

    pub fn tech_stack(text: &str) -> String {
        format!(
            "Identify the programming language, data format (e.g., JSON, YAML, Markdown),\n\
             or software frameworks used in this file.\n\n\
             Output ONLY the specific names (comma separated).\n\
             Example: \"TypeScript, React, JSON\"\n\
             If it is standard prose/text with no code, say \"Plain Text\".\n\n\
             --- CONTENT ---\n{}\n",
            truncate_chars(text, TECH_STACK_INPUT_CHARS)
        )
    }

    pub fn explain(text: &str, term: &str) -> String {
        format!(
            "The user searched for the term: \"{term}\".\n\
             Explain specifically HOW and WHERE this term is used in the file below.\n\
             Keep it to 1 sentence.\n\n\
             --- CONTENT ---\n{}\n",
            truncate_chars(text, EXPLAIN_INPUT_CHARS)
        )
    }

    pub fn intent(query: &str, today: NaiveDate) -> String {
        format!(
            "You are a Search Intent Parser.\n\
             CONTEXT: Today is {}.\n\n\
             Return ONLY valid JSON (double quotes, no trailing commas). No markdown fences.\n\n\
             JSON SCHEMA:\n\
             {{\n  \"date_filter\": \"string or null\",\n  \"tech_filter\": \"string or null\",\n  \"keywords\": \"string or null\"\n}}\n\n\
             User Query: \"{query}\"\n",
            today.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Client for an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl OllamaClient {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let url = format!("{}/api/chat", self.config.url);
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generator(format!(
                "{url} returned {status}: {}",
                truncate_chars(&body, 200)
            )));
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply.message.content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.chat(&prompts::summary(text)).await
    }

    async fn refine(&self, summary: &str, instruction: &str) -> Result<String> {
        self.chat(&prompts::refine(summary, instruction)).await
    }

    async fn detect_tech_stack(&self, text: &str) -> Result<String> {
        self.chat(&prompts::tech_stack(text)).await
    }

    async fn explain_match(&self, text: &str, term: &str) -> Result<String> {
        self.chat(&prompts::explain(text, term)).await
    }

    async fn extract_intent(
        &self,
        query: &str,
        today: NaiveDate,
    ) -> Result<String> {
        self.chat(&prompts::intent(query, today)).await
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("url", &self.config.url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

/// Scripted in-process generator for tests. Every method returns its
/// configured reply, or an error when none is set, and counts its calls.
#[cfg(test)]
pub(crate) mod scripted {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Default)]
    pub(crate) struct ScriptedGenerator {
        pub summary: Option<String>,
        pub tech_stack: Option<String>,
        pub explanation: Option<String>,
        pub intent: Mutex<Option<String>>,
        pub intent_calls: AtomicUsize,
        pub summary_calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub(crate) fn with_intent(reply: &str) -> Self {
            Self {
                intent: Mutex::new(Some(reply.to_string())),
                ..Default::default()
            }
        }

        pub(crate) fn intent_calls(&self) -> usize {
            self.intent_calls.load(Ordering::SeqCst)
        }
    }

    fn scripted(reply: &Option<String>) -> Result<String> {
        reply
            .clone()
            .ok_or_else(|| Error::Generator("no scripted reply".into()))
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn summarize(&self, _text: &str) -> Result<String> {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            scripted(&self.summary)
        }

        async fn refine(
            &self,
            summary: &str,
            instruction: &str,
        ) -> Result<String> {
            Ok(format!("{summary} ({instruction})"))
        }

        async fn detect_tech_stack(&self, _text: &str) -> Result<String> {
            scripted(&self.tech_stack)
        }

        async fn explain_match(
            &self,
            _text: &str,
            _term: &str,
        ) -> Result<String> {
            scripted(&self.explanation)
        }

        async fn extract_intent(
            &self,
            _query: &str,
            _today: NaiveDate,
        ) -> Result<String> {
            self.intent_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .intent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            scripted(&reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{scripted::ScriptedGenerator, *};

    #[test]
    fn prompts_truncate_input() {
        let long = "~".repeat(10_000);
        let prompt = prompts::summary(&long);
        assert_eq!(prompt.matches('~').count(), SUMMARY_INPUT_CHARS);
        let prompt = prompts::tech_stack(&long);
        assert_eq!(prompt.matches('~').count(), TECH_STACK_INPUT_CHARS);
        let prompt = prompts::explain(&long, "term");
        assert_eq!(prompt.matches('~').count(), EXPLAIN_INPUT_CHARS);
    }

    #[test]
    fn intent_prompt_carries_date_and_query() {
        let today = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        let prompt = prompts::intent("python files", today);
        assert!(prompt.contains("Today is 2025-02-03"));
        assert!(prompt.contains("\"python files\""));
        assert!(prompt.contains("\"date_filter\""));
    }

    #[tokio::test]
    async fn fallbacks_replace_errors() {
        let generator = ScriptedGenerator::default();
        assert_eq!(
            explanation_or_fallback(&generator, "x", "y").await,
            EXPLAIN_FALLBACK
        );
    }

    #[tokio::test]
    async fn fallbacks_pass_replies_through() {
        let generator = ScriptedGenerator {
            explanation: Some("Used as a table name.".into()),
            ..Default::default()
        };
        assert_eq!(
            explanation_or_fallback(&generator, "x", "y").await,
            "Used as a table name."
        );
        assert_eq!(
            refine_or_fallback(&generator, "Old.", "shorter").await,
            "Old. (shorter)"
        );
    }

    #[test]
    fn client_builds_from_config() {
        let client = OllamaClient::new(GeneratorConfig::default()).unwrap();
        assert!(format!("{client:?}").contains("qwen2.5-coder:3b"));
    }
}
