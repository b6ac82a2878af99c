//! Optional explanation enrichment.
//!
//! The consensus engine always produces a templated explanation. A
//! [`Summarizer`] may replace it with a richer narrative; if it fails or is
//! not configured the template stays.

use crate::config::SummarizerConfig;
use crate::models::{ConsensusDecision, Signal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Narrow interface to an external explanation generator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, decision: &ConsensusDecision, signals: &[Signal]) -> Result<String>;
}

/// Message in the chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Summarizer backed by an Ollama chat endpoint.
pub struct OllamaSummarizer {
    config: SummarizerConfig,
    http_client: reqwest::Client,
}

impl OllamaSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        info!(
            "Initializing summarizer with model {} at {}",
            config.model, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    async fn send_prompt(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Summarizer timed out after {}ms", self.config.timeout_ms)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, decision: &ConsensusDecision, signals: &[Signal]) -> Result<String> {
        let prompt = build_prompt(decision, signals);
        debug!("Sending summarizer prompt ({} chars)", prompt.len());

        let text = self.send_prompt(&prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow::anyhow!("Summarizer returned an empty explanation"));
        }
        Ok(text.to_string())
    }
}

/// Build the user prompt describing a decision and its signals.
pub fn build_prompt(decision: &ConsensusDecision, signals: &[Signal]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Consensus: {} risk, score {:.1}/100, confidence {:.0}%.\n",
        decision.risk_level,
        decision.risk_score,
        decision.confidence * 100.0
    ));
    prompt.push_str(&format!("Recommended action: {}\n\n", decision.recommended_action));
    prompt.push_str("Agent signals:\n");

    let mut sorted: Vec<&Signal> = signals.iter().collect();
    sorted.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));

    for signal in sorted {
        let line = match (signal.risk_level(), signal.confidence(), signal.error()) {
            (Some(level), Some(confidence), _) => format!(
                "- {} (weight {:+.1}): {} at {:.0}% confidence",
                signal.agent_name,
                signal.weight,
                level,
                confidence * 100.0
            ),
            (_, _, Some(reason)) => format!("- {}: failed ({})", signal.agent_name, reason),
            _ => format!("- {}: abstained", signal.agent_name),
        };
        prompt.push_str(&line);
        prompt.push('\n');

        for evidence in &signal.evidence {
            prompt.push_str(&format!(
                "    * {} = {}{}\n",
                evidence.feature,
                evidence.value,
                evidence
                    .threshold
                    .map(|t| format!(" (threshold {})", t))
                    .unwrap_or_default()
            ));
        }
    }

    prompt.push_str("\nExplain this risk decision in two or three sentences.");
    prompt
}

const SYSTEM_PROMPT: &str = r#"You are a clinical trial data quality reviewer.
Summarize the consensus risk decision for a study team in plain language.
Do not invent findings that are not in the agent signals."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ConsensusEngine;
    use crate::models::{Evidence, RiskLevel};

    #[test]
    fn test_prompt_lists_every_agent_sorted() {
        let signals = vec![
            Signal::voted("stability", RiskLevel::Low, 0.85, -1.5),
            Signal::voted("safety", RiskLevel::High, 0.9, 3.0).with_evidence(vec![Evidence {
                feature: "sae_rate".to_string(),
                value: 0.12,
                threshold: Some(0.05),
                severity: RiskLevel::High,
            }]),
            Signal::abstained("coding", 1.2, "no data"),
            Signal::errored("edc_quality", 1.2, "timeout"),
        ];
        let decision = ConsensusEngine::default().compute(&signals);

        let prompt = build_prompt(&decision, &signals);

        let coding = prompt.find("- coding").unwrap();
        let safety = prompt.find("- safety").unwrap();
        assert!(coding < safety);
        assert!(prompt.contains("edc_quality: failed (timeout)"));
        assert!(prompt.contains("sae_rate = 0.12 (threshold 0.05)"));
        assert!(prompt.contains("weight -1.5"));
    }

    #[test]
    fn test_summarizer_builds_client() {
        let summarizer = OllamaSummarizer::new(SummarizerConfig::default());
        assert!(summarizer.is_ok());
    }
}
