use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, ProviderStream};
use super::configs::OpenAiProviderConfig;
use super::sse::ChatCompletionsSseParser;
use super::utils::{messages_to_openai_spec, openai_error, tools_to_openai_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Streams completions from any openai-compatible chat completions endpoint
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
            "stream": true,
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }

        Ok(payload)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream> {
        let payload = self.payload(system, messages, tools)?;
        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "requesting streamed completion"
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .header("Accept", "text/event-stream")
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = Box::pin(response.bytes_stream());
                Ok(ChatCompletionsSseParser::new(body).boxed())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                // Error bodies follow the openai shape when the endpoint is compatible enough
                if let Some(error) = serde_json::from_str::<Value>(&body)
                    .ok()
                    .as_ref()
                    .and_then(|value| value.get("error"))
                {
                    return Err(openai_error(error).context(format!("Request failed: {}", status)));
                }
                Err(anyhow!("Request failed: {}\nBody: {}", status, body))
            }
        }
    }
}
