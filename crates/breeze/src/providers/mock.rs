use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, ProviderStream, StreamEvent, Usage};

/// One scripted reply of the mock provider
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream the message text word by word, then complete with the message
    Streamed(Message),
    /// Complete with the message without emitting any text deltas
    Silent(Message),
    /// Emit the given deltas, then fail
    FailAfter(Vec<String>, String),
    /// Fail before any event is produced
    Refuse(String),
}

/// A mock provider that returns pre-configured responses for testing
#[derive(Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<MockReply>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider streaming a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::Streamed).collect())
    }

    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The conversations this provider was asked to continue, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

fn word_deltas(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(String::from).collect()
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ProviderStream> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("mock provider lock poisoned"))?
            .push(messages.to_vec());

        let reply = {
            let mut replies = self
                .replies
                .lock()
                .map_err(|_| anyhow!("mock provider lock poisoned"))?;
            if replies.is_empty() {
                // Return empty response if no more pre-configured responses
                MockReply::Silent(Message::assistant().with_text(""))
            } else {
                replies.remove(0)
            }
        };

        let events: Vec<Result<StreamEvent>> = match reply {
            MockReply::Streamed(message) => word_deltas(&message.text())
                .into_iter()
                .map(|delta| Ok(StreamEvent::TextDelta(delta)))
                .chain(std::iter::once(Ok(StreamEvent::Completed {
                    message,
                    usage: Usage::default(),
                })))
                .collect(),
            MockReply::Silent(message) => vec![Ok(StreamEvent::Completed {
                message,
                usage: Usage::default(),
            })],
            MockReply::FailAfter(deltas, error) => deltas
                .into_iter()
                .map(|delta| Ok(StreamEvent::TextDelta(delta)))
                .chain(std::iter::once(Err(anyhow!(error))))
                .collect(),
            MockReply::Refuse(error) => return Err(anyhow!(error)),
        };

        Ok(stream::iter(events).boxed())
    }
}
