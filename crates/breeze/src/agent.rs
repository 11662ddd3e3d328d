use anyhow::Result;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolRequest, ToolResponse};
use crate::providers::base::{Provider, StreamEvent};
use crate::tools::{FunctionTool, ToolRegistry};

pub const DEFAULT_MAX_TURNS: usize = 10;

/// Agent describes who the model should be and which tools it may call
pub struct Agent {
    name: String,
    instructions: String,
    tools: ToolRegistry,
}

impl Agent {
    pub fn new<N: Into<String>, I: Into<String>>(name: N, instructions: I) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: ToolRegistry::new(),
        }
    }

    /// Add a tool to the agent
    pub fn with_tool<T: FunctionTool>(mut self, tool: T) -> AgentResult<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

/// Settings applied to every run, independent of the agent
#[derive(Clone)]
pub struct RunConfig {
    pub provider: Arc<dyn Provider>,
    /// Upper bound on model calls in a single run
    pub max_turns: usize,
}

impl RunConfig {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

/// Events produced while an agent runs
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// An event straight from the provider stream
    RawResponse(StreamEvent),
    /// A complete assistant message, which may carry tool requests
    MessageOutput(Message),
    ToolCalled(ToolRequest),
    ToolOutput(ToolResponse),
}

impl RunEvent {
    /// The text fragment, if this is a raw text delta
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            RunEvent::RawResponse(StreamEvent::TextDelta(delta)) => Some(delta),
            _ => None,
        }
    }
}

/// The events of a streamed run.
///
/// The stream is single pass. Once it has ended, `final_output` holds the text of
/// the last assistant message.
pub struct RunResultStreaming {
    events: BoxStream<'static, Result<RunEvent>>,
    final_output: Option<String>,
    complete: bool,
}

impl RunResultStreaming {
    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl Stream for RunResultStreaming {
    type Item = Result<RunEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.events.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(Ok(RunEvent::MessageOutput(message)))) => {
                self.final_output = Some(message.text());
            }
            Poll::Ready(None) => self.complete = true,
            _ => {}
        }
        polled
    }
}

pub struct Runner;

impl Runner {
    /// Run the agent over the conversation, streaming events as they happen.
    ///
    /// Each model turn is streamed; when the resulting message asks for tools they are
    /// dispatched together and their results fed back for another turn.
    pub fn run_streamed(
        agent: Arc<Agent>,
        input: &[Message],
        config: Arc<RunConfig>,
    ) -> RunResultStreaming {
        let mut messages = input.to_vec();

        let events = async_stream::try_stream! {
            let tools = agent.tools().definitions();
            tracing::debug!(agent = %agent.name(), messages = messages.len(), "starting run");

            for turn in 0..config.max_turns {
                let mut stream = config
                    .provider
                    .stream(agent.instructions(), &messages, &tools)
                    .await?;

                let mut response = None;
                while let Some(event) = stream.next().await {
                    let event = event?;
                    if let StreamEvent::Completed { message, .. } = &event {
                        response = Some(message.clone());
                    }
                    yield RunEvent::RawResponse(event);
                }

                let response = response.ok_or_else(|| {
                    AgentError::Internal("completion stream ended without a message".to_string())
                })?;
                yield RunEvent::MessageOutput(response.clone());

                let tool_requests: Vec<ToolRequest> =
                    response.tool_requests().into_iter().cloned().collect();
                if tool_requests.is_empty() {
                    tracing::debug!(agent = %agent.name(), turns = turn + 1, "run finished");
                    return;
                }

                for request in &tool_requests {
                    yield RunEvent::ToolCalled(request.clone());
                }

                let outputs = futures::future::join_all(
                    tool_requests
                        .iter()
                        .map(|request| agent.tools().dispatch(request.tool_call.clone())),
                )
                .await;

                let mut message_tool_response = Message::user();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    if let Err(e) = &output {
                        tracing::warn!(id = %request.id, error = %e, "tool call failed");
                    }
                    yield RunEvent::ToolOutput(ToolResponse {
                        id: request.id.clone(),
                        tool_result: output.clone(),
                    });
                    message_tool_response =
                        message_tool_response.with_tool_response(request.id.clone(), output);
                }

                messages.push(response);
                messages.push(message_tool_response);
            }

            Err::<(), _>(AgentError::MaxTurnsExceeded(config.max_turns))?;
        };

        RunResultStreaming {
            events: Box::pin(events),
            final_output: None,
            complete: false,
        }
    }
}
