//! Session lifecycle and turn handling between a chat interface and the agent.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::Arc;

use crate::agent::{Agent, RunConfig, Runner};
use crate::session::{History, SessionId, SessionStore};

pub const GREETING: &str = "Hello! How can I help you?";

/// Identifies a message shown by the interface, so it can be updated later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

/// The commands the chat interface accepts
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Show a new message
    async fn send(&self, content: &str) -> Result<MessageId>;

    /// Append a fragment to a message already shown
    async fn stream_token(&self, id: &MessageId, token: &str) -> Result<()>;
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The placeholder message the reply was streamed into
    pub message_id: MessageId,
    pub final_output: String,
}

/// Connects chat sessions to a shared agent
pub struct ChatApp {
    agent: Arc<Agent>,
    run_config: Arc<RunConfig>,
    sessions: SessionStore,
}

impl ChatApp {
    pub fn new(agent: Agent, run_config: RunConfig) -> Self {
        Self {
            agent: Arc::new(agent),
            run_config: Arc::new(run_config),
            sessions: SessionStore::new(),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Greet the user and start a session with an empty history.
    ///
    /// No session is stored when the greeting cannot be shown.
    pub async fn on_chat_start(&self, surface: &dyn ChatSurface) -> Result<SessionId> {
        surface.send(GREETING).await?;
        let id = self.sessions.create();
        tracing::info!(session = %id, "chat started");
        Ok(id)
    }

    /// End a session, dropping its history
    pub fn on_chat_end(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id);
        if removed {
            tracing::info!(session = %id, "chat ended");
        }
        removed
    }

    /// Handle one user message: stream the agent's reply into a new message and
    /// record both sides of the exchange in the session's history.
    ///
    /// Turns of one session run one at a time, but each gets its placeholder as soon
    /// as it arrives. The history only changes when the reply completed, so a failed
    /// turn leaves it as it was, while whatever text reached the interface stays there.
    pub async fn on_message(
        &self,
        session: &str,
        content: &str,
        surface: &dyn ChatSurface,
    ) -> Result<TurnOutcome> {
        let message_id = surface.send("").await?;

        let handle = self.sessions.get_or_create(session);
        let mut committed = handle.lock().await;

        let mut history: History = committed.clone();
        history.push_user(content);

        let mut result = Runner::run_streamed(
            Arc::clone(&self.agent),
            history.messages(),
            Arc::clone(&self.run_config),
        );

        let streamed = async {
            while let Some(event) = result.try_next().await? {
                if let Some(delta) = event.as_text_delta() {
                    surface.stream_token(&message_id, delta).await?;
                }
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = streamed {
            tracing::error!(session = %session, error = %e, "turn failed, history left unchanged");
            return Err(e);
        }

        let final_output = result
            .final_output()
            .map(String::from)
            .ok_or_else(|| anyhow!("run ended without an assistant message"))?;

        history.push_assistant(final_output.clone());
        *committed = history;
        tracing::debug!(session = %session, messages = committed.len(), "turn committed");

        Ok(TurnOutcome {
            message_id,
            final_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::message::Message;
    use crate::models::role::Role;
    use crate::models::tool::ToolCall;
    use crate::providers::mock::{MockProvider, MockReply};
    use crate::tools::weather::GetWeather;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records what the interface was asked to show
    #[derive(Default)]
    struct RecordingSurface {
        messages: StdMutex<Vec<(MessageId, String)>>,
        fail_sends: bool,
        fail_tokens: bool,
    }

    impl RecordingSurface {
        fn failing_sends() -> Self {
            Self {
                fail_sends: true,
                ..Self::default()
            }
        }

        fn failing_tokens() -> Self {
            Self {
                fail_tokens: true,
                ..Self::default()
            }
        }

        fn shown(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(_, content)| content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChatSurface for RecordingSurface {
        async fn send(&self, content: &str) -> Result<MessageId> {
            if self.fail_sends {
                return Err(anyhow!("client went away"));
            }
            let mut messages = self.messages.lock().unwrap();
            let id = MessageId(format!("msg-{}", messages.len()));
            messages.push((id.clone(), content.to_string()));
            Ok(id)
        }

        async fn stream_token(&self, id: &MessageId, token: &str) -> Result<()> {
            if self.fail_tokens {
                return Err(anyhow!("client went away"));
            }
            let mut messages = self.messages.lock().unwrap();
            let entry = messages
                .iter_mut()
                .find(|(existing, _)| existing == id)
                .ok_or_else(|| anyhow!("unknown message {:?}", id))?;
            entry.1.push_str(token);
            Ok(())
        }
    }

    fn app(provider: MockProvider) -> ChatApp {
        let agent = Agent::new(
            "Agent",
            "You are a helpful agent. use get_weather tool to get temparture of the location.",
        )
        .with_tool(GetWeather)
        .unwrap();
        ChatApp::new(agent, RunConfig::new(Arc::new(provider)))
    }

    #[tokio::test]
    async fn test_chat_start_greets_with_empty_history() -> Result<()> {
        let app = app(MockProvider::new(vec![]));
        let surface = RecordingSurface::default();

        let id = app.on_chat_start(&surface).await?;

        assert_eq!(surface.shown(), vec!["Hello! How can I help you?"]);
        assert_eq!(app.sessions().history(&id).await, Some(History::new()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_greeting_stores_no_session() {
        let app = app(MockProvider::new(vec![]));

        let result = app.on_chat_start(&RecordingSurface::failing_sends()).await;

        assert!(result.is_err());
        assert!(app.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_turns_alternate_user_and_assistant() -> Result<()> {
        let replies: Vec<_> = (0..3)
            .map(|i| Message::assistant().with_text(format!("answer {}", i)))
            .collect();
        let app = app(MockProvider::new(replies));
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        for i in 0..3 {
            let outcome = app.on_message(&id, &format!("question {}", i), &surface).await?;
            assert_eq!(outcome.final_output, format!("answer {}", i));
        }

        let history = app.sessions().history(&id).await.unwrap();
        assert_eq!(history.len(), 6);
        for (i, role) in history.roles().into_iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(role, expected);
        }
        assert_eq!(history.messages()[4].text(), "question 2");
        assert_eq!(history.messages()[5].text(), "answer 2");
        Ok(())
    }

    #[tokio::test]
    async fn test_placeholder_receives_deltas_in_order() -> Result<()> {
        let app = app(MockProvider::scripted(vec![MockReply::Streamed(
            Message::assistant().with_text("The quick brown fox"),
        )]));
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        let outcome = app.on_message(&id, "Tell me something", &surface).await?;

        assert_eq!(outcome.message_id, MessageId("msg-1".to_string()));
        assert_eq!(
            surface.shown(),
            vec!["Hello! How can I help you?", "The quick brown fox"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_reply_is_still_recorded() -> Result<()> {
        let app = app(MockProvider::scripted(vec![MockReply::Silent(
            Message::assistant().with_text("nothing streamed"),
        )]));
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        app.on_message(&id, "Hi", &surface).await?;

        assert_eq!(surface.shown()[1], "");
        let history = app.sessions().history(&id).await.unwrap();
        assert_eq!(history.messages()[1].text(), "nothing streamed");
        Ok(())
    }

    #[tokio::test]
    async fn test_weather_scenario() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("get_weather", json!({"location": "Lahore"}))),
            ),
            Message::assistant().with_text("It's sunny in Lahore at 22 degrees C."),
        ]);
        let app = app(provider.clone());
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        let outcome = app
            .on_message(&id, "What's the weather in Lahore?", &surface)
            .await?;

        assert_eq!(outcome.final_output, "It's sunny in Lahore at 22 degrees C.");
        assert_eq!(surface.shown()[1], "It's sunny in Lahore at 22 degrees C.");

        // The model saw the tool's answer before writing its reply
        let tool_turn = &provider.requests()[1];
        let response = tool_turn[2].content[0].as_tool_response().unwrap();
        assert_eq!(
            response.tool_result,
            Ok("The weather in Lahore is sunny with  22 degrees C.".to_string())
        );

        let history = app.sessions().history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].text(), "What's the weather in Lahore?");
        assert_eq!(history.messages()[1].role, Role::Assistant);
        assert_eq!(
            history.messages()[1].text(),
            "It's sunny in Lahore at 22 degrees C."
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() -> Result<()> {
        let app = app(MockProvider::new(vec![
            Message::assistant().with_text("for first"),
            Message::assistant().with_text("for second"),
        ]));
        let surface = RecordingSurface::default();
        let first = app.on_chat_start(&surface).await?;
        let second = app.on_chat_start(&surface).await?;

        app.on_message(&first, "first question", &surface).await?;
        app.on_message(&second, "second question", &surface).await?;

        let first_history = app.sessions().history(&first).await.unwrap();
        let second_history = app.sessions().history(&second).await.unwrap();
        assert_eq!(first_history.messages()[0].text(), "first question");
        assert_eq!(second_history.messages()[0].text(), "second question");
        assert_eq!(second_history.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_sent_to_the_model() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("one"),
            Message::assistant().with_text("two"),
        ]);
        let app = app(provider.clone());
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        app.on_message(&id, "first", &surface).await?;
        app.on_message(&id, "second", &surface).await?;

        let second_call: Vec<_> = provider.requests()[1].iter().map(Message::text).collect();
        assert_eq!(second_call, vec!["first", "one", "second"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_history_unchanged() -> Result<()> {
        let app = app(MockProvider::scripted(vec![
            MockReply::Streamed(Message::assistant().with_text("fine")),
            MockReply::FailAfter(vec!["half ".to_string()], "connection reset".to_string()),
        ]));
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;
        app.on_message(&id, "first", &surface).await?;

        let err = app.on_message(&id, "second", &surface).await.unwrap_err();

        assert_eq!(err.to_string(), "connection reset");
        // Partial text stays visible
        assert_eq!(surface.shown()[2], "half ");
        let history = app.sessions().history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].text(), "fine");
        Ok(())
    }

    #[tokio::test]
    async fn test_surface_failure_fails_turn() -> Result<()> {
        let app = app(MockProvider::new(vec![Message::assistant().with_text("hello")]));
        let surface = RecordingSurface::failing_tokens();
        let id = app.on_chat_start(&surface).await?;

        assert!(app.on_message(&id, "Hi", &surface).await.is_err());
        assert!(app.sessions().history(&id).await.unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_max_turns_error_reaches_caller() -> Result<()> {
        let looping = Message::assistant().with_tool_request(
            "1",
            Ok(ToolCall::new("get_weather", json!({"location": "Lahore"}))),
        );
        let agent = Agent::new("Agent", "loop").with_tool(GetWeather)?;
        let provider = MockProvider::new(vec![looping.clone(), looping]);
        let app = ChatApp::new(agent, RunConfig::new(Arc::new(provider)).with_max_turns(1));
        let surface = RecordingSurface::default();

        let err = app.on_message("unknown", "Hi", &surface).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<AgentError>(),
            Some(&AgentError::MaxTurnsExceeded(1))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_session_starts_empty() -> Result<()> {
        let app = app(MockProvider::new(vec![Message::assistant().with_text("hi")]));
        let surface = RecordingSurface::default();

        app.on_message("not-started", "Hello", &surface).await?;

        let history = app.sessions().history("not-started").await.unwrap();
        assert_eq!(history.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_end_drops_history() -> Result<()> {
        let app = app(MockProvider::new(vec![]));
        let surface = RecordingSurface::default();
        let id = app.on_chat_start(&surface).await?;

        assert!(app.on_chat_end(&id));
        assert!(!app.on_chat_end(&id));
        assert!(app.sessions().history(&id).await.is_none());
        Ok(())
    }

    /// A provider that waits before replying, to keep a turn in flight
    struct SlowProvider {
        inner: MockProvider,
        delay: Duration,
    }

    #[async_trait]
    impl crate::providers::base::Provider for SlowProvider {
        async fn stream(
            &self,
            system: &str,
            messages: &[Message],
            tools: &[crate::models::tool::Tool],
        ) -> Result<crate::providers::base::ProviderStream> {
            tokio::time::sleep(self.delay).await;
            self.inner.stream(system, messages, tools).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_turns_are_serialized() -> Result<()> {
        let inner = MockProvider::new(vec![
            Message::assistant().with_text("one"),
            Message::assistant().with_text("two"),
        ]);
        let provider = SlowProvider {
            inner: inner.clone(),
            delay: Duration::from_millis(20),
        };
        let agent = Agent::new("Agent", "serial").with_tool(GetWeather)?;
        let app = Arc::new(ChatApp::new(agent, RunConfig::new(Arc::new(provider))));
        let surface = Arc::new(RecordingSurface::default());
        let id = app.on_chat_start(surface.as_ref()).await?;

        let first = {
            let (app, surface, id) = (Arc::clone(&app), Arc::clone(&surface), id.clone());
            tokio::spawn(async move { app.on_message(&id, "first", surface.as_ref()).await })
        };
        let second = {
            let (app, surface, id) = (Arc::clone(&app), Arc::clone(&surface), id.clone());
            tokio::spawn(async move { app.on_message(&id, "second", surface.as_ref()).await })
        };
        first.await??;
        second.await??;

        let history = app.sessions().history(&id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(
            history.roles(),
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        // The later turn saw the whole earlier exchange
        assert_eq!(inner.requests()[1].len(), 3);
        Ok(())
    }

    /// A provider that holds every call until a permit is released
    struct GatedProvider {
        inner: MockProvider,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl crate::providers::base::Provider for GatedProvider {
        async fn stream(
            &self,
            system: &str,
            messages: &[Message],
            tools: &[crate::models::tool::Tool],
        ) -> Result<crate::providers::base::ProviderStream> {
            self.gate.acquire().await?.forget();
            self.inner.stream(system, messages, tools).await
        }
    }

    #[tokio::test]
    async fn test_queued_turn_shows_placeholder_immediately() -> Result<()> {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let provider = GatedProvider {
            inner: MockProvider::new(vec![
                Message::assistant().with_text("one"),
                Message::assistant().with_text("two"),
            ]),
            gate: Arc::clone(&gate),
        };
        let agent = Agent::new("Agent", "gated").with_tool(GetWeather)?;
        let app = Arc::new(ChatApp::new(agent, RunConfig::new(Arc::new(provider))));
        let surface = Arc::new(RecordingSurface::default());
        let id = app.on_chat_start(surface.as_ref()).await?;

        let turns: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|text| {
                let (app, surface, id) = (Arc::clone(&app), Arc::clone(&surface), id.clone());
                tokio::spawn(async move { app.on_message(&id, text, surface.as_ref()).await })
            })
            .collect();

        // Both placeholders appear while the first turn still holds the session
        tokio::time::timeout(Duration::from_secs(5), async {
            while surface.shown().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        assert_eq!(surface.shown()[1..].to_vec(), vec!["", ""]);

        gate.add_permits(2);
        for turn in turns {
            turn.await??;
        }

        let mut shown = surface.shown()[1..].to_vec();
        shown.sort();
        assert_eq!(shown, vec!["one", "two"]);
        assert_eq!(app.sessions().history(&id).await.unwrap().len(), 4);
        Ok(())
    }
}
