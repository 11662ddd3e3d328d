//! These models represent the objects passed around by the agent
//!
//! There are a few related formats we need to interact with:
//! - chat messages kept in a session's history, sent from the interface to the agent
//! - openai-compatible messages/tools, sent from the agent to the LLM
//! - tool calls, sent from the agent to the tool registry
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers, so the internal models are not an exact match to any of these formats.
pub mod message;
pub mod role;
pub mod tool;
