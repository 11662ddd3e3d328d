//! Tools the model can call, registered by name with a typed input.
//!
//! Each tool declares its input as a `serde` type and a matching JSON schema. The
//! registry checks names and schemas when a tool is added, so dispatch only has to
//! look the tool up and decode the arguments.
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

pub mod weather;

lazy_static! {
    static ref TOOL_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Whether a name is acceptable as a function name by openai-compatible endpoints
pub fn is_valid_tool_name(name: &str) -> bool {
    TOOL_NAME.is_match(name)
}

/// A tool with a typed input that the model can call
#[async_trait]
pub trait FunctionTool: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing `Input`, shown to the model
    fn input_schema(&self) -> Value;

    async fn call(&self, input: Self::Input) -> AgentResult<String>;
}

/// Object safe form of a `FunctionTool`, taking raw JSON arguments
#[async_trait]
trait RegisteredTool: Send + Sync {
    fn definition(&self) -> &Tool;

    async fn invoke(&self, arguments: Value) -> AgentResult<String>;
}

struct Registered<T: FunctionTool> {
    definition: Tool,
    inner: T,
}

#[async_trait]
impl<T: FunctionTool> RegisteredTool for Registered<T> {
    fn definition(&self) -> &Tool {
        &self.definition
    }

    async fn invoke(&self, arguments: Value) -> AgentResult<String> {
        let input: T::Input = serde_json::from_value(arguments).map_err(|e| {
            AgentError::InvalidParameters(format!(
                "Arguments for {} did not match its schema: {}",
                self.definition.name, e
            ))
        })?;
        self.inner.call(input).await
    }
}

/// The set of tools available to an agent, keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, rejecting invalid names, duplicates and non-object schemas
    pub fn register<T: FunctionTool>(&mut self, tool: T) -> AgentResult<()> {
        let name = tool.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(AgentError::InvalidToolName(format!(
                "'{}' must match [a-zA-Z0-9_-]+",
                name
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }

        let schema = tool.input_schema();
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(AgentError::InvalidParameters(format!(
                "Schema for {} must be a JSON object schema",
                name
            )));
        }

        let definition = Tool::new(&name, tool.description(), schema);
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(
            name,
            Box::new(Registered {
                definition,
                inner: tool,
            }),
        );
        Ok(())
    }

    /// Builder form of `register`
    pub fn with<T: FunctionTool>(mut self, tool: T) -> AgentResult<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Definitions of every tool, ordered by name
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools
            .values()
            .map(|tool| tool.definition().clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch a single tool call to the tool registered under its name
    pub async fn dispatch(&self, tool_call: AgentResult<ToolCall>) -> AgentResult<String> {
        let call = tool_call?;
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        tracing::debug!(tool = %call.name, arguments = %call.arguments, "dispatching tool call");
        tool.invoke(call.arguments).await
    }
}
