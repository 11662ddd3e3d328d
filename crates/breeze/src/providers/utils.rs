use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::Usage;
use crate::tools::is_valid_tool_name;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text { text } => {
                    if !text.is_empty() {
                        converted["content"] = json!(text);
                    }
                }
                MessageContent::ToolRequest(request) => {
                    // Errored requests are still declared; their response carries the error
                    let (name, arguments) = match (&request.tool_call, &request.raw) {
                        (Ok(tool_call), _) => (
                            sanitize_function_name(&tool_call.name),
                            tool_call.arguments.to_string(),
                        ),
                        (Err(_), Some(raw)) => {
                            (sanitize_function_name(&raw.name), raw.arguments.clone())
                        }
                        (Err(_), None) => ("invalid_tool_call".to_string(), "{}".to_string()),
                    };
                    let name = if name.is_empty() {
                        "invalid_tool_call".to_string()
                    } else {
                        name
                    };
                    let tool_call_spec = json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": arguments,
                        }
                    });
                    match converted.get_mut("tool_calls").and_then(Value::as_array_mut) {
                        Some(tool_calls) => tool_calls.push(tool_call_spec),
                        None => converted["tool_calls"] = json!([tool_call_spec]),
                    }
                }
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(text) => {
                        output.push(json!({
                            "role": "tool",
                            "content": text,
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Build a tool request from the pieces of a streamed tool call.
///
/// Bad names or undecodable arguments become an errored request, which the agent
/// answers with an error so the model can correct itself on the next turn.
pub fn tool_request_from_parts(id: &str, name: &str, arguments: &str) -> MessageContent {
    if !is_valid_tool_name(name) {
        let error = AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            name
        ));
        return MessageContent::malformed_tool_request(id, error, name, arguments);
    }

    let parsed = if arguments.trim().is_empty() {
        Ok(json!({}))
    } else {
        serde_json::from_str::<Value>(arguments)
    };

    match parsed {
        Ok(params) => MessageContent::tool_request(id, Ok(ToolCall::new(name, params))),
        Err(e) => {
            let error = AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ));
            MessageContent::malformed_tool_request(id, error, name, arguments)
        }
    }
}

/// Read token usage from an openai usage object
pub fn parse_usage(usage: &Value) -> Usage {
    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

/// Turn an openai error object into an error, preferring the context length error
pub fn openai_error(error: &Value) -> anyhow::Error {
    match check_openai_context_length_error(error) {
        Some(err) => err.into(),
        None => anyhow!("OpenAI API error: {}", error),
    }
}
