//! Realtime protocol events.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolSpec;
use crate::types::Role;

/// A server payload that could not be decoded into a [`ServerEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed realtime event: {0}")]
pub struct MalformedEvent(pub String);

/// Events received from the realtime service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The service reported an error; `payload` is the embedded error object.
    Error { message: String, payload: Value },
    TextDelta { delta: String },
    FunctionCallDelta {
        call_id: Option<String>,
        function_name: Option<String>,
        delta: String,
    },
    FunctionCallDone { call_id: Option<String> },
    ResponseDone,
    /// Any other event kind, such as `session.created`.
    Unknown { event_type: String },
}

impl ServerEvent {
    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> Result<Self, MalformedEvent> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|error| MalformedEvent(format!("invalid JSON: {error}")))?;
        Self::from_payload(&payload)
    }

    /// Parse a server event payload into a typed event.
    pub fn from_payload(payload: &Value) -> Result<Self, MalformedEvent> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MalformedEvent("missing event type".into()))?;

        match event_type {
            "error" => {
                let error = payload.get("error").cloned().unwrap_or(Value::Null);
                let message = string_at(payload, &["error", "message"])
                    .or_else(|| string_field(payload, "message"))
                    .or_else(|| error.as_str().map(ToString::to_string))
                    .unwrap_or_else(|| "Realtime server error".to_string());
                Ok(Self::Error {
                    message,
                    payload: error,
                })
            }
            "response.text.delta" => Ok(Self::TextDelta {
                delta: required(payload, event_type, "delta")?,
            }),
            "response.function_call_arguments.delta" => Ok(Self::FunctionCallDelta {
                call_id: call_id(payload),
                function_name: string_field(payload, "function_name")
                    .or_else(|| string_field(payload, "name")),
                delta: required(payload, event_type, "delta")?,
            }),
            "response.function_call_arguments.done" => Ok(Self::FunctionCallDone {
                call_id: call_id(payload),
            }),
            "response.done" => Ok(Self::ResponseDone),
            other => Ok(Self::Unknown {
                event_type: other.to_string(),
            }),
        }
    }

    /// Protocol name of this event kind, for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::TextDelta { .. } => "response.text.delta",
            Self::FunctionCallDelta { .. } => "response.function_call_arguments.delta",
            Self::FunctionCallDone { .. } => "response.function_call_arguments.done",
            Self::ResponseDone => "response.done",
            Self::Unknown { event_type } => event_type,
        }
    }
}

fn call_id(payload: &Value) -> Option<String> {
    string_field(payload, "tool_call_id").or_else(|| string_field(payload, "call_id"))
}

fn required(payload: &Value, event_type: &str, field: &str) -> Result<String, MalformedEvent> {
    string_field(payload, field)
        .ok_or_else(|| MalformedEvent(format!("{event_type} is missing '{field}'")))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(ToString::to_string)
}

/// Events sent to the realtime service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
}

/// A conversation item appended to the remote conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: Role,
    pub content: Vec<InputContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
}

/// Parameters of a `response.create` request.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseConfig {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

impl ClientEvent {
    /// Append a text message with `role` to the remote conversation.
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem {
                kind: "message",
                role,
                content: vec![InputContent::InputText { text: text.into() }],
            },
        }
    }

    /// Ask the service to generate a text response.
    pub fn response(instructions: impl Into<String>, tools: &[ToolSpec]) -> Self {
        Self::ResponseCreate {
            response: ResponseConfig {
                modalities: vec!["text"],
                instructions: instructions.into(),
                tools: tools.iter().map(ToolSpec::to_function_schema).collect(),
            },
        }
    }

    /// Protocol name of this event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
