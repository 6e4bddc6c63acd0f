//! Wire protocol: one request in, one response out.
//!
//! Requests are either the literal discovery token or a UTF-8 JSON object:
//!
//! ```text
//! commands
//! {"command": "<name>", "params": {"<key>": "<value>", ...}}
//! ```
//!
//! Responses are JSON objects with exactly one top-level key:
//!
//! ```text
//! {"data": <any>}
//! {"error": "<message>"}
//! ```

use crate::registry::{self, CommandDescriptor};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Raw payload of a discovery request
pub const DISCOVERY_TOKEN: &[u8] = b"commands";

/// Decoded command request.
///
/// Fields are kept as raw JSON values; the dispatcher decides what counts as
/// present and well-formed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub command: Option<Value>,
    pub params: Option<Value>,
}

#[cfg(test)]
impl Request {
    /// Build a request from a command name and string params
    pub fn new<'a>(command: &str, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let params: Map<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Request {
            command: Some(Value::String(command.to_string())),
            params: Some(Value::Object(params)),
        }
    }
}

/// A parsed request frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Describe the server instead of running a command
    Discovery,
    Command(Request),
}

/// Request decoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid request: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Parse a single request payload.
pub fn parse(input: &[u8]) -> Result<Frame, ProtocolError> {
    if input == DISCOVERY_TOKEN {
        return Ok(Frame::Discovery);
    }

    let mut object: Map<String, Value> = serde_json::from_slice(input)?;
    Ok(Frame::Command(Request {
        command: object.remove("command"),
        params: object.remove("params"),
    }))
}

/// A response to one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Data(Value),
    Error(String),
}

impl Response {
    pub fn data(value: impl Into<Value>) -> Self {
        Response::Data(value.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    /// Rejection sent when the handler ceiling is reached
    pub fn busy() -> Self {
        Response::error("Server is busy")
    }

    /// Discovery response describing `commands`
    pub fn discovery(commands: &[CommandDescriptor]) -> Self {
        Response::data(json!({
            "commands": registry::render(commands),
            "format": registry::REQUEST_FORMAT,
        }))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(_) => Bytes::from_static(br#"{"error":"Failed to encode response"}"#),
        }
    }
}

impl From<Result<Value, String>> for Response {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => Response::Data(value),
            Err(message) => Response::Error(message),
        }
    }
}
