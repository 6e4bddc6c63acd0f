//! Request validation and routing.
//!
//! Validation runs in a fixed order and stops at the first failure:
//! command present, command known, params present, every param declared.
//! Only after that is the request routed by name to an action.

use crate::protocol::Request;
use crate::quarantine::{Quarantine, QuarantineError};
use crate::registry::{self, CommandDescriptor, CHECK_LOCAL_FILE, QUARANTINE_LOCAL_FILE};
use crate::scanner::{self, ScanError};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Confirmation returned by a successful quarantine
pub const QUARANTINE_CONFIRMATION: &str = "File successfully quarantined";

/// Validation and routing errors
#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("Command not found in request")]
    CommandNotFound,
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Params not found in request")]
    ParamsNotFound,
    #[error("Invalid params: expected an object")]
    ParamsNotObject,
    #[error("Invalid param: {0}")]
    InvalidParam(String),
    #[error("Missing param: {0}")]
    MissingParam(&'static str),
    #[error("Invalid value for param {0}: expected string")]
    InvalidValue(&'static str),
    #[error("Unknown command {0}")]
    UnknownCommand(String),
}

/// A validated command ready to execute
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CheckLocalFile { file_path: PathBuf, signature: String },
    QuarantineLocalFile { file_path: PathBuf },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::CheckLocalFile { .. } => CHECK_LOCAL_FILE,
            Action::QuarantineLocalFile { .. } => QUARANTINE_LOCAL_FILE,
        }
    }
}

/// Errors raised while running an action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Quarantine(#[from] QuarantineError),
}

/// Validate a request against the command registry.
pub fn validate(request: &Request) -> Result<Action, DispatchError> {
    validate_with(registry::COMMANDS, request)
}

fn validate_with(commands: &[CommandDescriptor], request: &Request) -> Result<Action, DispatchError> {
    let name = match request.command.as_ref().filter(|v| !is_blank(v)) {
        None => return Err(DispatchError::CommandNotFound),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let descriptor = registry::lookup(commands, &name).ok_or_else(|| DispatchError::InvalidCommand(name.clone()))?;

    let params = match request.params.as_ref().filter(|v| !is_blank(v)) {
        None => return Err(DispatchError::ParamsNotFound),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(DispatchError::ParamsNotObject),
    };

    if let Some(key) = params.keys().find(|key| !descriptor.has_param(key)) {
        return Err(DispatchError::InvalidParam(key.clone()));
    }

    route(descriptor.name, params)
}

/// Values a peer sends in place of leaving a field out: `null`, `false`,
/// zero and empty strings, arrays or objects.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn route(name: &str, params: &Map<String, Value>) -> Result<Action, DispatchError> {
    match name {
        CHECK_LOCAL_FILE => Ok(Action::CheckLocalFile {
            file_path: PathBuf::from(string_param(params, "file_path")?),
            signature: string_param(params, "signature")?.to_string(),
        }),
        QUARANTINE_LOCAL_FILE => Ok(Action::QuarantineLocalFile {
            file_path: PathBuf::from(string_param(params, "file_path")?),
        }),
        other => Err(DispatchError::UnknownCommand(other.to_string())),
    }
}

fn string_param<'a>(
    params: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, DispatchError> {
    match params.get(name) {
        None => Err(DispatchError::MissingParam(name)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(DispatchError::InvalidValue(name)),
    }
}

/// Executes validated commands
#[derive(Debug, Clone)]
pub struct Dispatcher {
    quarantine: Quarantine,
}

impl Dispatcher {
    pub fn new(quarantine: Quarantine) -> Self {
        Dispatcher { quarantine }
    }

    /// Run an action and produce its response payload
    pub async fn execute(&self, action: Action) -> Result<Value, ActionError> {
        match action {
            Action::CheckLocalFile {
                file_path,
                signature,
            } => {
                info!(path = %file_path.display(), %signature, "Checking file for signature");
                let offsets = scanner::scan(&file_path, &signature).await?;
                Ok(Value::from(offsets))
            }
            Action::QuarantineLocalFile { file_path } => {
                info!(path = %file_path.display(), "Quarantining file");
                self.quarantine.quarantine(&file_path).await?;
                Ok(Value::from(QUARANTINE_CONFIRMATION))
            }
        }
    }

    /// Validate and run a request, rendering any failure as its wire message.
    pub async fn dispatch(&self, request: &Request) -> Result<Value, String> {
        let action = validate(request).map_err(|e| {
            warn!(error = %e, "Rejected request");
            e.to_string()
        })?;

        let command = action.name();
        self.execute(action).await.map_err(|e| {
            warn!(command, error = %e, "Command failed");
            e.to_string()
        })
    }
}
