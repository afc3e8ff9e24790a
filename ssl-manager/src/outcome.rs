use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::Error, sequencer::DebugTrace};

/// Result codes shared with the hosting platform's API.
pub mod codes {
    pub const OK: i32 = 0;
    pub const ERROR_UNKNOWN: i32 = 99;
    pub const USER_NOT_AUTHENTICATED: i32 = 701;
    pub const PERMISSION_DENIED: i32 = 702;
    pub const SCRIPT_NOT_FOUND: i32 = 1702;
    pub const JEM_OPERATION_COULD_NOT_BE_PERFORMED: i32 = 4109;
}

/// The result of one step or one platform call.
///
/// Platform responses deserialize straight into this type, so every field but
/// `result` is optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub result: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Name of the step that produced a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    /// Per-node responses of a remote command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<Outcome>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(result: i32, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            result,
            error: Some(text.clone()),
            message: Some(text),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == codes::OK
    }

    /// `Err` carrying this outcome unless it is a success.
    pub fn into_result(self) -> Result<Self, Error> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Platform(self))
        }
    }

    /// Best available human-readable description of a failure.
    pub fn describe(&self) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("result {}", self.result))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{{\"result\":{}}}", self.result),
        }
    }
}

/// What a top-level action hands back to its caller.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub result: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Domains the certificate authority refused, as recorded by the tool.
    pub skipped_domains: String,
    /// Markdown note describing the skipped domains, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_domains_note: Option<String>,
    pub debug: DebugTrace,
}

impl WorkflowResult {
    pub fn new(outcome: Outcome, debug: DebugTrace) -> Self {
        Self {
            result: outcome.result,
            error: outcome.error,
            message: outcome.message,
            skipped_domains: String::new(),
            skipped_domains_note: None,
            debug,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == codes::OK
    }
}
