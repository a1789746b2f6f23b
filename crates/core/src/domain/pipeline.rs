use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::request::RequestSpec;

pub const PLAIN_TEXT_MARKER: &str = "PLAIN_TEXT:";
pub const REQUEST_FAILED_PREFIX: &str = "Request failed: ";

/// What the classifier's raw gateway output looks like before parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationResult {
    /// Marker already stripped and surrounding whitespace trimmed.
    PlainAnswer(String),
    /// Text carrying a JSON object, kept next to the object it yielded.
    CandidateSpec { raw: String, candidate: Map<String, Value> },
    /// Neither shape matched; returned to the caller verbatim.
    Unparsed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawResponse {
    /// Any HTTP response, 2xx or not.
    Body { status: u16, text: String },
    TransportFailure { cause: String },
}

impl RawResponse {
    pub fn transport_failure(cause: impl std::fmt::Display) -> Self {
        Self::TransportFailure { cause: cause.to_string() }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    /// Text handed to the summarizer: the body, or `Request failed: <cause>`.
    pub fn as_text(&self) -> String {
        match self {
            Self::Body { text, .. } => text.clone(),
            Self::TransportFailure { cause } => format!("{REQUEST_FAILED_PREFIX}{cause}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Classify,
    Execute,
    Summarize,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Execute => "execute",
            Self::Summarize => "summarize",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Answer {
        text: String,
    },
    ExecutionResult {
        spec: RequestSpec,
        raw_response: RawResponse,
        summary: String,
    },
    /// The resolved request was refused before any HTTP call was made.
    Denied {
        spec: RequestSpec,
        reason_code: String,
        message: String,
    },
    Cancelled {
        stage: PipelineStage,
    },
}

impl PipelineOutcome {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }

    /// Caller-facing text for this outcome.
    pub fn display_text(&self) -> String {
        match self {
            Self::Answer { text } => text.clone(),
            Self::ExecutionResult { summary, .. } => summary.clone(),
            Self::Denied { message, .. } => message.clone(),
            Self::Cancelled { stage } => format!("cancelled during {stage}"),
        }
    }
}
