use thiserror::Error;

use crate::domain::pipeline::PipelineStage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("candidate request is not a JSON object")]
    NotAnObject,
    #[error("unsupported request method `{0}` (expected GET or POST)")]
    UnsupportedMethod(String),
}

/// Failures that end a single pipeline invocation.
///
/// Malformed gateway output and transport failures are not in here: those
/// degrade to an answer or an error-text response instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("gateway call failed during {stage}: {message}")]
    Gateway { stage: PipelineStage, message: String },
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Gateway { .. } => "gateway",
            Self::Serialization(_) => "serialization",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The text-generation backend is unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<PipelineError> for InterfaceError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Configuration(message) => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
            error @ PipelineError::Gateway { .. } => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            PipelineError::Serialization(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::pipeline::PipelineStage;
    use crate::errors::{InterfaceError, PipelineError};

    #[test]
    fn configuration_error_maps_to_bad_request_interface_error() {
        let interface = PipelineError::Configuration("fallback url is empty".to_owned())
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn gateway_error_maps_to_service_unavailable_and_names_the_stage() {
        let interface = PipelineError::Gateway {
            stage: PipelineStage::Classify,
            message: "connection refused".to_owned(),
        }
        .into_interface("req-2");

        let InterfaceError::ServiceUnavailable { message, .. } = &interface else {
            panic!("expected service unavailable, got {interface:?}");
        };
        assert!(message.contains("during classify"));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn serialization_error_maps_to_internal() {
        let error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let interface = PipelineError::from(error).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
