//! Core types shared by the request-translation pipeline: the request and
//! outcome model, the error taxonomy and layered configuration.

pub mod config;
pub mod domain;
pub mod errors;

pub use domain::pipeline::{
    ClassificationResult, PipelineOutcome, PipelineStage, RawResponse, PLAIN_TEXT_MARKER,
    REQUEST_FAILED_PREFIX,
};
pub use domain::request::{default_headers, HttpMethod, RequestSpec};
pub use errors::{InterfaceError, NormalizeError, PipelineError};
