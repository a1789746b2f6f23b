//! Agent Runtime - natural language to HTTP request pipeline
//!
//! This crate turns a user's free-text instruction into at most one HTTP call
//! against a target service and returns a plain-text outcome:
//! - Recognises an explicit `Payload:` / `URL:` request without any model call
//! - Classifies everything else through a text-generation gateway
//! - Enforces guardrails on the resolved request before it is sent
//! - Summarizes the raw response through the same gateway
//!
//! # Architecture
//!
//! One invocation runs a constrained, strictly sequential loop:
//! 1. **Literal Extraction** (`literal`) or **Classification** (`classifier`)
//! 2. **Parsing + Normalization** (`parser`, `normalizer`) into a `RequestSpec`
//! 3. **Guardrail Enforcement** (`guardrails`)
//! 4. **Execution** (`executor`) and **Summarization** (`summarizer`)
//!
//! # Key Types
//!
//! - `AgentRuntime` / `translate_and_run` - Orchestrator (see `runtime` module)
//! - `LlmClient` - Pluggable gateway trait for OpenAI/Anthropic/Ollama
//! - `GuardrailPolicy` - Scope and permission checks on outbound requests
//!
//! # Safety Principle
//!
//! The model is strictly a translator. Whether a request may be sent is
//! decided by `GuardrailPolicy`, never by the model's compliance with its
//! prompt.

pub mod classifier;
pub mod executor;
pub mod guardrails;
pub mod literal;
pub mod llm;
pub mod normalizer;
pub mod parser;
pub mod runtime;
pub mod summarizer;

pub use runtime::{translate_and_run, AgentRuntime};
