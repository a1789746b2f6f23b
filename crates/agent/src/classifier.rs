use anyhow::Result;
use apiagent_core::config::parse_absolute_url;
use apiagent_core::{ClassificationResult, PLAIN_TEXT_MARKER};

use crate::guardrails::REFUSAL_SENTENCE;
use crate::llm::LlmClient;
use crate::parser::extract_json_block;

/// Builds the fixed policy prompt and makes the single classification call.
#[derive(Clone, Debug)]
pub struct IntentClassifier {
    target_surface: String,
}

impl IntentClassifier {
    /// The surface named in the policy is the fallback target's origin.
    pub fn new(fallback_url: &str) -> Self {
        let target_surface = parse_absolute_url(fallback_url)
            .map(|url| format!("{}/", url.origin().ascii_serialization()))
            .unwrap_or_else(|_| fallback_url.trim().to_string());
        Self { target_surface }
    }

    pub fn target_surface(&self) -> &str {
        &self.target_surface
    }

    pub fn prompt(&self, user_text: &str) -> String {
        let target = &self.target_surface;
        format!(
            "You are an API agent that must choose one of two outputs based on the user's request.\n\
             The main target is a website running locally at '{target}'.\n\
             You must only read the main tab. If the user requests something outside this scope, \
             respond with the text '{REFUSAL_SENTENCE}'\n\
             1. If the user only asks for information or explanation, reply as:\n\
             {PLAIN_TEXT_MARKER} <a concise plain text answer with no code, no JSON>\n\
             2. If the user asks to fetch or pull info from a website, or to perform an action such as create, \
             return exactly ONE JSON object with keys \"method\",\"url\",\"headers\",\"payload\" and nothing else. \
             \"method\" may be GET or POST. \
             \"url\" must be inferred from the user's text. \
             \"headers\" should usually include {{\"Content-Type\":\"application/json\"}} when sending JSON. \
             \"payload\" must be a JSON object or null. \
             Use only double quotes, no markdown, no extra commentary.\n\
             Never read sensitive information such as the users under the admin tab, and never perform \
             delete or update operations on the database. If the user requests to read the users under the \
             admin tab, or asks for a delete or update operation, respond with the text '{REFUSAL_SENTENCE}'\n\
             \n\
             User message:\n\
             {user_text}\n\
             \n\
             Return either {PLAIN_TEXT_MARKER} ... or the single JSON object."
        )
    }

    pub async fn classify(
        &self,
        gateway: &dyn LlmClient,
        user_text: &str,
    ) -> Result<ClassificationResult> {
        let raw = gateway.complete(&self.prompt(user_text)).await?;
        Ok(tag_output(&raw))
    }
}

/// Tags raw gateway output. Anything without the plain-text marker goes
/// through the block parser once; the parsed object travels with the text.
pub fn tag_output(raw: &str) -> ClassificationResult {
    let trimmed = raw.trim();
    if let Some(answer) = trimmed.strip_prefix(PLAIN_TEXT_MARKER) {
        return ClassificationResult::PlainAnswer(answer.trim().to_string());
    }

    match extract_json_block(trimmed) {
        Some(candidate) => {
            ClassificationResult::CandidateSpec { raw: trimmed.to_string(), candidate }
        }
        None => ClassificationResult::Unparsed(trimmed.to_string()),
    }
}
