use anyhow::Result;
use apiagent_core::RawResponse;

use crate::llm::LlmClient;

pub fn summary_prompt(response_text: &str) -> String {
    format!(
        "Summarize the following API response for the user in clear plain text, \
         no code, no JSON, no thinking section. Be concise and factual.\n\n\
         API response:\n{response_text}"
    )
}

/// One gateway call over the response text. Transport failures are
/// summarized like any other body.
pub async fn summarize(gateway: &dyn LlmClient, response: &RawResponse) -> Result<String> {
    let summary = gateway.complete(&summary_prompt(&response.as_text())).await?;
    Ok(summary.trim().to_string())
}
