use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use apiagent_core::config::{parse_absolute_url, AppConfig, GuardrailConfig};
use apiagent_core::{
    ClassificationResult, PipelineError, PipelineOutcome, PipelineStage, RequestSpec,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::IntentClassifier;
use crate::executor::{RequestExecutor, DEFAULT_READ_TIMEOUT};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::literal;
use crate::llm::{build_client, LlmClient};
use crate::normalizer::normalize;
use crate::summarizer::summarize;

/// Runs one pipeline invocation with default guardrails scoped to the
/// fallback target and the default executor timeouts.
pub async fn translate_and_run(
    user_text: &str,
    gateway: &dyn LlmClient,
    fallback_url: &str,
) -> Result<PipelineOutcome, PipelineError> {
    let fallback_url = validate_fallback_url(fallback_url)?;
    let classifier = IntentClassifier::new(&fallback_url);
    let guardrails = GuardrailPolicy::from_config(&GuardrailConfig::default(), &fallback_url);
    let executor = RequestExecutor::new(DEFAULT_READ_TIMEOUT)?;
    let pipeline = Pipeline {
        gateway,
        classifier: &classifier,
        guardrails: &guardrails,
        executor: &executor,
        fallback_url: &fallback_url,
    };
    pipeline.run(user_text, &CancellationToken::new(), &Uuid::new_v4().to_string()).await
}

/// Gateway, guardrails, executor settings and fallback target bundled for
/// repeated invocations.
#[derive(Clone)]
pub struct AgentRuntime {
    gateway: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    guardrails: GuardrailPolicy,
    executor: RequestExecutor,
    fallback_url: String,
}

impl AgentRuntime {
    pub fn new(
        gateway: Arc<dyn LlmClient>,
        fallback_url: impl AsRef<str>,
    ) -> Result<Self, PipelineError> {
        let fallback_url = validate_fallback_url(fallback_url.as_ref())?;
        Ok(Self {
            gateway,
            classifier: IntentClassifier::new(&fallback_url),
            guardrails: GuardrailPolicy::from_config(&GuardrailConfig::default(), &fallback_url),
            executor: RequestExecutor::new(DEFAULT_READ_TIMEOUT)?,
            fallback_url,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let gateway = build_client(&config.llm).map_err(|error| {
            PipelineError::Configuration(format!("failed to build gateway client: {error:#}"))
        })?;
        let runtime = Self::new(gateway, &config.target.fallback_url)?
            .with_read_timeout(Duration::from_secs(config.target.read_timeout_secs))?;
        let guardrails = GuardrailPolicy::from_config(&config.guardrails, &runtime.fallback_url);
        Ok(runtime.with_guardrails(guardrails))
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Result<Self, PipelineError> {
        self.executor = RequestExecutor::new(read_timeout)?;
        Ok(self)
    }

    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    pub fn read_timeout(&self) -> Duration {
        self.executor.read_timeout()
    }

    pub async fn translate_and_run(&self, user_text: &str) -> Result<PipelineOutcome, PipelineError> {
        self.translate_and_run_until(user_text, &CancellationToken::new()).await
    }

    /// Same as [`Self::translate_and_run`], but every external call is raced
    /// against `cancel`.
    pub async fn translate_and_run_until(
        &self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.translate_and_run_traced(user_text, cancel, &Uuid::new_v4().to_string()).await
    }

    /// Tags every `pipeline.*` event with the caller's `correlation_id`, so a
    /// failure shown to the user can be matched to its log lines.
    pub async fn translate_and_run_traced(
        &self,
        user_text: &str,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let pipeline = Pipeline {
            gateway: self.gateway.as_ref(),
            classifier: &self.classifier,
            guardrails: &self.guardrails,
            executor: &self.executor,
            fallback_url: &self.fallback_url,
        };
        pipeline.run(user_text, cancel, correlation_id).await
    }
}

struct Pipeline<'a> {
    gateway: &'a dyn LlmClient,
    classifier: &'a IntentClassifier,
    guardrails: &'a GuardrailPolicy,
    executor: &'a RequestExecutor,
    fallback_url: &'a str,
}

impl Pipeline<'_> {
    async fn run(
        &self,
        user_text: &str,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!(
            event_name = "pipeline.started",
            correlation_id = %correlation_id,
            input_chars = user_text.chars().count(),
            "pipeline invocation started"
        );

        let result = self.route(user_text, cancel, correlation_id).await;
        match &result {
            Ok(outcome) => info!(
                event_name = "pipeline.completed",
                correlation_id = %correlation_id,
                outcome = outcome_kind(outcome),
                "pipeline invocation completed"
            ),
            Err(error) => warn!(
                event_name = "pipeline.failed",
                correlation_id = %correlation_id,
                error_class = error.error_class(),
                error = %error,
                "pipeline invocation failed"
            ),
        }
        result
    }

    async fn route(
        &self,
        user_text: &str,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        if let Some(spec) = literal::extract(user_text, self.fallback_url) {
            info!(
                event_name = "pipeline.literal_matched",
                correlation_id = %correlation_id,
                url = %spec.url,
                "literal request found, skipping classification"
            );
            return self.execute_spec(spec, cancel, correlation_id).await;
        }

        let Some(classified) =
            until_cancelled(cancel, self.classifier.classify(self.gateway, user_text)).await
        else {
            return Ok(PipelineOutcome::Cancelled { stage: PipelineStage::Classify });
        };
        let classified = classified.map_err(|error| gateway_error(PipelineStage::Classify, error))?;

        match classified {
            ClassificationResult::PlainAnswer(text) => {
                info!(event_name = "pipeline.plain_answer", correlation_id = %correlation_id, "classifier answered directly");
                Ok(PipelineOutcome::answer(text))
            }
            ClassificationResult::Unparsed(text) => {
                info!(event_name = "pipeline.unparsed", correlation_id = %correlation_id, "classifier output had no request");
                Ok(PipelineOutcome::answer(text))
            }
            ClassificationResult::CandidateSpec { raw, candidate } => {
                match normalize(&candidate, self.fallback_url) {
                    Ok(spec) => self.execute_spec(spec, cancel, correlation_id).await,
                    Err(error) => {
                        warn!(
                            event_name = "pipeline.candidate_rejected",
                            correlation_id = %correlation_id,
                            error = %error,
                            "candidate request is not executable"
                        );
                        Ok(PipelineOutcome::answer(raw))
                    }
                }
            }
        }
    }

    async fn execute_spec(
        &self,
        spec: RequestSpec,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        if let GuardrailDecision::Deny { reason_code, user_message } = self.guardrails.evaluate(&spec)
        {
            warn!(
                event_name = "pipeline.guardrail_denied",
                correlation_id = %correlation_id,
                reason_code,
                method = %spec.method,
                url = %spec.url,
                "request refused before execution"
            );
            return Ok(PipelineOutcome::Denied {
                spec,
                reason_code: reason_code.to_string(),
                message: user_message,
            });
        }

        let Some(raw_response) = until_cancelled(cancel, self.executor.execute(&spec)).await else {
            return Ok(PipelineOutcome::Cancelled { stage: PipelineStage::Execute });
        };
        info!(
            event_name = "pipeline.executed",
            correlation_id = %correlation_id,
            method = %spec.method,
            url = %spec.url,
            transport_failure = raw_response.is_transport_failure(),
            "outbound request finished"
        );

        let Some(summary) = until_cancelled(cancel, summarize(self.gateway, &raw_response)).await
        else {
            return Ok(PipelineOutcome::Cancelled { stage: PipelineStage::Summarize });
        };
        let summary = summary.map_err(|error| gateway_error(PipelineStage::Summarize, error))?;

        Ok(PipelineOutcome::ExecutionResult { spec, raw_response, summary })
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = work => Some(value),
    }
}

fn validate_fallback_url(fallback_url: &str) -> Result<String, PipelineError> {
    let trimmed = fallback_url.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Configuration("no fallback target URL configured".to_string()));
    }
    parse_absolute_url(trimmed).map_err(|error| {
        PipelineError::Configuration(format!("invalid fallback target URL `{trimmed}`: {error}"))
    })?;
    Ok(trimmed.to_string())
}

fn gateway_error(stage: PipelineStage, error: anyhow::Error) -> PipelineError {
    PipelineError::Gateway { stage, message: format!("{error:#}") }
}

fn outcome_kind(outcome: &PipelineOutcome) -> &'static str {
    match outcome {
        PipelineOutcome::Answer { .. } => "answer",
        PipelineOutcome::ExecutionResult { .. } => "execution_result",
        PipelineOutcome::Denied { .. } => "denied",
        PipelineOutcome::Cancelled { .. } => "cancelled",
    }
}
