use apiagent_agent::guardrails::{GuardrailDecision, GuardrailPolicy};
use apiagent_agent::llm::build_client;
use apiagent_core::config::{parse_absolute_url, AppConfig, LoadOptions};
use apiagent_core::{HttpMethod, RequestSpec};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_fallback_target(&config));
            checks.push(check_gateway_readiness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("fallback_target"));
            checks.push(skipped("gateway_readiness"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

/// The fallback must be absolute and must itself pass the guardrail policy,
/// otherwise every request without a URL would be refused.
fn check_fallback_target(config: &AppConfig) -> DoctorCheck {
    let fallback_url = config.target.fallback_url.trim();
    if let Err(reason) = parse_absolute_url(fallback_url) {
        return DoctorCheck {
            name: "fallback_target",
            status: CheckStatus::Fail,
            details: format!("`{fallback_url}` {reason}"),
        };
    }

    let policy = GuardrailPolicy::from_config(&config.guardrails, fallback_url);
    match policy.evaluate(&RequestSpec::new(HttpMethod::Get, fallback_url)) {
        GuardrailDecision::Allow => DoctorCheck {
            name: "fallback_target",
            status: CheckStatus::Pass,
            details: if policy.enabled {
                format!("`{fallback_url}` is in scope for hosts [{}]", policy.allowed_hosts.join(", "))
            } else {
                format!("`{fallback_url}` is valid (guardrails disabled)")
            },
        },
        GuardrailDecision::Deny { reason_code, .. } => DoctorCheck {
            name: "fallback_target",
            status: CheckStatus::Fail,
            details: format!("guardrails refuse the fallback target: {reason_code}"),
        },
    }
}

fn check_gateway_readiness(config: &AppConfig) -> DoctorCheck {
    match build_client(&config.llm) {
        Ok(_) => DoctorCheck {
            name: "gateway_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "{} client configured for model `{}` at {}",
                config.llm.provider.as_str(),
                config.llm.model,
                config.llm.effective_base_url()
            ),
        },
        Err(error) => DoctorCheck {
            name: "gateway_readiness",
            status: CheckStatus::Fail,
            details: format!("{error:#}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
