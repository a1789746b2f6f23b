use std::io::{self, IsTerminal, Read};

use apiagent_agent::AgentRuntime;
use apiagent_core::config::{AppConfig, LoadOptions};
use apiagent_core::{PipelineError, PipelineOutcome};
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::commands::CommandResult;

const COMMAND: &str = "run";

#[derive(Debug, Default)]
pub struct RunArgs {
    pub text: Option<String>,
    pub json: bool,
    pub load_options: LoadOptions,
}

pub fn run(args: RunArgs) -> CommandResult {
    let config = match AppConfig::load(args.load_options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2);
        }
    };
    init_logging(&config);

    let text = match args.text {
        Some(text) => text,
        None => match read_stdin() {
            Ok(text) => text,
            Err(error) => {
                return CommandResult::failure(
                    COMMAND,
                    "invalid_input",
                    format!("failed to read instruction from stdin: {error}"),
                    2,
                );
            }
        },
    };
    if text.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "no instruction text provided", 2);
    }

    let correlation_id = Uuid::new_v4().to_string();
    let agent = match AgentRuntime::from_config(&config) {
        Ok(agent) => agent,
        Err(error) => return pipeline_failure(error, &correlation_id),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    let result = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        agent.translate_and_run_traced(&text, &cancel, &correlation_id).await
    });

    match result {
        Ok(outcome) => render_outcome(&outcome, args.json, &correlation_id),
        Err(error) => pipeline_failure(error, &correlation_id),
    }
}

fn read_stdin() -> io::Result<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    Ok(text)
}

fn render_outcome(
    outcome: &PipelineOutcome,
    json_output: bool,
    correlation_id: &str,
) -> CommandResult {
    let exit_code = match outcome {
        PipelineOutcome::Cancelled { .. } => 130,
        _ => 0,
    };

    if !json_output {
        return CommandResult { exit_code, output: outcome.display_text() };
    }

    match serde_json::to_string_pretty(outcome) {
        Ok(output) => CommandResult { exit_code, output },
        Err(error) => pipeline_failure(PipelineError::from(error), correlation_id),
    }
}

/// Reports `error` under the same `correlation_id` the pipeline logged with.
fn pipeline_failure(error: PipelineError, correlation_id: &str) -> CommandResult {
    let error_class = error.error_class();
    let exit_code = match error {
        PipelineError::Configuration(_) => 2,
        PipelineError::Gateway { .. } => 3,
        PipelineError::Serialization(_) => 1,
    };
    error!(
        event_name = "cli.run_failed",
        correlation_id = %correlation_id,
        error_class,
        error = %error,
        "pipeline run failed"
    );

    let interface = error.into_interface(correlation_id);
    CommandResult::interface_failure(COMMAND, error_class, &interface, exit_code)
}

fn init_logging(config: &AppConfig) {
    use apiagent_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(io::stderr);

    // A subscriber may already be installed when several runs share a process.
    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
