pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use apiagent_core::config::{ConfigOverrides, LlmProvider, LoadOptions};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "apiagent",
    about = "Natural-language HTTP agent CLI",
    long_about = "Translate free-text instructions into guarded HTTP calls, inspect configuration, and check readiness.",
    after_help = "Examples:\n  apiagent run \"what prices are listed?\"\n  echo 'Payload: {\"event\": \"jazz\"}' | apiagent run --json\n  apiagent doctor --json\n  apiagent config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a config file (defaults to apiagent.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one instruction through the pipeline (reads stdin when TEXT is absent)")]
    Run {
        text: Option<String>,
        #[arg(long, help = "Emit the pipeline outcome as JSON")]
        json: bool,
        #[arg(long, help = "Gateway provider: openai, anthropic or ollama")]
        provider: Option<LlmProvider>,
        #[arg(long, help = "Gateway model name")]
        model: Option<String>,
        #[arg(long, help = "Target used when a request names no URL")]
        fallback_url: Option<String>,
        #[arg(long, help = "Outbound read timeout in seconds")]
        read_timeout_secs: Option<u64>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, fallback target and gateway readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let load_options = |overrides: ConfigOverrides| LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config.clone(),
        overrides,
    };

    let result = match cli.command {
        Command::Run { text, json, provider, model, fallback_url, read_timeout_secs } => {
            let overrides = ConfigOverrides {
                llm_provider: provider,
                llm_model: model,
                fallback_url,
                read_timeout_secs,
                ..ConfigOverrides::default()
            };
            commands::run::run(commands::run::RunArgs {
                text,
                json,
                load_options: load_options(overrides),
            })
        }
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(load_options(ConfigOverrides::default())),
        },
        Command::Doctor { json } => {
            commands::doctor::run(load_options(ConfigOverrides::default()), json)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
