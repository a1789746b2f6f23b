use std::collections::VecDeque;
use std::env;
use std::sync::{mpsc, Arc, Mutex, OnceLock};

use apiagent_cli::commands::{config, doctor, run};
use apiagent_core::config::LoadOptions;
use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;

#[test]
fn run_executes_literal_request_and_prints_json_outcome() {
    let target = spawn_background(
        Router::new().route("/price", post(|Json(body): Json<Value>| async move {
            Json(json!({"booked": body}))
        })),
    );
    let gateway = spawn_fake_ollama(&["Two seats were booked for the rock gala."]);
    let fallback = format!("{target}/price");
    let scratch = TempDir::new().expect("temp dir");

    with_env(
        &[
            ("APIAGENT_LLM_PROVIDER", "ollama"),
            ("APIAGENT_LLM_BASE_URL", &gateway),
            ("APIAGENT_TARGET_FALLBACK_URL", &fallback),
            ("APIAGENT_LOG_LEVEL", "warn"),
        ],
        || {
            let result = run::run(run::RunArgs {
                text: Some("Payload: {\"event\": \"rock gala\", \"seats\": 2}".to_string()),
                json: true,
                load_options: isolated_options(&scratch),
            });
            assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["kind"], "execution_result");
            assert_eq!(payload["spec"]["method"], "POST");
            assert_eq!(payload["spec"]["url"], fallback.as_str());
            assert_eq!(payload["raw_response"]["status"], 200);
            assert_eq!(payload["summary"], "Two seats were booked for the rock gala.");
        },
    );
}

#[test]
fn run_prints_plain_answer_as_text() {
    let gateway = spawn_fake_ollama(&["PLAIN_TEXT: The site lists event prices."]);
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[("APIAGENT_LLM_BASE_URL", &gateway)], || {
        let result = run::run(run::RunArgs {
            text: Some("what is this site about?".to_string()),
            json: false,
            load_options: isolated_options(&scratch),
        });
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "The site lists event prices.");
    });
}

#[test]
fn run_rejects_blank_instruction() {
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[], || {
        let result = run::run(run::RunArgs {
            text: Some("   ".to_string()),
            json: false,
            load_options: isolated_options(&scratch),
        });
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn run_returns_config_failure_for_relative_fallback() {
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[("APIAGENT_TARGET_FALLBACK_URL", "/price")], || {
        let result = run::run(run::RunArgs {
            text: Some("list prices".to_string()),
            json: false,
            load_options: isolated_options(&scratch),
        });
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn run_reports_unreachable_gateway_with_correlation_id() {
    let closed = closed_port_url();
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[("APIAGENT_LLM_BASE_URL", &closed), ("APIAGENT_LOG_LEVEL", "error")], || {
        let result = run::run(run::RunArgs {
            text: Some("list prices".to_string()),
            json: false,
            load_options: isolated_options(&scratch),
        });
        assert_eq!(result.exit_code, 3, "expected gateway failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "gateway");
        assert_eq!(
            payload["message"],
            "The text-generation backend is unavailable. Please retry shortly."
        );
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    });
}

#[test]
fn config_redacts_api_key_and_attributes_sources() {
    let scratch = TempDir::new().expect("temp dir");
    let config_path = scratch.path().join("apiagent.toml");
    std::fs::write(&config_path, "[target]\nfallback_url = \"http://localhost:5050/price\"\n")
        .expect("config file should be written");

    with_env(&[("APIAGENT_LLM_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test-123456")], || {
        let output = config::run(LoadOptions {
            config_path: Some(config_path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        assert!(!output.contains("sk-test-123456"), "secret leaked: {output}");
        assert!(output.contains("- llm.provider = openai (source: env (APIAGENT_LLM_PROVIDER))"));
        assert!(output.contains("- llm.api_key = sk-*** (source: env (OPENAI_API_KEY))"));
        assert!(output.contains(&format!(
            "- target.fallback_url = http://localhost:5050/price (source: file ({}))",
            config_path.display()
        )));
        assert!(output.contains("- target.read_timeout_secs = 30 (source: default)"));
        assert!(output.contains("- guardrails.denied_path_prefixes = /admin (source: default)"));
    });
}

#[test]
fn doctor_passes_with_default_configuration() {
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[], || {
        let result = doctor::run(isolated_options(&scratch), true);
        assert_eq!(result.exit_code, 0, "expected passing doctor: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(names, ["config_validation", "fallback_target", "gateway_readiness"]);
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_invalid() {
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[("APIAGENT_LLM_PROVIDER", "anthropic")], || {
        let result = doctor::run(isolated_options(&scratch), false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] fallback_target:"));
        assert!(result.output.contains("- [skip] gateway_readiness:"));
    });
}

#[test]
fn doctor_flags_fallback_outside_allowed_hosts() {
    let scratch = TempDir::new().expect("temp dir");

    with_env(&[("APIAGENT_GUARDRAILS_ALLOWED_HOSTS", "example.com")], || {
        let result = doctor::run(isolated_options(&scratch), true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        let fallback = &report["checks"][1];
        assert_eq!(fallback["name"], "fallback_target");
        assert_eq!(fallback["status"], "fail");
        assert!(fallback["details"].as_str().unwrap_or_default().contains("host_out_of_scope"));
    });
}

fn isolated_options(scratch: &TempDir) -> LoadOptions {
    LoadOptions {
        config_path: Some(scratch.path().join("absent.toml")),
        ..LoadOptions::default()
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

/// Serves `router` from a dedicated thread so blocking commands can call it.
fn spawn_background(router: Router) -> String {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("server runtime should build");
        runtime.block_on(async move {
            let listener =
                tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
            let address = listener.local_addr().expect("listener should have an address");
            sender.send(format!("http://{address}")).expect("address should be sent");
            let _ = axum::serve(listener, router).await;
        });
    });
    receiver.recv().expect("server should report its address")
}

fn spawn_fake_ollama(replies: &[&str]) -> String {
    let replies: Arc<Mutex<VecDeque<String>>> =
        Arc::new(Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()));
    let router = Router::new()
        .route(
            "/api/generate",
            post(|State(replies): State<Arc<Mutex<VecDeque<String>>>>| async move {
                let reply = replies.lock().expect("replies lock").pop_front().unwrap_or_default();
                Json(json!({"response": reply, "done": true}))
            }),
        )
        .with_state(replies);
    spawn_background(router)
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let address = listener.local_addr().expect("listener should have an address");
    drop(listener);
    format!("http://{address}")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "APIAGENT_LLM_PROVIDER",
        "APIAGENT_LLM_API_KEY",
        "APIAGENT_LLM_BASE_URL",
        "APIAGENT_LLM_MODEL",
        "APIAGENT_LLM_TIMEOUT_SECS",
        "APIAGENT_LLM_MAX_TOKENS",
        "APIAGENT_TARGET_FALLBACK_URL",
        "APIAGENT_TARGET_READ_TIMEOUT_SECS",
        "APIAGENT_GUARDRAILS_ENABLED",
        "APIAGENT_GUARDRAILS_ALLOWED_HOSTS",
        "APIAGENT_GUARDRAILS_ALLOWED_METHODS",
        "APIAGENT_GUARDRAILS_DENIED_PATH_PREFIXES",
        "APIAGENT_LOGGING_LEVEL",
        "APIAGENT_LOGGING_FORMAT",
        "APIAGENT_LOG_LEVEL",
        "APIAGENT_LOG_FORMAT",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
