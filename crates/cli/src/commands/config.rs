use std::env;
use std::fs;
use std::path::Path;

use apiagent_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run(options: LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let mut api_key_envs = vec!["APIAGENT_LLM_API_KEY"];
    api_key_envs.extend(config.llm.provider.api_key_env());

    let fields = [
        ("llm.provider", config.llm.provider.as_str().to_string(), vec!["APIAGENT_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), vec!["APIAGENT_LLM_MODEL"]),
        ("llm.base_url", config.llm.effective_base_url(), vec!["APIAGENT_LLM_BASE_URL"]),
        ("llm.api_key", api_key, api_key_envs),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), vec!["APIAGENT_LLM_TIMEOUT_SECS"]),
        ("llm.max_tokens", config.llm.max_tokens.to_string(), vec!["APIAGENT_LLM_MAX_TOKENS"]),
        (
            "target.fallback_url",
            config.target.fallback_url.clone(),
            vec!["APIAGENT_TARGET_FALLBACK_URL"],
        ),
        (
            "target.read_timeout_secs",
            config.target.read_timeout_secs.to_string(),
            vec!["APIAGENT_TARGET_READ_TIMEOUT_SECS"],
        ),
        (
            "guardrails.enabled",
            config.guardrails.enabled.to_string(),
            vec!["APIAGENT_GUARDRAILS_ENABLED"],
        ),
        (
            "guardrails.allowed_hosts",
            render_list(config.guardrails.allowed_hosts.iter().map(String::as_str), "<fallback host>"),
            vec!["APIAGENT_GUARDRAILS_ALLOWED_HOSTS"],
        ),
        (
            "guardrails.allowed_methods",
            render_list(config.guardrails.allowed_methods.iter().map(|method| method.as_str()), "<none>"),
            vec!["APIAGENT_GUARDRAILS_ALLOWED_METHODS"],
        ),
        (
            "guardrails.denied_path_prefixes",
            render_list(config.guardrails.denied_path_prefixes.iter().map(String::as_str), "<none>"),
            vec!["APIAGENT_GUARDRAILS_DENIED_PATH_PREFIXES"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["APIAGENT_LOGGING_LEVEL", "APIAGENT_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            vec!["APIAGENT_LOGGING_FORMAT", "APIAGENT_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .iter()
            .map(|(key, value, env_keys)| render_line(key, value, source(*key, env_keys.as_slice()))),
    );
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_list<'a>(items: impl Iterator<Item = &'a str>, empty: &str) -> String {
    let joined = items.collect::<Vec<_>>().join(",");
    if joined.is_empty() {
        empty.to_string()
    } else {
        joined
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps only a vendor prefix such as `sk-`.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        if prefix.len() <= 4 {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}
