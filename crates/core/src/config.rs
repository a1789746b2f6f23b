use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::request::HttpMethod;

pub const DEFAULT_FALLBACK_URL: &str = "http://localhost:5000/price";
pub const CONFIG_FILE_NAME: &str = "apiagent.toml";
pub const NESTED_CONFIG_FILE: &str = "config/apiagent.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub target: TargetConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub fallback_url: String,
    pub read_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailConfig {
    pub enabled: bool,
    /// Empty means only the fallback target's host is reachable.
    pub allowed_hosts: Vec<String>,
    pub allowed_methods: Vec<HttpMethod>,
    pub denied_path_prefixes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-5.2",
            Self::Anthropic => "claude-sonnet-4-5",
            Self::Ollama => "llama3.1",
        }
    }

    /// Vendor variable consulted when no `llm.api_key` is configured.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env().is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub fallback_url: Option<String>,
    pub read_timeout_secs: Option<u64>,
    pub guardrails_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: LlmProvider::Ollama.default_model().to_string(),
                timeout_secs: 120,
                max_tokens: 1024,
            },
            target: TargetConfig {
                fallback_url: DEFAULT_FALLBACK_URL.to_string(),
                read_timeout_secs: 30,
            },
            guardrails: GuardrailConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_hosts: Vec::new(),
            allowed_methods: vec![HttpMethod::Get, HttpMethod::Post],
            denied_path_prefixes: vec!["/admin".to_string()],
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" | "offline" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.apply_vendor_api_key();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.set_provider(provider);
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(target) = patch.target {
            if let Some(fallback_url) = target.fallback_url {
                self.target.fallback_url = fallback_url;
            }
            if let Some(read_timeout_secs) = target.read_timeout_secs {
                self.target.read_timeout_secs = read_timeout_secs;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(enabled) = guardrails.enabled {
                self.guardrails.enabled = enabled;
            }
            if let Some(allowed_hosts) = guardrails.allowed_hosts {
                self.guardrails.allowed_hosts = allowed_hosts;
            }
            if let Some(allowed_methods) = guardrails.allowed_methods {
                self.guardrails.allowed_methods = allowed_methods;
            }
            if let Some(denied_path_prefixes) = guardrails.denied_path_prefixes {
                self.guardrails.denied_path_prefixes = denied_path_prefixes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("APIAGENT_LLM_PROVIDER") {
            self.set_provider(value.parse()?);
        }
        if let Some(value) = read_env("APIAGENT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("APIAGENT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("APIAGENT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("APIAGENT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("APIAGENT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("APIAGENT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("APIAGENT_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("APIAGENT_TARGET_FALLBACK_URL") {
            self.target.fallback_url = value;
        }
        if let Some(value) = read_env("APIAGENT_TARGET_READ_TIMEOUT_SECS") {
            self.target.read_timeout_secs =
                parse_u64("APIAGENT_TARGET_READ_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("APIAGENT_GUARDRAILS_ENABLED") {
            self.guardrails.enabled = parse_bool("APIAGENT_GUARDRAILS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("APIAGENT_GUARDRAILS_ALLOWED_HOSTS") {
            self.guardrails.allowed_hosts = parse_list(&value);
        }
        if let Some(value) = read_env("APIAGENT_GUARDRAILS_ALLOWED_METHODS") {
            self.guardrails.allowed_methods =
                parse_methods("APIAGENT_GUARDRAILS_ALLOWED_METHODS", &value)?;
        }
        if let Some(value) = read_env("APIAGENT_GUARDRAILS_DENIED_PATH_PREFIXES") {
            self.guardrails.denied_path_prefixes = parse_list(&value);
        }

        let log_level =
            read_env("APIAGENT_LOGGING_LEVEL").or_else(|| read_env("APIAGENT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("APIAGENT_LOGGING_FORMAT").or_else(|| read_env("APIAGENT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.set_provider(llm_provider);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(fallback_url) = overrides.fallback_url {
            self.target.fallback_url = fallback_url;
        }
        if let Some(read_timeout_secs) = overrides.read_timeout_secs {
            self.target.read_timeout_secs = read_timeout_secs;
        }
        if let Some(enabled) = overrides.guardrails_enabled {
            self.guardrails.enabled = enabled;
        }
    }

    // Switching provider resets the model only while it still holds the
    // previous provider's default.
    fn set_provider(&mut self, provider: LlmProvider) {
        if self.llm.model == self.llm.provider.default_model() {
            self.llm.model = provider.default_model().to_string();
        }
        self.llm.provider = provider;
    }

    fn apply_vendor_api_key(&mut self) {
        if self.llm.api_key.is_some() {
            return;
        }
        if let Some(value) = self.llm.provider.api_key_env().and_then(read_env) {
            self.llm.api_key = Some(secret_value(value));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_target(&self.target)?;
        validate_guardrails(&self.guardrails)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

/// Parses `raw` as an absolute http(s) URL with a host.
pub fn parse_absolute_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|error| format!("`{raw}` is not a URL: {error}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("`{raw}` must use http or https"));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(format!("`{raw}` has no host"));
    }
    Ok(url)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        parse_absolute_url(base_url)
            .map_err(|reason| ConfigError::Validation(format!("llm.base_url {reason}")))?;
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            let vendor_env = llm.provider.api_key_env().unwrap_or("APIAGENT_LLM_API_KEY");
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider (set APIAGENT_LLM_API_KEY or {vendor_env})",
                llm.provider.as_str()
            )));
        }
    }

    Ok(())
}

fn validate_target(target: &TargetConfig) -> Result<(), ConfigError> {
    if target.fallback_url.trim().is_empty() {
        return Err(ConfigError::Validation("target.fallback_url is required".to_string()));
    }
    parse_absolute_url(&target.fallback_url)
        .map_err(|reason| ConfigError::Validation(format!("target.fallback_url {reason}")))?;

    if target.read_timeout_secs == 0 || target.read_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "target.read_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if !guardrails.enabled {
        return Ok(());
    }

    if guardrails.allowed_methods.is_empty() {
        return Err(ConfigError::Validation(
            "guardrails.allowed_methods must not be empty while guardrails are enabled"
                .to_string(),
        ));
    }

    if let Some(prefix) = guardrails.denied_path_prefixes.iter().find(|p| !p.starts_with('/')) {
        return Err(ConfigError::Validation(format!(
            "guardrails.denied_path_prefixes entry `{prefix}` must start with `/`"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_methods(key: &str, value: &str) -> Result<Vec<HttpMethod>, ConfigError> {
    parse_list(value)
        .iter()
        .map(|entry| {
            HttpMethod::parse(entry).ok_or_else(|| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    target: Option<TargetPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TargetPatch {
    fallback_url: Option<String>,
    read_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    enabled: Option<bool>,
    allowed_hosts: Option<Vec<String>>,
    allowed_methods: Option<Vec<HttpMethod>>,
    denied_path_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
