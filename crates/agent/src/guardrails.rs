use apiagent_core::config::{parse_absolute_url, GuardrailConfig};
use apiagent_core::{HttpMethod, RequestSpec};
use percent_encoding::percent_decode_str;
use url::Url;

pub const REFUSAL_SENTENCE: &str = "I am unable to assist you with that request.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    fn deny(reason_code: &'static str) -> Self {
        Self::Deny { reason_code, user_message: REFUSAL_SENTENCE.to_string() }
    }
}

/// Code-level check on the resolved `(url, method)` pair, run before every
/// outbound call. The classifier prompt asks the gateway for the same
/// restrictions, but nothing there is enforced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub enabled: bool,
    /// `host` or `host:port`, lowercase. Empty allows any host.
    pub allowed_hosts: Vec<String>,
    pub allowed_methods: Vec<HttpMethod>,
    pub denied_path_prefixes: Vec<String>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_hosts: Vec::new(),
            allowed_methods: vec![HttpMethod::Get, HttpMethod::Post],
            denied_path_prefixes: vec!["/admin".to_string()],
        }
    }
}

impl GuardrailPolicy {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// An empty host list in config scopes requests to the fallback target's
    /// `host:port`.
    pub fn from_config(config: &GuardrailConfig, fallback_url: &str) -> Self {
        let mut allowed_hosts =
            config.allowed_hosts.iter().map(|host| host.trim().to_ascii_lowercase()).collect::<Vec<_>>();
        if allowed_hosts.is_empty() {
            if let Ok(url) = parse_absolute_url(fallback_url) {
                allowed_hosts.push(host_with_port(&url));
            }
        }

        Self {
            enabled: config.enabled,
            allowed_hosts,
            allowed_methods: config.allowed_methods.clone(),
            denied_path_prefixes: config.denied_path_prefixes.clone(),
        }
    }

    pub fn evaluate(&self, spec: &RequestSpec) -> GuardrailDecision {
        if !self.enabled {
            return GuardrailDecision::Allow;
        }

        if !self.allowed_methods.contains(&spec.method) {
            return GuardrailDecision::deny("method_not_allowed");
        }

        let Ok(url) = parse_absolute_url(&spec.url) else {
            return GuardrailDecision::deny("unresolvable_target");
        };

        if !self.host_allowed(&url) {
            return GuardrailDecision::deny("host_out_of_scope");
        }

        let path = path_segments(url.path());
        let restricted = self
            .denied_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(&path_segments(prefix)));
        if restricted {
            return GuardrailDecision::deny("restricted_path");
        }

        GuardrailDecision::Allow
    }

    fn host_allowed(&self, url: &Url) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host_port = host_with_port(url);
        self.allowed_hosts.iter().any(|allowed| {
            if allowed.contains(':') {
                *allowed == host_port
            } else {
                *allowed == host
            }
        })
    }
}

/// Lowercased segments of a percent-decoded path with empty segments dropped,
/// so `/%61dmin` and `//admin` compare equal to `/admin`.
fn path_segments(path: &str) -> Vec<String> {
    percent_decode_str(path)
        .decode_utf8_lossy()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}
