use std::error::Error as StdError;
use std::time::Duration;

use apiagent_core::{HttpMethod, PipelineError, RawResponse, RequestSpec};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Url};
use serde_json::{Map, Value};
use tracing::debug;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends exactly one HTTP call per [`RequestSpec`].
///
/// Every failure to obtain a response comes back as
/// [`RawResponse::TransportFailure`]; non-2xx statuses, redirects included,
/// are ordinary bodies.
#[derive(Clone, Debug)]
pub struct RequestExecutor {
    client: Client,
    read_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(read_timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            // A followed hop would reach a URL the guardrails never saw.
            .redirect(Policy::none())
            .build()
            .map_err(|error| {
                PipelineError::Configuration(format!("failed to build http client: {error}"))
            })?;
        Ok(Self { client, read_timeout })
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub async fn execute(&self, spec: &RequestSpec) -> RawResponse {
        let url = match Url::parse(spec.url.trim()) {
            Ok(url) => url,
            Err(error) => {
                return RawResponse::transport_failure(format!("invalid URL `{}`: {error}", spec.url))
            }
        };

        let headers = match header_map(spec) {
            Ok(headers) => headers,
            Err(cause) => return RawResponse::transport_failure(cause),
        };

        let method = match spec.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut request = self.client.request(method, url).headers(headers);

        request = match (spec.method, &spec.payload) {
            (HttpMethod::Get, Value::Object(params)) => request.query(&query_pairs(params)),
            (HttpMethod::Get, _) | (HttpMethod::Post, Value::Null) => request,
            (HttpMethod::Post, payload) => request.json(payload),
        };

        debug!(method = %spec.method, url = %spec.url, "dispatching outbound request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return RawResponse::transport_failure(error_chain(&error)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => RawResponse::Body { status, text },
            Err(error) => RawResponse::transport_failure(error_chain(&error)),
        }
    }
}

fn header_map(spec: &RequestSpec) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::with_capacity(spec.headers.len());
    for (name, value) in &spec.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| format!("invalid header name `{name}`: {error}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|error| format!("invalid value for header `{name}`: {error}"))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Flattens a payload object into query pairs: scalars as text, arrays as
/// repeated keys, `null` skipped, nested objects as JSON text.
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Array(items) => pairs.extend(
                items.iter().filter_map(query_text).map(|text| (key.clone(), text)),
            ),
            other => pairs.extend(query_text(other).map(|text| (key.clone(), text))),
        }
    }
    pairs
}

fn query_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use apiagent_core::{HttpMethod, RawResponse, RequestSpec};
    use axum::{
        extract::RawQuery,
        http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
        response::Redirect,
        routing::get,
        Json, Router,
    };
    use tokio::time::Instant;
    use serde_json::{json, Value};

    use super::RequestExecutor;

    async fn echo(
        method: Method,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
        body: String,
    ) -> Json<Value> {
        Json(json!({
            "method": method.as_str(),
            "query": query,
            "body": body,
            "content_type": headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            "x_trace": headers.get("x-trace").and_then(|value| value.to_str().ok()),
        }))
    }

    async fn spawn_target() -> String {
        serve(
            Router::new()
                .route("/echo", get(echo).post(echo))
                .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") })),
        )
        .await
    }

    async fn serve(router: Router) -> String {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    fn executor() -> RequestExecutor {
        RequestExecutor::new(Duration::from_secs(5)).expect("executor should build")
    }

    fn echoed(response: RawResponse) -> Value {
        match response {
            RawResponse::Body { status, text } => {
                assert_eq!(status, 200);
                serde_json::from_str(&text).expect("echo body should be JSON")
            }
            RawResponse::TransportFailure { cause } => panic!("unexpected failure: {cause}"),
        }
    }

    #[tokio::test]
    async fn get_sends_payload_as_query_without_body() {
        let base = spawn_target().await;
        let spec = RequestSpec::new(HttpMethod::Get, format!("{base}/echo"))
            .with_payload(json!({"a": 1}));

        let echo = echoed(executor().execute(&spec).await);

        assert_eq!(echo["method"], "GET");
        assert_eq!(echo["query"], "a=1");
        assert_eq!(echo["body"], "");
    }

    #[tokio::test]
    async fn get_query_flattens_arrays_and_skips_nulls() {
        let base = spawn_target().await;
        let spec = RequestSpec::new(HttpMethod::Get, format!("{base}/echo"))
            .with_payload(json!({"tag": ["jazz", "rock"], "skip": null, "open": true}));

        let echo = echoed(executor().execute(&spec).await);
        let query = echo["query"].as_str().unwrap_or_default();

        assert!(query.contains("tag=jazz&tag=rock"), "query was {query}");
        assert!(query.contains("open=true"), "query was {query}");
        assert!(!query.contains("skip"), "query was {query}");
    }

    #[tokio::test]
    async fn post_sends_payload_as_json_body() {
        let base = spawn_target().await;
        let spec = RequestSpec::new(HttpMethod::Post, format!("{base}/echo"))
            .with_header("X-Trace", "abc")
            .with_payload(json!({"a": 1}));

        let echo = echoed(executor().execute(&spec).await);

        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["query"], Value::Null);
        assert_eq!(serde_json::from_str::<Value>(echo["body"].as_str().unwrap_or("")).ok(), Some(json!({"a": 1})));
        assert_eq!(echo["content_type"], "application/json");
        assert_eq!(echo["x_trace"], "abc");
    }

    #[tokio::test]
    async fn post_without_payload_sends_empty_body() {
        let base = spawn_target().await;
        let spec = RequestSpec::new(HttpMethod::Post, format!("{base}/echo"));

        let echo = echoed(executor().execute(&spec).await);

        assert_eq!(echo["body"], "");
    }

    #[tokio::test]
    async fn non_success_status_is_a_normal_body() {
        let base = spawn_target().await;
        let spec = RequestSpec::new(HttpMethod::Get, format!("{base}/broken"));

        let response = executor().execute(&spec).await;

        assert_eq!(response, RawResponse::Body { status: 500, text: "boom".to_string() });
    }

    #[tokio::test]
    async fn connection_refused_becomes_request_failed_text() {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        drop(listener);

        let spec = RequestSpec::new(HttpMethod::Get, format!("http://{address}/price"));
        let response = executor().execute(&spec).await;

        assert!(response.is_transport_failure());
        assert!(response.as_text().starts_with("Request failed: "));
    }

    #[tokio::test]
    async fn relative_url_and_bad_header_are_transport_failures() {
        let relative = executor().execute(&RequestSpec::new(HttpMethod::Get, "/price")).await;
        assert!(relative.as_text().starts_with("Request failed: invalid URL `/price`"));

        let bad_header = executor()
            .execute(
                &RequestSpec::new(HttpMethod::Get, "http://127.0.0.1:9/price")
                    .with_header("Bad Header", "x"),
            )
            .await;
        assert!(bad_header.as_text().starts_with("Request failed: invalid header name"));
    }

    #[tokio::test]
    async fn redirect_is_returned_as_body_and_not_followed() {
        let admin_hits = Arc::new(AtomicUsize::new(0));
        let counter = admin_hits.clone();
        let base = serve(
            Router::new()
                .route("/go", get(|| async { Redirect::temporary("/admin/users") }))
                .route(
                    "/admin/users",
                    get(move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            "SECRET USERS"
                        }
                    }),
                ),
        )
        .await;

        let response = executor().execute(&RequestSpec::new(HttpMethod::Get, format!("{base}/go"))).await;

        let RawResponse::Body { status, text } = response else {
            panic!("redirect should come back as a body");
        };
        assert_eq!(status, 307);
        assert!(!text.contains("SECRET USERS"));
        assert_eq!(admin_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_target_hits_read_timeout() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        ))
        .await;
        let executor = RequestExecutor::new(Duration::from_secs(1)).expect("executor should build");

        let started = Instant::now();
        let response = executor.execute(&RequestSpec::new(HttpMethod::Get, format!("{base}/slow"))).await;

        assert!(response.is_transport_failure(), "unexpected response: {response:?}");
        assert!(response.as_text().starts_with("Request failed: "));
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    }
}
