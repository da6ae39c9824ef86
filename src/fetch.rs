use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ServiceSettings;
use crate::error::DocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self, what: &'static str) -> Result<T, DocketError> {
        serde_json::from_slice(&self.body).map_err(|err| DocketError::Parse {
            what,
            message: err.to_string(),
        })
    }
}

/// A failure below HTTP: no status line was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub transient: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Sends one request, no retries. The seam between [`FetchClient`] and the
/// network.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, DocketError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("docket-pipeline/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DocketError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DocketError::Http {
                service: "http",
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(RequestBody::Form(fields)) => builder.form(fields),
            Some(RequestBody::Json(value)) => builder.json(value),
            None => builder,
        };

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = response.bytes().map_err(classify_reqwest_error)?.to_vec();
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        TransportError::transient(err.to_string())
    } else {
        TransportError::fatal(err.to_string())
    }
}

/// Retry parameters shared by every network-facing component.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    retryable: fn(u16) -> bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            retryable: is_throttle_status,
        }
    }

    pub fn with_retryable(mut self, retryable: fn(u16) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Backoff before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        (self.retryable)(status)
    }
}

/// 429, and 403 which these services also use when throttling.
pub fn is_throttle_status(status: u16) -> bool {
    matches!(status, 429 | 403)
}

/// HTTP client for one external service. Enforces the service's politeness
/// delay between consecutive calls and retries throttling and transport
/// failures with exponential backoff. Any other non-2xx status is returned
/// as an error immediately.
pub struct FetchClient<T: Transport = ReqwestTransport> {
    service: &'static str,
    transport: T,
    policy: RetryPolicy,
    request_delay: Duration,
    default_headers: Vec<(String, String)>,
    sleeper: Arc<dyn Sleeper>,
    last_request: Mutex<Option<Instant>>,
}

impl FetchClient<ReqwestTransport> {
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self, DocketError> {
        let transport = ReqwestTransport::new(Duration::from_secs(60))?;
        Ok(Self::new(
            settings.name,
            transport,
            RetryPolicy::new(settings.max_retries, settings.retry_base),
            settings.request_delay,
        ))
    }
}

impl<T: Transport> FetchClient<T> {
    pub fn new(
        service: &'static str,
        transport: T,
        policy: RetryPolicy,
        request_delay: Duration,
    ) -> Self {
        Self {
            service,
            transport,
            policy,
            request_delay,
            default_headers: Vec::new(),
            sleeper: Arc::new(ThreadSleeper),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, DocketError> {
        self.request(HttpRequest::get(url))
    }

    pub fn post_form(
        &self,
        url: &str,
        fields: Vec<(String, String)>,
    ) -> Result<HttpResponse, DocketError> {
        self.request(HttpRequest::post(url, RequestBody::Form(fields)))
    }

    pub fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<HttpResponse, DocketError> {
        self.request(HttpRequest::post(url, RequestBody::Json(body)))
    }

    pub fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, DocketError> {
        for (name, value) in &self.default_headers {
            if !request.headers.iter().any(|(existing, _)| existing == name) {
                request.headers.push((name.clone(), value.clone()));
            }
        }

        let mut attempt = 0u32;
        loop {
            self.wait_for_slot();
            debug!(service = self.service, url = %request.url, attempt, "sending request");
            let result = self.transport.send(&request);
            self.mark_sent();

            let last = match result {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if self.policy.is_retryable_status(response.status) => {
                    format!("status {}", response.status)
                }
                Ok(response) => {
                    return Err(DocketError::Status {
                        service: self.service,
                        status: response.status,
                        message: snippet(&response.text()),
                    });
                }
                Err(err) if err.transient => err.message,
                Err(err) => {
                    return Err(DocketError::Http {
                        service: self.service,
                        message: err.message,
                    });
                }
            };

            if attempt >= self.policy.max_retries {
                return Err(DocketError::RetriesExhausted {
                    service: self.service,
                    attempts: attempt + 1,
                    last,
                });
            }
            let wait = self.policy.delay_for(attempt);
            warn!(
                service = self.service,
                url = %request.url,
                reason = %last,
                wait_ms = wait.as_millis() as u64,
                retry = attempt + 1,
                max_retries = self.policy.max_retries,
                "retrying request"
            );
            self.sleeper.sleep(wait);
            attempt += 1;
        }
    }

    fn wait_for_slot(&self) {
        let last = self.last_request.lock().ok().and_then(|guard| *guard);
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.request_delay {
                self.sleeper.sleep(self.request_delay - elapsed);
            }
        }
    }

    fn mark_sent(&self) {
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(Instant::now());
        }
    }
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(20));
        assert_eq!(policy.delay_for(2), Duration::from_secs(40));
    }

    #[test]
    fn only_throttling_statuses_retry_by_default() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        assert!(policy.is_retryable_status(429));
        assert!(policy.is_retryable_status(403));
        assert!(!policy.is_retryable_status(404));
        assert!(!policy.is_retryable_status(500));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), 203);
        assert_eq!(snippet(" short "), "short");
    }
}
