use crate::core::config::NetworkConfig;
use crate::core::errors::NetworkError;
use crate::core::traits::SessionSource;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// REST client trait for request/response exchanges
///
/// Services are written against this trait so they can run over any client
/// that applies the same retry and session rules.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Execute a request and return the response body as JSON
    ///
    /// An empty success body is returned as `Value::Null`.
    async fn send_value(&self, request: ApiRequest) -> Result<Value, NetworkError>;

    /// Execute a request with a strongly-typed response
    async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, NetworkError> {
        let value = self.send_value(request).await?;
        serde_json::from_value(value).map_err(|e| {
            NetworkError::Deserialization(format!("Failed to deserialize JSON: {}", e))
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, NetworkError> {
        self.send(ApiRequest::get(endpoint)).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Value,
    ) -> Result<T, NetworkError> {
        self.send(ApiRequest::post(endpoint).with_body(body)).await
    }

    /// Multipart upload under the same retry and cancellation rules
    async fn upload_file<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        file: FileUpload,
        cancel: &CancellationToken,
    ) -> Result<T, NetworkError> {
        self.send(ApiRequest::upload(endpoint, file).with_cancellation(cancel.clone()))
            .await
    }
}

/// One file sent as a multipart form part
#[derive(Clone)]
pub struct FileUpload {
    /// Form field the file is attached to
    pub field_name: String,
    pub file_name: String,
    pub mime: Option<String>,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl FileUpload {
    pub fn new(file_name: &str, data: Vec<u8>) -> Self {
        Self {
            field_name: "file".to_string(),
            file_name: file_name.to_string(),
            mime: None,
            data,
        }
    }

    pub fn with_field_name(mut self, field_name: &str) -> Self {
        self.field_name = field_name.to_string();
        self
    }

    pub fn with_mime(mut self, mime: &str) -> Self {
        self.mime = Some(mime.to_string());
        self
    }

    /// A fresh form per attempt, multipart bodies are consumed on send
    fn form(&self) -> Result<Form, NetworkError> {
        let mut part = Part::bytes(self.data.clone()).file_name(self.file_name.clone());
        if let Some(mime) = &self.mime {
            part = part.mime_str(mime)?;
        }
        Ok(Form::new().part(self.field_name.clone(), part))
    }
}

/// One outgoing request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `"chat"`
    pub endpoint: String,
    pub body: Option<Value>,
    /// Sent as multipart form data instead of the JSON body
    pub file: Option<FileUpload>,
    pub headers: Vec<(String, String)>,
    /// Inject the current session id into the body when its own is empty
    pub requires_session: bool,
    pub cancellation: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: &str) -> Self {
        Self {
            method,
            endpoint: endpoint.to_string(),
            body: None,
            file: None,
            headers: Vec::new(),
            requires_session: false,
            cancellation: None,
        }
    }

    pub fn get(endpoint: &str) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: &str) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: &str) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn delete(endpoint: &str) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn upload(endpoint: &str, file: FileUpload) -> Self {
        Self::post(endpoint).with_file(file)
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json<B: Serialize>(self, body: &B) -> Result<Self, NetworkError> {
        let value = serde_json::to_value(body).map_err(|e| {
            NetworkError::Serialization(format!("Failed to serialize request body: {}", e))
        })?;
        Ok(self.with_body(value))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn requiring_session(mut self) -> Self {
        self.requires_session = true;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Per-request retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Zero-based index of the attempt in flight
    pub attempt: u32,
    /// Delay before the next attempt, if one is made
    pub next_delay: Duration,
    pub elapsed: Duration,
}

impl RetryAttempt {
    fn first(base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            next_delay: base_delay,
            elapsed: Duration::ZERO,
        }
    }

    /// Linear schedule: the delay after attempt `n` is `base * (n + 1)`
    pub fn delay_after(base_delay: Duration, attempt: u32) -> Duration {
        base_delay.saturating_mul(attempt.saturating_add(1))
    }

    fn advance(&mut self, base_delay: Duration, started: Instant) {
        self.attempt += 1;
        self.next_delay = Self::delay_after(base_delay, self.attempt);
        self.elapsed = started.elapsed();
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL including the API path and version
    pub base_url: String,
    pub timeout: Duration,
    /// Additional attempts after the first
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
    pub content_type: String,
    /// Body field that carries the session id
    pub session_field: String,
}

impl RestClientConfig {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            user_agent: "ChatWire-Client/1.0".to_string(),
            content_type: "application/json".to_string(),
            session_field: "sessionId".to_string(),
        }
    }

    pub fn from_network(config: &NetworkConfig) -> Self {
        Self {
            base_url: config.api_base_url(),
            timeout: config.api.timeout(),
            max_retries: config.api.max_retry_count,
            retry_delay: config.api.retry_delay(),
            user_agent: config.api.user_agent.clone(),
            content_type: config.api.content_type.clone(),
            session_field: config.api.session_field.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    session: Option<Arc<dyn SessionSource>>,
    auth_token: Option<String>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            session: None,
            auth_token: None,
        }
    }

    /// Source of the session id injected into session-correlated requests
    pub fn with_session_source(mut self, session: Arc<dyn SessionSource>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    pub fn build(self) -> Result<RetryingClient, NetworkError> {
        let client = Client::builder().timeout(self.config.timeout).build()?;

        let default_headers = vec![
            ("Content-Type".to_string(), self.config.content_type.clone()),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
            ("Accept".to_string(), "application/json".to_string()),
        ];

        let rest = RetryingClient {
            client,
            config: self.config,
            default_headers: Arc::new(RwLock::new(default_headers)),
            session: self.session,
            shutdown: CancellationToken::new(),
        };
        if let Some(token) = self.auth_token {
            rest.set_auth_token(&token);
        }
        Ok(rest)
    }
}

/// What one HTTP attempt produced
enum AttemptOutcome {
    Success(Value),
    Status { status: StatusCode, body: String },
    Transport(String),
}

/// `RestClient` over reqwest with linear retry, session injection and
/// cancellation
#[derive(Clone)]
pub struct RetryingClient {
    client: Client,
    config: RestClientConfig,
    default_headers: Arc<RwLock<Vec<(String, String)>>>,
    session: Option<Arc<dyn SessionSource>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RetryingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingClient")
            .field("config", &self.config)
            .field("has_session_source", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryingClient {
    pub fn new(config: RestClientConfig) -> Result<Self, NetworkError> {
        RestClientBuilder::new(config).build()
    }

    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    /// Add or replace a header sent with every request
    pub fn add_default_header(&self, name: &str, value: &str) {
        let mut headers = self
            .default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.to_string(), value.to_string()));
    }

    pub fn set_auth_token(&self, token: &str) {
        self.add_default_header("Authorization", &format!("Bearer {}", token));
    }

    /// Cancel every in-flight and future request
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn is_retryable(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Fill the session field of a JSON object body if it is missing or empty
    fn inject_session(&self, body: &mut Value, endpoint: &str) {
        let field = self.config.session_field.as_str();
        let Some(object) = body.as_object_mut() else {
            warn!(endpoint, "Session-correlated request without an object body");
            return;
        };

        let present = object
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if present {
            return;
        }

        match self.session.as_ref().and_then(|s| s.current_session()) {
            Some(session_id) => {
                debug!(endpoint, %session_id, "Injecting session id");
                object.insert(field.to_string(), Value::String(session_id));
            }
            None => {
                warn!(endpoint, "No session id available, sending request without one");
            }
        }
    }

    async fn execute_once(
        &self,
        method: &Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        form: Option<Form>,
    ) -> AttemptOutcome {
        let mut request = self.client.request(method.clone(), url);
        for (name, value) in headers {
            // reqwest sets the multipart content type with its boundary
            if form.is_some() && name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(form) = form {
            request = request.multipart(form);
        } else if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Transport(format!("Request failed: {}", e)),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return AttemptOutcome::Transport(format!("Failed to read response body: {}", e))
            }
        };
        trace!(%status, "Response body: {}", text);

        if !status.is_success() {
            return AttemptOutcome::Status { status, body: text };
        }
        if text.trim().is_empty() {
            return AttemptOutcome::Success(Value::Null);
        }
        match serde_json::from_str(&text) {
            Ok(value) => AttemptOutcome::Success(value),
            // Not retryable: the server answered, just not with JSON
            Err(e) => AttemptOutcome::Status {
                status,
                body: format!("{} ({})", text, e),
            },
        }
    }
}

#[async_trait]
impl RestClient for RetryingClient {
    #[instrument(skip(self, request), fields(method = %request.method, endpoint = %request.endpoint))]
    async fn send_value(&self, mut request: ApiRequest) -> Result<Value, NetworkError> {
        if self.shutdown.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }

        if request.requires_session {
            if let Some(body) = request.body.as_mut() {
                self.inject_session(body, &request.endpoint);
            }
        }

        let url = self.build_url(&request.endpoint);
        let body = request.body.as_ref().map(serde_json::to_vec).transpose()?;

        let mut headers = self
            .default_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        headers.extend(request.headers.iter().cloned());

        let caller = request
            .cancellation
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let started = Instant::now();
        let mut attempt = RetryAttempt::first(self.config.retry_delay);

        loop {
            let form = request.file.as_ref().map(FileUpload::form).transpose()?;
            let outcome = tokio::select! {
                biased;
                () = caller.cancelled() => return Err(NetworkError::Cancelled),
                () = self.shutdown.cancelled() => return Err(NetworkError::Cancelled),
                outcome = self.execute_once(&request.method, &url, &headers, body.as_deref(), form) => outcome,
            };

            let can_retry = attempt.attempt < self.config.max_retries;
            let failure = match outcome {
                AttemptOutcome::Success(value) => {
                    debug!(attempts = attempt.attempt + 1, "Request succeeded");
                    return Ok(value);
                }
                AttemptOutcome::Status { status, .. } if Self::is_retryable(status) && can_retry => {
                    warn!(attempt = attempt.attempt, %status, "Retryable response");
                    None
                }
                AttemptOutcome::Status { status, body } => Some(NetworkError::RequestFailure {
                    status: status.as_u16(),
                    message: format!(
                        "{} {} returned {}",
                        request.method, request.endpoint, status
                    ),
                    body,
                }),
                AttemptOutcome::Transport(message) if can_retry => {
                    warn!(attempt = attempt.attempt, %message, "Transport failure");
                    None
                }
                AttemptOutcome::Transport(message) => Some(NetworkError::RequestFailure {
                    status: 0,
                    body: String::new(),
                    message: format!(
                        "{} {} failed after {} attempts: {}",
                        request.method,
                        request.endpoint,
                        attempt.attempt + 1,
                        message
                    ),
                }),
            };
            if let Some(error) = failure {
                return Err(error);
            }

            let delay = attempt.next_delay;
            attempt.advance(self.config.retry_delay, started);
            trace!(?attempt, ?delay, "Scheduling retry");

            tokio::select! {
                biased;
                () = caller.cancelled() => return Err(NetworkError::Cancelled),
                () = self.shutdown.cancelled() => return Err(NetworkError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
