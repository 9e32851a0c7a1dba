//! JSON queries through the connection scheduler
//!
//! A query is the start action the scheduler runs for most API calls:
//! - Send the request (optional JSON or text body, basic auth)
//! - Accumulate the response body chunk by chunk
//! - Fail on transport errors, non-2xx status or timeout (body still kept)
//! - Parse the body as JSON, falling back to the raw text on parse failure
//! - Hand the outcome to the result handler, then release the slot

use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::connection::options::RequestOptions;
use crate::connection::scheduler::{ConnectionId, ConnectionScheduler};
use crate::errors::{KvisError, Result};

/// Body sent with a query
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(JsonValue),
    Text(String),
}

impl From<JsonValue> for RequestBody {
    fn from(value: JsonValue) -> Self {
        RequestBody::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

/// A failed query and whatever body text arrived before it failed
#[derive(Debug)]
pub struct QueryFailure {
    pub error: KvisError,
    pub body: String,
}

impl QueryFailure {
    fn new(error: KvisError, body: String) -> Self {
        Self { error, body }
    }
}

/// Parsed JSON on success
pub type QueryResult = std::result::Result<JsonValue, QueryFailure>;

impl ConnectionScheduler {
    /// Submit a JSON query; `handler` receives the outcome exactly once
    ///
    /// The exchange runs on the current tokio runtime. Without one, the
    /// handler gets a transport error and the slot is released immediately.
    pub fn submit_json_query<H>(
        &self,
        options: RequestOptions,
        body: Option<RequestBody>,
        handler: H,
    ) -> ConnectionId
    where
        H: FnOnce(QueryResult) + Send + 'static,
    {
        let client = self.client.clone();
        let timeout = self.request_timeout;

        self.submit(options, move |options, completion| {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let outcome = run_json_query(&client, &options, body, timeout).await;
                        handler(outcome);
                        completion.complete();
                    });
                }
                Err(e) => {
                    error!(path = %options.path, "No async runtime for query: {}", e);
                    handler(Err(QueryFailure::new(
                        KvisError::Transport(format!("No async runtime: {}", e)),
                        String::new(),
                    )));
                    completion.complete();
                }
            }
        })
    }

    /// Submit a JSON query and await its outcome
    ///
    /// # Example
    ///
    /// ```no_run
    /// use kvis_core::connection::{ApiRequestBuilder, ConnectionScheduler, SchedulerConfig};
    ///
    /// # async fn run() {
    /// let scheduler = ConnectionScheduler::new(SchedulerConfig::default()).unwrap();
    /// let api = ApiRequestBuilder::new("10.0.0.1", "v1beta1");
    ///
    /// match scheduler.query_json(api.get("pods"), None).await {
    ///     Ok(pods) => println!("{}", pods),
    ///     Err(failure) => eprintln!("{} ({})", failure.error, failure.body),
    /// }
    /// # }
    /// ```
    pub async fn query_json(&self, options: RequestOptions, body: Option<RequestBody>) -> QueryResult {
        let (tx, rx) = oneshot::channel();
        self.submit_json_query(options, body, move |outcome| {
            let _ = tx.send(outcome);
        });

        rx.await.unwrap_or_else(|_| {
            Err(QueryFailure::new(
                KvisError::Transport("Query abandoned before it completed".to_string()),
                String::new(),
            ))
        })
    }

    /// Submit a JSON query, resubmitting it on failure
    ///
    /// Each retry goes back through the scheduler like a fresh request.
    /// `attempts` counts the first try; 0 behaves like 1.
    pub fn submit_json_query_with_retry<H>(
        &self,
        options: RequestOptions,
        body: Option<RequestBody>,
        attempts: u32,
        handler: H,
    ) -> ConnectionId
    where
        H: FnOnce(QueryResult) + Send + 'static,
    {
        let scheduler = self.clone();
        let retry_options = options.clone();
        let retry_body = body.clone();

        self.submit_json_query(options, body, move |outcome| match outcome {
            Err(failure) if attempts > 1 => {
                warn!(
                    path = %retry_options.path,
                    remaining = attempts - 1,
                    "Query failed, trying again: {}",
                    failure.error
                );
                scheduler.submit_json_query_with_retry(retry_options, retry_body, attempts - 1, handler);
            }
            outcome => handler(outcome),
        })
    }
}

async fn run_json_query(
    client: &reqwest::Client,
    options: &RequestOptions,
    body: Option<RequestBody>,
    timeout: Duration,
) -> QueryResult {
    let mut output = Vec::new();

    let exchanged = tokio::time::timeout(timeout, exchange(client, options, body, &mut output)).await;
    let output = String::from_utf8_lossy(&output).into_owned();

    let failure = match exchanged {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => {
            warn!(path = %options.path, "The request timed out");
            Some(KvisError::Timeout {
                path: options.path.clone(),
                after: timeout,
            })
        }
    };

    if let Some(error) = failure {
        return Err(QueryFailure::new(error, output));
    }

    match serde_json::from_str::<JsonValue>(&output) {
        Ok(json) => Ok(json),
        Err(e) => {
            debug!(path = %options.path, "Response is not JSON: {}", e);
            Err(QueryFailure::new(KvisError::Parse(e.to_string()), output))
        }
    }
}

// Sends the request and appends the response body to `output`.
async fn exchange(
    client: &reqwest::Client,
    options: &RequestOptions,
    body: Option<RequestBody>,
    output: &mut Vec<u8>,
) -> Result<()> {
    let mut request = client.request(options.method.clone(), options.url());

    if let Some(credentials) = &options.credentials {
        request = request.basic_auth(&credentials.user, Some(&credentials.password));
    }

    request = match body {
        Some(RequestBody::Json(value)) => request.json(&value),
        Some(RequestBody::Text(text)) => request.body(text),
        None => request,
    };

    let mut response = request.send().await.map_err(|e| {
        error!(path = %options.path, "Request error: {}", e);
        KvisError::from(e)
    })?;

    let status = response.status();
    let status_error = if status.is_success() {
        None
    } else {
        error!(status = status.as_u16(), path = %options.path, "Unexpected status code");
        Some(KvisError::Status {
            status: status.as_u16(),
            path: options.path.clone(),
        })
    };

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => output.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                warn!(path = %options.path, "Response body cut short: {}", e);
                return Err(status_error.unwrap_or_else(|| KvisError::from(e)));
            }
        }
    }

    match status_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
