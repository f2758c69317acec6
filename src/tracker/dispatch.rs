use std::fmt;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::tracker::chunk::chunk;
use crate::tracker::error::Result;
use crate::tracker::model::{ObjectId, RowCreate, RowUpdate};

/// HTTP verbs used against the sheet store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
            Method::Post => write!(f, "POST"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// An outbound request. Bodies are already serialized JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }
}

/// A response received from the store, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Failure to obtain any response at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established. Eligible for retry.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other failure while sending or reading the request.
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

/// Sends requests to the store. Implemented over HTTP by
/// [`HttpTransport`](crate::tracker::client::HttpTransport).
pub trait Transport {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
        (**self).send(request)
    }
}

/// Bounds the number of attempts made for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF_SECS: u64 = 3;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_secs(Self::DEFAULT_BACKOFF_SECS),
        }
    }
}

/// Terminal state of one physical request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A response was received. The status may still signal a rejection.
    Delivered { response: Response, attempts: u32 },
    /// No response after exhausting the attempts, or a non-transient failure.
    Failed { error: TransportError, attempts: u32 },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Delivered { attempts, .. } | DispatchOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { response, .. } if response.is_success())
    }
}

/// Sends `request`, retrying connection failures with a fixed backoff.
pub fn send_with_retry<T: Transport + ?Sized>(
    transport: &T,
    request: &Request,
    policy: &RetryPolicy,
) -> DispatchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match transport.send(request) {
            Ok(response) => {
                return DispatchOutcome::Delivered {
                    response,
                    attempts: attempt,
                };
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                warn!(
                    method = %request.method,
                    attempt,
                    max_attempts,
                    %error,
                    "connection failed, retrying"
                );
                thread::sleep(policy.backoff);
                attempt += 1;
            }
            Err(error) => {
                return DispatchOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }
        }
    }
}

/// One of the three operation batches of a mapping.
#[derive(Debug, Clone, Copy)]
pub enum Batch<'a> {
    Update(&'a [RowUpdate]),
    Delete(&'a [ObjectId]),
    Create(&'a [RowCreate]),
}

impl Batch<'_> {
    pub fn method(&self) -> Method {
        match self {
            Batch::Update(_) => Method::Put,
            Batch::Delete(_) => Method::Delete,
            Batch::Create(_) => Method::Post,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Update(rows) => rows.len(),
            Batch::Delete(ids) => ids.len(),
            Batch::Create(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns batches into requests against a sheet's rows collection.
pub struct Dispatcher<'t, T: Transport + ?Sized> {
    transport: &'t T,
    policy: RetryPolicy,
    max_uri_length: usize,
}

impl<'t, T: Transport + ?Sized> Dispatcher<'t, T> {
    pub fn new(transport: &'t T, policy: RetryPolicy, max_uri_length: usize) -> Self {
        Self {
            transport,
            policy,
            max_uri_length,
        }
    }

    /// Sends a batch and returns one outcome per physical request. Empty
    /// batches send nothing.
    #[instrument(level = "debug", skip(self, batch), fields(method = %batch.method(), size = batch.len()))]
    pub fn dispatch(&self, batch: Batch<'_>, rows_url: &str) -> Result<Vec<DispatchOutcome>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let requests = match batch {
            Batch::Update(rows) => vec![Request {
                method: Method::Put,
                url: rows_url.to_string(),
                body: Some(serde_json::to_string(rows)?),
            }],
            Batch::Create(rows) => vec![Request {
                method: Method::Post,
                url: rows_url.to_string(),
                body: Some(serde_json::to_string(rows)?),
            }],
            Batch::Delete(ids) => self.delete_requests(rows_url, ids),
        };

        debug!(request_count = requests.len(), "dispatching batch");
        Ok(requests
            .iter()
            .map(|request| send_with_retry(self.transport, request, &self.policy))
            .collect())
    }

    fn delete_requests(&self, rows_url: &str, ids: &[ObjectId]) -> Vec<Request> {
        let prefix = format!("{rows_url}?ids=");
        chunk(&prefix, ids, self.max_uri_length)
            .filter(|group| !group.is_empty())
            .map(|group| Request {
                method: Method::Delete,
                url: format!("{prefix}{}&ignoreRowsNotFound=true", group.join(",")),
                body: None,
            })
            .collect()
    }
}
