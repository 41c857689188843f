//! Error taxonomy for the crawl engine
//!
//! Transient errors are retried inside the component that hit them; what
//! escapes to the crawler is either permanent or an exhausted retry budget.

use std::fmt;

use crate::types::PaperId;

/// Failure talking to the paper-metadata API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// 429, 5xx or a connection problem that survived every retry.
    Transient {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },
    /// Retrying cannot fix it: 4xx other than 429, or a malformed body.
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl UpstreamError {
    pub fn transient(status: Option<u16>, attempts: u32, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            attempts,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: format!("malformed response: {}", message.into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient {
                status: Some(s),
                attempts,
                message,
            } => write!(f, "HTTP {s} after {attempts} attempts: {message}"),
            Self::Transient {
                status: None,
                attempts,
                message,
            } => write!(f, "request failed after {attempts} attempts: {message}"),
            Self::Permanent {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Permanent {
                status: None,
                message,
            } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Failure in the relational store or the tables backing the queue and markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Lock contention / deadlock that outlasted the store retry budget.
    Conflict { attempts: u32, message: String },
    /// Bad SQL, constraint or decode failure. Retrying will not help.
    Schema(String),
    /// The database could not be reached (I/O, closed pool).
    Unavailable(String),
}

impl PersistenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { attempts, message } => {
                write!(f, "write conflict after {attempts} attempts: {message}")
            }
            Self::Schema(msg) => write!(f, "schema error: {msg}"),
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Failure of the durable task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Unavailable(String),
    /// A stored payload could not be encoded or decoded.
    Payload(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "queue unavailable: {msg}"),
            Self::Payload(msg) => write!(f, "bad queue payload: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<PersistenceError> for QueueError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Schema(msg) => Self::Payload(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Why a single paper could not be crawled in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlError {
    Upstream(UpstreamError),
    Persistence(PersistenceError),
    Queue(QueueError),
    /// The API has no record for this id.
    NotFound(PaperId),
    /// Per-paper retry budget exhausted; the paper is dropped from the queue
    /// without being marked processed.
    PermanentFailure {
        paper_id: PaperId,
        attempts: u32,
        reason: String,
    },
}

impl CrawlError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_retryable(),
            Self::Persistence(e) => e.is_retryable(),
            Self::Queue(e) => e.is_retryable(),
            Self::NotFound(_) | Self::PermanentFailure { .. } => false,
        }
    }
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream(e) => write!(f, "upstream: {e}"),
            Self::Persistence(e) => write!(f, "persistence: {e}"),
            Self::Queue(e) => write!(f, "{e}"),
            Self::NotFound(id) => write!(f, "paper {id} not found upstream"),
            Self::PermanentFailure {
                paper_id,
                attempts,
                reason,
            } => write!(f, "paper {paper_id} abandoned after {attempts} attempts: {reason}"),
        }
    }
}

impl std::error::Error for CrawlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Upstream(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::Queue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UpstreamError> for CrawlError {
    fn from(e: UpstreamError) -> Self {
        Self::Upstream(e)
    }
}

impl From<PersistenceError> for CrawlError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<QueueError> for CrawlError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}
