//! Semantic Scholar Graph API client for the citation crawler
//!
//! Everything here is synchronous; the HTTP transport bridges into the
//! crawl's tokio runtime internally.

pub mod batch;
pub mod pacer;
pub mod references;
pub mod requester;
pub mod schema;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use batch::{BATCH_FIELDS, DEFAULT_BATCH_SIZE, PaperMetadata, fetch_batch};
pub use pacer::Pacer;
pub use references::{FetchLimits, ReferenceFetcher, References};
pub use requester::Requester;
pub use transport::{
    ApiRequest, DEFAULT_API_ROOT, HttpTransport, Method, RawResponse, Transport, TransportError,
};
