//! Scripted transports for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::transport::{ApiRequest, RawResponse, Transport, TransportError};

/// Replays a fixed list of outcomes, then answers 500 forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    pub requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::new(500, "script exhausted")))
    }
}

/// Serves `GET paper/{id}/references` pages out of one reference list.
///
/// `overlap` re-sends the last N ids of the previous page at the start of the
/// next, the way a shifting upstream index does. `fail_from_call` makes every
/// call from that index on answer 503.
pub struct PagedReferences {
    pub refs: Vec<String>,
    pub overlap: usize,
    pub fail_from_call: Option<usize>,
    pub calls: AtomicUsize,
    pub offsets: Mutex<Vec<usize>>,
}

impl PagedReferences {
    pub fn new(count: usize) -> Self {
        Self {
            refs: (0..count).map(|i| format!("ref-{i:05}")).collect(),
            overlap: 0,
            fail_from_call: None,
            calls: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for PagedReferences {
    fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let offset: usize = request.query_param("offset").unwrap().parse().unwrap();
        let limit: usize = request.query_param("limit").unwrap().parse().unwrap();
        self.offsets.lock().unwrap().push(offset);
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Ok(RawResponse::new(503, "busy"));
        }

        let start = offset.saturating_sub(if offset > 0 { self.overlap } else { 0 });
        let end = (offset + limit).min(self.refs.len());
        let data: Vec<serde_json::Value> = self.refs[start.min(end)..end]
            .iter()
            .map(|id| serde_json::json!({"citedPaper": {"paperId": id}}))
            .collect();
        let mut body = serde_json::json!({"offset": offset, "data": data});
        if end < self.refs.len() {
            body["next"] = serde_json::json!(end);
        }
        Ok(RawResponse::ok(body.to_string()))
    }
}
