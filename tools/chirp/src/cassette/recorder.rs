//! Record side of a cassette scope: forwards to a live transport and keeps
//! every request/response pair.

use crate::cassette::recording::{
    Cassette, InteractionRecord, RecordedRequest, RecordedResponse,
};
use crate::errors::ChirpError;
use crate::logging::append_run_log;
use crate::runtime::{HttpRequest, HttpResponse, HttpTransport};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_nanos)
        .unwrap_or(0)
}

fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Wraps the live transport, recording each completed call. Failed calls
/// (transport errors) are passed through and not recorded.
pub struct RecordingTransport {
    name: String,
    started_at_ns: u64,
    inner: Arc<dyn HttpTransport>,
    recorded: Mutex<Vec<InteractionRecord>>,
}

impl RecordingTransport {
    pub fn new(name: &str, inner: Arc<dyn HttpTransport>) -> Self {
        Self {
            name: name.to_string(),
            started_at_ns: timestamp_ns(),
            inner,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn into_cassette(self) -> Cassette {
        let mut cassette = Cassette::new(&self.name, self.started_at_ns);
        cassette.interactions = self
            .recorded
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        cassette
    }
}

impl HttpTransport for RecordingTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError> {
        let recorded_request = RecordedRequest::from_request(&request);
        let response = self.inner.send(request)?;
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = recorded.len() as u64 + 1;
        append_run_log(
            "debug",
            "cassette.request.recorded",
            json!({
                "cassette": self.name,
                "seq": seq,
                "method": recorded_request.method,
                "uri": recorded_request.uri,
                "status": response.status,
            }),
        );
        recorded.push(InteractionRecord {
            seq,
            recorded_at_unix_ns: timestamp_ns(),
            request: recorded_request,
            response: RecordedResponse::from_response(&response),
        });
        Ok(response)
    }
}
