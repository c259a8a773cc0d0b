use crate::errors::ChirpError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            uri: uri.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn post_form(uri: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            uri: uri.into(),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam. Everything the application sends to other servers goes
/// through one of these so a cassette scope can stand in for the network.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, ChirpError>;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), ChirpError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ChirpError> {
        std::fs::read_to_string(path)
            .map_err(|e| ChirpError::Io(format!("{}: {e}", path.display())))
    }
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Live transport backed by a blocking `reqwest` client.
pub struct ProductionHttpTransport {
    client: reqwest::blocking::Client,
}

impl ProductionHttpTransport {
    pub fn new() -> Result<Self, ChirpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChirpError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ProductionHttpTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ChirpError::Http(e.to_string()))?;
        let mut builder = self.client.request(method, &request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .body(request.body)
            .send()
            .map_err(|e| ChirpError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .map_err(|e| ChirpError::Http(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), ChirpError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ChirpError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub http: Arc<dyn HttpTransport>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Result<Self, ChirpError> {
        Ok(Self {
            file_system: Arc::new(ProductionFileSystem),
            http: Arc::new(ProductionHttpTransport::new()?),
            terminal: Arc::new(ProductionTerminal),
        })
    }
}

/// Read-only in-memory file system for config loading tests.
#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), contents.into());
        fs
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ChirpError> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| ChirpError::Io(format!("missing file {}", path.display())))
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), ChirpError> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

/// Transport double: answers from a FIFO of queued responses and remembers
/// every request it saw.
#[derive(Default, Clone)]
pub struct FakeHttpTransport {
    responses: Arc<Mutex<Vec<Result<HttpResponse, ChirpError>>>>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeHttpTransport {
    pub fn push_response(&self, response: Result<HttpResponse, ChirpError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl HttpTransport for FakeHttpTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            return Err(ChirpError::Http("no fake response queued".to_string()));
        }
        responses.remove(0)
    }
}
