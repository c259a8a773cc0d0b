//! Serializable cassette types.
//!
//! A cassette is a JSONL file: one `cassette_start` line followed by one
//! `interaction` line per recorded request/response pair.

use crate::errors::ChirpError;
use crate::runtime::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

/// Bodies above this size carry a digest alongside the full text.
const LARGE_BODY_THRESHOLD: usize = 64 * 1024;

/// Request headers never written to a cassette.
const SCRUBBED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Response headers never written to a cassette.
const SCRUBBED_RESPONSE_HEADERS: &[&str] = &["set-cookie"];

// ── RecordedRequest ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub uri: String,
    /// Lower-cased header subset, credentials removed.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl RecordedRequest {
    pub fn from_request(request: &HttpRequest) -> Self {
        Self {
            method: request.method.to_ascii_uppercase(),
            uri: request.uri.clone(),
            headers: scrub_headers(&request.headers, SCRUBBED_HEADERS),
            body: request.body.clone(),
        }
    }
}

// ── RecordedResponse ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Always the full body; replay hands back exactly what was recorded.
    #[serde(default)]
    pub body: String,
    /// Hex SHA-256 of `body`, kept for large bodies so a hand-edited or
    /// clipped cassette fails to load instead of replaying something else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_sha256: Option<String>,
}

impl RecordedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        let body_sha256 =
            (response.body.len() > LARGE_BODY_THRESHOLD).then(|| sha256_hex(&response.body));
        Self {
            status: response.status,
            headers: scrub_headers(&response.headers, SCRUBBED_RESPONSE_HEADERS),
            body: response.body.clone(),
            body_sha256,
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Whether the stored body still hashes to the recorded digest.
    pub fn body_intact(&self) -> bool {
        self.body_sha256
            .as_deref()
            .map_or(true, |digest| digest.eq_ignore_ascii_case(&sha256_hex(&self.body)))
    }
}

fn scrub_headers(headers: &[(String, String)], scrubbed: &[&str]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .filter(|(name, _)| !scrubbed.contains(&name.as_str()))
        .collect()
}

fn sha256_hex(body: &str) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(body.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ── CassetteEntry ─────────────────────────────────────────────────────────────

/// The tagged enum serialized as a single JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CassetteEntry {
    CassetteStart(CassetteStartRecord),
    Interaction(InteractionRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassetteStartRecord {
    pub name: String,
    pub recorded_at_unix_ns: u64,
    pub chirp_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub seq: u64,
    #[serde(default)]
    pub recorded_at_unix_ns: u64,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

// ── Cassette ──────────────────────────────────────────────────────────────────

/// A parsed cassette: header plus interactions in recorded order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cassette {
    pub header: CassetteStartRecord,
    pub interactions: Vec<InteractionRecord>,
}

impl Cassette {
    pub fn new(name: &str, recorded_at_unix_ns: u64) -> Self {
        Self {
            header: CassetteStartRecord {
                name: name.to_string(),
                recorded_at_unix_ns,
                chirp_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            interactions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Parse a JSONL cassette. The first non-blank line must be the
    /// `cassette_start` entry for `name`.
    pub fn parse(name: &str, raw: &str) -> Result<Self, ChirpError> {
        let mut header: Option<CassetteStartRecord> = None;
        let mut interactions = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: CassetteEntry = serde_json::from_str(line).map_err(|e| {
                ChirpError::CassetteFormat(format!("{name} line {}: {e}", idx + 1))
            })?;
            match entry {
                CassetteEntry::CassetteStart(start) => {
                    if header.is_some() {
                        return Err(ChirpError::CassetteFormat(format!(
                            "{name} line {}: duplicate cassette_start entry",
                            idx + 1
                        )));
                    }
                    header = Some(start);
                }
                CassetteEntry::Interaction(interaction) => {
                    if header.is_none() {
                        return Err(ChirpError::CassetteFormat(format!(
                            "{name} line {}: interaction before cassette_start",
                            idx + 1
                        )));
                    }
                    if !interaction.response.body_intact() {
                        return Err(ChirpError::CassetteFormat(format!(
                            "{name} line {}: response body does not match its sha256",
                            idx + 1
                        )));
                    }
                    interactions.push(interaction);
                }
            }
        }
        let header = header.ok_or_else(|| {
            ChirpError::CassetteFormat(format!("{name} has no cassette_start entry"))
        })?;
        if header.name != name {
            return Err(ChirpError::CassetteFormat(format!(
                "{name} is recorded under the name `{}`",
                header.name
            )));
        }
        Ok(Self {
            header,
            interactions,
        })
    }

    pub fn to_jsonl(&self) -> Result<String, ChirpError> {
        let mut out = String::new();
        let entries = std::iter::once(CassetteEntry::CassetteStart(self.header.clone())).chain(
            self.interactions
                .iter()
                .cloned()
                .map(CassetteEntry::Interaction),
        );
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ChirpError::CassetteFormat(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
