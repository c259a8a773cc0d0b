use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChirpError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid cursor: page {page} is outside 1..={last_page}")]
    InvalidCursor { page: i64, last_page: u32 },
    #[error("invalid cursor: `{0}` is not a page number")]
    MalformedCursor(String),
    #[error("invalid cassette name `{0}`")]
    InvalidCassetteName(String),
    #[error("cassette `{0}` has no recording")]
    CassetteNotFound(String),
    #[error("cassette format error: {0}")]
    CassetteFormat(String),
    #[error("cassette `{requested}` cannot open while `{active}` is active on this thread")]
    NestedCassette { active: String, requested: String },
    #[error("cassette `{cassette}` has no recorded interaction for {method} {uri}")]
    UnmatchedRequest {
        cassette: String,
        method: String,
        uri: String,
    },
    #[error("cassette `{cassette}` left {count} recorded interaction(s) unused")]
    UnusedInteractionsRemaining { cassette: String, count: usize },
}
