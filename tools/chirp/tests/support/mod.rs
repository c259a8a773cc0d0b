#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chirp::app::App;
use chirp::browser::Browser;
use chirp::cassette::Harness;
use chirp::config::AppConfig;
use chirp::feed_store::FeedStore;
use chirp::fixtures::Factory;
use chirp::runtime::FakeHttpTransport;
use tempfile::TempDir;

pub fn fixture(path: &str) -> PathBuf {
    PathBuf::from(format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR")))
}

/// A fresh database plus the config the app and harness run with. Cassettes
/// come from the checked-in fixtures in replay-only mode.
pub struct Site {
    _dir: TempDir,
    pub store: FeedStore,
    pub config: AppConfig,
    /// Stands in for the network; replayed scopes must leave it untouched.
    pub live: Arc<FakeHttpTransport>,
}

impl Site {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(mut config: AppConfig) -> Self {
        let dir = TempDir::new().expect("tempdir");
        config.database.path = dir.path().join("chirp.sqlite");
        config.cassettes.dir = fixture("cassettes");
        let store = FeedStore::open(&config.database.path).expect("open store");
        Self {
            _dir: dir,
            store,
            config,
            live: Arc::new(FakeHttpTransport::default()),
        }
    }

    pub fn factory(&self) -> Factory<'_> {
        Factory::new(&self.store)
    }

    pub fn browser(&self) -> Browser<'_> {
        Browser::new(App::new(&self.store, &self.config))
    }

    pub fn harness(&self) -> Harness {
        Harness::from_config(&self.config.cassettes, self.live.clone())
    }
}
