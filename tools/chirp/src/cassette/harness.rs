use crate::cassette::matcher::MatchRules;
use crate::cassette::recorder::RecordingTransport;
use crate::cassette::replayer::ReplayTransport;
use crate::cassette::store::{validate_cassette_name, CassetteStore};
use crate::config::{CassetteConfig, RecordMode};
use crate::errors::ChirpError;
use crate::logging::append_run_log;
use crate::runtime::HttpTransport;
use serde_json::json;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, PoisonError};

// ── Per-thread active scope ───────────────────────────────────────────────────

thread_local! {
    static ACTIVE_CASSETTE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Name of the cassette whose scope is open on this thread, if any.
pub fn active_cassette() -> Option<String> {
    ACTIVE_CASSETTE.with(|cell| cell.borrow().clone())
}

/// Marks a scope as open on this thread; dropping it (normal exit, `?`, or
/// unwinding) closes the scope.
struct ActiveScope;

impl ActiveScope {
    fn enter(name: &str) -> Result<Self, ChirpError> {
        ACTIVE_CASSETTE.with(|cell| {
            let mut slot = cell.borrow_mut();
            if let Some(active) = slot.as_ref() {
                return Err(ChirpError::NestedCassette {
                    active: active.clone(),
                    requested: name.to_string(),
                });
            }
            *slot = Some(name.to_string());
            Ok(ActiveScope)
        })
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE_CASSETTE.with(|cell| *cell.borrow_mut() = None);
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// Recorded interactions a scope never replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedInteractions {
    pub cassette: String,
    /// `(method, uri)` of each unused interaction, in recorded order.
    pub requests: Vec<(String, String)>,
}

impl From<&UnusedInteractions> for ChirpError {
    fn from(value: &UnusedInteractions) -> Self {
        ChirpError::UnusedInteractionsRemaining {
            cassette: value.cassette.clone(),
            count: value.requests.len(),
        }
    }
}

/// Runs actions inside cassette scopes.
///
/// The action receives the scope's transport explicitly; anything it sends
/// through that transport is replayed from (or recorded into) the named
/// cassette. Unused interactions are warnings, kept on the harness until
/// `assert_all_consumed` or `take_unused` is called.
pub struct Harness {
    store: CassetteStore,
    settings: CassetteConfig,
    live: Arc<dyn HttpTransport>,
    unused: Mutex<Vec<UnusedInteractions>>,
}

impl Harness {
    pub fn new(store: CassetteStore, settings: CassetteConfig, live: Arc<dyn HttpTransport>) -> Self {
        Self {
            store,
            settings,
            live,
            unused: Mutex::new(Vec::new()),
        }
    }

    /// Harness over the cassette directory named in `settings`.
    pub fn from_config(settings: &CassetteConfig, live: Arc<dyn HttpTransport>) -> Self {
        Self::new(CassetteStore::new(&settings.dir), settings.clone(), live)
    }

    pub fn store(&self) -> &CassetteStore {
        &self.store
    }

    pub fn settings(&self) -> &CassetteConfig {
        &self.settings
    }

    pub fn with_cassette<T, F>(&self, name: &str, action: F) -> Result<T, ChirpError>
    where
        F: FnOnce(&dyn HttpTransport) -> Result<T, ChirpError>,
    {
        validate_cassette_name(name)?;
        let _scope = ActiveScope::enter(name)?;
        let mode = self.settings.record_mode;
        append_run_log(
            "debug",
            "cassette.scope.opened",
            json!({ "cassette": name, "record_mode": mode.as_str() }),
        );

        let existing = match mode {
            RecordMode::All => None,
            RecordMode::None | RecordMode::Once => self.store.load(name)?,
        };

        let result = match (existing, mode) {
            (Some(cassette), _) => self.replay(name, cassette, action),
            (None, RecordMode::None) => Err(ChirpError::CassetteNotFound(name.to_string())),
            (None, _) => self.record(name, action),
        };

        append_run_log(
            "debug",
            "cassette.scope.closed",
            json!({ "cassette": name, "ok": result.is_ok() }),
        );
        result
    }

    fn replay<T, F>(
        &self,
        name: &str,
        cassette: crate::cassette::recording::Cassette,
        action: F,
    ) -> Result<T, ChirpError>
    where
        F: FnOnce(&dyn HttpTransport) -> Result<T, ChirpError>,
    {
        let transport = ReplayTransport::new(
            cassette,
            MatchRules::new(&self.settings.match_on),
            self.settings.allow_playback_repeats,
        );
        let outcome = action(&transport);

        if let Some(unmatched) = transport.take_unmatched() {
            return Err(ChirpError::UnmatchedRequest {
                cassette: name.to_string(),
                method: unmatched.method,
                uri: unmatched.uri,
            });
        }
        let value = outcome?;

        let unused = transport.unused();
        if !unused.is_empty() {
            let report = UnusedInteractions {
                cassette: name.to_string(),
                requests: unused
                    .iter()
                    .map(|i| (i.request.method.clone(), i.request.uri.clone()))
                    .collect(),
            };
            append_run_log(
                "warn",
                "cassette.unused_interactions",
                json!({
                    "cassette": name,
                    "count": report.requests.len(),
                    "seqs": unused.iter().map(|i| i.seq).collect::<Vec<_>>(),
                }),
            );
            self.unused
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report);
        }
        Ok(value)
    }

    fn record<T, F>(&self, name: &str, action: F) -> Result<T, ChirpError>
    where
        F: FnOnce(&dyn HttpTransport) -> Result<T, ChirpError>,
    {
        let recorder = RecordingTransport::new(name, Arc::clone(&self.live));
        let value = action(&recorder)?;
        let cassette = recorder.into_cassette();
        self.store.save(&cassette)?;
        Ok(value)
    }

    /// Unused-interaction warnings collected so far, oldest first.
    pub fn unused_warnings(&self) -> Vec<UnusedInteractions> {
        self.unused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_unused(&self) -> Vec<UnusedInteractions> {
        std::mem::take(&mut *self.unused.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Fail with the first collected warning, clearing the collection.
    pub fn assert_all_consumed(&self) -> Result<(), ChirpError> {
        match self.take_unused().first() {
            Some(first) => Err(first.into()),
            None => Ok(()),
        }
    }
}
