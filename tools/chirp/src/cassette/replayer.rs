//! Replay side of a cassette scope: answers requests from a recording.

use crate::cassette::matcher::MatchRules;
use crate::cassette::recording::{Cassette, InteractionRecord};
use crate::errors::ChirpError;
use crate::logging::append_run_log;
use crate::runtime::{HttpRequest, HttpResponse, HttpTransport};
use serde_json::json;
use std::sync::{Mutex, PoisonError};

struct ReplaySlot {
    interaction: InteractionRecord,
    plays: usize,
}

/// First request that found no recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedCall {
    pub method: String,
    pub uri: String,
}

/// `HttpTransport` that never touches the network. Each request consumes the
/// first unplayed interaction, in recorded order, that satisfies the rules.
pub struct ReplayTransport {
    cassette: String,
    rules: MatchRules,
    allow_playback_repeats: bool,
    slots: Mutex<Vec<ReplaySlot>>,
    unmatched: Mutex<Option<UnmatchedCall>>,
}

impl ReplayTransport {
    pub fn new(cassette: Cassette, rules: MatchRules, allow_playback_repeats: bool) -> Self {
        let name = cassette.name().to_string();
        let slots = cassette
            .interactions
            .into_iter()
            .map(|interaction| ReplaySlot {
                interaction,
                plays: 0,
            })
            .collect();
        Self {
            cassette: name,
            rules,
            allow_playback_repeats,
            slots: Mutex::new(slots),
            unmatched: Mutex::new(None),
        }
    }

    /// Recorded interactions that were never played, in recorded order.
    pub fn unused(&self) -> Vec<InteractionRecord> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| slot.plays == 0)
            .map(|slot| slot.interaction.clone())
            .collect()
    }

    pub fn played_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|slot| slot.plays)
            .sum()
    }

    /// The first unmatched request, if any. Sticky: a caller that swallows the
    /// error from `send` still gets it reported when the scope closes.
    pub fn take_unmatched(&self) -> Option<UnmatchedCall> {
        self.unmatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn record_unmatched(&self, request: &HttpRequest) {
        let mut slot = self.unmatched.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(UnmatchedCall {
                method: request.method.clone(),
                uri: request.uri.clone(),
            });
        }
    }
}

impl HttpTransport for ReplayTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChirpError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = slots
            .iter()
            .position(|slot| slot.plays == 0 && self.rules.matches(&slot.interaction.request, &request));
        let chosen = fresh.or_else(|| {
            if self.allow_playback_repeats {
                slots
                    .iter()
                    .position(|slot| self.rules.matches(&slot.interaction.request, &request))
            } else {
                None
            }
        });

        let Some(idx) = chosen else {
            drop(slots);
            self.record_unmatched(&request);
            append_run_log(
                "error",
                "cassette.request.unmatched",
                json!({
                    "cassette": self.cassette,
                    "method": request.method,
                    "uri": request.uri,
                }),
            );
            return Err(ChirpError::UnmatchedRequest {
                cassette: self.cassette.clone(),
                method: request.method,
                uri: request.uri,
            });
        };

        let slot = &mut slots[idx];
        slot.plays += 1;
        append_run_log(
            "debug",
            "cassette.request.replayed",
            json!({
                "cassette": self.cassette,
                "seq": slot.interaction.seq,
                "method": request.method,
                "uri": request.uri,
                "status": slot.interaction.response.status,
                "repeat": slot.plays > 1,
            }),
        );
        Ok(slot.interaction.response.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::ReplayTransport;
    use crate::cassette::matcher::MatchRules;
    use crate::cassette::recording::{
        Cassette, InteractionRecord, RecordedRequest, RecordedResponse,
    };
    use crate::errors::ChirpError;
    use crate::runtime::{HttpRequest, HttpTransport};

    fn interaction(seq: u64, method: &str, uri: &str, status: u16, body: &str) -> InteractionRecord {
        InteractionRecord {
            seq,
            recorded_at_unix_ns: 0,
            request: RecordedRequest {
                method: method.to_string(),
                uri: uri.to_string(),
                headers: Vec::new(),
                body: String::new(),
            },
            response: RecordedResponse {
                status,
                headers: Vec::new(),
                body: body.to_string(),
                body_sha256: None,
            },
        }
    }

    fn cassette(interactions: Vec<InteractionRecord>) -> Cassette {
        let mut cassette = Cassette::new("publish_to_hub", 0);
        cassette.interactions = interactions;
        cassette
    }

    #[test]
    fn identical_requests_consume_interactions_in_recorded_order() {
        let replay = ReplayTransport::new(
            cassette(vec![
                interaction(1, "POST", "http://hub.test/publish", 204, "first"),
                interaction(2, "POST", "http://hub.test/publish", 204, "second"),
            ]),
            MatchRules::default(),
            false,
        );

        let first = replay
            .send(HttpRequest::post_form("http://hub.test/publish", ""))
            .expect("first");
        let second = replay
            .send(HttpRequest::post_form("http://hub.test/publish", ""))
            .expect("second");
        assert_eq!(first.body, "first");
        assert_eq!(second.body, "second");
        assert!(replay.unused().is_empty());

        let err = replay
            .send(HttpRequest::post_form("http://hub.test/publish", ""))
            .expect_err("exhausted");
        assert!(matches!(err, ChirpError::UnmatchedRequest { .. }));
    }

    #[test]
    fn non_matching_earlier_interaction_is_skipped_not_consumed() {
        let replay = ReplayTransport::new(
            cassette(vec![
                interaction(1, "GET", "http://hub.test/status", 200, "up"),
                interaction(2, "POST", "http://hub.test/publish", 204, ""),
            ]),
            MatchRules::default(),
            false,
        );

        replay
            .send(HttpRequest::post_form("http://hub.test/publish", ""))
            .expect("publish");
        let unused = replay.unused();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].seq, 1);
    }

    #[test]
    fn playback_repeats_reuse_the_first_match_when_allowed() {
        let replay = ReplayTransport::new(
            cassette(vec![interaction(1, "POST", "http://hub.test/publish", 204, "")]),
            MatchRules::default(),
            true,
        );
        for _ in 0..3 {
            replay
                .send(HttpRequest::post_form("http://hub.test/publish", ""))
                .expect("repeat");
        }
        assert_eq!(replay.played_count(), 3);
        assert!(replay.take_unmatched().is_none());
    }

    #[test]
    fn unmatched_call_is_remembered_once() {
        let replay = ReplayTransport::new(cassette(Vec::new()), MatchRules::default(), false);
        let _ = replay.send(HttpRequest::get("http://elsewhere.test/a"));
        let _ = replay.send(HttpRequest::get("http://elsewhere.test/b"));

        let unmatched = replay.take_unmatched().expect("unmatched");
        assert_eq!(unmatched.uri, "http://elsewhere.test/a");
        assert!(replay.take_unmatched().is_none());
    }
}
