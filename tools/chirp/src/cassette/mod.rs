//! Cassette record/replay for outbound HTTP.
//!
//! # Overview
//!
//! A cassette is a named JSONL recording of HTTP request/response pairs.
//! `Harness::with_cassette` opens a scope around an action and hands it a
//! transport that either:
//! 1. **replays** – answers each request from the first unplayed recorded
//!    interaction matching the configured rules, with no network access, or
//! 2. **records** – forwards to the live transport and saves the traffic
//!    when the action succeeds (record modes `once` / `all`).
//!
//! Only one scope may be open per thread. A request with no recording fails
//! the scope; recordings left unplayed are collected as warnings.

pub mod harness;
pub mod matcher;
pub mod recorder;
pub mod recording;
pub mod replayer;
pub mod store;

pub use harness::{active_cassette, Harness, UnusedInteractions};
pub use recording::Cassette;
pub use store::CassetteStore;
