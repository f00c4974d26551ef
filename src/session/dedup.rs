// src/session/dedup.rs
//
// Replay and stale-message filter. For each sender within the current
// session, only strictly increasing sequence numbers pass; anything at or
// below the highest seen seq is dropped, as is anything tagged with a
// different session.

use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct DedupFilter {
    session_id: Option<String>,
    last_seq: HashMap<String, u64>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to a new session; all per-sender history is discarded.
    pub fn begin_session(&mut self, session_id: &str) {
        if self.session_id.as_deref() != Some(session_id) {
            self.session_id = Some(session_id.to_string());
            self.last_seq.clear();
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// True when the message should be processed. Advances the sender's
    /// high-water mark on acceptance.
    pub fn accept(&mut self, session_id: &str, sender_id: &str, seq: u64) -> bool {
        match self.session_id.as_deref() {
            Some(current) if current == session_id => {}
            Some(current) => {
                debug!(
                    "Dropping message for session {} (current {})",
                    session_id, current
                );
                return false;
            }
            None => return false,
        }

        let last = self.last_seq.entry(sender_id.to_string()).or_insert(0);
        if seq <= *last {
            debug!(
                "Dropping duplicate/stale seq {} from {} (last {})",
                seq, sender_id, last
            );
            return false;
        }
        *last = seq;
        true
    }

    pub fn reset(&mut self) {
        self.session_id = None;
        self.last_seq.clear();
    }
}
