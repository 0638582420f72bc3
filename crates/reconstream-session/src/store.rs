//! Session membership.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::eviction::{EvictionCandidate, EvictionPolicy};
use crate::session::Session;

/// Map of live sessions, kept in insertion order.
///
/// Lookups and snapshots are open to everyone; membership changes are
/// crate-private so that only the manager adds or removes sessions.
#[derive(Default)]
pub struct SessionStore {
    entries: Mutex<IndexMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.entries.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// All sessions, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.entries.lock().values().cloned().collect()
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.entries.lock().shift_remove(id)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Session>> {
        self.entries.lock().drain(..).map(|(_, s)| s).collect()
    }

    /// Remove every session the policy considers expired at `now`.
    pub(crate) fn remove_expired(
        &self,
        policy: &dyn EvictionPolicy,
        now: DateTime<Utc>,
    ) -> Vec<Arc<Session>> {
        let mut entries = self.entries.lock();
        let expired = policy.expired(&candidates(&entries), now);
        expired
            .iter()
            .filter_map(|id| entries.shift_remove(id))
            .collect()
    }

    /// Insert `session`, making room first if the store is full.
    ///
    /// Expired sessions are removed before anything else; if the store is
    /// still at `max_sessions`, the policy's forced victim goes. The whole
    /// decision happens under one lock, so concurrent admissions can never
    /// push the store past its limit. Returns the sessions that were removed
    /// (the caller tears them down), or hands `session` back if there is no
    /// way to make room.
    pub(crate) fn admit(
        &self,
        session: Arc<Session>,
        max_sessions: usize,
        policy: &dyn EvictionPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arc<Session>>, Arc<Session>> {
        let mut entries = self.entries.lock();
        let mut evicted = Vec::new();

        if entries.len() >= max_sessions {
            for id in policy.expired(&candidates(&entries), now) {
                if let Some(s) = entries.shift_remove(&id) {
                    evicted.push(s);
                }
            }
        }

        while entries.len() >= max_sessions {
            let victim = policy
                .force_victim(&candidates(&entries))
                .and_then(|id| entries.shift_remove(&id));
            match victim {
                Some(s) => evicted.push(s),
                None => return Err(session),
            }
        }

        entries.insert(session.id().to_string(), session);
        Ok(evicted)
    }
}

fn candidates(entries: &IndexMap<String, Arc<Session>>) -> Vec<EvictionCandidate> {
    entries
        .values()
        .map(|s| EvictionCandidate {
            id: s.id().to_string(),
            last_activity: s.last_activity(),
        })
        .collect()
}
