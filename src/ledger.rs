//! Per-session accumulator of transform outcomes.
//!
//! Results stay here between the processing calls of a session and the
//! final flush to the metadata store. Results are append-only until a flush
//! takes them out or the [`EvictionPolicy`] drops the whole session. Each
//! session also remembers the output names handed out to it, so two inputs
//! never share an object key.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::image_processing::TransformResult;
use crate::utils;

/// Decides whether an idle session may be dropped
pub trait EvictionPolicy: Send + Sync {
    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool;
}

/// Sessions live until they are flushed
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl EvictionPolicy for NeverExpire {
    fn is_expired(&self, _entry: &SessionEntry, _now: Instant) -> bool {
        false
    }
}

/// Drop sessions that have not been updated for the wrapped duration
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeout(pub Duration);

impl EvictionPolicy for IdleTimeout {
    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_updated) > self.0
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub results: Vec<TransformResult>,
    /// Output names already used in this session, kept across flushes
    pub reserved_names: HashSet<String>,
    pub created: Instant,
    pub last_updated: Instant,
}

/// Thread-safe, session-keyed result store
pub struct SessionResultLedger {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    policy: Box<dyn EvictionPolicy>,
}

impl Default for SessionResultLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionResultLedger {
    pub fn new() -> Self {
        Self::with_policy(Box::new(NeverExpire))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            policy,
        }
    }

    // Every mutation is a single extend, insert or take, so a poisoned map
    // is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry<'a>(
        sessions: &'a mut HashMap<String, SessionEntry>,
        session_id: &str,
        now: Instant,
    ) -> &'a mut SessionEntry {
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                results: Vec::new(),
                reserved_names: HashSet::new(),
                created: now,
                last_updated: now,
            })
    }

    /// Claim an output name in a session.
    ///
    /// Returns `name` if it is free, otherwise the first free `name-N`.
    pub fn reserve_name(&self, session_id: &str, name: &str) -> String {
        let mut sessions = self.lock();
        let entry = Self::entry(&mut sessions, session_id, Instant::now());

        let mut n = 0;
        loop {
            let candidate = utils::numbered_file_name(name, n);
            if entry.reserved_names.insert(candidate.clone()) {
                if n > 0 {
                    debug!(session = session_id, name, renamed = %candidate, "Output name taken");
                }
                return candidate;
            }
            n += 1;
        }
    }

    /// Append results to a session, creating it if needed
    pub fn append(&self, session_id: &str, results: Vec<TransformResult>) {
        self.append_at(session_id, results, Instant::now());
    }

    fn append_at(&self, session_id: &str, results: Vec<TransformResult>, now: Instant) {
        let count = results.len();
        let mut sessions = self.lock();
        let entry = Self::entry(&mut sessions, session_id, now);
        entry.results.extend(results);
        entry.last_updated = now;

        debug!(
            session = session_id,
            appended = count,
            total = entry.results.len(),
            "Ledger updated"
        );
    }

    /// Snapshot of a session's results, empty if unknown
    pub fn read(&self, session_id: &str) -> Vec<TransformResult> {
        self.lock()
            .get(session_id)
            .map(|entry| entry.results.clone())
            .unwrap_or_default()
    }

    /// Remove and return a session's results in one step.
    ///
    /// Results appended afterwards stay for the next take. Reserved names
    /// are kept.
    pub fn take(&self, session_id: &str) -> Vec<TransformResult> {
        self.lock()
            .get_mut(session_id)
            .map(|entry| std::mem::take(&mut entry.results))
            .unwrap_or_default()
    }

    /// Put taken results back in front of anything appended since
    pub fn restore(&self, session_id: &str, mut results: Vec<TransformResult>) {
        if results.is_empty() {
            return;
        }
        let mut sessions = self.lock();
        let entry = Self::entry(&mut sessions, session_id, Instant::now());
        results.append(&mut entry.results);
        entry.results = results;
    }

    /// Forget a session entirely, reserved names included
    pub fn clear(&self, session_id: &str) {
        if self.lock().remove(session_id).is_some() {
            debug!(session = session_id, "Ledger session cleared");
        }
    }

    /// Remove expired sessions, returning how many were dropped
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| !self.policy.is_expired(entry, now));
        let evicted = before - sessions.len();

        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle ledger sessions");
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}
