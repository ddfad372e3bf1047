//! Pending-ceremony store with single-use challenge consumption.
//!
//! Ceremonies are short-lived and never survive a restart, so the store is
//! in-memory only. `consume` is the replay barrier: it must be one atomic
//! check-and-remove, never a read followed by a delete, so that two requests
//! racing on the same challenge cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;

use crate::ceremony::{Ceremony, CeremonyKind, CeremonyState, CHALLENGE_LEN};
use crate::coordinator::AttemptToken;
use crate::error::{CeremonyError, Result};

/// Default challenge TTL.
pub const DEFAULT_TTL_SECS: i64 = 120;

/// Default cap on concurrently pending ceremonies.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// In-memory store for pending ceremonies, keyed by ceremony id.
pub struct ChallengeStore {
    pending: DashMap<String, Ceremony>,
    /// Ids consumed within the last TTL window. Lets a replayed consume be
    /// reported as `AlreadyConsumed` rather than `NotFound`; the two collapse
    /// to the same client response, the distinction is for logs and tests.
    consumed: DashMap<String, DateTime<Utc>>,
    /// Attempt tokens of ceremonies that expired at consume time. Their
    /// record is already gone, so the sweep cannot find them; the caller
    /// drains this to release the coordinator slots.
    orphaned: DashMap<String, AttemptToken>,
    ttl: Duration,
    capacity: usize,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS), DEFAULT_CAPACITY)
    }
}

impl ChallengeStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            pending: DashMap::new(),
            consumed: DashMap::new(),
            orphaned: DashMap::new(),
            ttl,
            capacity,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a pending ceremony with a fresh random challenge.
    ///
    /// 32 bytes from the OS RNG keep challenges unique process-wide while
    /// unconsumed. Fails with `CapacityExceeded` at the configured cap.
    pub fn create(
        &self,
        kind: CeremonyKind,
        subject: Option<&str>,
        attempt: AttemptToken,
        now: DateTime<Utc>,
    ) -> Result<Ceremony> {
        if self.pending.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "Challenge store at capacity");
            return Err(CeremonyError::CapacityExceeded);
        }

        let mut challenge = vec![0u8; CHALLENGE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut challenge);

        let ceremony = Ceremony {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            subject: subject.map(str::to_string),
            challenge,
            state: CeremonyState::AwaitingClientResponse,
            validator_state: serde_json::Value::Null,
            created_at: now,
            expires_at: now + self.ttl,
            attempt,
        };

        self.pending.insert(ceremony.id.clone(), ceremony.clone());
        tracing::debug!(ceremony_id = %ceremony.id, kind = kind.as_str(), "Ceremony created");
        Ok(ceremony)
    }

    /// Attach verifier-side state to a pending ceremony. The validator
    /// produces it only once the challenge exists, so this runs between
    /// `create` and the challenge hand-out.
    pub fn set_validator_state(&self, id: &str, state: serde_json::Value) -> Result<()> {
        match self.pending.get_mut(id) {
            Some(mut entry) => {
                entry.validator_state = state;
                Ok(())
            }
            None => Err(CeremonyError::NotFound),
        }
    }

    /// Drop a pending ceremony that never reached the client (start-time
    /// failure cleanup). Leaves no tombstone: the id was never handed out.
    pub fn discard(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Atomically retrieve and remove a pending ceremony.
    ///
    /// The tombstone entry is the linearization point: exactly one caller per
    /// id gets past it, so a concurrent replay observes `AlreadyConsumed`,
    /// never a second success. An expired record is removed on the way out
    /// and reported as `Expired`.
    pub fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<Ceremony> {
        match self.consumed.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(CeremonyError::AlreadyConsumed),
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        let Some((_, ceremony)) = self.pending.remove(id) else {
            self.consumed.remove(id);
            return Err(CeremonyError::NotFound);
        };

        if ceremony.is_expired(now) {
            tracing::debug!(ceremony_id = %id, "Consumed challenge was expired");
            self.orphaned.insert(ceremony.id.clone(), ceremony.attempt);
            return Err(CeremonyError::Expired);
        }

        Ok(ceremony)
    }

    /// Drain the attempt tokens orphaned by expired consumes.
    pub fn take_orphaned_attempts(&self) -> Vec<AttemptToken> {
        let ids: Vec<String> = self.orphaned.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.orphaned.remove(&id).map(|(_, token)| token))
            .collect()
    }

    /// Remove every pending record past its TTL, returning them so the
    /// caller can release coordinator slots. Lazy expiry in `consume` is the
    /// correctness mechanism; the sweep only bounds memory.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> Vec<Ceremony> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            // remove_if re-checks under the shard lock; a racing consume wins
            if let Some((_, ceremony)) = self.pending.remove_if(&id, |_, c| c.is_expired(now)) {
                removed.push(ceremony);
            }
        }

        self.consumed
            .retain(|_, consumed_at| now.signed_duration_since(*consumed_at) <= self.ttl);

        removed
    }

    /// Number of pending ceremonies.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("pending", &self.pending.len())
            .field("consumed", &self.consumed.len())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store() -> ChallengeStore {
        ChallengeStore::new(Duration::seconds(120), 64)
    }

    fn create(store: &ChallengeStore, now: DateTime<Utc>) -> Ceremony {
        store
            .create(
                CeremonyKind::Registration,
                Some("alice"),
                AttemptToken::detached(),
                now,
            )
            .unwrap()
    }

    #[test]
    fn test_create_issues_unique_challenges() {
        let store = store();
        let now = Utc::now();
        let a = create(&store, now);
        let b = create(&store, now);

        assert_eq!(a.challenge.len(), CHALLENGE_LEN);
        assert_ne!(a.challenge, b.challenge);
        assert_ne!(a.id, b.id);
        assert_eq!(store.pending_count(), 2);
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = store();
        let now = Utc::now();
        let ceremony = create(&store, now);

        let consumed = store.consume(&ceremony.id, now).unwrap();
        assert_eq!(consumed.id, ceremony.id);

        let replay = store.consume(&ceremony.id, now).unwrap_err();
        assert!(matches!(replay, CeremonyError::AlreadyConsumed));
    }

    #[test]
    fn test_set_validator_state_survives_until_consume() {
        let store = store();
        let now = Utc::now();
        let ceremony = create(&store, now);

        store
            .set_validator_state(&ceremony.id, serde_json::json!({ "reg": 1 }))
            .unwrap();
        let consumed = store.consume(&ceremony.id, now).unwrap();
        assert_eq!(consumed.validator_state["reg"], 1);

        let err = store
            .set_validator_state(&ceremony.id, serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[test]
    fn test_discard_leaves_no_tombstone() {
        let store = store();
        let now = Utc::now();
        let ceremony = create(&store, now);

        store.discard(&ceremony.id);
        let err = store.consume(&ceremony.id, now).unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[test]
    fn test_consume_unknown_id() {
        let store = store();
        let err = store.consume("nope", Utc::now()).unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[test]
    fn test_consume_expired_removes_record() {
        let store = store();
        let now = Utc::now();
        let ceremony = create(&store, now);

        let later = now + Duration::seconds(121);
        let err = store.consume(&ceremony.id, later).unwrap_err();
        assert!(matches!(err, CeremonyError::Expired));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let store = ChallengeStore::new(Duration::seconds(120), 2);
        let now = Utc::now();
        create(&store, now);
        create(&store, now);

        let err = store
            .create(
                CeremonyKind::Registration,
                Some("alice"),
                AttemptToken::detached(),
                now,
            )
            .unwrap_err();
        assert!(matches!(err, CeremonyError::CapacityExceeded));
    }

    #[test]
    fn test_expire_sweep_removes_only_expired() {
        let store = store();
        let now = Utc::now();
        let old = create(&store, now - Duration::seconds(300));
        let fresh = create(&store, now);

        let removed = store.expire_sweep(now);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, old.id);
        assert_eq!(store.pending_count(), 1);
        assert!(store.consume(&fresh.id, now).is_ok());
    }

    #[test]
    fn test_sweep_then_consume_reports_not_found() {
        let store = store();
        let now = Utc::now();
        let old = create(&store, now - Duration::seconds(300));

        store.expire_sweep(now);
        let err = store.consume(&old.id, now).unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[test]
    fn test_concurrent_consume_has_exactly_one_winner() {
        let store = Arc::new(store());
        let now = Utc::now();
        let ceremony = create(&store, now);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = ceremony.id.clone();
                thread::spawn(move || store.consume(&id, now))
            })
            .collect();

        let results: Vec<Result<Ceremony>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one concurrent consume may succeed");
        for result in results.into_iter().filter(|r| r.is_err()) {
            assert!(matches!(
                result.unwrap_err(),
                CeremonyError::AlreadyConsumed
            ));
        }
    }
}
