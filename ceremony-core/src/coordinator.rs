//! Per-subject attempt coordination.
//!
//! At most one ceremony per (subject, kind) may be live at a time. Starting a
//! new ceremony supersedes the previous one server-side: the old attempt's
//! token stops being current, and its `finish` fails with `Superseded`
//! instead of racing the new attempt to completion.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ceremony::CeremonyKind;

/// Slot identity. Named subjects share a slot per kind; anonymous
/// (usernameless) attempts each get their own slot, since there is no
/// subject to deduplicate on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Subject(CeremonyKind, String),
    Anonymous(String),
}

/// Ownership of the active ceremony slot for a subject.
///
/// Tokens are compared by generation: a later `acquire` for the same slot
/// installs a higher generation, and the older token stops being current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptToken {
    key: SlotKey,
    generation: u64,
}

impl AttemptToken {
    /// A token bound to no live slot. Never current.
    pub fn detached() -> Self {
        Self {
            key: SlotKey::Anonymous(uuid::Uuid::new_v4().to_string()),
            generation: 0,
        }
    }
}

/// Tracks the live attempt per (subject, kind).
#[derive(Debug, Default)]
pub struct AttemptCoordinator {
    slots: DashMap<SlotKey, u64>,
    next_generation: AtomicU64,
}

impl AttemptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the ceremony slot for `(subject, kind)`.
    ///
    /// If a live attempt already holds the slot it is superseded:
    /// last-writer-wins, and the previous holder observes `Superseded` on its
    /// next operation. The entry update is a single atomic operation, so two
    /// racing `acquire` calls leave exactly one current token.
    pub fn acquire(&self, subject: Option<&str>, kind: CeremonyKind) -> AttemptToken {
        let key = match subject {
            Some(subject) => SlotKey::Subject(kind, subject.to_string()),
            None => SlotKey::Anonymous(uuid::Uuid::new_v4().to_string()),
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                tracing::debug!(
                    kind = kind.as_str(),
                    superseded_generation = *entry.get(),
                    "Superseding previous ceremony attempt"
                );
                *entry.get_mut() = generation;
            }
            Entry::Vacant(entry) => {
                entry.insert(generation);
            }
        }

        AttemptToken { key, generation }
    }

    /// Whether `token` still owns its slot.
    pub fn is_current(&self, token: &AttemptToken) -> bool {
        self.slots
            .get(&token.key)
            .map(|generation| *generation == token.generation)
            .unwrap_or(false)
    }

    /// Release a slot on ceremony completion or failure. No-op if the token
    /// was already superseded: the slot now belongs to a newer attempt.
    pub fn release(&self, token: &AttemptToken) {
        self.slots
            .remove_if(&token.key, |_, generation| *generation == token.generation);
    }

    /// Number of live (unreleased) slots.
    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }
}
