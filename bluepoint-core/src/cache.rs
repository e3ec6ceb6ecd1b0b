//! Per-campaign cooldown cache: peer ID -> time of the last accepted push.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupCache {
    entries: BTreeMap<PeerId, DateTime<Utc>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry with `last_send + ttl <= now`. Returns how many were removed.
    pub fn evict(&mut self, now: DateTime<Utc>, ttl: TimeDelta) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, last| !expired(*last, now, ttl));
        before - self.entries.len()
    }

    /// Start (or restart) the cooldown for a peer.
    pub fn record(&mut self, peer_id: PeerId, at: DateTime<Utc>) {
        self.entries.insert(peer_id, at);
    }

    /// Entry present and not yet expired at `now`.
    pub fn is_cooling_down(&self, peer_id: &PeerId, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        self.entries
            .get(peer_id)
            .is_some_and(|last| !expired(*last, now, ttl))
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.entries.contains_key(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<DateTime<Utc>> {
        self.entries.get(peer_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &DateTime<Utc>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// An expiry past the representable range never arrives.
fn expired(last: DateTime<Utc>, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
    last.checked_add_signed(ttl).is_some_and(|expiry| expiry <= now)
}
