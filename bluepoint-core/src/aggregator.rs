//! Outcome aggregation: fold completed sends into campaign stats, log and cooldown cache.
//!
//! Takes `&mut Campaign`, so every mutation is serialized by whoever owns the registry.
//! Send tasks never touch campaign state; they hand their outcome back to the dispatcher.

use chrono::{DateTime, Utc};

use crate::campaign::{ActivityRecord, Campaign, Outcome};
use crate::peer::Peer;

/// Record one completed attempt. Exactly one log append and one counter increment per call.
pub fn apply(campaign: &mut Campaign, peer: &Peer, outcome: Outcome, at: DateTime<Utc>) {
    campaign.activity_log.push(ActivityRecord {
        peer_name: peer.name.clone(),
        peer_id: peer.id.clone(),
        outcome,
        at,
    });
    let stats = &mut campaign.stats;
    match outcome {
        Outcome::Accepted => stats.accepted += 1,
        Outcome::Refused => stats.refused += 1,
        Outcome::Failed => stats.failed += 1,
    }
    stats.total += 1;
    if outcome == Outcome::Accepted {
        campaign.dedup_cache.record(peer.id.clone(), at);
    }
}

/// What one tick did, summed over all campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub peers: usize,
    pub evicted: usize,
    pub eligible: usize,
    pub dispatched: usize,
    pub accepted: usize,
    pub refused: usize,
    pub failed: usize,
    /// Campaigns skipped this tick for a configuration error.
    pub skipped_campaigns: usize,
    /// Send tasks that died without reporting an outcome.
    pub lost: usize,
}

impl TickReport {
    pub fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Refused => self.refused += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn completed(&self) -> usize {
        self.accepted + self.refused + self.failed
    }
}
