//! Campaign model: schedule window, payload, cooldown, and accumulated runtime state.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::DedupCache;
use crate::peer::PeerId;

/// Daily send window as configured: two `HH:MM:SS` times of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start: String,
    pub stop: String,
}

impl Schedule {
    pub fn new(start: impl Into<String>, stop: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }

    /// Parse both bounds. Each must be exactly `hour:minute:second`.
    pub fn parse(&self) -> Result<(NaiveTime, NaiveTime), ScheduleError> {
        Ok((parse_time_of_day(&self.start)?, parse_time_of_day(&self.stop)?))
    }

    /// True iff `start <= time_of_day <= stop`. Windows never wrap past midnight.
    pub fn contains(&self, time_of_day: NaiveTime) -> Result<bool, ScheduleError> {
        let (start, stop) = self.parse()?;
        Ok(start <= time_of_day && time_of_day <= stop)
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    let malformed = || ScheduleError::Malformed(s.to_string());
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() != 3 {
        return Err(malformed());
    }
    let mut hms = [0u32; 3];
    for (slot, field) in hms.iter_mut().zip(&fields) {
        if field.is_empty() || field.len() > 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        *slot = field.parse().map_err(|_| malformed())?;
    }
    NaiveTime::from_hms_opt(hms[0], hms[1], hms[2]).ok_or_else(malformed)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule bound {0:?} is not HH:MM:SS")]
    Malformed(String),
}

/// Errors scoped to one campaign for one tick. Logged; the campaign is skipped.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("campaign {campaign}: {source}")]
    Schedule {
        campaign: String,
        #[source]
        source: ScheduleError,
    },
    #[error("campaign {campaign}: media file {} not found", path.display())]
    MediaMissing { campaign: String, path: PathBuf },
}

/// Result of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Peer took the file.
    Accepted,
    /// Peer explicitly declined.
    Refused,
    /// No usable answer (unreachable, timeout, protocol error).
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Accepted => "accepted",
            Outcome::Refused => "refused",
            Outcome::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: u64,
    pub accepted: u64,
    pub refused: u64,
    pub failed: u64,
}

impl Stats {
    pub fn is_consistent(&self) -> bool {
        self.total == self.accepted + self.refused + self.failed
    }
}

/// One completed send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub peer_name: String,
    pub peer_id: PeerId,
    pub outcome: Outcome,
    pub at: DateTime<Utc>,
}

/// A content-push policy and its runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub schedule: Schedule,
    pub media_path: PathBuf,
    /// Cooldown before an accepted peer becomes eligible again.
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub activity_log: Vec<ActivityRecord>,
    #[serde(default)]
    pub dedup_cache: DedupCache,
}

impl Campaign {
    /// New campaign with empty runtime state.
    pub fn new(
        id: impl Into<String>,
        schedule: Schedule,
        media_path: impl Into<PathBuf>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            id: id.into(),
            schedule,
            media_path: media_path.into(),
            cache_ttl_secs,
            stats: Stats::default(),
            activity_log: Vec::new(),
            dedup_cache: DedupCache::new(),
        }
    }

    pub fn cache_ttl(&self) -> TimeDelta {
        i64::try_from(self.cache_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn parse_valid_schedule() {
        let s = Schedule::new("09:00:00", "17:30:05");
        assert_eq!(s.parse().unwrap(), (t(9, 0, 0), t(17, 30, 5)));
    }

    #[test]
    fn single_digit_fields_accepted() {
        let s = Schedule::new("9:0:0", "17:0:0");
        assert_eq!(s.parse().unwrap().0, t(9, 0, 0));
    }

    #[test]
    fn malformed_bounds_rejected() {
        for bad in ["09:00", "09:00:00:00", "", "aa:00:00", "25:00:00", "09:60:00", "+9:00:00", "09::00"] {
            let s = Schedule::new(bad, "17:00:00");
            assert_eq!(
                s.parse(),
                Err(ScheduleError::Malformed(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
        let s = Schedule::new("09:00:00", "5pm");
        assert!(s.parse().is_err());
    }

    #[test]
    fn window_bounds_inclusive() {
        let s = Schedule::new("09:00:00", "17:00:00");
        assert!(s.contains(t(9, 0, 0)).unwrap());
        assert!(s.contains(t(17, 0, 0)).unwrap());
        assert!(s.contains(t(12, 0, 0)).unwrap());
        assert!(!s.contains(t(8, 59, 59)).unwrap());
        assert!(!s.contains(t(17, 0, 1)).unwrap());
    }

    #[test]
    fn window_across_midnight_never_matches() {
        let s = Schedule::new("22:00:00", "02:00:00");
        assert!(!s.contains(t(23, 0, 0)).unwrap());
        assert!(!s.contains(t(1, 0, 0)).unwrap());
    }

    #[test]
    fn stats_consistency() {
        let mut s = Stats::default();
        assert!(s.is_consistent());
        s.total = 2;
        s.accepted = 1;
        assert!(!s.is_consistent());
        s.failed = 1;
        assert!(s.is_consistent());
    }

    #[test]
    fn huge_ttl_saturates() {
        let c = Campaign::new("c", Schedule::new("00:00:00", "23:59:59"), "/tmp/x", u64::MAX);
        assert_eq!(c.cache_ttl(), TimeDelta::MAX);
        let c = Campaign::new("c", Schedule::new("00:00:00", "23:59:59"), "/tmp/x", 300);
        assert_eq!(c.cache_ttl(), TimeDelta::try_seconds(300).unwrap());
    }
}
