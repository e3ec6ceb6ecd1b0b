//! Eligibility: may this campaign push to this peer right now?

use chrono::{DateTime, Timelike, TimeZone, Utc};

use crate::campaign::{Campaign, ScheduleError};
use crate::peer::Peer;

/// True iff `now`'s time of day (in `now`'s own offset, whole seconds) lies inside the campaign window
/// and the peer has no unexpired cooldown entry for this campaign.
///
/// Pure. Fails only when the schedule is malformed.
pub fn is_eligible<Tz: TimeZone>(
    campaign: &Campaign,
    peer: &Peer,
    now: &DateTime<Tz>,
) -> Result<bool, ScheduleError> {
    let time_of_day = now.time();
    let time_of_day = time_of_day.with_nanosecond(0).unwrap_or(time_of_day);
    if !campaign.schedule.contains(time_of_day)? {
        return Ok(false);
    }
    let now_utc = now.with_timezone(&Utc);
    Ok(!campaign
        .dedup_cache
        .is_cooling_down(&peer.id, now_utc, campaign.cache_ttl()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Schedule;
    use crate::peer::PeerId;
    use chrono::{FixedOffset, TimeDelta};
    use std::net::{IpAddr, Ipv4Addr};

    fn campaign() -> Campaign {
        Campaign::new("promo", Schedule::new("09:00:00", "17:00:00"), "/srv/promo.jpg", 300)
    }

    fn peer(id: &str) -> Peer {
        Peer {
            id: PeerId::from(id),
            name: "phone".into(),
            device_class: 0x5a020c,
            channel: 9,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, s).unwrap()
    }

    #[test]
    fn in_window_uncached_is_eligible() {
        assert!(is_eligible(&campaign(), &peer("a"), &utc(10, 0, 0)).unwrap());
    }

    #[test]
    fn out_of_window_is_not_eligible() {
        assert!(!is_eligible(&campaign(), &peer("a"), &utc(18, 0, 0)).unwrap());
        assert!(!is_eligible(&campaign(), &peer("a"), &utc(8, 59, 59)).unwrap());
    }

    #[test]
    fn fractional_second_on_stop_bound_is_in_window() {
        let stop = utc(17, 0, 0) + TimeDelta::try_milliseconds(500).unwrap();
        assert!(is_eligible(&campaign(), &peer("a"), &stop).unwrap());
        let start = utc(9, 0, 0) + TimeDelta::try_milliseconds(999).unwrap();
        assert!(is_eligible(&campaign(), &peer("a"), &start).unwrap());
        let after = utc(17, 0, 1) + TimeDelta::try_milliseconds(1).unwrap();
        assert!(!is_eligible(&campaign(), &peer("a"), &after).unwrap());
    }

    #[test]
    fn cooling_down_peer_is_not_eligible() {
        let mut c = campaign();
        let now = utc(10, 0, 0);
        c.dedup_cache
            .record(PeerId::from("a"), now - TimeDelta::try_seconds(5).unwrap());
        assert!(!is_eligible(&c, &peer("a"), &now).unwrap());
        assert!(is_eligible(&c, &peer("b"), &now).unwrap());
    }

    #[test]
    fn expired_entry_does_not_block() {
        let mut c = campaign();
        let now = utc(10, 0, 0);
        c.dedup_cache
            .record(PeerId::from("a"), now - TimeDelta::try_seconds(301).unwrap());
        assert!(is_eligible(&c, &peer("a"), &now).unwrap());
    }

    #[test]
    fn cache_is_per_campaign() {
        let mut cached = campaign();
        let other = Campaign::new("other", Schedule::new("00:00:00", "23:59:59"), "/srv/o.jpg", 300);
        let now = utc(10, 0, 0);
        cached.dedup_cache.record(PeerId::from("a"), now);
        assert!(!is_eligible(&cached, &peer("a"), &now).unwrap());
        assert!(is_eligible(&other, &peer("a"), &now).unwrap());
    }

    #[test]
    fn window_uses_offset_of_now() {
        // 08:00 UTC is 10:00 at +02:00.
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = utc(8, 0, 0).with_timezone(&plus_two);
        assert!(is_eligible(&campaign(), &peer("a"), &now).unwrap());
        assert!(!is_eligible(&campaign(), &peer("a"), &utc(8, 0, 0)).unwrap());
    }

    #[test]
    fn malformed_schedule_is_an_error() {
        let mut c = campaign();
        c.schedule = Schedule::new("9am", "17:00:00");
        assert!(is_eligible(&c, &peer("a"), &utc(10, 0, 0)).is_err());
    }
}
