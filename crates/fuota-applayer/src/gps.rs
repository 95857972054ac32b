// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wall-clock to GPS-epoch time conversion.
//!
//! GPS time starts at 1980-01-06T00:00:00Z and, unlike UTC, is not adjusted
//! for leap seconds, so it runs ahead of UTC by the number of leap seconds
//! inserted since the epoch. The engine stores wall-clock timestamps and
//! converts here at serialisation time only; wire timestamps are the GPS
//! seconds reduced modulo 2^32.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Returns the GPS epoch: 1980-01-06T00:00:00Z.
pub fn gps_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).unwrap()
}

// Last second of each UTC day that ended with a leap-second insertion.
const LEAP_SECOND_DATES: [(i32, u32, u32); 18] = [
    (1981, 6, 30),
    (1982, 6, 30),
    (1983, 6, 30),
    (1985, 6, 30),
    (1987, 12, 31),
    (1989, 12, 31),
    (1990, 12, 31),
    (1992, 6, 30),
    (1993, 6, 30),
    (1994, 6, 30),
    (1995, 12, 31),
    (1997, 6, 30),
    (1998, 12, 31),
    (2005, 12, 31),
    (2008, 12, 31),
    (2012, 6, 30),
    (2015, 6, 30),
    (2016, 12, 31),
];

fn leap_seconds_table() -> &'static [DateTime<Utc>] {
    static TABLE: OnceLock<Vec<DateTime<Utc>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        LEAP_SECOND_DATES
            .iter()
            .map(|&(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 23, 59, 59).unwrap())
            .collect()
    })
}

/// Returns the duration between the GPS epoch and the given wall-clock time,
/// including the leap seconds inserted in between.
pub fn time_since_gps_epoch(t: DateTime<Utc>) -> Duration {
    let leaps = leap_seconds_table().iter().filter(|ls| **ls < t).count();
    (t - gps_epoch()) + Duration::seconds(leaps as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_zero() {
        assert_eq!(time_since_gps_epoch(gps_epoch()), Duration::zero());
    }

    #[test]
    fn test_no_leap_seconds_before_1981() {
        let t = gps_epoch() + Duration::days(7);
        assert_eq!(time_since_gps_epoch(t), Duration::days(7));
    }

    #[test]
    fn test_leap_second_insertion() {
        // One UTC second across the 2016-12-31 insertion advances GPS time
        // by two seconds.
        let before = Utc.with_ymd_and_hms(2016, 12, 31, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap();
        let delta = time_since_gps_epoch(after) - time_since_gps_epoch(before);
        assert_eq!(delta, Duration::seconds(2));
    }

    #[test]
    fn test_all_leap_seconds_counted() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let expected = (t - gps_epoch()) + Duration::seconds(18);
        assert_eq!(time_since_gps_epoch(t), expected);
    }
}
