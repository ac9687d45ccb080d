//! Time-bucketed aggregation over a channel log.

use crate::model::{Bucket, MessageRecord};
use crate::store::{LogStore, StoreError};
use chrono::{NaiveDate, NaiveTime, Weekday};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PARTS: usize = 10;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("message log not found for guild {guild_id} channel {channel_id}")]
    LogNotFound {
        guild_id: String,
        channel_id: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct QueryEngine {
    store: LogStore,
}

impl QueryEngine {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }

    /// Loads the channel log and partitions `[start_ms, end_ms]` into `parts` buckets.
    pub async fn query(
        &self,
        guild_id: &str,
        channel_id: &str,
        start_ms: i64,
        end_ms: i64,
        parts: usize,
    ) -> Result<Vec<Bucket>, QueryError> {
        let guild = guild_id.to_string();
        let channel = channel_id.to_string();
        let messages = self
            .store
            .run_blocking(move |store| {
                if !store.exists(&guild, &channel)? {
                    return Ok(None);
                }
                store.load(&guild, &channel).map(Some)
            })
            .await?;

        let Some(messages) = messages else {
            return Err(QueryError::LogNotFound {
                guild_id: guild_id.to_string(),
                channel_id: channel_id.to_string(),
            });
        };

        debug!(
            "Query: {} messages in {}/{} over [{}, {}] in {} parts",
            messages.len(),
            guild_id,
            channel_id,
            start_ms,
            end_ms,
            parts
        );
        Ok(aggregate(messages, start_ms, end_ms, parts))
    }
}

/// Splits the messages with `start_ms <= timestamp <= end_ms` into `parts`
/// contiguous buckets of `floor((end - start) / parts)` milliseconds.
///
/// Bucket `i` covers `[start + i*interval, start + (i+1)*interval)`, except the
/// last one, which extends to `end_ms` inclusive so the division remainder is
/// never dropped. A zero-width or inverted range still yields `parts` buckets.
pub fn aggregate(
    messages: Vec<MessageRecord>,
    start_ms: i64,
    end_ms: i64,
    parts: usize,
) -> Vec<Bucket> {
    let parts = parts.max(1);
    let count = parts as i64;
    let interval = (end_ms - start_ms).div_euclid(count);

    let mut buckets: Vec<Bucket> = (0..count)
        .map(|i| Bucket::starting_at(start_ms + i * interval))
        .collect();

    for message in messages {
        if message.timestamp < start_ms || message.timestamp > end_ms {
            continue;
        }
        let index = if interval > 0 {
            ((message.timestamp - start_ms) / interval).min(count - 1)
        } else {
            count - 1
        };
        buckets[index as usize].messages.push(message);
    }

    buckets
}

/// Parses the `parts` parameter the way `parseInt` reads it: leading
/// whitespace is skipped and the leading integer prefix is used, so `2.5`
/// means 2. Missing, non-numeric and non-positive values fall back to
/// `default`. Returns `None` when the value exceeds `max`.
pub fn parse_parts(raw: Option<&str>, default: usize, max: usize) -> Option<usize> {
    let Some(raw) = raw else {
        return Some(default);
    };
    let s = raw.trim_start();
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() || negative {
        return Some(default);
    }

    match digits.parse::<u64>() {
        Ok(0) => Some(default),
        Ok(n) if n <= max as u64 => Some(n as usize),
        _ => None,
    }
}

/// Strict ISO-8601 instant parsing into epoch millis.
///
/// Dates: `YYYY-MM-DD`, `YYYYMMDD`, `YYYY-MM`, ordinal `YYYY-DDD` and week
/// dates `YYYY-Www[-D]`. Times, after `T` or a space: `HH`, `HH:MM`,
/// `HH:MM:SS` and the basic `HHMM`, `HHMMSS`, with a `.`/`,` fraction when
/// seconds are present. Offsets: `Z`, `±HH`, `±HHMM`, `±HH:MM`. Values
/// without an offset are read as UTC.
pub fn parse_instant(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if !s.is_ascii() {
        return None;
    }

    let (date, time) = match s.find(['T', ' ']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let date = parse_date(date)?;

    let Some(time) = time else {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    };
    let (clock, offset_secs) = split_offset(time)?;
    let instant = date.and_time(parse_time(clock)?);
    Some(instant.and_utc().timestamp_millis() - i64::from(offset_secs) * 1000)
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A non-empty run of ASCII digits.
fn num(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let b = s.as_bytes();
    let year = |s: &str| num(s).map(|y| y as i32);

    match b.len() {
        10 if b[4] == b'-' && b[5] == b'W' && b[8] == b'-' => {
            let day = num(&s[9..])?;
            if !(1..=7).contains(&day) {
                return None;
            }
            NaiveDate::from_isoywd_opt(year(&s[..4])?, num(&s[6..8])?, WEEKDAYS[day as usize - 1])
        }
        10 if b[4] == b'-' && b[7] == b'-' => {
            NaiveDate::from_ymd_opt(year(&s[..4])?, num(&s[5..7])?, num(&s[8..])?)
        }
        8 if b[4] == b'-' && b[5] == b'W' => {
            NaiveDate::from_isoywd_opt(year(&s[..4])?, num(&s[6..])?, Weekday::Mon)
        }
        8 if b[4] == b'-' => NaiveDate::from_yo_opt(year(&s[..4])?, num(&s[5..])?),
        8 => NaiveDate::from_ymd_opt(year(&s[..4])?, num(&s[4..6])?, num(&s[6..])?),
        7 if b[4] == b'-' => NaiveDate::from_ymd_opt(year(&s[..4])?, num(&s[5..])?, 1),
        _ => None,
    }
}

/// Splits a trailing zone designator off a time, returning the offset in seconds.
fn split_offset(s: &str) -> Option<(&str, i32)> {
    if let Some(clock) = s.strip_suffix('Z') {
        return Some((clock, 0));
    }
    let Some(i) = s.rfind(['+', '-']) else {
        return Some((s, 0));
    };

    let (clock, zone) = (&s[..i], &s[i + 1..]);
    let sign = if s.as_bytes()[i] == b'-' { -1 } else { 1 };
    let (h, m) = match zone.len() {
        2 => (num(zone)?, 0),
        4 => (num(&zone[..2])?, num(&zone[2..])?),
        5 if zone.as_bytes()[2] == b':' => (num(&zone[..2])?, num(&zone[3..])?),
        _ => return None,
    };
    if h > 23 || m > 59 {
        return None;
    }
    Some((clock, sign * (h * 3600 + m * 60) as i32))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let (base, fraction) = match s.find(['.', ',']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };

    let b = base.as_bytes();
    let (h, m, sec) = match b.len() {
        2 => (num(base)?, 0, 0),
        4 => (num(&base[..2])?, num(&base[2..])?, 0),
        5 if b[2] == b':' => (num(&base[..2])?, num(&base[3..])?, 0),
        6 => (num(&base[..2])?, num(&base[2..4])?, num(&base[4..])?),
        8 if b[2] == b':' && b[5] == b':' => {
            (num(&base[..2])?, num(&base[3..5])?, num(&base[6..])?)
        }
        _ => return None,
    };

    let nanos = match fraction {
        None => 0,
        Some(f) if b.len() >= 6 && (1..=9).contains(&f.len()) => {
            num(f)? * 10u32.pow(9 - f.len() as u32)
        }
        Some(_) => return None,
    };
    NaiveTime::from_hms_nano_opt(h, m, sec, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{record, test_store};
    use tempfile::TempDir;

    fn at(ts: i64) -> MessageRecord {
        record(ts, Some(&ts.to_string()))
    }

    fn total(buckets: &[Bucket]) -> usize {
        buckets.iter().map(|b| b.messages.len()).sum()
    }

    #[test]
    fn test_five_equal_buckets() {
        let messages: Vec<_> = (0..10).map(|i| at(i * 1000)).collect();
        let buckets = aggregate(messages, 0, 10_000, 5);

        assert_eq!(buckets.len(), 5);
        for (i, bucket) in buckets.iter().enumerate() {
            let expected_start = (i as i64) * 2000;
            assert_eq!(bucket.timestamp, crate::model::format_instant(expected_start));
            let stamps: Vec<i64> = bucket.messages.iter().map(|m| m.timestamp).collect();
            assert_eq!(stamps, vec![expected_start, expected_start + 1000]);
        }
        assert_eq!(buckets[4].messages.last().unwrap().timestamp, 9000);
        assert_eq!(total(&buckets), 10);
    }

    #[test]
    fn test_range_is_inclusive_on_both_ends() {
        let messages = vec![at(-1), at(0), at(5000), at(10_000), at(10_001)];
        let buckets = aggregate(messages, 0, 10_000, 5);

        assert_eq!(buckets[0].messages.len(), 1);
        assert_eq!(buckets[2].messages.len(), 1);
        // The end instant falls in the widened last bucket.
        assert_eq!(buckets[4].messages.len(), 1);
        assert_eq!(buckets[4].messages[0].timestamp, 10_000);
        assert_eq!(total(&buckets), 3);
    }

    #[test]
    fn test_last_bucket_absorbs_remainder() {
        // interval = floor(10 / 3) = 3: windows [0,3) [3,6) [6,10]
        let messages: Vec<_> = (0..=10).map(at).collect();
        let buckets = aggregate(messages, 0, 10, 3);

        let stamps = |i: usize| -> Vec<i64> {
            buckets[i].messages.iter().map(|m| m.timestamp).collect()
        };
        assert_eq!(stamps(0), vec![0, 1, 2]);
        assert_eq!(stamps(1), vec![3, 4, 5]);
        assert_eq!(stamps(2), vec![6, 7, 8, 9, 10]);
        assert_eq!(total(&buckets), 11);
    }

    #[test]
    fn test_every_in_range_message_lands_once() {
        let messages: Vec<_> = (0..500).map(|i| at(i * 37 - 200)).collect();
        let in_range = messages
            .iter()
            .filter(|m| (0..=12_345).contains(&m.timestamp))
            .count();

        for parts in [1, 2, 7, 10, 64] {
            let buckets = aggregate(messages.clone(), 0, 12_345, parts);
            assert_eq!(buckets.len(), parts);
            assert_eq!(total(&buckets), in_range);

            let interval = 12_345 / parts as i64;
            for (i, bucket) in buckets.iter().enumerate() {
                let lo = i as i64 * interval;
                let hi = if i == parts - 1 { 12_346 } else { lo + interval };
                assert!(bucket.messages.iter().all(|m| m.timestamp >= lo && m.timestamp < hi));
            }
        }
    }

    #[test]
    fn test_range_smaller_than_parts() {
        let buckets = aggregate(vec![at(0), at(2), at(3)], 0, 3, 10);
        assert_eq!(buckets.len(), 10);
        assert!(buckets.iter().all(|b| b.timestamp == crate::model::format_instant(0)));
        assert_eq!(buckets[9].messages.len(), 3);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let buckets = aggregate(vec![at(500), at(1000)], 1000, 0, 4);
        assert_eq!(buckets.len(), 4);
        assert_eq!(total(&buckets), 0);
        assert_eq!(buckets[0].timestamp, crate::model::format_instant(1000));
        assert_eq!(buckets[1].timestamp, crate::model::format_instant(750));
    }

    #[test]
    fn test_parse_parts() {
        assert_eq!(parse_parts(None, 10, 1000), Some(10));
        assert_eq!(parse_parts(Some("5"), 10, 1000), Some(5));
        assert_eq!(parse_parts(Some(" 7 "), 10, 1000), Some(7));
        assert_eq!(parse_parts(Some("abc"), 10, 1000), Some(10));
        assert_eq!(parse_parts(Some("0"), 10, 1000), Some(10));
        assert_eq!(parse_parts(Some("-3"), 10, 1000), Some(10));
        assert_eq!(parse_parts(Some("1000"), 10, 1000), Some(1000));

        // leading integer prefix
        assert_eq!(parse_parts(Some("2.5"), 10, 1000), Some(2));
        assert_eq!(parse_parts(Some("5abc"), 10, 1000), Some(5));
        assert_eq!(parse_parts(Some("+4"), 10, 1000), Some(4));

        assert_eq!(parse_parts(Some("1001"), 10, 1000), None);
        assert_eq!(parse_parts(Some("50000"), 10, 1000), None);
        assert_eq!(parse_parts(Some("99999999999999999999999"), 10, 1000), None);
    }

    #[test]
    fn test_parse_instant() {
        assert_eq!(parse_instant("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(parse_instant("1970-01-01T00:00:01.500Z"), Some(1500));
        assert_eq!(parse_instant("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_instant("1970-01-01T00:00:10"), Some(10_000));
        assert_eq!(parse_instant("1970-01-01 00:01"), Some(60_000));
        assert_eq!(parse_instant("1970-01-02"), Some(86_400_000));
        assert_eq!(
            parse_instant("2024-03-01T12:00:00.000Z"),
            Some(1_709_294_400_000)
        );

        // reduced precision and basic format
        assert_eq!(parse_instant("2024-01-01T10"), Some(1_704_103_200_000));
        assert_eq!(parse_instant("2024-01-01T10:00Z"), Some(1_704_103_200_000));
        assert_eq!(parse_instant("2024-01"), Some(1_704_067_200_000));
        assert_eq!(parse_instant("20240101"), Some(1_704_067_200_000));
        assert_eq!(parse_instant("20240101T103000"), Some(1_704_105_000_000));
        assert_eq!(parse_instant("1970-01-01T00:00:01,25Z"), Some(1250));

        // offsets
        assert_eq!(
            parse_instant("2024-01-01T10:00:00+0100"),
            Some(1_704_099_600_000)
        );
        assert_eq!(
            parse_instant("2024-01-01T10:00:00+01"),
            Some(1_704_099_600_000)
        );
        assert_eq!(parse_instant("1970-01-01T00:00:00-0130"), Some(5_400_000));

        // ordinal and week dates
        assert_eq!(parse_instant("2024-032"), Some(1_706_745_600_000));
        assert_eq!(parse_instant("2024-W01-1"), Some(1_704_067_200_000));
        assert_eq!(parse_instant("2024-W01"), Some(1_704_067_200_000));

        assert_eq!(parse_instant("notadate"), None);
        assert_eq!(parse_instant(""), None);
        assert_eq!(parse_instant("2024-13-01"), None);
        assert_eq!(parse_instant("2024-02-30T00:00:00Z"), None);
        assert_eq!(parse_instant("1709294400000"), None);
        assert_eq!(parse_instant("2024-1-1"), None);
        assert_eq!(parse_instant("2024-01-01T"), None);
        assert_eq!(parse_instant("2024-01-01T25:00"), None);
        assert_eq!(parse_instant("2024-01-01T10:00+2500"), None);
        assert_eq!(parse_instant("2024-01-01T10.5"), None);
        assert_eq!(parse_instant("2024-W01-8"), None);
    }

    #[tokio::test]
    async fn test_query_missing_log() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.initialize().unwrap();
        let engine = QueryEngine::new(store);

        let result = engine.query("g1", "c1", 0, 10_000, 5).await;
        assert!(matches!(result, Err(QueryError::LogNotFound { .. })));
    }

    #[tokio::test]
    async fn test_query_empty_log_is_not_missing() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.initialize().unwrap();
        store.save("g1", "c1", &[]).unwrap();
        let engine = QueryEngine::new(store);

        let buckets = engine.query("g1", "c1", 0, 10_000, 5).await.unwrap();
        assert_eq!(buckets.len(), 5);
        assert_eq!(total(&buckets), 0);
    }

    #[tokio::test]
    async fn test_query_reads_stored_log() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.initialize().unwrap();
        let messages: Vec<_> = (0..10).map(|i| at(i * 1000)).collect();
        store.save("g1", "c1", &messages).unwrap();
        let engine = QueryEngine::new(store);

        let buckets = engine.query("g1", "c1", 0, 10_000, 5).await.unwrap();
        assert_eq!(total(&buckets), 10);
        assert_eq!(buckets[4].messages[1].timestamp, 9000);
    }
}
