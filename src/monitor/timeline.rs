//! Seven-day login timeline in the viewer's local time

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;

use super::geo::GeoLookup;
use crate::error::{Error, Result};

const WINDOW_DAYS: i64 = 7;

static SYSLOG_TS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w{3})\s+(\d+)\s+(\d+):(\d+):(\d+)").expect("valid regex")
});

static ACCEPTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Accepted (?:publickey|password) for (\S+) from ([0-9A-Fa-f.:]+)")
        .expect("valid regex")
});

/// Viewer UTC offset in minutes, east positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TzOffset(i32);

impl TzOffset {
    pub const MIN: i32 = -720;
    pub const MAX: i32 = 840;

    pub fn new(minutes: i32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(Error::InvalidTimezoneOffset(minutes))
        }
    }

    fn delta(&self) -> Duration {
        Duration::minutes(self.0 as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineLogin {
    pub user: String,
    pub ip: String,
    pub geo: String,
    /// Local "%H:%M:%S"
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineDay {
    /// Local "%b %d"
    pub date: String,
    pub count: usize,
    pub logins: Vec<TimelineLogin>,
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == abbrev).map(|i| i as u32 + 1)
}

/// Syslog timestamps carry no year. Assume the current UTC year unless that
/// lands more than a day in the future, which means the line predates New Year.
fn syslog_instant(line: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let caps = SYSLOG_TS.captures(line)?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let h: u32 = caps[3].parse().ok()?;
    let m: u32 = caps[4].parse().ok()?;
    let s: u32 = caps[5].parse().ok()?;

    let at = |year: i32| NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(h, m, s);

    let instant = at(now.year())?;
    if instant > now + Duration::days(1) {
        at(now.year() - 1)
    } else {
        Some(instant)
    }
}

/// Bucket accepted sshd logins into the seven local days ending today.
/// Days without logins are still present; `lines` must be chronological.
pub fn build_timeline(
    lines: &[String],
    now: DateTime<Utc>,
    offset: TzOffset,
    geo: &dyn GeoLookup,
) -> Vec<TimelineDay> {
    let now_utc = now.naive_utc();
    let today = (now_utc + offset.delta()).date();
    let first = today - Duration::days(WINDOW_DAYS - 1);

    let mut days: Vec<TimelineDay> = (0..WINDOW_DAYS)
        .map(|i| TimelineDay {
            date: (first + Duration::days(i)).format("%b %d").to_string(),
            count: 0,
            logins: Vec::new(),
        })
        .collect();

    for line in lines {
        if !line.contains("sshd") || !line.contains("Accepted") {
            continue;
        }
        let Some(utc) = syslog_instant(line, now_utc) else {
            continue;
        };
        let local = utc + offset.delta();
        let index = (local.date() - first).num_days();
        if !(0..WINDOW_DAYS).contains(&index) {
            continue;
        }
        let Some(caps) = ACCEPTED.captures(line) else {
            continue;
        };

        let day = &mut days[index as usize];
        day.count += 1;
        day.logins.push(TimelineLogin {
            user: caps[1].to_string(),
            ip: caps[2].to_string(),
            geo: geo.describe(&caps[2]),
            time: local.format("%H:%M:%S").to_string(),
        });
    }
    days
}
