//! sshd event classification

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::geo::GeoLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Success,
    Fail,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct SshEvent {
    /// Syslog prefix such as "Feb 21 20:01:49", empty when absent
    pub timestamp: String,
    pub level: EventLevel,
    pub label: &'static str,
    pub user: String,
    pub ip: String,
    pub port: String,
    pub geo: String,
    pub raw: String,
}

struct Pattern {
    regex: Regex,
    level: EventLevel,
    label: &'static str,
}

const IP: &str = r"([0-9A-Fa-f.:]+)";

// First match wins
static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        (
            format!(r"Accepted (?:publickey|password) for (\S+) from {IP} port (\d+)"),
            EventLevel::Success,
            "login",
        ),
        (
            format!(
                r"Failed (?:password|publickey) for(?: invalid user)? (\S+) from {IP} port (\d+)"
            ),
            EventLevel::Fail,
            "failed auth",
        ),
        (
            format!(r"Invalid user (\S+) from {IP} port (\d+)"),
            EventLevel::Fail,
            "invalid user",
        ),
        (
            format!(r"Disconnected from (?:authenticating |invalid )?user (\S+) {IP} port (\d+)"),
            EventLevel::Info,
            "disconnected",
        ),
        (
            format!(r"Connection closed by authenticating user (\S+) {IP} port (\d+)"),
            EventLevel::Info,
            "conn closed",
        ),
    ]
    .into_iter()
    .map(|(re, level, label)| Pattern {
        regex: Regex::new(&re).expect("valid regex"),
        level,
        label,
    })
    .collect()
});

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w{3}\s+\d+\s+\d+:\d+:\d+)").expect("valid regex"));

/// Classify one log line; non-sshd and unrecognised lines yield `None`.
/// The returned event has no geo annotation yet.
pub fn classify(line: &str) -> Option<SshEvent> {
    if !line.contains("sshd") {
        return None;
    }
    PATTERNS.iter().find_map(|p| {
        let caps = p.regex.captures(line)?;
        Some(SshEvent {
            timestamp: TIMESTAMP
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            level: p.level,
            label: p.label,
            user: caps[1].to_string(),
            ip: caps[2].to_string(),
            port: caps[3].to_string(),
            geo: String::new(),
            raw: line.trim().to_string(),
        })
    })
}

/// Classified events from chronological `lines`, newest first, at most `limit`
pub fn extract_events(lines: &[String], geo: &dyn GeoLookup, limit: usize) -> Vec<SshEvent> {
    let mut events: Vec<SshEvent> = lines.iter().filter_map(|l| classify(l)).collect();
    events.reverse();
    events.truncate(limit);
    for event in &mut events {
        event.geo = geo.describe(&event.ip);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::geo::NoGeo;

    struct Fixed;

    impl GeoLookup for Fixed {
        fn describe(&self, ip: &str) -> String {
            format!("geo:{}", ip)
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (
                "Feb 21 20:01:49 gw sshd[101]: Accepted publickey for alice from 203.0.113.5 port 50022 ssh2",
                EventLevel::Success,
                "login",
                "alice",
            ),
            (
                "Feb 21 20:02:00 gw sshd[102]: Failed password for invalid user admin from 198.51.100.9 port 4242 ssh2",
                EventLevel::Fail,
                "failed auth",
                "admin",
            ),
            (
                "Feb 21 20:02:01 gw sshd[103]: Failed publickey for root from 198.51.100.9 port 4243 ssh2",
                EventLevel::Fail,
                "failed auth",
                "root",
            ),
            (
                "Feb 21 20:02:02 gw sshd[104]: Invalid user oracle from 198.51.100.9 port 4244",
                EventLevel::Fail,
                "invalid user",
                "oracle",
            ),
            (
                "Feb 21 20:02:03 gw sshd[105]: Disconnected from invalid user oracle 198.51.100.9 port 4244 [preauth]",
                EventLevel::Info,
                "disconnected",
                "oracle",
            ),
            (
                "Feb 21 20:02:04 gw sshd[106]: Connection closed by authenticating user root 198.51.100.9 port 4245 [preauth]",
                EventLevel::Info,
                "conn closed",
                "root",
            ),
        ];
        for (line, level, label, user) in cases {
            let ev = classify(line).unwrap_or_else(|| panic!("unclassified: {}", line));
            assert_eq!(ev.level, level, "{}", line);
            assert_eq!(ev.label, label);
            assert_eq!(ev.user, user);
        }
    }

    #[test]
    fn test_fields_and_ipv6() {
        let ev = classify(
            "Mar  3 09:15:27 gw sshd[7]: Accepted password for bob from 2001:db8::7 port 61000 ssh2",
        )
        .unwrap();
        assert_eq!(ev.timestamp, "Mar  3 09:15:27");
        assert_eq!(ev.ip, "2001:db8::7");
        assert_eq!(ev.port, "61000");
    }

    #[test]
    fn test_ignores_other_daemons_and_noise() {
        let not_sshd = "Feb 21 20:01:49 gw sudo: Accepted publickey for alice from 1.2.3.4 port 1";
        assert!(classify(not_sshd).is_none());
        let unmatched = "Feb 21 20:01:49 gw sshd[1]: Server listening on 0.0.0.0 port 22.";
        assert!(classify(unmatched).is_none());
    }

    #[test]
    fn test_newest_first_with_limit_and_geo() {
        let input = lines(&[
            "Feb 21 10:00:00 gw sshd[1]: Accepted publickey for a from 10.0.0.1 port 1 ssh2",
            "Feb 21 10:00:01 gw CRON[2]: session opened",
            "Feb 21 10:00:02 gw sshd[3]: Invalid user b from 10.0.0.2 port 2",
            "Feb 21 10:00:03 gw sshd[4]: Accepted password for c from 10.0.0.3 port 3 ssh2",
        ]);
        let events = extract_events(&input, &Fixed, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user, "c");
        assert_eq!(events[1].user, "b");
        assert_eq!(events[0].geo, "geo:10.0.0.3");

        assert!(extract_events(&input, &NoGeo, 0).is_empty());
        assert!(extract_events(&[], &NoGeo, 60).is_empty());
    }
}
