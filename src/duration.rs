//! Duration parsing and per-identity aggregation.
//!
//! Durations are whole minutes: hours and minutes are summed as integers and
//! any seconds component rounds up to the next minute.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::identity::{self, IdentitySource, StudentIdentity};
use crate::models::{RawParticipantRow, ResolvedParticipant};

static HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)h").expect("regex is valid"));
static MINUTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)m").expect("regex is valid"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)s").expect("regex is valid"));
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("regex is valid"));

/// Digit runs too large for a u32 saturate instead of being dropped.
fn saturating_digits(digits: &str) -> u32 {
    digits.parse().unwrap_or(u32::MAX)
}

fn component(re: &Regex, value: &str) -> Option<u32> {
    re.captures(value)
        .and_then(|c| c.get(1))
        .map(|m| saturating_digits(m.as_str()))
}

pub fn parse_minutes(raw: &str) -> u32 {
    let value = raw.trim();
    if value.is_empty() {
        return 0;
    }

    let hours = component(&HOURS, value);
    let minutes = component(&MINUTES, value);
    let seconds = component(&SECONDS, value);

    if hours.is_none() && minutes.is_none() && seconds.is_none() {
        return match BARE_NUMBER.find(value).map(|m| saturating_digits(m.as_str())) {
            Some(n) => {
                tracing::debug!("fallback parsing '{value}' as {n} minutes");
                n
            }
            None => {
                tracing::warn!("could not parse duration '{value}'");
                0
            }
        };
    }

    hours
        .unwrap_or(0)
        .saturating_mul(60)
        .saturating_add(minutes.unwrap_or(0))
        .saturating_add(seconds.unwrap_or(0).div_ceil(60))
}

#[derive(Debug, Default)]
pub struct Aggregation {
    /// In first-seen order.
    pub participants: Vec<ResolvedParticipant>,
    /// One warning per export row that yielded no identity.
    pub unresolved: Vec<String>,
}

/// Resolve every row and fold rows sharing an identity into one participant.
pub fn aggregate(rows: &[RawParticipantRow]) -> Aggregation {
    let mut aggregation = Aggregation::default();
    let mut index: HashMap<StudentIdentity, usize> = HashMap::new();

    for row in rows {
        let Some(resolution) = identity::resolve(row) else {
            let roll = row.roll_number.as_deref().unwrap_or("");
            let warning = format!(
                "line {}: no valid enrollment id for '{}' (roll number: '{}')",
                row.line, row.display_name, roll
            );
            tracing::warn!("{warning}");
            aggregation.unresolved.push(warning);
            continue;
        };

        if resolution.source == IdentitySource::LegacyPadded {
            tracing::debug!(
                "line {}: padded legacy id '{}' to {}",
                row.line,
                resolution.matched,
                resolution.identity
            );
        }

        let minutes = parse_minutes(&row.segment_duration_raw);
        match index.get(&resolution.identity) {
            Some(&slot) => {
                let participant = &mut aggregation.participants[slot];
                let before = participant.total_duration_minutes;
                participant.total_duration_minutes = before.saturating_add(minutes);
                tracing::debug!(
                    "aggregating {}: {before}m + {minutes}m = {}m",
                    participant.identity,
                    participant.total_duration_minutes
                );
            }
            None => {
                let display_name =
                    identity::clean_name(&row.display_name, Some(&resolution.matched));
                index.insert(resolution.identity.clone(), aggregation.participants.len());
                aggregation.participants.push(ResolvedParticipant {
                    identity: resolution.identity,
                    display_name,
                    total_duration_minutes: minutes,
                });
            }
        }
    }

    aggregation
}
