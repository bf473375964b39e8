//! Student identity resolution.
//!
//! A [`StudentIdentity`] is the only key accepted downstream: two digits,
//! the `MBY` programme code, four digits (`25MBY3001`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::RawParticipantRow;

static CANONICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{2}MBY[0-9]{4}$").expect("regex is valid"));
static EMBEDDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{2}MBY[0-9]{4})\b").expect("regex is valid"));
static LEGACY_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{2}MBY)([0-9]{1,3})\b").expect("regex is valid"));
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\[[^\]]*\]").expect("regex is valid"));
static LEADING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{2}MBY[0-9]{4}[-\s]*").expect("regex is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentIdentity(String);

impl StudentIdentity {
    /// Accepts only the exact canonical form; surrounding whitespace is trimmed.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        CANONICAL
            .is_match(value)
            .then(|| StudentIdentity(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    RollNumber,
    DisplayName,
    /// Short suffix in the display name, zero-padded to four digits.
    LegacyPadded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: StudentIdentity,
    pub source: IdentitySource,
    /// The literal text that produced the identity, removed when cleaning names.
    pub matched: String,
}

pub fn resolve(row: &RawParticipantRow) -> Option<Resolution> {
    if let Some(roll) = row.roll_number.as_deref() {
        if let Some(identity) = StudentIdentity::parse(roll) {
            return Some(Resolution {
                matched: identity.as_str().to_string(),
                identity,
                source: IdentitySource::RollNumber,
            });
        }
    }
    extract_from_name(&row.display_name)
}

pub fn extract_from_name(name: &str) -> Option<Resolution> {
    if let Some(found) = EMBEDDED.captures(name).and_then(|c| c.get(1)) {
        let identity = StudentIdentity::parse(found.as_str())?;
        return Some(Resolution {
            identity,
            source: IdentitySource::DisplayName,
            matched: found.as_str().to_string(),
        });
    }

    let caps = LEGACY_SHORT.captures(name)?;
    let padded = format!("{}{:0>4}", &caps[1], &caps[2]);
    let identity = StudentIdentity::parse(&padded)?;
    Some(Resolution {
        identity,
        source: IdentitySource::LegacyPadded,
        matched: caps[0].to_string(),
    })
}

/// Display-only cleanup of a participant name.
pub fn clean_name(name: &str, matched: Option<&str>) -> String {
    let mut name = name.to_string();
    if let Some(matched) = matched.filter(|m| !m.is_empty()) {
        let re = Regex::new(&format!(r"\b{}\b", regex::escape(matched)))
            .expect("escaped id is a valid regex");
        name = re.replace_all(&name, "").into_owned();
    }
    name = name.replace("(Unverified)", "");
    name = BRACKETED.replace_all(&name, "").into_owned();
    name = LEADING_ID.replace(&name, "").into_owned();
    name = WHITESPACE.replace_all(&name, " ").into_owned();
    name.trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}
