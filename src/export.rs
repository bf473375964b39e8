//! Parser for tab-delimited meeting attendance exports.
//!
//! An export carries a summary block (title, duration, ...) followed by a
//! participant table whose header row names `Name` and
//! `In-Meeting Duration`. The table ends at the first blank line or at the
//! `In-Meeting Activities` section.

use crate::duration;
use crate::error::{ProcessError, Result};
use crate::models::{MeetingHeader, RawParticipantRow};

const DURATION_MARKER: &str = "Meeting duration";
const TITLE_MARKER: &str = "Meeting title";
const TABLE_NAME_TOKEN: &str = "Name";
const TABLE_DURATION_TOKEN: &str = "In-Meeting Duration";
const ACTIVITIES_MARKER: &str = "In-Meeting Activities";

const NAME_COLUMN: usize = 0;
const DURATION_COLUMN: usize = 3;
const ROLL_NUMBER_COLUMN: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct ExportRules {
    /// Rows with fewer tab-delimited fields are rejected.
    pub min_row_fields: usize,
    pub default_meeting_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct ParsedExport {
    pub header: MeetingHeader,
    pub rows: Vec<RawParticipantRow>,
    /// Data rows that failed the column-count or name check.
    pub rejected: Vec<String>,
}

fn second_field(line: &str) -> Option<&str> {
    line.split('\t')
        .nth(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_header(lines: &[&str], rules: &ExportRules) -> MeetingHeader {
    let title = lines
        .iter()
        .find(|line| line.contains(TITLE_MARKER))
        .and_then(|line| second_field(line))
        .map(str::to_string);

    let parsed = lines
        .iter()
        .find(|line| line.contains(DURATION_MARKER))
        .and_then(|line| second_field(line))
        .map(|raw| (raw, duration::parse_minutes(raw)));

    match parsed {
        Some((_, minutes)) if minutes > 0 => MeetingHeader {
            title,
            duration_minutes: minutes,
            from_export: true,
        },
        other => {
            if let Some((raw, _)) = other {
                tracing::warn!("meeting duration '{raw}' parsed as zero; using fallback");
            }
            MeetingHeader {
                title,
                duration_minutes: rules.default_meeting_minutes,
                from_export: false,
            }
        }
    }
}

pub fn parse_export(text: &str, rules: &ExportRules) -> Result<ParsedExport> {
    let lines: Vec<&str> = text.lines().collect();
    let header = parse_header(&lines, rules);

    let table_start = lines
        .iter()
        .position(|line| line.contains(TABLE_NAME_TOKEN) && line.contains(TABLE_DURATION_TOKEN))
        .map(|index| index + 1)
        .ok_or_else(|| {
            ProcessError::Format("Could not find participants section in export".to_string())
        })?;

    let mut rows = Vec::new();
    let mut rejected = Vec::new();

    for (index, line) in lines.iter().enumerate().skip(table_start) {
        if line.trim().is_empty() || line.contains(ACTIVITIES_MARKER) {
            break;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let line_number = index + 1;

        if fields.len() < rules.min_row_fields {
            rejected.push(format!(
                "line {line_number}: expected at least {} fields, found {}",
                rules.min_row_fields,
                fields.len()
            ));
            continue;
        }
        if fields[NAME_COLUMN].is_empty() {
            rejected.push(format!("line {line_number}: empty participant name"));
            continue;
        }

        rows.push(RawParticipantRow {
            line: line_number,
            display_name: fields[NAME_COLUMN].to_string(),
            roll_number: fields
                .get(ROLL_NUMBER_COLUMN)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string()),
            segment_duration_raw: fields[DURATION_COLUMN].to_string(),
        });
    }

    for warning in &rejected {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        "parsed {} participant rows ({} rejected), meeting duration {}m",
        rows.len(),
        rejected.len(),
        header.duration_minutes
    );

    Ok(ParsedExport {
        header,
        rows,
        rejected,
    })
}
