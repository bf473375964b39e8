use crate::models::ResolvedParticipant;

/// Minutes a participant needs to count as present.
pub fn threshold_minutes(meeting_minutes: u32, fraction: f64) -> f64 {
    f64::from(meeting_minutes) * fraction
}

/// Binary presence: at or above the threshold is present.
pub fn is_present(participant: &ResolvedParticipant, meeting_minutes: u32, fraction: f64) -> bool {
    let threshold = threshold_minutes(meeting_minutes, fraction);
    let present = f64::from(participant.total_duration_minutes) >= threshold;
    tracing::debug!(
        "attendance check {}: {}m >= {threshold}m = {}",
        participant.identity,
        participant.total_duration_minutes,
        if present { "present" } else { "absent" }
    );
    present
}
