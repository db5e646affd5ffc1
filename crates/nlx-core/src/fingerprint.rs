use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

const FIELD_SEPARATOR: char = '\u{1f}';
const FINGERPRINT_BYTES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub severity: String,
    pub label: String,
    pub message: String,
    #[serde(default)]
    pub reason_code: String,
}

/// Normalized `severity|label|message|reasonCode` form the fingerprint hashes.
pub fn canonical_event_key(event: &DiagnosticEvent) -> String {
    let severity = event.severity.trim().to_ascii_uppercase();
    let label = collapse_whitespace(event.label.trim()).to_lowercase();
    let message = event
        .message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| collapse_whitespace(line).to_lowercase())
        .unwrap_or_default();
    let reason_code = event.reason_code.trim().to_ascii_uppercase();

    [severity, label, message, reason_code].join(&FIELD_SEPARATOR.to_string())
}

pub fn fingerprint(event: &DiagnosticEvent) -> String {
    let digest = Sha256::digest(canonical_event_key(event).as_bytes());
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Drops repeats of an already seen fingerprint, keeping first occurrences in order.
pub fn dedupe_events(events: Vec<DiagnosticEvent>) -> Vec<DiagnosticEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(fingerprint(event)))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
