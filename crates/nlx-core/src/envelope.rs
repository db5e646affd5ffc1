//! Canonical result object produced for every command run.
//!
//! An envelope is built once, right after the command finishes, and is never
//! mutated afterwards. All text it carries has gone through [`Redactor`]
//! before the envelope exists, so anything holding a `RunEnvelope` may render
//! or persist it.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::config::OutputLimits;
use crate::diagnose::find_diagnose_line;
use crate::diagnose::parse_diagnose_line;
use crate::diagnose::DiagnoseFields;
use crate::diagnose::DiagnoseHealth;
use crate::redaction::RedactionError;
use crate::redaction::Redactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Badge {
    Pass,
    Warn,
    Fail,
}

impl Badge {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    Degraded,
    Broken,
    NonzeroExit,
    Timeout,
    ExecError,
}

impl ReasonCode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Broken => "BROKEN",
            Self::NonzeroExit => "NONZERO_EXIT",
            Self::Timeout => "TIMEOUT",
            Self::ExecError => "EXEC_ERROR",
        }
    }

    pub fn badge(self) -> Badge {
        match self {
            Self::Ok => Badge::Pass,
            Self::Degraded => Badge::Warn,
            Self::Broken | Self::NonzeroExit | Self::Timeout | Self::ExecError => Badge::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub msg: String,
}

/// How the command process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i32),
    TimedOut,
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct RunInput {
    pub command_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub stdout: String,
    pub stderr: String,
    pub events: Vec<RunEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEnvelope {
    pub ok: bool,
    pub badge: Badge,
    pub reason_code: ReasonCode,
    pub command_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub events: Vec<RunEvent>,
    pub redacted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnose: Option<DiagnoseFields>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl RunEnvelope {
    /// Restores an envelope from storage or another untrusted source.
    ///
    /// Returns `None` for anything that fails the shape guard, does not
    /// deserialize, or carries inconsistent timing.
    pub fn from_untrusted(value: &Value) -> Option<Self> {
        if !is_run_envelope(value) {
            return None;
        }
        let envelope: Self = serde_json::from_value(value.clone()).ok()?;
        let elapsed = envelope
            .finished_at
            .signed_duration_since(envelope.started_at)
            .num_milliseconds();
        if elapsed < 0 || elapsed as u64 != envelope.duration_ms {
            return None;
        }
        Some(envelope)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    redactor: Redactor,
    limits: OutputLimits,
}

impl EnvelopeBuilder {
    pub fn new(redactor: Redactor, limits: OutputLimits) -> Self {
        Self { redactor, limits }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, RedactionError> {
        Ok(Self::new(Redactor::from_config(&config.redaction)?, config.output))
    }

    pub fn build(&self, input: RunInput) -> RunEnvelope {
        self.build_at(input, Utc::now())
    }

    /// Builds the envelope with an explicit finish time.
    pub fn build_at(&self, input: RunInput, finished_at: DateTime<Utc>) -> RunEnvelope {
        let RunInput {
            command_id,
            started_at,
            outcome,
            stdout,
            stderr,
            mut events,
        } = input;

        // Clock skew must not produce a negative duration.
        let finished_at = finished_at.max(started_at);
        let duration_ms = finished_at
            .signed_duration_since(started_at)
            .num_milliseconds()
            .max(0) as u64;

        if let RunOutcome::SpawnFailed(message) = &outcome {
            events.push(RunEvent {
                ts: finished_at,
                level: EventLevel::Error,
                msg: message.clone(),
            });
        }

        let stdout = self.redactor.redact(&stdout);
        let stderr = self.redactor.redact(&stderr);
        let mut redacted = stdout.changed || stderr.changed;
        let events: Vec<RunEvent> = events
            .into_iter()
            .map(|event| {
                let msg = self.redactor.redact(&event.msg);
                redacted |= msg.changed;
                RunEvent {
                    msg: msg.text,
                    ..event
                }
            })
            .collect();

        let diagnose = find_diagnose_line(&stdout.text).and_then(|line| {
            parse_diagnose_line(line)
                .map_err(|err| {
                    tracing::warn!(command_id = %command_id, error = %err, "diagnose line in run output did not parse");
                })
                .ok()
        });
        let is_diagnose = diagnose.is_some() || command_id.trim() == "diagnose";
        let reason_code = classify(&outcome, is_diagnose);
        let badge = reason_code.badge();

        let (stdout, stdout_trimmed) = trim_output(stdout.text, self.limits);
        let (stderr, stderr_trimmed) = trim_output(stderr.text, self.limits);

        RunEnvelope {
            ok: badge != Badge::Fail,
            badge,
            reason_code,
            command_id,
            started_at,
            finished_at,
            duration_ms,
            stdout,
            stderr,
            events,
            redacted,
            diagnose,
            truncated: stdout_trimmed || stderr_trimmed,
        }
    }
}

/// Builds an envelope with the built-in redaction rules and output limits.
pub fn build_run_envelope(input: RunInput) -> RunEnvelope {
    EnvelopeBuilder::default().build(input)
}

/// Structural guard for envelopes arriving from storage or another session.
///
/// Checks that every required field is present with the right primitive
/// shape. Never panics; anything unexpected yields `false`.
pub fn is_run_envelope(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let is_bool = |key: &str| object.get(key).is_some_and(Value::is_boolean);
    let is_string = |key: &str| object.get(key).is_some_and(Value::is_string);

    let scalars_ok = is_bool("ok")
        && is_bool("redacted")
        && ["badge", "reasonCode", "commandId", "startedAt", "finishedAt", "stdout", "stderr"]
            .into_iter()
            .all(is_string)
        && object.get("durationMs").is_some_and(Value::is_u64);
    if !scalars_ok {
        return false;
    }

    let Some(events) = object.get("events").and_then(Value::as_array) else {
        return false;
    };
    events.iter().all(|event| {
        event.as_object().is_some_and(|event| {
            ["ts", "level", "msg"]
                .into_iter()
                .all(|key| event.get(key).is_some_and(Value::is_string))
        })
    })
}

fn classify(outcome: &RunOutcome, is_diagnose: bool) -> ReasonCode {
    match outcome {
        RunOutcome::SpawnFailed(_) => ReasonCode::ExecError,
        RunOutcome::TimedOut => ReasonCode::Timeout,
        RunOutcome::Exited(0) => ReasonCode::Ok,
        RunOutcome::Exited(code) if is_diagnose => match DiagnoseHealth::from_exit_code(*code) {
            Some(DiagnoseHealth::Degraded) => ReasonCode::Degraded,
            Some(DiagnoseHealth::Broken) => ReasonCode::Broken,
            _ => ReasonCode::NonzeroExit,
        },
        RunOutcome::Exited(_) => ReasonCode::NonzeroExit,
    }
}

fn trim_output(text: String, limits: OutputLimits) -> (String, bool) {
    if text.lines().nth(limits.max_lines).is_some() {
        let kept: Vec<&str> = text.lines().take(limits.max_lines).collect();
        let trimmed = format!("{}\n... (trimmed @ {} lines)", kept.join("\n"), limits.max_lines);
        return (trimmed, true);
    }
    if let Some((cut, _)) = text.char_indices().nth(limits.max_chars) {
        let trimmed = format!("{}\n... (trimmed @ {} chars)", &text[..cut], limits.max_chars);
        return (trimmed, true);
    }
    (text, false)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const DIAGNOSE_LINE: &str = "DNS_MODE=local-private RESOLVER=192.168.64.2 PIHOLE=running \
CLOUDFLARED=down PLAINTEXT_DNS=no NOTES=\"cloudflared-down\"";

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_771_716_665_000 + ms)
            .single()
            .expect("valid timestamp")
    }

    fn input(command_id: &str, outcome: RunOutcome, stdout: &str) -> RunInput {
        RunInput {
            command_id: command_id.to_string(),
            started_at: at(0),
            outcome,
            stdout: stdout.to_string(),
            stderr: String::new(),
            events: Vec::new(),
        }
    }

    fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    #[test]
    fn clean_run_is_pass_with_consistent_timing() {
        let envelope = builder().build_at(input("tasks", RunOutcome::Exited(0), "all good"), at(1_250));
        assert!(envelope.ok);
        assert_eq!(envelope.badge, Badge::Pass);
        assert_eq!(envelope.reason_code, ReasonCode::Ok);
        assert_eq!(envelope.duration_ms, 1_250);
        assert_eq!(envelope.finished_at, at(1_250));
        assert!(!envelope.redacted);
        assert!(!envelope.truncated);
        assert_eq!(envelope.diagnose, None);
    }

    #[test]
    fn finish_before_start_clamps_to_zero_duration() {
        let envelope = builder().build_at(input("tasks", RunOutcome::Exited(0), ""), at(-500));
        assert_eq!(envelope.duration_ms, 0);
        assert_eq!(envelope.finished_at, envelope.started_at);
    }

    #[test]
    fn build_stamps_current_time() {
        let before = Utc::now();
        let envelope = build_run_envelope(RunInput {
            started_at: before,
            ..input("tasks", RunOutcome::Exited(0), "")
        });
        assert!(envelope.finished_at >= before);
        assert_eq!(
            envelope.duration_ms as i64,
            (envelope.finished_at - envelope.started_at).num_milliseconds()
        );
    }

    #[test]
    fn secrets_never_survive_into_any_text_field() {
        let token = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        let mut run = input(
            "pihole",
            RunOutcome::Exited(0),
            "docker run -e WEBPASSWORD=topsecret pihole",
        );
        run.stderr = format!("auth token {token}");
        run.events.push(RunEvent {
            ts: at(10),
            level: EventLevel::Info,
            msg: "loaded /etc/cloudflared/credentials.json".to_string(),
        });

        let envelope = builder().build_at(run, at(20));
        assert!(envelope.redacted);
        let serialized = serde_json::to_string(&envelope).expect("serialize");
        assert!(!serialized.contains("topsecret"));
        assert!(!serialized.contains(token));
        assert!(!serialized.contains("credentials.json"));
        assert_eq!(envelope.stdout, "docker run -e WEBPASSWORD=[REDACTED] pihole");
        assert_eq!(envelope.events[0].msg, "loaded [REDACTED]");
    }

    #[test]
    fn diagnose_exit_codes_map_to_warn_and_fail() {
        let degraded = builder().build_at(input("diagnose", RunOutcome::Exited(1), DIAGNOSE_LINE), at(5));
        assert_eq!(degraded.reason_code, ReasonCode::Degraded);
        assert_eq!(degraded.badge, Badge::Warn);
        assert!(degraded.ok);
        assert_eq!(
            degraded.diagnose.as_ref().map(|fields| fields.cloudflared.as_str()),
            Some("down")
        );

        let broken = builder().build_at(input("diagnose", RunOutcome::Exited(2), ""), at(5));
        assert_eq!(broken.reason_code, ReasonCode::Broken);
        assert!(!broken.ok);

        let other = builder().build_at(input("tasks", RunOutcome::Exited(1), ""), at(5));
        assert_eq!(other.reason_code, ReasonCode::NonzeroExit);
        assert_eq!(other.badge, Badge::Fail);
    }

    #[test]
    fn malformed_diagnose_line_is_not_embedded() {
        let envelope = builder().build_at(
            input("diagnose", RunOutcome::Exited(0), "DNS_MODE=x RESOLVER=y"),
            at(5),
        );
        assert_eq!(envelope.diagnose, None);
        assert_eq!(envelope.reason_code, ReasonCode::Ok);
    }

    #[test]
    fn spawn_failure_and_timeout_are_failures() {
        let spawn = builder().build_at(
            input(
                "diagnose",
                RunOutcome::SpawnFailed("nlx not found".to_string()),
                "",
            ),
            at(3),
        );
        assert_eq!(spawn.reason_code, ReasonCode::ExecError);
        assert!(!spawn.ok);
        assert_eq!(spawn.events.len(), 1);
        assert_eq!(spawn.events[0].level, EventLevel::Error);
        assert_eq!(spawn.events[0].msg, "nlx not found");

        let timeout = builder().build_at(input("tasks", RunOutcome::TimedOut, ""), at(3));
        assert_eq!(timeout.reason_code, ReasonCode::Timeout);
        assert_eq!(timeout.badge, Badge::Fail);
    }

    #[test]
    fn oversized_output_is_trimmed_after_redaction() {
        let builder = EnvelopeBuilder::new(
            Redactor::default(),
            OutputLimits {
                max_chars: 16,
                max_lines: 2,
            },
        );
        let lines = builder.build_at(input("tasks", RunOutcome::Exited(0), "a\nb\nc\nd"), at(1));
        assert_eq!(lines.stdout, "a\nb\n... (trimmed @ 2 lines)");
        assert!(lines.truncated);

        let chars = builder.build_at(
            input("tasks", RunOutcome::Exited(0), "WEBPASSWORD=abcdefghijkl"),
            at(1),
        );
        assert_eq!(chars.stdout, "WEBPASSWORD=[RED\n... (trimmed @ 16 chars)");
        assert!(chars.redacted);
    }

    #[test]
    fn serialized_envelope_passes_guard_and_restores() {
        let envelope = builder().build_at(input("diagnose", RunOutcome::Exited(0), DIAGNOSE_LINE), at(42));
        let value = serde_json::to_value(&envelope).expect("to value");
        assert!(is_run_envelope(&value));
        assert_eq!(value["reasonCode"], json!("OK"));
        assert_eq!(value["durationMs"], json!(42));
        assert_eq!(RunEnvelope::from_untrusted(&value), Some(envelope));
    }

    #[test]
    fn guard_rejects_wrong_shapes_without_panicking() {
        let valid = serde_json::to_value(
            builder().build_at(input("tasks", RunOutcome::Exited(0), "ok"), at(1)),
        )
        .expect("to value");

        assert!(!is_run_envelope(&json!(null)));
        assert!(!is_run_envelope(&json!([])));
        assert!(!is_run_envelope(&json!("envelope")));

        for (key, bad) in [
            ("ok", json!("true")),
            ("durationMs", json!(-1)),
            ("durationMs", json!(1.5)),
            ("stdout", json!(null)),
            ("events", json!({})),
            ("events", json!([{"ts": "x", "level": "info"}])),
            ("redacted", json!(0)),
        ] {
            let mut broken = valid.clone();
            broken[key] = bad;
            assert!(!is_run_envelope(&broken), "{key} should be rejected");
        }

        let mut missing = valid;
        if let Some(object) = missing.as_object_mut() {
            object.remove("finishedAt");
        }
        assert!(!is_run_envelope(&missing));
    }

    #[test]
    fn restore_rejects_inconsistent_timing_and_unknown_codes() {
        let envelope = builder().build_at(input("tasks", RunOutcome::Exited(0), ""), at(100));
        let mut skewed = serde_json::to_value(&envelope).expect("to value");
        skewed["durationMs"] = json!(5);
        assert!(is_run_envelope(&skewed));
        assert_eq!(RunEnvelope::from_untrusted(&skewed), None);

        let mut unknown = serde_json::to_value(&envelope).expect("to value");
        unknown["reasonCode"] = json!("SOMETHING_NEW");
        assert_eq!(RunEnvelope::from_untrusted(&unknown), None);
    }
}
