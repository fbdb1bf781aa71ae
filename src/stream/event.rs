//! Classification of inbound stream events.
//!
//! Wire shape: `{"type": "Info" | "Success" | "Error" | "control", "message": string}`.

use serde_json::Value;

use crate::types::LogLevel;

/// Reserved `type` value for control events.
pub const CONTROL_TYPE: &str = "control";

/// Control messages that end a run successfully.
pub const COMPLETE_SIGNALS: &[&str] = &["COMPLETE", "COMPLETED", "DONE"];

/// Control messages that end a run as failed.
pub const FAILURE_SIGNALS: &[&str] = &["ERROR", "FAILED"];

/// What an inbound payload means for its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// An ordinary log line.
    Log { level: LogLevel, message: String },
    /// Terminal control: the run finished.
    Complete,
    /// Terminal control: the run failed.
    Failed,
    /// Valid JSON that carries nothing for the log (unknown type or control signal).
    Ignored,
    /// Not valid JSON; `raw` is the payload as received.
    Malformed { raw: String },
}

/// Classify one event payload. Never fails; malformed input is a variant.
pub fn classify(raw: &str) -> Classified {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            return Classified::Malformed {
                raw: raw.to_string(),
            }
        }
    };

    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let message = match value.get("message") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    if kind == CONTROL_TYPE {
        return classify_control(&message);
    }

    match kind.parse::<LogLevel>() {
        Ok(level @ (LogLevel::Info | LogLevel::Success | LogLevel::Error)) => {
            Classified::Log { level, message }
        }
        _ => Classified::Ignored,
    }
}

fn classify_control(message: &str) -> Classified {
    let signal = message.trim();
    if COMPLETE_SIGNALS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(signal))
    {
        Classified::Complete
    } else if FAILURE_SIGNALS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(signal))
    {
        Classified::Failed
    } else {
        tracing::debug!(signal, "ignoring unrecognized control signal");
        Classified::Ignored
    }
}
