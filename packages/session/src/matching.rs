//! Matchmaking result correlation.
//!
//! The matching service reports results in several overlapping shapes
//! (`{status}`, `{success, status}`, `{result: {status}}`). [`correlate`]
//! decides an outcome by running [`RULES`] in order; the first rule that
//! matches wins, since some payloads satisfy more than one.

use duet_session_models::MatchingOutcome;
use serde_json::Value;

const WAITING: &str = "WAITING";
const MATCHED: &str = "MATCHED";
const ALREADY_MATCHED: &str = "ALREADY_MATCHED";

/// The fields of a matching payload the rules look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchingSignals<'a> {
    pub status: Option<&'a str>,
    /// Whether the `success` marker is present and truthy.
    pub success: bool,
    /// `result.status`, when the payload nests a result object.
    pub result_status: Option<&'a str>,
}

impl<'a> MatchingSignals<'a> {
    #[must_use]
    pub fn from_payload(payload: &'a Value) -> Self {
        Self {
            status: payload.get("status").and_then(Value::as_str),
            success: payload.get("success").is_some_and(is_truthy),
            result_status: payload
                .get("result")
                .and_then(|result| result.get("status"))
                .and_then(Value::as_str),
        }
    }
}

/// Loose truthiness: `null`, `false`, `0` and `""` are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(value) => value.as_f64().is_some_and(|value| value != 0.0),
        Value::String(value) => !value.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub type Rule = fn(&MatchingSignals<'_>) -> Option<MatchingOutcome>;

/// Correlation rules in evaluation order.
pub const RULES: [(&str, Rule); 3] = [
    ("waiting", waiting_rule),
    ("matched", matched_rule),
    ("failed", failed_rule),
];

fn waiting_rule(signals: &MatchingSignals<'_>) -> Option<MatchingOutcome> {
    (signals.status == Some(WAITING)).then_some(MatchingOutcome::Waiting)
}

fn matched_rule(signals: &MatchingSignals<'_>) -> Option<MatchingOutcome> {
    match (signals.success, signals.status) {
        (true, Some(MATCHED)) => Some(MatchingOutcome::Matched),
        (true, Some(ALREADY_MATCHED)) => Some(MatchingOutcome::AlreadyMatched),
        _ => (signals.result_status == Some(MATCHED)).then_some(MatchingOutcome::Matched),
    }
}

fn failed_rule(signals: &MatchingSignals<'_>) -> Option<MatchingOutcome> {
    (!signals.success && signals.status != Some(ALREADY_MATCHED))
        .then_some(MatchingOutcome::Failed)
}

/// Decides the outcome of one matching payload.
///
/// Returns `None` when the payload is ambiguous (for example
/// `{success: false, status: "ALREADY_MATCHED"}`); callers drop those.
#[must_use]
pub fn correlate(payload: &Value) -> Option<MatchingOutcome> {
    let signals = MatchingSignals::from_payload(payload);

    let outcome = RULES
        .iter()
        .find_map(|(name, rule)| rule(&signals).map(|outcome| (*name, outcome)));

    match outcome {
        Some((rule, outcome)) => {
            log::trace!("correlate: rule={rule} outcome={outcome:?} signals={signals:?}");
            Some(outcome)
        }
        None => {
            log::debug!("correlate: indeterminate matching payload signals={signals:?}");
            None
        }
    }
}
