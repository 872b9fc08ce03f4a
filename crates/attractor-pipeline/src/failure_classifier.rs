//! Maps a failed/retry outcome to a closed-set failure class using ordered
//! hint lists, and a signature circuit breaker for repeated loop restarts.

use std::collections::HashSet;
use std::str::FromStr;

use attractor_types::{FailureClass, Outcome, StageStatus};

// ---------------------------------------------------------------------------
// Ordered hint lists — first match wins, order preserved intentionally
// ---------------------------------------------------------------------------

const TRANSIENT_INFRA_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "econnreset",
    "econnrefused",
    "epipe",
    "eof",
    "dns",
    "name resolution",
    "no such host",
    "tls handshake",
    "certificate",
    "429",
    "rate limit",
    "too many requests",
    "502",
    "bad gateway",
    "503",
    "service unavailable",
    "504",
    "gateway timeout",
    "temporary failure",
    "network is unreachable",
    "host unreachable",
    "socket hang up",
    "i/o timeout",
    "read timeout",
    "write timeout",
    "deadline exceeded",
    "upstream connect error",
    "remote end closed",
    "server misbehaving",
    "transport is closing",
    "no route to host",
    "unexpected eof",
];

const CANCELED_HINTS: &[&str] = &["canceled", "cancelled"];

const BUDGET_EXHAUSTED_HINTS: &[&str] = &[
    "turn limit",
    "max turns",
    "token limit",
    "context length exceeded",
    "context window",
    "budget exceeded",
    "max budget",
    "out of budget",
    "max_budget_usd",
    "cost limit",
];

const STRUCTURAL_HINTS: &[&str] = &["scope violation", "out of scope", "structural"];

fn contains_any(haystack: &str, hints: &[&str]) -> bool {
    hints.iter().any(|h| haystack.contains(h))
}

/// Classify a failed/retry outcome. `meta_override` is an explicit
/// `failure_class`/`failure_reason` style string (e.g. read from
/// `outcome.context_updates["failure_class"]`) that, when present, is
/// normalized through the alias table and returned directly.
pub fn classify(outcome: &Outcome, meta_override: Option<&str>) -> FailureClass {
    if !matches!(outcome.status, StageStatus::Fail | StageStatus::Retry) {
        return FailureClass::Deterministic;
    }

    if let Some(raw) = meta_override {
        if let Some(normalized) = normalize_alias(raw) {
            return FailureClass::from_str(&normalized).unwrap_or(FailureClass::Deterministic);
        }
    }

    let reason = outcome
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    if contains_any(&reason, TRANSIENT_INFRA_HINTS) {
        return FailureClass::TransientInfra;
    }
    if contains_any(&reason, CANCELED_HINTS) {
        return FailureClass::Canceled;
    }
    if contains_any(&reason, BUDGET_EXHAUSTED_HINTS) {
        return FailureClass::BudgetExhausted;
    }
    if contains_any(&reason, STRUCTURAL_HINTS) {
        return FailureClass::Structural;
    }

    FailureClass::Deterministic
}

/// Normalizes a raw alias string (e.g. `"  TRANSIENT  "`) to the canonical
/// alias token consumed by `FailureClass::from_str`. Returns `None` for
/// `<nil>` and empty strings — those carry no classification.
pub fn normalize_alias(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("<nil>") {
        return None;
    }
    Some(trimmed.to_lowercase())
}

// ---------------------------------------------------------------------------
// Signature circuit breaker
// ---------------------------------------------------------------------------

/// Tracks a rolling set of `(node_id, failure_reason)` signatures across
/// loop restarts. Exceeding `limit` distinct signatures trips the breaker
/// permanently, preventing an infinite restart loop on a node that fails the
/// same way every time.
pub struct SignatureCircuitBreaker {
    limit: usize,
    seen: HashSet<(String, String)>,
    tripped: bool,
}

impl SignatureCircuitBreaker {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            seen: HashSet::new(),
            tripped: false,
        }
    }

    /// Record a failure signature for `node_id`; returns `true` if recording
    /// this signature tripped the breaker.
    pub fn record(&mut self, node_id: &str, failure_reason: &str) -> bool {
        if self.tripped {
            return true;
        }
        self.seen
            .insert((node_id.to_string(), failure_reason.to_string()));
        if self.seen.len() > self.limit {
            self.tripped = true;
        }
        self.tripped
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
