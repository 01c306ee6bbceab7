use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::poller::PollOutcome;

/// One partial identifier paired with the full identifier submitted to the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    partial_id: String,
    full_id: String,
}

impl LookupRequest {
    pub(crate) fn new(partial_id: String, full_id: String) -> Self {
        Self {
            partial_id,
            full_id,
        }
    }

    pub fn partial_id(&self) -> &str {
        &self.partial_id
    }

    pub fn full_id(&self) -> &str {
        &self.full_id
    }
}

/// Terminal status of a single lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    NotFound,
    TimedOut,
    AdapterUnavailable,
}

impl LookupStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LookupStatus::Found => "Found",
            LookupStatus::NotFound => "Not Found",
            LookupStatus::TimedOut => "Timed Out",
            LookupStatus::AdapterUnavailable => "Adapter Unavailable",
        }
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of resolving one request.
///
/// `resolved_value` is present exactly when `status` is [`LookupStatus::Found`];
/// the constructors are the only way to build one, so the pairing always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupOutcome {
    partial_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved_value: Option<String>,
    status: LookupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl LookupOutcome {
    pub fn found(partial_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            partial_id: partial_id.into(),
            resolved_value: Some(value.into()),
            status: LookupStatus::Found,
            detail: None,
        }
    }

    pub fn not_found(partial_id: impl Into<String>) -> Self {
        Self::unresolved(partial_id, LookupStatus::NotFound, None)
    }

    pub fn timed_out(partial_id: impl Into<String>) -> Self {
        Self::unresolved(partial_id, LookupStatus::TimedOut, None)
    }

    pub fn adapter_unavailable(partial_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::unresolved(
            partial_id,
            LookupStatus::AdapterUnavailable,
            Some(detail.into()),
        )
    }

    pub fn from_poll(partial_id: impl Into<String>, poll: PollOutcome) -> Self {
        match poll {
            PollOutcome::Found(value) => Self::found(partial_id, value),
            PollOutcome::NotFound => Self::not_found(partial_id),
            PollOutcome::TimedOut => Self::timed_out(partial_id),
        }
    }

    fn unresolved(
        partial_id: impl Into<String>,
        status: LookupStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            partial_id: partial_id.into(),
            resolved_value: None,
            status,
            detail,
        }
    }

    pub fn partial_id(&self) -> &str {
        &self.partial_id
    }

    pub fn resolved_value(&self) -> Option<&str> {
        self.resolved_value.as_deref()
    }

    pub fn status(&self) -> LookupStatus {
        self.status
    }

    /// Failure context for `AdapterUnavailable` outcomes, e.g. which phase broke.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_found(&self) -> bool {
        self.status == LookupStatus::Found
    }
}

/// Per-status counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub timed_out: usize,
    pub adapter_unavailable: usize,
}

/// Ordered outcomes of one batch, positionally aligned with the input lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchResult {
    outcomes: Vec<LookupOutcome>,
}

impl BatchResult {
    pub(crate) fn new(outcomes: Vec<LookupOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[LookupOutcome] {
        &self.outcomes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LookupOutcome> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.outcomes.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.status() {
                LookupStatus::Found => summary.found += 1,
                LookupStatus::NotFound => summary.not_found += 1,
                LookupStatus::TimedOut => summary.timed_out += 1,
                LookupStatus::AdapterUnavailable => summary.adapter_unavailable += 1,
            }
        }
        summary
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a LookupOutcome;
    type IntoIter = std::slice::Iter<'a, LookupOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

/// Progress events emitted by the engine while a batch runs.
///
/// Item indices are 1-based, matching the "Item i of n" wording users see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        total: usize,
    },
    ItemStarted {
        index: usize,
        total: usize,
        partial_id: String,
    },
    ItemCompleted {
        index: usize,
        total: usize,
        outcome: LookupOutcome,
    },
    Completed {
        summary: BatchSummary,
    },
    Abandoned {
        completed: usize,
        total: usize,
    },
}

impl BatchEvent {
    /// Percentage of items finished when this event was emitted.
    pub fn percent(&self) -> u8 {
        let (done, total) = match self {
            BatchEvent::Started { total } => (0, *total),
            BatchEvent::ItemStarted { index, total, .. } => (index.saturating_sub(1), *total),
            BatchEvent::ItemCompleted { index, total, .. } => (*index, *total),
            BatchEvent::Completed { .. } => return 100,
            BatchEvent::Abandoned { completed, total } => (*completed, *total),
        };
        if total == 0 {
            return 100;
        }
        ((done * 100 + total / 2) / total).min(100) as u8
    }
}

/// Port through which the presentation layer observes a running batch.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: BatchEvent);
}

/// Reporter that drops every event, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: BatchEvent) {}
}

impl ProgressReporter for mpsc::UnboundedSender<BatchEvent> {
    fn report(&self, event: BatchEvent) {
        // A closed receiver means nobody is watching anymore; the batch keeps going.
        let _ = self.send(event);
    }
}
