//! Sequential batch resolution against the portal.
//!
//! For each request the engine runs Reset → Configure → Submit → Await →
//! Recover. Any adapter failure ends that item as `AdapterUnavailable`; the
//! Recover reset always runs so the next item starts from the home page.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, instrument, warn, Instrument};

use crate::adapter::{HostAdapter, HostOperation};
use crate::errors::LookupError;
use crate::normalizer::IdentifierNormalizer;
use crate::poller::ResultPoller;
use crate::types::{
    BatchEvent, BatchResult, LookupOutcome, LookupRequest, ProgressReporter,
};

/// Search mode label the portal uses for SIM serial lookups.
pub const DEFAULT_SEARCH_MODE: &str = "ICCID";

/// Fixed pauses that let the portal's own rendering catch up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search_mode: String,
    /// After clicking home, both in Reset and Recover.
    #[serde(with = "crate::duration_parser")]
    pub navigation_settle: Duration,
    /// After each form mutation.
    #[serde(with = "crate::duration_parser")]
    pub input_settle: Duration,
    /// Between submit and the first probe.
    #[serde(with = "crate::duration_parser")]
    pub submit_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_mode: DEFAULT_SEARCH_MODE.to_string(),
            navigation_settle: Duration::from_millis(700),
            input_settle: Duration::from_millis(100),
            submit_settle: Duration::from_millis(300),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), LookupError> {
        if self.search_mode.trim().is_empty() {
            return Err(LookupError::InvalidConfig(
                "search mode must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running { current: usize, total: usize },
    Completed,
}

/// Per-item phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemPhase {
    Reset,
    Configure,
    Submit,
}

impl ItemPhase {
    fn name(self) -> &'static str {
        match self {
            ItemPhase::Reset => "reset",
            ItemPhase::Configure => "configure",
            ItemPhase::Submit => "submit",
        }
    }
}

struct PhaseFailure {
    phase: ItemPhase,
    operation: HostOperation,
    error: LookupError,
}

impl PhaseFailure {
    fn at(phase: ItemPhase, operation: HostOperation) -> impl FnOnce(LookupError) -> Self {
        move |error| Self {
            phase,
            operation,
            error,
        }
    }

    fn detail(&self) -> String {
        format!("{} ({}): {}", self.phase.name(), self.operation, self.error)
    }
}

pub struct BatchEngine {
    adapter: Arc<dyn HostAdapter>,
    normalizer: IdentifierNormalizer,
    poller: ResultPoller,
    config: EngineConfig,
    state: EngineState,
}

impl BatchEngine {
    pub fn new(
        adapter: Arc<dyn HostAdapter>,
        normalizer: IdentifierNormalizer,
        poller: ResultPoller,
        config: EngineConfig,
    ) -> Self {
        Self {
            adapter,
            normalizer,
            poller,
            config,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Normalize raw input lines and run the batch.
    ///
    /// Input with no usable lines fails with [`LookupError::EmptyInput`]
    /// before the portal is touched.
    pub async fn run_lines<I, S>(
        &mut self,
        lines: I,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requests = self.normalizer.normalize(lines)?;
        self.run(requests, reporter, cancel).await
    }

    /// Resolve `requests` one at a time, in order.
    ///
    /// Cancellation is honoured only between items: an item already in flight
    /// runs to its own deadline and recovery before the engine stops.
    #[instrument(skip_all, fields(total = requests.len()))]
    pub async fn run(
        &mut self,
        requests: Vec<LookupRequest>,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, LookupError> {
        let total = requests.len();
        if total == 0 {
            return Err(LookupError::EmptyInput);
        }

        info!(total, prefix = %self.normalizer.prefix(), "Starting lookup batch");
        reporter.report(BatchEvent::Started { total });

        let mut outcomes = Vec::with_capacity(total);
        for (i, request) in requests.iter().enumerate() {
            let index = i + 1;
            if cancel.is_cancelled() {
                warn!(completed = i, total, "Batch abandoned between items");
                reporter.report(BatchEvent::Abandoned {
                    completed: i,
                    total,
                });
                self.state = EngineState::Idle;
                return Err(LookupError::Cancelled {
                    completed: i,
                    total,
                });
            }

            self.state = EngineState::Running {
                current: index,
                total,
            };
            reporter.report(BatchEvent::ItemStarted {
                index,
                total,
                partial_id: request.partial_id().to_string(),
            });

            let span = info_span!("lookup_item", index, partial_id = %request.partial_id());
            let outcome = self.resolve_one(request).instrument(span).await;

            reporter.report(BatchEvent::ItemCompleted {
                index,
                total,
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);
        }

        let result = BatchResult::new(outcomes);
        let summary = result.summary();
        info!(
            total = summary.total,
            found = summary.found,
            not_found = summary.not_found,
            timed_out = summary.timed_out,
            adapter_unavailable = summary.adapter_unavailable,
            "Lookup batch completed"
        );
        reporter.report(BatchEvent::Completed { summary });
        self.state = EngineState::Completed;
        Ok(result)
    }

    async fn resolve_one(&self, request: &LookupRequest) -> LookupOutcome {
        let outcome = match self.drive_search(request).await {
            Ok(()) => {
                let poll = self.poller.poll(self.adapter.as_ref()).await;
                LookupOutcome::from_poll(request.partial_id(), poll)
            }
            Err(failure) => {
                if failure.error.is_adapter_failure() {
                    warn!(detail = %failure.detail(), "Host adapter failed; item marked unavailable");
                } else {
                    warn!(detail = %failure.detail(), "Unexpected failure; item marked unavailable");
                }
                LookupOutcome::adapter_unavailable(request.partial_id(), failure.detail())
            }
        };
        info!(status = %outcome.status(), value = ?outcome.resolved_value(), "Item resolved");

        self.recover().await;
        outcome
    }

    /// Reset, configure, and submit. Stops at the first failing operation.
    async fn drive_search(&self, request: &LookupRequest) -> Result<(), PhaseFailure> {
        let fail = PhaseFailure::at;

        self.adapter
            .reset_to_home()
            .await
            .map_err(fail(ItemPhase::Reset, HostOperation::ResetToHome))?;
        tokio::time::sleep(self.config.navigation_settle).await;

        self.adapter
            .select_search_mode(&self.config.search_mode)
            .await
            .map_err(fail(ItemPhase::Configure, HostOperation::SelectSearchMode))?;
        tokio::time::sleep(self.config.input_settle).await;

        self.adapter
            .set_search_value(request.full_id())
            .await
            .map_err(fail(ItemPhase::Configure, HostOperation::SetSearchValue))?;
        tokio::time::sleep(self.config.input_settle).await;

        self.adapter
            .submit_search()
            .await
            .map_err(fail(ItemPhase::Submit, HostOperation::SubmitSearch))?;
        tokio::time::sleep(self.config.submit_settle).await;

        Ok(())
    }

    /// Leave the portal on its home page. Failure here never changes the outcome.
    async fn recover(&self) {
        match self.adapter.reset_to_home().await {
            Ok(()) => tokio::time::sleep(self.config.navigation_settle).await,
            Err(e) => warn!(error = %e, "Recovery reset failed"),
        }
    }
}
