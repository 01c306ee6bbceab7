//! Batch ICCID → MSISDN resolution through a web portal's search form
//!
//! Given partial ICCIDs, the engine drives the portal one lookup at a time:
//! it resets the page, fills in and submits the search form, then polls the
//! rendered result until it finds a number, sees an explicit "not found", or
//! gives up. Outcomes come back in input order so they can be pasted next to
//! the original list in a spreadsheet.
//!
//! The portal is reached through [`HostAdapter`]; [`BrowserHostAdapter`]
//! implements it over a WebSocket bridge to a browser extension.

pub mod adapter;
pub mod browser;
pub mod config;
pub mod duration_parser;
pub mod engine;
pub mod errors;
pub mod export;
pub mod extension_bridge;
pub mod normalizer;
pub mod poller;
pub mod types;

pub use adapter::{HostAdapter, HostOperation};
pub use browser::{BrowserHostAdapter, HostSelectors};
pub use config::{BridgeConfig, LookupConfig};
pub use engine::{BatchEngine, EngineConfig, EngineState};
pub use errors::LookupError;
pub use extension_bridge::ExtensionBridge;
pub use normalizer::{IdentifierNormalizer, DEFAULT_ICCID_PREFIX};
pub use poller::{PollOutcome, PollerConfig, ResultPoller};
pub use types::{
    BatchEvent, BatchResult, BatchSummary, LookupOutcome, LookupRequest, LookupStatus,
    NoopReporter, ProgressReporter,
};

use std::sync::Arc;

/// Wire the browser adapter and engine from a loaded configuration.
pub fn browser_engine(
    config: &LookupConfig,
    bridge: Arc<ExtensionBridge>,
) -> Result<BatchEngine, LookupError> {
    let adapter = BrowserHostAdapter::new(
        bridge,
        config.selectors.clone(),
        config.bridge.eval_timeout,
    );
    let normalizer = IdentifierNormalizer::new(config.prefix.clone())?;
    let poller = ResultPoller::new(&config.poller)?;
    Ok(BatchEngine::new(
        Arc::new(adapter),
        normalizer,
        poller,
        config.engine.clone(),
    ))
}
