//! The seam between the batch engine and the portal's interactive surface.

use std::fmt;

use crate::errors::LookupError;

/// Names each host operation, for logs and outcome details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOperation {
    ResetToHome,
    SelectSearchMode,
    SetSearchValue,
    SubmitSearch,
}

impl fmt::Display for HostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostOperation::ResetToHome => "reset_to_home",
            HostOperation::SelectSearchMode => "select_search_mode",
            HostOperation::SetSearchValue => "set_search_value",
            HostOperation::SubmitSearch => "submit_search",
        };
        f.write_str(name)
    }
}

/// Every point of contact with the portal's page.
///
/// The page structure is not under our control, so each mutating operation can
/// fail independently. Probes never fail: an absent region reads as empty text.
/// Implementations are driven by one batch at a time and must not be shared
/// between concurrently running batches.
#[async_trait::async_trait]
pub trait HostAdapter: Send + Sync {
    /// Trigger the portal's return-to-start navigation.
    async fn reset_to_home(&self) -> Result<(), LookupError>;

    /// Pick the search mode whose option label contains `mode`, ignoring case.
    async fn select_search_mode(&self, mode: &str) -> Result<(), LookupError>;

    async fn set_search_value(&self, value: &str) -> Result<(), LookupError>;

    async fn submit_search(&self) -> Result<(), LookupError>;

    /// Current text of the result display region, empty when absent.
    async fn read_result_probe(&self) -> String;

    /// Current text of the portal's error region, empty when absent or not configured.
    async fn read_error_probe(&self) -> String {
        String::new()
    }
}
