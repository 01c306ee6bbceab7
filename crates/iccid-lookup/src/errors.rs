use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("No identifiers to look up: input is empty after trimming blank lines")]
    EmptyInput,

    #[error("Control not found: {0}")]
    ControlNotFound(String),

    #[error("Option not found: {0}")]
    OptionNotFound(String),

    #[error("Extension bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Page script error: {0}")]
    Script(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Batch cancelled after {completed} of {total} items")]
    Cancelled { completed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LookupError {
    /// True for failures caused by the host page's structure or the bridge to it.
    ///
    /// The engine turns these into an `AdapterUnavailable` outcome for the
    /// current item instead of propagating them.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            LookupError::ControlNotFound(_)
                | LookupError::OptionNotFound(_)
                | LookupError::BridgeUnavailable(_)
                | LookupError::Script(_)
        )
    }
}
