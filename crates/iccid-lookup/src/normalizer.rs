use crate::errors::LookupError;
use crate::types::LookupRequest;

/// Leading digits shared by every ICCID the portal issues.
pub const DEFAULT_ICCID_PREFIX: &str = "8925263790000";

/// Turns raw user lines into full identifiers by prepending a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierNormalizer {
    prefix: String,
}

impl Default for IdentifierNormalizer {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_ICCID_PREFIX.to_string(),
        }
    }
}

impl IdentifierNormalizer {
    pub fn new(prefix: impl Into<String>) -> Result<Self, LookupError> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(LookupError::InvalidConfig(
                "identifier prefix must not be empty".to_string(),
            ));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Trims each line, drops blanks, and builds one request per remaining line in order.
    pub fn normalize<I, S>(&self, lines: I) -> Result<Vec<LookupRequest>, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requests: Vec<LookupRequest> = lines
            .into_iter()
            .filter_map(|line| {
                let partial = line.as_ref().trim();
                if partial.is_empty() {
                    None
                } else {
                    Some(LookupRequest::new(
                        partial.to_string(),
                        format!("{}{}", self.prefix, partial),
                    ))
                }
            })
            .collect();

        if requests.is_empty() {
            return Err(LookupError::EmptyInput);
        }
        Ok(requests)
    }

    pub fn normalize_text(&self, text: &str) -> Result<Vec<LookupRequest>, LookupError> {
        self.normalize(text.lines())
    }
}
