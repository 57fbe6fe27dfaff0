//! Error types for broker and quote operations

/// Failures talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Network failure, timeout or 5xx; worth another attempt later
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// Response was missing fields we rely on
    #[error("unexpected response shape: {0}")]
    DataShape(String),

    /// The broker refused the request
    #[error("rejected by broker: {0}")]
    Rejected(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl BrokerError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Transient(_) => true,
            BrokerError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BrokerError::DataShape(e.to_string())
        } else {
            BrokerError::Transient(e.to_string())
        }
    }
}

/// Quote gateway failure after all attempts were spent
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("quote fetch failed after {attempts} attempts: {last}")]
    FetchFailed { attempts: u32, last: BrokerError },
}

/// An order that never reached the broker
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("entry price unavailable: {0}")]
    EntryPrice(#[from] QuoteError),

    #[error("order placement failed: {0}")]
    Placement(BrokerError),
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
