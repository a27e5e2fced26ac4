use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No local keypair for required signer {pubkey}")]
    MissingSigner { pubkey: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayerError {
    /// Transient failures that the submission loop absorbs and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Protocol(_))
    }
}

impl From<reqwest::Error> for RelayerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<bincode::Error> for RelayerError {
    fn from(e: bincode::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
