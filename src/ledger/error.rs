use thiserror::Error;

/// Failures reported by the ledger node or its client library
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No endpoint available: {0}")]
    NoEndpointAvailable(String),

    /// Business rejection from the node API, e.g. `Incompatible_Amount`
    #[error("Ledger API error: {message} ({data})")]
    Api { message: String, data: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Memo cipher error: {0}")]
    Memo(String),
}

/// Failures reported by the identity service (host framework)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Endpoint missing on the remote side (HTTP 404)
    #[error("Identity endpoint not found: {0}")]
    NotFound(String),

    #[error("Identity request failed: {0}")]
    Request(String),
}

/// Failures reported by the wallet unlocker
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet could not be unlocked: {0}")]
    Locked(String),
}
