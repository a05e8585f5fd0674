use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Store API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Response for {0} carried no ETag")]
    MissingEtag(String),

    #[error("Atomic update on {path} gave up after {attempts} attempts")]
    TransactionRetriesExhausted { path: String, attempts: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
