/// Shared error type used across all weft crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("preview generation failed: {0}")]
    PreviewGenerationFailed(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a `NotFound` with the record kind spelled out.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
