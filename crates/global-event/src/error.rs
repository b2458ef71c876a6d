use thiserror::Error;

/// Errors raised while encoding, decoding or merging event payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes were not a valid envelope.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A payload that must be a JSON object was something else.
    #[error("Payload from '{source_key}' is not a JSON object (found {found})")]
    NotAnObject {
        source_key: String,
        found: &'static str,
    },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
