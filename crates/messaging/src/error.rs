use thiserror::Error;

/// Errors raised while publishing or subscribing.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Nobody consumes the topic, so the message would be lost.
    #[error("No subscriber for topic '{0}'")]
    NoSubscriber(String),

    /// The consumer of the topic has gone away.
    #[error("Topic '{0}' is closed")]
    Closed(String),

    /// A topic may only have one consumer.
    #[error("Topic '{0}' already has a subscriber")]
    AlreadySubscribed(String),

    /// The producer was told to fail this send (test producer only).
    #[error("Injected failure publishing to '{0}'")]
    Injected(String),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
