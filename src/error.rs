use thiserror::Error;

use crate::hub::ConsumerId;

/// Why an event was not accepted onto the inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("event queue full")]
    QueueFull,
    #[error("aggregator is shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("unknown consumer {0}")]
    UnknownConsumer(ConsumerId),
    #[error("consumer {0} was disconnected")]
    Disconnected(ConsumerId),
}

/// Start-up and serve failures of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}

pub type AppResult<T> = Result<T, AppError>;
