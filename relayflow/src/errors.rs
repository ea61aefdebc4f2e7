//! Error types for the relayflow engine.

use crate::message::Message;
use thiserror::Error;

/// Rejections raised while assembling or starting a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The pipeline was started without any stage.
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// A stage asked for a pool of zero workers.
    #[error("stage `{stage}` declares zero workers")]
    ZeroWorkers {
        /// Name of the offending stage.
        stage: String,
    },

    /// Queues of size zero cannot hold a message.
    #[error("queue_size must be at least 1")]
    ZeroQueueSize,
}

/// Rejections raised when injecting a message.
///
/// Both variants hand the message back so the producer can retry the
/// injection or recover the payload.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// The intake queue is at capacity.
    #[error("intake queue is full")]
    QueueFull(Box<Message>),

    /// The engine no longer accepts messages.
    #[error("forwarder is shutting down")]
    ShutdownInProgress(Box<Message>),
}

impl ProduceError {
    /// Returns `true` for a capacity rejection, which is worth retrying.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::QueueFull(_))
    }

    /// Borrows the rejected message.
    #[must_use]
    pub fn message(&self) -> &Message {
        match self {
            Self::QueueFull(msg) | Self::ShutdownInProgress(msg) => msg,
        }
    }

    /// Recovers the rejected message.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::QueueFull(msg) | Self::ShutdownInProgress(msg) => *msg,
        }
    }
}
