//! Error types for the Kafka client library

use std::fmt;

/// Main error type for Kafka client operations
#[derive(Debug, thiserror::Error)]
pub enum KafkaClientError {
    /// Error reported by the broker or the broker client, with its code
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Producer-specific errors
    #[error("Producer error: {message}")]
    Producer { message: String },

    /// Consumer-specific errors
    #[error("Consumer error: {message}")]
    Consumer { message: String },

    /// The producer send buffer rejected the record
    #[error("Producer queue is full ({capacity} records)")]
    QueueFull { capacity: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Broker client backend could not be created
    #[error("Failed to create {role}: {message}")]
    Creation { role: &'static str, message: String },
}

impl KafkaClientError {
    /// Create a new broker error from a code and a reason
    pub fn broker<S: Into<String>>(code: ErrorCode, reason: S) -> Self {
        Self::Broker(BrokerError::new(code, reason))
    }

    /// Create a new producer error
    pub fn producer<S: Into<String>>(message: S) -> Self {
        Self::Producer {
            message: message.into(),
        }
    }

    /// Create a new consumer error
    pub fn consumer<S: Into<String>>(message: S) -> Self {
        Self::Consumer {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new creation error for the given client role
    pub fn creation<S: Into<String>>(role: &'static str, message: S) -> Self {
        Self::Creation {
            role,
            message: message.into(),
        }
    }

    /// Broker error code carried by this error, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Broker(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Error attached to a single message, partition or topic result.
///
/// Unlike [`KafkaClientError`] this is cheap to clone, so it can ride along
/// with a [`Message`](crate::Message) or a [`PartitionResult`](crate::PartitionResult).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {reason}")]
pub struct BrokerError {
    pub code: ErrorCode,
    pub reason: String,
}

impl BrokerError {
    pub fn new<S: Into<String>>(code: ErrorCode, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Kafka protocol and client-local error codes used by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error
    None,
    /// Unknown server error
    Unknown,
    /// Offset out of range
    OffsetOutOfRange,
    /// Unknown topic or partition
    UnknownTopicOrPartition,
    /// Leader not available
    LeaderNotAvailable,
    /// Request timed out
    RequestTimedOut,
    /// Coordinator not available
    CoordinatorNotAvailable,
    /// Commit rejected because the group rebalanced
    RebalanceInProgress,
    /// Topic already exists
    TopicAlreadyExists,
    /// Invalid number of partitions
    InvalidPartitions,
    /// Invalid replication factor
    InvalidReplicationFactor,
    /// Client-local: operation not valid in the current state
    State,
    /// Client-local: producer queue is full
    QueueFull,
    /// Client-local: unrecoverable client error
    Fatal,
    /// Client-local: transport failure
    Transport,
}

impl ErrorCode {
    /// Kafka wire code for protocol errors, negative values for client-local ones
    pub fn as_i16(self) -> i16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Unknown => -1,
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::UnknownTopicOrPartition => 3,
            ErrorCode::LeaderNotAvailable => 5,
            ErrorCode::RequestTimedOut => 7,
            ErrorCode::CoordinatorNotAvailable => 15,
            ErrorCode::RebalanceInProgress => 27,
            ErrorCode::TopicAlreadyExists => 36,
            ErrorCode::InvalidPartitions => 37,
            ErrorCode::InvalidReplicationFactor => 38,
            ErrorCode::State => -172,
            ErrorCode::QueueFull => -184,
            ErrorCode::Fatal => -150,
            ErrorCode::Transport => -195,
        }
    }
}

impl From<i16> for ErrorCode {
    fn from(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::OffsetOutOfRange,
            3 => ErrorCode::UnknownTopicOrPartition,
            5 => ErrorCode::LeaderNotAvailable,
            7 => ErrorCode::RequestTimedOut,
            15 => ErrorCode::CoordinatorNotAvailable,
            27 => ErrorCode::RebalanceInProgress,
            36 => ErrorCode::TopicAlreadyExists,
            37 => ErrorCode::InvalidPartitions,
            38 => ErrorCode::InvalidReplicationFactor,
            -172 => ErrorCode::State,
            -184 => ErrorCode::QueueFull,
            -150 => ErrorCode::Fatal,
            -195 => ErrorCode::Transport,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_i16())
    }
}
