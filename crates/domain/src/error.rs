//! Common error types used across the workspace.
//!
//! [`DeriveError`] mirrors the failure taxonomy of the derivation service.
//! None of its variants are process-fatal: each one tells the caller which
//! unit of work to drop (a message, a rule evaluation, a reload).

use std::error::Error as StdError;

/// Boxed error used to carry adapter-specific sources across port boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Top-level error for the derivation service.
#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    /// A bus message could not be parsed as a JSON envelope.
    #[error("malformed payload")]
    MalformedPayload(#[source] PayloadError),

    /// No device is known for the topic a message arrived on.
    #[error("no device registered for topic {topic:?}")]
    UnresolvedDevice { topic: String },

    /// A rule references a key that is missing or non-numeric in the cache.
    #[error("rule {rule:?} is missing numeric operand {key:?}")]
    MissingOperand { rule: String, key: String },

    /// The bus rejected a publish.
    #[error("publish failed")]
    PublishFailure(#[source] BoxError),

    /// A bus subscribe or unsubscribe call failed.
    #[error("subscription change failed")]
    Subscription(#[source] BoxError),

    /// The configuration store could not be reached or answered with an error.
    #[error("configuration store unavailable")]
    StoreUnavailable(#[source] BoxError),

    /// A rule or record violated a domain invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),
}

/// Why a raw bus payload was rejected by the normalizer.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The bytes are not valid JSON.
    #[error("payload is not valid JSON")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("label must not be empty")]
    EmptyLabel,

    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("operand key must not be empty")]
    EmptyKey,

    #[error("rate {name} must be a finite number")]
    NonFiniteRate { name: &'static str },

    #[error("load term for device {device} lists no keys")]
    EmptyLoadTerm { device: String },

    #[error("device {device} is bound to both {first:?} and {second:?}")]
    ConflictingTopic {
        device: String,
        first: String,
        second: String,
    },
}

/// Raised when a store call does not answer within its deadline.
#[derive(Debug, thiserror::Error)]
#[error("operation timed out after {millis}ms")]
pub struct TimeoutError {
    pub millis: u128,
}

impl DeriveError {
    /// Wrap any error as [`DeriveError::StoreUnavailable`].
    pub fn store<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::StoreUnavailable(Box::new(err))
    }

    /// Wrap any error as [`DeriveError::PublishFailure`].
    pub fn publish<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::PublishFailure(Box::new(err))
    }

    /// Wrap any error as [`DeriveError::Subscription`].
    pub fn subscription<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Subscription(Box::new(err))
    }
}

impl From<PayloadError> for DeriveError {
    fn from(err: PayloadError) -> Self {
        Self::MalformedPayload(err)
    }
}
