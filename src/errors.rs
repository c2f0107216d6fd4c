// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Messaging Client
//!
//! This module provides the error type shared by every layer of the client: the broker
//! transport, topology declaration, delivery and the self-healing machinery. Each variant
//! carries the detail text reported by the underlying failure so that heal actions can
//! match on it.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// The variants mirror the broker operations the client performs: connection and channel
/// setup, exchange and queue declarations, bindings, publishing and consuming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error: {0}")]
    InternalError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// The connection was lost after having been established
    #[error("broker connection lost: {0}")]
    DisconnectedError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`: {1}")]
    BindingConsumerError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error serializing or parsing a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message: {0}")]
    NackMessageError(String),

    /// A message handler reported a failure
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// A heal action failed while trying to repair another error
    #[error("heal action failure: {0}")]
    HealingError(String),
}

/// Coarse classification of [`AmqpError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker unreachable or connection dropped
    Connectivity,
    /// Exchange, queue or binding declaration rejected
    Topology,
    /// Payload could not be serialized or parsed
    Serialization,
    /// A heal action failed
    Healing,
    /// Publishing, consuming, acknowledging or handling a message failed
    Delivery,
    Internal,
}

impl AmqpError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::ConnectionError(_)
            | AmqpError::DisconnectedError(_)
            | AmqpError::ChannelError(_) => ErrorKind::Connectivity,
            AmqpError::DeclareExchangeError(..)
            | AmqpError::DeclareQueueError(..)
            | AmqpError::BindingExchangeToQueueError(..) => ErrorKind::Topology,
            AmqpError::ParsePayloadError(_) => ErrorKind::Serialization,
            AmqpError::HealingError(_) => ErrorKind::Healing,
            AmqpError::BindingConsumerError(..)
            | AmqpError::PublishingError(_)
            | AmqpError::AckMessageError(_)
            | AmqpError::NackMessageError(_)
            | AmqpError::HandlerError(_) => ErrorKind::Delivery,
            AmqpError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for AmqpError {
    fn from(err: serde_json::Error) -> Self {
        AmqpError::ParsePayloadError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            AmqpError::ConnectionError("refused".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            AmqpError::DeclareQueueError("q".into(), "denied".into()).kind(),
            ErrorKind::Topology
        );
        assert_eq!(
            AmqpError::HealingError("boom".into()).kind(),
            ErrorKind::Healing
        );
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err: AmqpError = err.into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(err.to_string().starts_with("failure to parse payload"));
    }
}
