// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! Subscribers receive an [`Envelope`]: the raw body of the delivery plus its parsed JSON
//! form when the body is valid JSON.

use crate::{channel::Headers, errors::AmqpError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub headers: Headers,
    pub raw: Vec<u8>,
    pub parsed: Option<Value>,
}

impl Envelope {
    /// Builds an envelope, parsing `raw` as JSON when possible.
    pub fn new(exchange: &str, routing_key: &str, headers: Headers, raw: Vec<u8>) -> Self {
        let parsed = serde_json::from_slice(&raw).ok();
        Envelope {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            headers,
            raw,
            parsed,
        }
    }

    /// Lossy UTF-8 view of the body.
    pub fn body(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Deserializes the body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        Ok(serde_json::from_slice(&self.raw)?)
    }
}

/// Processes messages delivered to a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<(), AmqpError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AmqpError>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> Result<(), AmqpError> {
        self(envelope).await
    }
}
