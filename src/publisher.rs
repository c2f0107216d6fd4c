// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Serializes a JSON message, propagates the current OpenTelemetry context through its
//! headers and hands it to the channel as a persistent message.

use crate::{
    channel::{AmqpChannel, Headers},
    errors::AmqpError,
    otel,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Publishes `message` to `exchange` with `routing_key`.
///
/// Returns once the channel accepted the message; broker confirmation is not awaited.
pub(crate) async fn publish_json(
    channel: &Arc<dyn AmqpChannel>,
    exchange: &str,
    routing_key: &str,
    message: &Value,
    headers: &Headers,
) -> Result<(), AmqpError> {
    let payload = serde_json::to_vec(message)?;

    let mut headers = headers.clone();
    otel::inject_context(&mut headers);

    channel
        .basic_publish(exchange, routing_key, &payload, &headers)
        .await?;

    debug!(exchange, routing_key, "message published");
    Ok(())
}
