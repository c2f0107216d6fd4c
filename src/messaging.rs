// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::{
    channel::Headers, client::MessagingClient, handler::MessageHandler, interceptor::Outcome,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Publish/subscribe surface of a resilient messaging client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messaging: Send + Sync {
    async fn connect(&self, uri: &str) -> Outcome<()>;

    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Value,
        headers: Headers,
    ) -> Outcome<()>;

    async fn subscribe_to_event(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()>;

    async fn publish_to_fanout(&self, exchange: &str, message: &Value) -> Outcome<()>;

    async fn subscribe_to_fanout(
        &self,
        exchange: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()>;

    async fn publish_to_outbox(&self, event: &Value);

    async fn handle_dead_letter(
        &self,
        dlq_exchange: &str,
        dlq_queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()>;

    async fn close(&self) -> Outcome<()>;
}

#[async_trait]
impl Messaging for MessagingClient {
    async fn connect(&self, uri: &str) -> Outcome<()> {
        MessagingClient::connect(self, uri).await
    }

    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Value,
        headers: Headers,
    ) -> Outcome<()> {
        MessagingClient::publish_event(self, exchange, routing_key, message, headers).await
    }

    async fn subscribe_to_event(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        MessagingClient::subscribe_to_event(self, exchange, queue, routing_key, handler).await
    }

    async fn publish_to_fanout(&self, exchange: &str, message: &Value) -> Outcome<()> {
        MessagingClient::publish_to_fanout(self, exchange, message).await
    }

    async fn subscribe_to_fanout(
        &self,
        exchange: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        MessagingClient::subscribe_to_fanout(self, exchange, handler).await
    }

    async fn publish_to_outbox(&self, event: &Value) {
        MessagingClient::publish_to_outbox(self, event).await
    }

    async fn handle_dead_letter(
        &self,
        dlq_exchange: &str,
        dlq_queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        MessagingClient::handle_dead_letter(self, dlq_exchange, dlq_queue, handler).await
    }

    async fn close(&self) -> Outcome<()> {
        MessagingClient::close(self).await
    }
}
