// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messaging Client
//!
//! Facade over the connection manager, the subscription registry and the message buffer.
//! Every public operation resolves to an [`Outcome`]: the operation result, or the
//! [`FallbackResult`](crate::healing::FallbackResult) produced by the healing toolkit when
//! neither retrying nor healing helped.
//!
//! `publish_event` runs inside `Healer(Retry(..))`; the other operations run inside the
//! healer only. A publish that ends in a fallback is kept in the message buffer and replayed
//! after the next successful (re)connection, right after the subscriptions were restored.

use crate::{
    buffer::{BufferedMessage, MessageBuffer},
    channel::{AmqpTransport, DeliveryStream, Headers, LapinTransport},
    configs::{MessagingConfigs, ResilienceConfigs},
    connection::{ConnectionListener, ConnectionManager},
    consumer::{self, DiagnosticSink},
    errors::AmqpError,
    handler::MessageHandler,
    healing::HealingToolkit,
    interceptor::{Healer, Outcome, RetryCallback, RetryPolicy},
    otel::CONSUMER_TRACER,
    payload::{DiagnosticPayloadBuilder, OriginAgentPayload, DIAGNOSTIC_EXCHANGE},
    publisher,
    queue::{QueueBinding, QueueDefinition},
    registry::{
        DeadLetterSubscription, FanoutSubscription, Subscription, SubscriptionRegistry,
        TopicSubscription,
    },
    topology,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::global;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

pub struct MessagingClientBuilder {
    transport: Arc<dyn AmqpTransport>,
    toolkit: Option<Arc<HealingToolkit>>,
    resilience: ResilienceConfigs,
    payloads: Arc<dyn DiagnosticPayloadBuilder>,
    retry_callback: Option<RetryCallback>,
}

impl MessagingClientBuilder {
    /// Replaces the toolkit built from the resilience settings.
    pub fn toolkit(mut self, toolkit: Arc<HealingToolkit>) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn resilience(mut self, resilience: &ResilienceConfigs) -> Self {
        self.resilience = resilience.clone();
        self
    }

    /// Replaces the builder of the diagnostic events sent on consumer failures.
    pub fn payload_builder(mut self, payloads: Arc<dyn DiagnosticPayloadBuilder>) -> Self {
        self.payloads = payloads;
        self
    }

    /// Invoked with the error and the 1-based attempt number of every failed publish attempt.
    pub fn on_publish_error(mut self, callback: RetryCallback) -> Self {
        self.retry_callback = Some(callback);
        self
    }

    pub fn build(self) -> MessagingClient {
        let toolkit = match self.toolkit {
            Some(toolkit) => toolkit,
            None => Arc::new(script_toolkit(&self.resilience)),
        };

        let manager = ConnectionManager::new(
            self.transport,
            toolkit.clone(),
            self.resilience.reconnect_delay(),
        );

        let mut retry = RetryPolicy::new(
            self.resilience.retry_attempts,
            self.resilience.retry_delay(),
        );
        if let Some(callback) = self.retry_callback {
            retry = retry.on_error(callback);
        }

        let inner = Arc::new_cyclic(|me| ClientInner {
            me: me.clone(),
            manager,
            registry: SubscriptionRegistry::new(),
            buffer: MessageBuffer::new(self.resilience.buffer_capacity),
            toolkit: toolkit.clone(),
            retry,
            healer: Healer::new(toolkit),
            payloads: self.payloads,
        });

        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        let listener: Weak<dyn ConnectionListener> = weak;
        inner.manager.set_listener(listener);

        MessagingClient { inner }
    }
}

/// Resilient publish/subscribe client.
///
/// Cheap to clone; clones share the connection, the registry and the buffer.
#[derive(Clone)]
pub struct MessagingClient {
    inner: Arc<ClientInner>,
}

impl MessagingClient {
    /// Starts a builder with default resilience settings.
    ///
    /// Unless a toolkit is supplied, the client heals connectivity failures with the recovery
    /// script named by `ResilienceConfigs::heal_script`.
    pub fn builder(transport: Arc<dyn AmqpTransport>) -> MessagingClientBuilder {
        MessagingClientBuilder {
            transport,
            toolkit: None,
            resilience: ResilienceConfigs::default(),
            payloads: Arc::new(OriginAgentPayload),
            retry_callback: None,
        }
    }

    /// Client over lapin with the heal script configured in `cfg`.
    pub fn from_configs(cfg: &MessagingConfigs) -> MessagingClient {
        MessagingClient::builder(LapinTransport::new(&cfg.rabbitmq.app_name))
            .resilience(&cfg.resilience)
            .build()
    }

    pub async fn connect(&self, uri: &str) -> Outcome<()> {
        let manager = &self.inner.manager;
        self.inner
            .healer
            .run(move || async move { manager.connect(uri).await })
            .await
    }

    /// Publishes `message` as JSON to the topic `exchange`.
    ///
    /// On a fallback the message is buffered and replayed after the next reconnection.
    pub async fn publish_event<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
        headers: Headers,
    ) -> Outcome<()>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(message) {
            Ok(message) => {
                self.inner
                    .publish_event(exchange, routing_key, message, headers)
                    .await
            }
            Err(err) => self.inner.serialization_fallback(err),
        }
    }

    /// Binds the durable `queue` to `exchange` with `routing_key` and starts consuming it.
    ///
    /// The subscription is restored after every reconnection.
    pub async fn subscribe_to_event(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        self.inner
            .subscribe(Subscription::Topic(TopicSubscription {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                routing_key: routing_key.to_owned(),
                handler,
            }))
            .await
    }

    pub async fn publish_to_fanout<T>(&self, exchange: &str, message: &T) -> Outcome<()>
    where
        T: Serialize + ?Sized,
    {
        let message = match serde_json::to_value(message) {
            Ok(message) => message,
            Err(err) => return self.inner.serialization_fallback(err),
        };

        let inner = &self.inner;
        let message = &message;
        inner
            .healer
            .run(move || async move { inner.try_publish_to_fanout(exchange, message).await })
            .await
    }

    /// Consumes `exchange` through a broker-named exclusive queue.
    pub async fn subscribe_to_fanout(
        &self,
        exchange: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        self.inner
            .subscribe(Subscription::Fanout(FanoutSubscription {
                exchange: exchange.to_owned(),
                handler,
            }))
            .await
    }

    /// Consumes the dead letters routed to `dlq_exchange` through the durable `dlq_queue`.
    pub async fn handle_dead_letter(
        &self,
        dlq_exchange: &str,
        dlq_queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Outcome<()> {
        self.inner
            .subscribe(Subscription::DeadLetter(DeadLetterSubscription {
                dlq_exchange: dlq_exchange.to_owned(),
                dlq_queue: dlq_queue.to_owned(),
                handler,
            }))
            .await
    }

    pub async fn publish_to_outbox<T>(&self, event: &T)
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_string(event) {
            Ok(event) => info!(target: "outbox", event, "[OUTBOX]"),
            Err(err) => warn!(target: "outbox", error = %err, "unserializable outbox event"),
        }
    }

    /// Closes channel and connection. Disconnect notifications are ignored afterwards.
    pub async fn close(&self) -> Outcome<()> {
        let manager = &self.inner.manager;
        self.inner
            .healer
            .run(move || async move { manager.close().await })
            .await
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.manager.is_connected().await
    }

    /// Publishes waiting for replay, oldest first.
    pub async fn buffered_messages(&self) -> Vec<BufferedMessage> {
        self.inner.buffer.snapshot().await
    }

    pub async fn subscriptions(&self) -> usize {
        self.inner.registry.len().await
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.manager
    }
}

struct ClientInner {
    me: Weak<ClientInner>,
    manager: Arc<ConnectionManager>,
    registry: SubscriptionRegistry,
    buffer: MessageBuffer,
    toolkit: Arc<HealingToolkit>,
    retry: RetryPolicy,
    healer: Healer,
    payloads: Arc<dyn DiagnosticPayloadBuilder>,
}

impl ClientInner {
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Value,
        headers: Headers,
    ) -> Outcome<()> {
        let (message_ref, headers_ref) = (&message, &headers);
        let outcome = self
            .healer
            .run(move || {
                self.retry.run(move || {
                    self.try_publish_event(exchange, routing_key, message_ref, headers_ref)
                })
            })
            .await;

        if let Outcome::Fallback(_) = &outcome {
            self.buffer
                .push(BufferedMessage {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    message,
                    headers,
                })
                .await;
        }

        outcome
    }

    async fn try_publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Value,
        headers: &Headers,
    ) -> Result<(), AmqpError> {
        let result = async {
            let channel = self.manager.ensure_channel().await?;
            topology::topic_exchange(exchange, routing_key)
                .install(&channel)
                .await?;
            publisher::publish_json(&channel, exchange, routing_key, message, headers).await
        }
        .await;

        if let Err(err) = &result {
            warn!(error = %err, exchange, routing_key, "publish failed, dropping connection");
            self.manager.invalidate().await;
        }

        result
    }

    async fn try_publish_to_fanout(&self, exchange: &str, message: &Value) -> Result<(), AmqpError> {
        let channel = self.manager.ensure_channel().await?;
        topology::fanout_exchange(exchange).install(&channel).await?;
        publisher::publish_json(&channel, exchange, "", message, &Headers::new()).await
    }

    async fn subscribe(&self, subscription: Subscription) -> Outcome<()> {
        let pending = &subscription;
        let outcome = self
            .healer
            .run(move || async move { self.setup_subscription(pending).await })
            .await;

        if outcome.is_completed() {
            self.registry.register(subscription).await;
        }

        outcome
    }

    /// Declares the topology of `subscription` and spawns its consumer.
    async fn setup_subscription(&self, subscription: &Subscription) -> Result<(), AmqpError> {
        let result = async {
            let channel = self.manager.ensure_channel().await?;

            let queue = match subscription {
                Subscription::Topic(s) => {
                    topology::topic_subscription(&s.exchange, &s.queue, &s.routing_key)
                        .install(&channel)
                        .await?;
                    s.queue.clone()
                }
                Subscription::Fanout(s) => {
                    topology::fanout_exchange(&s.exchange)
                        .install(&channel)
                        .await?;
                    let queue = channel
                        .queue_declare(&QueueDefinition::anonymous().exclusive())
                        .await?;
                    channel
                        .queue_bind(&QueueBinding::new(&queue).exchange(&s.exchange))
                        .await?;
                    queue
                }
                Subscription::DeadLetter(s) => {
                    topology::dead_letter_subscription(&s.dlq_exchange, &s.dlq_queue)
                        .install(&channel)
                        .await?;
                    s.dlq_queue.clone()
                }
            };

            let stream = channel.basic_consume(&queue).await?;
            tokio::spawn(consume(self.me.clone(), stream, subscription.clone()));

            debug!(queue, "consumer started");
            Ok(())
        }
        .await;

        if let Err(err) = &result {
            error!(error = %err, subscription = ?subscription, "failure to set up subscription");
            self.manager.invalidate().await;
        }

        result
    }

    /// Runs the setup of every registered subscription again, in registration order.
    async fn reattach_subscriptions(&self) -> Result<(), AmqpError> {
        let subscriptions = self.registry.snapshot().await;
        if subscriptions.is_empty() {
            return Ok(());
        }

        info!(count = subscriptions.len(), "reattaching subscriptions");
        for subscription in &subscriptions {
            self.setup_subscription(subscription).await?;
        }

        Ok(())
    }

    /// Replays every buffered publish. Entries failing again go back to the buffer tail.
    async fn flush_buffer(&self) {
        let pending = self.buffer.drain().await;
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "flushing buffered messages");
        for item in pending {
            self.publish_event(&item.exchange, &item.routing_key, item.message, item.headers)
                .await;
        }
    }

    fn serialization_fallback(&self, err: serde_json::Error) -> Outcome<()> {
        let err = AmqpError::from(err);
        error!(error = %err, "failure to serialize message");
        self.toolkit.report_capabilities(&err);
        Outcome::Fallback(self.toolkit.fallback_value(&err))
    }
}

#[async_trait]
impl ConnectionListener for ClientInner {
    async fn on_established(&self) -> Result<(), AmqpError> {
        self.reattach_subscriptions().await?;
        self.flush_buffer().await;
        Ok(())
    }
}

/// Diagnostics travel the regular publish path, so they are retried and buffered too.
#[async_trait]
impl DiagnosticSink for ClientInner {
    async fn publish_diagnostic(&self, payload: Value) {
        if let Outcome::Fallback(fallback) = self
            .publish_event(DIAGNOSTIC_EXCHANGE, "", payload, Headers::new())
            .await
        {
            error!(error = fallback.error_message, "failure to publish diagnostic event");
        }
    }
}

fn script_toolkit(resilience: &ResilienceConfigs) -> HealingToolkit {
    match HealingToolkit::new(
        resilience.heal_script.clone(),
        resilience.heal_timeout(),
    ) {
        Ok(toolkit) => toolkit,
        Err(err) => {
            warn!(error = %err, "heal script action unavailable, healing disabled");
            HealingToolkit::empty()
        }
    }
}

/// Drives the deliveries of one subscription until the broker cancels the consumer.
async fn consume(client: Weak<ClientInner>, mut stream: DeliveryStream, subscription: Subscription) {
    let tracer = global::tracer(CONSUMER_TRACER);

    while let Some(result) = stream.next().await {
        let delivery = match result {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(error = err.to_string(), "errors consume msg");
                continue;
            }
        };

        let Some(client) = client.upgrade() else {
            break;
        };

        let processed = match &subscription {
            Subscription::Topic(s) => {
                consumer::consume_topic(
                    &tracer,
                    &delivery,
                    s.handler.as_ref(),
                    client.as_ref(),
                    client.payloads.as_ref(),
                )
                .await
            }
            Subscription::Fanout(s) => {
                consumer::consume_broadcast(&tracer, &delivery, s.handler.as_ref()).await
            }
            Subscription::DeadLetter(s) => {
                consumer::consume_broadcast(&tracer, &delivery, s.handler.as_ref()).await
            }
        };

        if let Err(err) = processed {
            error!(error = err.to_string(), "error consume msg");
        }
    }

    debug!(subscription = ?subscription, "consumer stream ended");
}
