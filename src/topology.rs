// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings the client needs before it
//! publishes or consumes. [`AmqpTopology`] collects definitions and installs them on a
//! channel in order: exchanges first, then queues, then bindings. The helper functions at
//! the bottom build the topology of each subscription kind.

use crate::{
    channel::AmqpChannel,
    errors::AmqpError,
    exchange::{catch_all_exchange, dead_letter_exchange, ExchangeDefinition, CATCH_ALL_ROUTING_KEY},
    queue::{QueueBinding, QueueDefinition},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Ordered set of topology declarations to install on a channel.
#[derive(Debug, Clone, Default)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology on the broker.
    ///
    /// This method performs the following operations in order:
    /// 1. Creates all exchanges
    /// 2. Creates all queues
    /// 3. Sets up queue-to-exchange bindings
    pub async fn install(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        self.install_exchange(channel).await?;
        self.install_queue(channel).await?;
        self.binding_queues(channel).await
    }

    async fn install_exchange(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            if let Err(err) = channel.exchange_declare(exch).await {
                error!(
                    error = err.to_string(),
                    name = exch.name,
                    "error to declare the exchange"
                );
                return Err(err);
            }

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            if let Err(err) = channel.queue_declare(def).await {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                return Err(err);
            }

            debug!("queue: {} was created", def.name);
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &Arc<dyn AmqpChannel>) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = channel.queue_bind(binding).await {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(err);
            }
        }

        Ok(())
    }
}

/// Topology asserted before publishing to a topic exchange.
///
/// The catch-all routing key additionally declares `<exchange>.catchall`. Nothing binds
/// to that exchange; it is kept for compatibility with existing deployments.
pub fn topic_exchange(exchange: &str, routing_key: &str) -> AmqpTopology {
    let topology = AmqpTopology::new().exchange(ExchangeDefinition::new(exchange).topic().durable());

    if routing_key == CATCH_ALL_ROUTING_KEY {
        return topology.exchange(
            ExchangeDefinition::new(&catch_all_exchange(exchange))
                .topic()
                .durable(),
        );
    }

    topology
}

/// Topology of a topic subscription: the topic exchange, a durable queue dead-lettering
/// to `<exchange>.dlq` and the binding between them.
pub fn topic_subscription(exchange: &str, queue: &str, routing_key: &str) -> AmqpTopology {
    topic_exchange(exchange, routing_key)
        .queue(
            QueueDefinition::new(queue)
                .durable()
                .dead_letter_exchange(&dead_letter_exchange(exchange)),
        )
        .queue_binding(
            QueueBinding::new(queue)
                .exchange(exchange)
                .routing_key(routing_key),
        )
}

/// Topology asserted before publishing to or subscribing on a fanout exchange.
pub fn fanout_exchange(exchange: &str) -> AmqpTopology {
    AmqpTopology::new().exchange(ExchangeDefinition::new(exchange).fanout().durable())
}

/// Topology of a dead-letter subscription: a durable fanout exchange and a durable
/// queue bound to it with an empty routing key.
pub fn dead_letter_subscription(dlq_exchange: &str, dlq_queue: &str) -> AmqpTopology {
    fanout_exchange(dlq_exchange)
        .queue(QueueDefinition::new(dlq_queue).durable())
        .queue_binding(QueueBinding::new(dlq_queue).exchange(dlq_exchange))
}
