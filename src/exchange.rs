// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management for RabbitMQ
//!
//! This module provides the exchange definitions used by the client when it asserts
//! topology before publishing or subscribing, together with the naming conventions for
//! the companion exchanges (`<exchange>.dlq`, `<exchange>.catchall`).

/// Suffix of the dead-letter exchange attached to topic subscription queues
pub const DEAD_LETTER_SUFFIX: &str = ".dlq";
/// Suffix of the companion exchange declared for catch-all routing keys
pub const CATCH_ALL_SUFFIX: &str = ".catchall";
/// Routing key that matches every topic
pub const CATCH_ALL_ROUTING_KEY: &str = "#";

/// Exchange types the client declares.
///
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    #[default]
    Topic,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
///
/// Built with the builder pattern, e.g. `ExchangeDefinition::new("orders").topic().durable()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a new, non-durable topic exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Topic,
            durable: false,
        }
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange type to Topic.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

/// Name of the dead-letter exchange for `exchange`.
pub fn dead_letter_exchange(exchange: &str) -> String {
    format!("{}{}", exchange, DEAD_LETTER_SUFFIX)
}

/// Name of the catch-all companion exchange for `exchange`.
pub fn catch_all_exchange(exchange: &str) -> String {
    format!("{}{}", exchange, CATCH_ALL_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_durable_topic_exchange() {
        let def = ExchangeDefinition::new("orders").topic().durable();
        assert_eq!(def.name(), "orders");
        assert_eq!(def.exchange_kind(), &ExchangeKind::Topic);
        assert!(def.is_durable());
    }

    #[test]
    fn fanout_maps_to_lapin_kind() {
        let def = ExchangeDefinition::new("evt.alerts").fanout();
        assert!(matches!(
            lapin::ExchangeKind::from(def.exchange_kind()),
            lapin::ExchangeKind::Fanout
        ));
    }

    #[test]
    fn companion_exchange_names() {
        assert_eq!(dead_letter_exchange("orders"), "orders.dlq");
        assert_eq!(catch_all_exchange("orders"), "orders.catchall");
    }
}
