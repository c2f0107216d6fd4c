// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Registry
//!
//! Append-only record of every subscription made through the client, replayed in
//! registration order after each reconnection.

use crate::handler::MessageHandler;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct TopicSubscription {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub handler: Arc<dyn MessageHandler>,
}

#[derive(Clone)]
pub struct FanoutSubscription {
    pub exchange: String,
    pub handler: Arc<dyn MessageHandler>,
}

#[derive(Clone)]
pub struct DeadLetterSubscription {
    pub dlq_exchange: String,
    pub dlq_queue: String,
    pub handler: Arc<dyn MessageHandler>,
}

#[derive(Clone)]
pub enum Subscription {
    Topic(TopicSubscription),
    Fanout(FanoutSubscription),
    DeadLetter(DeadLetterSubscription),
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::Topic(s) => f
                .debug_struct("Topic")
                .field("exchange", &s.exchange)
                .field("queue", &s.queue)
                .field("routing_key", &s.routing_key)
                .finish(),
            Subscription::Fanout(s) => f
                .debug_struct("Fanout")
                .field("exchange", &s.exchange)
                .finish(),
            Subscription::DeadLetter(s) => f
                .debug_struct("DeadLetter")
                .field("dlq_exchange", &s.dlq_exchange)
                .field("dlq_queue", &s.dlq_queue)
                .finish(),
        }
    }
}

/// Subscriptions are never deduplicated nor removed.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, subscription: Subscription) {
        self.subscriptions.lock().await.push(subscription);
    }

    /// Subscriptions in registration order.
    pub async fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }
}
