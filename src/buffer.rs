// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Buffer
//!
//! FIFO holding area for publishes that could not reach the broker. The buffer is bounded:
//! once full, the oldest message is dropped to make room for the newest one.

use crate::channel::Headers;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::warn;

/// A publish waiting to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: Value,
    pub headers: Headers,
}

pub struct MessageBuffer {
    pending: Mutex<VecDeque<BufferedMessage>>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        MessageBuffer {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Appends `message` at the tail, evicting the oldest entry when the buffer is full.
    pub async fn push(&self, message: BufferedMessage) {
        let mut pending = self.pending.lock().await;

        if pending.len() >= self.capacity {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    exchange = dropped.exchange,
                    routing_key = dropped.routing_key,
                    capacity = self.capacity,
                    "message buffer full, dropping oldest message"
                );
            }
        }

        pending.push_back(message);
    }

    /// Takes every pending message, leaving the buffer empty.
    pub async fn drain(&self) -> Vec<BufferedMessage> {
        self.pending.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Copy of the pending messages in replay order.
    pub async fn snapshot(&self) -> Vec<BufferedMessage> {
        self.pending.lock().await.iter().cloned().collect()
    }
}
