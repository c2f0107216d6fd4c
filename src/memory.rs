// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the client tests. Routes topic and fanout exchanges,
//! records settlements and can refuse connections or drop the current one.

use crate::{
    channel::{
        AmqpChannel, AmqpConnection, AmqpTransport, DeliveryAcker, DeliveryStream,
        DisconnectObserver, Headers, InboundDelivery,
    },
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
}

#[derive(Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    data: Vec<u8>,
    headers: Headers,
}

#[derive(Default)]
struct MemoryQueue {
    exclusive: bool,
    backlog: VecDeque<Message>,
    consumers: Vec<UnboundedSender<InboundDelivery>>,
}

#[derive(Default)]
struct BrokerState {
    generation: u64,
    connections: usize,
    refuse_connections: bool,
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<QueueBinding>,
    published: Vec<Published>,
    operations: Vec<String>,
    acked: Vec<Vec<u8>>,
    nacked: Vec<(Vec<u8>, bool)>,
    observers: Vec<DisconnectObserver>,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Arc<dyn AmqpTransport> {
        Arc::new(MemoryTransport {
            state: self.state.clone(),
        })
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connections = refuse;
    }

    /// Kills the current connection: channels stop working, consumers are cancelled,
    /// exclusive queues disappear and the disconnect observers are notified.
    pub fn drop_connection(&self) {
        let observers = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;

            let exclusive: Vec<String> = state
                .queues
                .iter()
                .filter(|(_, q)| q.exclusive)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &exclusive {
                state.queues.remove(name);
            }
            state.bindings.retain(|b| !exclusive.contains(&b.queue_name));
            for queue in state.queues.values_mut() {
                queue.consumers.clear();
            }

            std::mem::take(&mut state.observers)
        };

        for observer in observers {
            observer(AmqpError::DisconnectedError("socket closed by peer".to_owned()));
        }
    }

    /// Routes a raw body as if some other client had published it.
    pub fn inject(&self, exchange: &str, routing_key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        route(
            &self.state,
            &mut state,
            Message {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                data: data.to_vec(),
                headers: Headers::new(),
            },
        );
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn nacked(&self) -> Vec<(Vec<u8>, bool)> {
        self.state.lock().unwrap().nacked.clone()
    }

    pub fn consumers(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().filter(|c| !c.is_closed()).count())
            .unwrap_or_default()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().unwrap().exchanges.contains_key(name)
    }
}

struct MemoryTransport {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl AmqpTransport for MemoryTransport {
    async fn connect(&self, _uri: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connections {
            return Err(AmqpError::ConnectionError(
                "IO error: Connection refused (os error 111)".to_owned(),
            ));
        }

        state.connections += 1;
        Ok(Arc::new(MemoryConnection {
            state: self.state.clone(),
            generation: state.generation,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    generation: u64,
}

#[async_trait]
impl AmqpConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Ok(Arc::new(MemoryChannel {
            state: self.state.clone(),
            generation: self.generation,
        }))
    }

    fn on_error(&self, observer: DisconnectObserver) {
        self.state.lock().unwrap().observers.push(observer);
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    generation: u64,
}

impl MemoryChannel {
    fn live(&self) -> Result<std::sync::MutexGuard<'_, BrokerState>, AmqpError> {
        let state = self.state.lock().unwrap();
        if state.generation != self.generation {
            return Err(AmqpError::ChannelError("channel closed: socket closed".to_owned()));
        }
        Ok(state)
    }
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.live()?;
        state.operations.push(format!("exchange:{}", def.name));
        state.exchanges.insert(def.name.clone(), def.clone());
        Ok(())
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let mut state = self.live()?;
        let name = if def.name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            def.name.clone()
        };

        state.operations.push(format!("queue:{}", def.name));
        state.queues.entry(name.clone()).or_insert_with(|| MemoryQueue {
            exclusive: def.exclusive,
            ..Default::default()
        });
        Ok(name)
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.live()?;
        state.operations.push(format!(
            "bind:{}:{}",
            binding.exchange_name, binding.routing_key
        ));
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), AmqpError> {
        let mut state = self.live()?;
        state
            .operations
            .push(format!("publish:{}:{}", exchange, routing_key));
        state.published.push(Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            data: payload.to_vec(),
        });
        route(
            &self.state,
            &mut state,
            Message {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                data: payload.to_vec(),
                headers: headers.clone(),
            },
        );
        Ok(())
    }

    async fn basic_consume(&self, queue: &str) -> Result<DeliveryStream, AmqpError> {
        let mut guard = self.live()?;
        let state = &mut *guard;
        let (tx, rx) = unbounded_channel();

        state.operations.push(format!("consume:{}", queue));
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(AmqpError::BindingConsumerError(
                queue.to_owned(),
                "NOT_FOUND".to_owned(),
            ));
        };

        while let Some(message) = q.backlog.pop_front() {
            let _ = tx.send(delivery(&self.state, message));
        }
        q.consumers.push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        })
        .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    data: Vec<u8>,
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.state.lock().unwrap().acked.push(self.data.clone());
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.state
            .lock()
            .unwrap()
            .nacked
            .push((self.data.clone(), requeue));
        Ok(())
    }
}

fn delivery(state: &Arc<Mutex<BrokerState>>, message: Message) -> InboundDelivery {
    InboundDelivery::new(
        &message.exchange,
        &message.routing_key,
        message.data.clone(),
        message.headers,
        Box::new(MemoryAcker {
            state: state.clone(),
            data: message.data,
        }),
    )
}

fn route(shared: &Arc<Mutex<BrokerState>>, state: &mut BrokerState, message: Message) {
    let Some(kind) = state.exchanges.get(&message.exchange).map(|e| e.kind.clone()) else {
        return;
    };

    let targets: Vec<String> = state
        .bindings
        .iter()
        .filter(|b| b.exchange_name == message.exchange)
        .filter(|b| match kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => topic_matches(&b.routing_key, &message.routing_key),
        })
        .map(|b| b.queue_name.clone())
        .collect();

    for name in targets {
        if let Some(queue) = state.queues.get_mut(&name) {
            queue.consumers.retain(|c| !c.is_closed());
            match queue.consumers.first() {
                Some(consumer) => {
                    let _ = consumer.send(delivery(shared, message.clone()));
                }
                None => queue.backlog.push_back(message.clone()),
            }
        }
    }
}

/// `#` matches zero or more words, `*` exactly one.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn go(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => go(&pattern[1..], key) || (!key.is_empty() && go(pattern, &key[1..])),
            (Some(&"*"), Some(_)) => go(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => go(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    go(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_patterns() {
        assert!(topic_matches("#", "orders.created"));
        assert!(topic_matches("orders.*", "orders.created"));
        assert!(!topic_matches("orders.*", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders.created.eu"));
        assert!(topic_matches("orders.created", "orders.created"));
        assert!(!topic_matches("orders.created", "orders.deleted"));
    }
}
