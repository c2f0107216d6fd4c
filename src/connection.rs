// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Manager
//!
//! Owns the single connection/channel pair of the client. The pair is created lazily by
//! [`ConnectionManager::ensure_channel`], dropped as a whole when an operation fails, and
//! replaced on reconnection; it is never mutated in place.
//!
//! When the broker reports a connection failure, [`ConnectionManager::handle_disconnect`]
//! runs a single recovery cycle: drop the pair, ask the healing toolkit for help, wait the
//! reconnection delay and try to connect once. If that attempt fails nothing else is
//! scheduled; the next operation that needs a channel tries again.

use crate::{
    channel::{AmqpChannel, AmqpConnection, AmqpTransport},
    errors::AmqpError,
    healing::HealingToolkit,
};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Notified every time a new connection/channel pair has been established.
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// Restores whatever state lived on the previous channel.
    async fn on_established(&self) -> Result<(), AmqpError>;
}

struct Session {
    connection: Arc<dyn AmqpConnection>,
    channel: Arc<dyn AmqpChannel>,
}

pub struct ConnectionManager {
    transport: Arc<dyn AmqpTransport>,
    toolkit: Arc<HealingToolkit>,
    reconnect_delay: Duration,
    uri: std::sync::RwLock<Option<String>>,
    session: Mutex<Option<Session>>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    listener: std::sync::RwLock<Option<Weak<dyn ConnectionListener>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn AmqpTransport>,
        toolkit: Arc<HealingToolkit>,
        reconnect_delay: Duration,
    ) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager {
            transport,
            toolkit,
            reconnect_delay,
            uri: std::sync::RwLock::new(None),
            session: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listener: std::sync::RwLock::new(None),
        })
    }

    /// Registers the component restored after every (re)connection.
    pub fn set_listener(&self, listener: Weak<dyn ConnectionListener>) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = Some(listener);
        }
    }

    /// Stores `uri` and (re)establishes the connection to it.
    pub async fn connect(self: &Arc<Self>, uri: &str) -> Result<(), AmqpError> {
        if let Ok(mut slot) = self.uri.write() {
            *slot = Some(uri.to_owned());
        }

        self.establish(true).await.map(|_| ())
    }

    /// Returns the live channel, establishing a new connection when there is none.
    pub async fn ensure_channel(self: &Arc<Self>) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.establish(false).await
    }

    /// Drops the current pair, forcing the next operation to reconnect.
    pub async fn invalidate(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("dropping amqp connection and channel");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Closes channel and connection. Disconnect notifications are ignored until a new
    /// pair is established, either through `connect` or lazily by `ensure_channel`.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.closed.store(true, Ordering::SeqCst);

        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.channel.close().await?;
        session.connection.close().await?;
        info!("amqp connection closed");
        Ok(())
    }

    /// Runs one recovery cycle for a lost connection.
    ///
    /// Returns the handle of the scheduled reconnection, or `None` when a cycle is already in
    /// flight, the client was closed or no URI was ever configured.
    pub async fn handle_disconnect(self: &Arc<Self>, reason: AmqpError) -> Option<JoinHandle<()>> {
        if self.closed.load(Ordering::SeqCst) {
            self.invalidate().await;
            return None;
        }

        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("recovery already in progress");
            return None;
        }

        if self.current_uri().is_none() {
            self.reconnecting.store(false, Ordering::SeqCst);
            return None;
        }

        warn!(error = %reason, "broker connection lost");
        self.invalidate().await;
        self.toolkit.heal(&reason).await;

        let manager = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(manager.reconnect_delay).await;

            match manager.establish(true).await {
                Ok(_) => info!("reconnected to broker"),
                Err(err) => error!(error = %err, "reconnection failed"),
            }

            manager.reconnecting.store(false, Ordering::SeqCst);
        }))
    }

    fn current_uri(&self) -> Option<String> {
        self.uri.read().ok().and_then(|uri| uri.clone())
    }

    /// Connects, opens a channel and notifies the listener. With `force` an existing pair is
    /// replaced, otherwise it is returned as is.
    async fn establish(self: &Arc<Self>, force: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let channel = {
            let mut session = self.session.lock().await;

            if let (false, Some(current)) = (force, session.as_ref()) {
                return Ok(current.channel.clone());
            }

            let uri = self.current_uri().ok_or_else(|| {
                AmqpError::ConnectionError("broker uri not configured".to_owned())
            })?;

            *session = None;
            let connection = self.transport.connect(&uri).await?;
            connection.on_error(self.disconnect_observer());
            let channel = connection.create_channel().await?;

            *session = Some(Session {
                connection,
                channel: channel.clone(),
            });
            self.closed.store(false, Ordering::SeqCst);
            channel
        };

        let listener = self
            .listener
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade));
        if let Some(listener) = listener {
            listener.on_established().await?;
        }

        Ok(channel)
    }

    fn disconnect_observer(self: &Arc<Self>) -> Box<dyn Fn(AmqpError) + Send + Sync> {
        let manager = Arc::downgrade(self);
        let runtime = Handle::current();

        Box::new(move |err| {
            if let Some(manager) = manager.upgrade() {
                runtime.spawn(async move {
                    manager.handle_disconnect(err).await;
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{MockAmqpChannel, MockAmqpConnection, MockAmqpTransport},
        healing::HealAction,
    };
    use std::sync::atomic::AtomicUsize;

    fn healthy_connection() -> Arc<dyn AmqpConnection> {
        let mut conn = MockAmqpConnection::new();
        conn.expect_on_error().returning(|_| ());
        conn.expect_create_channel().returning(|| {
            let mut channel = MockAmqpChannel::new();
            channel.expect_close().returning(|| Ok(()));
            Ok(Arc::new(channel))
        });
        conn.expect_close().returning(|| Ok(()));
        Arc::new(conn)
    }

    fn manager(transport: MockAmqpTransport) -> Arc<ConnectionManager> {
        ConnectionManager::new(
            Arc::new(transport),
            Arc::new(HealingToolkit::empty()),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn ensure_channel_without_uri_fails() {
        let mut transport = MockAmqpTransport::new();
        transport.expect_connect().never();

        let err = manager(transport).ensure_channel().await.err().unwrap();
        assert!(matches!(err, AmqpError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn ensure_channel_reuses_live_pair() {
        let mut transport = MockAmqpTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Ok(healthy_connection()));

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();
        let first = manager.ensure_channel().await.unwrap();
        let second = manager.ensure_channel().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidated_pair_is_reestablished() {
        let mut transport = MockAmqpTransport::new();
        transport
            .expect_connect()
            .times(2)
            .returning(|_| Ok(healthy_connection()));

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();
        manager.invalidate().await;
        assert!(!manager.is_connected().await);

        manager.ensure_channel().await.unwrap();
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn concurrent_disconnects_trigger_one_recovery() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let mut transport = MockAmqpTransport::new();
        transport.expect_connect().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(healthy_connection())
        });

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();

        let reason = AmqpError::DisconnectedError("socket closed".to_owned());
        let first = manager.handle_disconnect(reason.clone()).await;
        let second = manager.handle_disconnect(reason).await;
        assert!(second.is_none());

        first.unwrap().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected().await);
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test]
    async fn failed_reconnection_clears_guard_without_retrying() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let mut transport = MockAmqpTransport::new();
        transport.expect_connect().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(healthy_connection())
            } else {
                Err(AmqpError::ConnectionError("connection refused".to_owned()))
            }
        });

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();

        let handle = manager
            .handle_disconnect(AmqpError::DisconnectedError("socket closed".to_owned()))
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert!(!manager.is_connected().await);
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test]
    async fn closed_manager_ignores_disconnects() {
        let mut transport = MockAmqpTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Ok(healthy_connection()));

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();
        manager.close().await.unwrap();

        let handle = manager
            .handle_disconnect(AmqpError::DisconnectedError("socket closed".to_owned()))
            .await;
        assert!(handle.is_none());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn lazy_reconnect_after_close_restores_recovery() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let mut transport = MockAmqpTransport::new();
        transport.expect_connect().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(healthy_connection())
        });

        let manager = manager(transport);
        manager.connect("amqp://localhost").await.unwrap();
        manager.close().await.unwrap();
        manager.ensure_channel().await.unwrap();

        let handle = manager
            .handle_disconnect(AmqpError::DisconnectedError("socket closed".to_owned()))
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn disconnect_reason_is_handed_to_the_toolkit() {
        let reasons = Arc::new(RecordingAction::default());
        let mut transport = MockAmqpTransport::new();
        transport
            .expect_connect()
            .times(2)
            .returning(|_| Ok(healthy_connection()));

        let manager = ConnectionManager::new(
            Arc::new(transport),
            Arc::new(HealingToolkit::empty().register(reasons.clone())),
            Duration::ZERO,
        );
        manager.connect("amqp://localhost").await.unwrap();

        let reason = AmqpError::DisconnectedError("socket closed".to_owned());
        manager
            .handle_disconnect(reason.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(*reasons.seen.lock().unwrap(), vec![reason]);
    }

    #[derive(Default)]
    struct RecordingAction {
        seen: std::sync::Mutex<Vec<AmqpError>>,
    }

    #[async_trait]
    impl HealAction for RecordingAction {
        async fn heal(&self, error: &AmqpError) -> Result<bool, AmqpError> {
            self.seen.lock().unwrap().push(error.clone());
            Ok(false)
        }
    }
}
