// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module defines the transport seam of the client. The connection manager, the
//! publisher and the consumers only ever talk to the broker through the [`AmqpTransport`],
//! [`AmqpConnection`] and [`AmqpChannel`] traits. [`LapinTransport`] implements them on
//! top of `lapin`, which provides the actual AMQP 0.9.1 protocol.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde_json::{Map, Number, Value};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode of persistent messages
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
/// Queue argument naming the dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Message headers as seen by the client. Converted to and from AMQP field tables by the
/// lapin adapter.
pub type Headers = Map<String, Value>;

/// Callback invoked when the broker connection fails or closes unexpectedly.
pub type DisconnectObserver = Box<dyn Fn(AmqpError) + Send + Sync>;

/// Stream of deliveries produced by a consumer registration.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, AmqpError>>;

/// Opens connections to a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpTransport: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// A live broker connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Registers an observer called when the connection errors or is closed by the peer.
    fn on_error(&self, observer: DisconnectObserver);

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel multiplexed over a connection, used for every declare/publish/consume call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue and returns its name, which the broker generates for anonymous
    /// definitions.
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(&self, queue: &str) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// A message received from a queue.
pub struct InboundDelivery {
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
    pub headers: Headers,
    acker: Box<dyn DeliveryAcker>,
}

impl InboundDelivery {
    pub fn new(
        exchange: &str,
        routing_key: &str,
        data: Vec<u8>,
        headers: Headers,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        InboundDelivery {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            data,
            headers,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker.nack(requeue).await
    }
}

/// `lapin` backed transport.
pub struct LapinTransport {
    connection_name: String,
}

impl LapinTransport {
    /// Creates a transport whose connections are announced to the broker as `connection_name`.
    pub fn new(connection_name: &str) -> Arc<LapinTransport> {
        Arc::new(LapinTransport {
            connection_name: connection_name.to_owned(),
        })
    }
}

#[async_trait]
impl AmqpTransport for LapinTransport {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        match Connection::connect(uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection { conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    fn on_error(&self, observer: DisconnectObserver) {
        self.conn
            .on_error(move |err| observer(AmqpError::DisconnectedError(err.to_string())));
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn
            .close(200, "OK")
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(def.name.clone(), err.to_string()))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let mut args = BTreeMap::new();
        if let Some(dlx) = &def.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(dlx.clone())),
            );
        }

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::from(args),
            )
            .await
        {
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
            Err(err) => Err(AmqpError::DeclareQueueError(
                def.name.clone(),
                err.to_string(),
            )),
        }
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|_| {
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), AmqpError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(field_table(headers));

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(&self, queue: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("{}-{}", queue, Uuid::new_v4()),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::BindingConsumerError(queue.to_owned(), err.to_string())
            })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(inbound_delivery)
                    .map_err(|err| AmqpError::DisconnectedError(err.to_string()))
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}

struct LapinAcker {
    acker: Acker,
}

#[async_trait]
impl DeliveryAcker for LapinAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| AmqpError::NackMessageError(err.to_string()))
    }
}

fn inbound_delivery(delivery: Delivery) -> InboundDelivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(json_headers)
        .unwrap_or_default();

    InboundDelivery::new(
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.data,
        headers,
        Box::new(LapinAcker {
            acker: delivery.acker,
        }),
    )
}

/// Converts client headers into an AMQP field table.
pub(crate) fn field_table(headers: &Headers) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| (ShortString::from(key.clone()), amqp_value(value)))
        .collect();
    FieldTable::from(btree)
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(v) => AMQPValue::Boolean(*v),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => AMQPValue::LongLongInt(v),
            (None, Some(v)) => AMQPValue::Double(v),
            _ => AMQPValue::Void,
        },
        Value::String(v) => AMQPValue::LongString(LongString::from(v.clone())),
        Value::Array(items) => {
            AMQPValue::FieldArray(FieldArray::from(items.iter().map(amqp_value).collect::<Vec<_>>()))
        }
        Value::Object(map) => AMQPValue::FieldTable(field_table(map)),
    }
}

/// Converts an AMQP field table into client headers.
pub(crate) fn json_headers(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_owned(), json_value(value)))
        .collect()
}

fn json_value(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(v) => Value::Bool(*v),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::Float(v) => Number::from_f64(f64::from(*v))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AMQPValue::Double(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        AMQPValue::ShortString(v) => Value::String(v.as_str().to_owned()),
        AMQPValue::LongString(v) => {
            Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(json_value).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(json_headers(table)),
        _ => Value::Null,
    }
}
