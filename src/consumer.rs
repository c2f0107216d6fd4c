// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Processing of single deliveries. Topic deliveries are parsed before the handler sees
//! them; a parse or handler failure publishes a diagnostic event and rejects the message
//! without requeue, so the broker dead-letters it. Fanout and dead-letter deliveries are
//! handed over as they are and acknowledged once the handler succeeds; a handler failure
//! leaves the delivery unsettled until the channel goes away.

use crate::{
    channel::InboundDelivery,
    errors::AmqpError,
    handler::{Envelope, MessageHandler},
    otel,
    payload::{DiagnosticPayloadBuilder, DiagnosticReport},
};
use async_trait::async_trait;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::{debug, error, warn};

/// Destination of diagnostic events about deliveries that could not be processed.
#[async_trait]
pub(crate) trait DiagnosticSink: Send + Sync {
    async fn publish_diagnostic(&self, payload: Value);
}

/// Consumes a delivery of a topic subscription.
pub(crate) async fn consume_topic(
    tracer: &BoxedTracer,
    delivery: &InboundDelivery,
    handler: &dyn MessageHandler,
    sink: &dyn DiagnosticSink,
    payloads: &dyn DiagnosticPayloadBuilder,
) -> Result<(), AmqpError> {
    let (_ctx, mut span) = otel::new_span(&delivery.headers, tracer, &delivery.routing_key);

    debug!(
        "received: {} - exchange: {}",
        delivery.routing_key, delivery.exchange,
    );

    let result = match serde_json::from_slice::<Value>(&delivery.data) {
        Ok(parsed) => {
            let envelope = Envelope {
                exchange: delivery.exchange.clone(),
                routing_key: delivery.routing_key.clone(),
                headers: delivery.headers.clone(),
                raw: delivery.data.clone(),
                parsed: Some(parsed),
            };
            handler.handle(envelope).await
        }
        Err(err) => Err(AmqpError::from(err)),
    };

    match result {
        Ok(()) => {
            debug!("message successfully processed");
            if let Err(err) = delivery.ack().await {
                error!(error = err.to_string(), "error whiling ack msg");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(err);
            }

            span.set_status(Status::Ok);
            Ok(())
        }
        Err(err) => {
            warn!(error = err.to_string(), "failure to process msg, rejecting");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });

            let report = diagnostic_report(delivery, &err);
            sink.publish_diagnostic(payloads.build(&report)).await;

            delivery.nack(false).await.map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                err
            })
        }
    }
}

/// Consumes a delivery of a fanout or dead-letter subscription.
pub(crate) async fn consume_broadcast(
    tracer: &BoxedTracer,
    delivery: &InboundDelivery,
    handler: &dyn MessageHandler,
) -> Result<(), AmqpError> {
    let (_ctx, mut span) = otel::new_span(&delivery.headers, tracer, &delivery.exchange);

    let envelope = Envelope::new(
        &delivery.exchange,
        &delivery.routing_key,
        delivery.headers.clone(),
        delivery.data.clone(),
    );

    if let Err(err) = handler.handle(envelope).await {
        warn!(
            error = err.to_string(),
            exchange = delivery.exchange,
            "handler failure on broadcast msg, leaving it unacked"
        );
        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from(err.to_string()),
        });
        return Err(err);
    }

    delivery.ack().await.map_err(|err| {
        error!(error = err.to_string(), "error whiling ack msg");
        span.set_status(Status::Error {
            description: Cow::from("error to ack msg"),
        });
        err
    })?;

    span.set_status(Status::Ok);
    Ok(())
}

fn diagnostic_report(delivery: &InboundDelivery, err: &AmqpError) -> DiagnosticReport {
    let mut example = Map::new();
    example.insert(
        "routingKey".to_owned(),
        Value::String(delivery.routing_key.clone()),
    );
    example.insert(
        "raw".to_owned(),
        Value::String(String::from_utf8_lossy(&delivery.data).into_owned()),
    );

    DiagnosticReport {
        error: err.to_string(),
        schema: delivery.headers.clone(),
        example,
    }
}
