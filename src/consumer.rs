// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Processing of a single delivery: decode the body, run the handler, then ack or nack the
//! message according to the handler's outcome. Every delivery reaches the handler, and the
//! ack (or nack) for a message is only sent once its handler has returned.

use crate::{
    errors::AmqpError,
    handler::{ConsumerHandler, ConsumerMessage, HandlerError},
    otel,
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    protocol::basic::AMQPProperties,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error, warn};

/// A message received from the broker that can be acknowledged.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn data(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    fn redelivered(&self) -> bool;

    fn properties(&self) -> &AMQPProperties;

    /// Acknowledges this message only (non-multiple).
    async fn ack(&self) -> Result<(), lapin::Error>;

    /// Negatively acknowledges this message only, optionally asking the broker to requeue it.
    async fn nack(&self, requeue: bool) -> Result<(), lapin::Error>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn properties(&self) -> &AMQPProperties {
        &self.properties
    }

    async fn ack(&self) -> Result<(), lapin::Error> {
        self.acker.ack(BasicAckOptions { multiple: false }).await
    }

    async fn nack(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
    }
}

/// Consumes and processes one delivery from `queue`.
///
/// The handler gets the exact bytes in `data`; `body` is their UTF-8 decoding, with invalid
/// sequences replaced by U+FFFD. An error is returned only when the broker could not be told
/// the outcome, which means the channel is unusable.
pub(crate) async fn consume<D>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: &D,
    handler: &dyn ConsumerHandler,
) -> Result<(), AmqpError>
where
    D: InboundDelivery,
{
    let (ctx, mut span) = otel::new_span(delivery.properties(), tracer, queue);

    debug!(
        queue,
        delivery_tag = delivery.delivery_tag(),
        "message received"
    );

    let body = String::from_utf8_lossy(delivery.data());
    if let Cow::Owned(_) = body {
        warn!(
            queue,
            delivery_tag = delivery.delivery_tag(),
            "body is not valid utf-8, invalid sequences replaced in the text body"
        );
    }

    let msg = ConsumerMessage {
        queue: queue.to_owned(),
        body: body.into_owned(),
        data: delivery.data().to_vec(),
        delivery_tag: delivery.delivery_tag(),
        redelivered: delivery.redelivered(),
    };

    match handler.exec(&ctx, &msg).await {
        Ok(()) => {
            debug!("message successfully processed");
            match delivery.ack().await {
                Err(err) => {
                    error!(error = err.to_string(), "error whiling ack msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                    Err(AmqpError::AckMessageError)
                }
                _ => {
                    span.set_status(Status::Ok);
                    Ok(())
                }
            }
        }
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });

            match err {
                HandlerError::Requeue(_) => {
                    warn!(error = err.to_string(), "error whiling handling msg, requeuing");
                    nack(delivery, true, &mut span).await
                }
                HandlerError::Reject(_) => {
                    warn!(error = err.to_string(), "error whiling handling msg, rejecting");
                    nack(delivery, false, &mut span).await
                }
            }
        }
    }
}

async fn nack<D, S>(delivery: &D, requeue: bool, span: &mut S) -> Result<(), AmqpError>
where
    D: InboundDelivery,
    S: Span,
{
    match delivery.nack(requeue).await {
        Err(err) => {
            error!(error = err.to_string(), requeue, "error whiling nack msg");
            span.record_error(&err);
            Err(AmqpError::NackMessageError)
        }
        _ => Ok(()),
    }
}
