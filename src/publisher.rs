// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Publishes text messages for a [`Pattern`]. Every message is marked persistent, tagged with
//! a random message id and carries the caller's trace context in its headers. On a channel in
//! confirm mode a message the broker nacks, or a channel closed before the confirm arrives, is
//! a failed publish. There is no retry: a failed publish is returned to the caller.

use crate::{channel::AmqpChannel, errors::AmqpError, otel, pattern::Pattern};
use lapin::{publisher_confirm::Confirmation, types::ShortString, BasicProperties};
use opentelemetry::Context;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Content type of every message published by this crate
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// AMQP delivery mode asking the broker to persist the message
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishes messages on an open channel.
pub struct RabbitMQPublisher<'c> {
    channel: &'c dyn AmqpChannel,
}

impl<'c> RabbitMQPublisher<'c> {
    pub fn new(channel: &'c dyn AmqpChannel) -> RabbitMQPublisher<'c> {
        RabbitMQPublisher { channel }
    }

    /// Declares what `pattern` needs on the publishing side, then publishes `body` to it.
    ///
    /// # Parameters
    /// * `ctx` - Trace context injected into the message headers
    /// * `pattern` - Messaging pattern deciding what is declared and where the message goes
    /// * `body` - Text payload of the message
    ///
    /// # Returns
    /// `Ok(())` if the message was published, or an error naming the step that failed
    pub async fn publish(
        &self,
        ctx: &Context,
        pattern: &Pattern,
        body: &str,
    ) -> Result<(), AmqpError> {
        pattern.publish_topology().install(self.channel).await?;

        let (exchange, routing_key) = pattern.publish_target();
        self.publish_raw(ctx, exchange, routing_key, body.as_bytes())
            .await
    }

    /// Publishes `data` to `exchange` with `routing_key` without declaring anything.
    ///
    /// # Parameters
    /// * `ctx` - Trace context injected into the message headers
    /// * `exchange` - Destination exchange, `""` for the default exchange
    /// * `routing_key` - Routing key of the message
    /// * `data` - Raw payload
    ///
    /// # Returns
    /// `Ok(())` if the message was published, `AmqpError::PublishingError` otherwise
    pub async fn publish_raw(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        data: &[u8],
    ) -> Result<(), AmqpError> {
        debug!(exchange, routing_key, "publishing message");

        match self
            .channel
            .publish(exchange, routing_key, data, message_properties(ctx))
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            Ok(Confirmation::Nack(_)) => {
                warn!(exchange, routing_key, "message nacked by the broker");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}

fn message_properties(ctx: &Context) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(TEXT_CONTENT_TYPE))
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(otel::inject_context(ctx))
}
