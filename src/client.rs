// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Client
//!
//! Entry point of the crate. Each operation opens its own connection and channel, declares the
//! topology its pattern needs, does its work and closes the channel and the connection again,
//! whatever the outcome. Nothing is pooled or shared between calls.
//!
//! Publishing returns once the message was handed to the broker. Consuming keeps running until
//! the given shutdown future resolves or the subscription fails.

use crate::{
    channel::{AmqpConnection, AmqpSession},
    configs::RabbitMQConfigs,
    errors::AmqpError,
    exchange::ExchangeKind,
    handler::ConsumerHandler,
    pattern::{DeadLetterRelay, Pattern},
    publisher::RabbitMQPublisher,
};
use futures_util::{future::BoxFuture, FutureExt};
use opentelemetry::Context;
use std::{future::Future, sync::Arc};
use tracing::debug;

/// Publishes and consumes text messages with a fixed broker configuration.
#[derive(Debug, Clone, Default)]
pub struct RabbitMQClient {
    cfg: RabbitMQConfigs,
}

impl RabbitMQClient {
    /// Creates a client for the broker described by `cfg`.
    ///
    /// No connection is opened until an operation is called.
    ///
    /// # Parameters
    /// * `cfg` - Broker configuration used by every operation of this client
    ///
    /// # Returns
    /// A new client
    pub fn new(cfg: RabbitMQConfigs) -> RabbitMQClient {
        RabbitMQClient { cfg }
    }

    pub fn configs(&self) -> &RabbitMQConfigs {
        &self.cfg
    }

    /// Declares the durable queue `queue` and publishes `body` to it.
    ///
    /// # Parameters
    /// * `queue` - Name of the destination queue
    /// * `body` - Text payload of the message
    pub async fn publish_to_queue(&self, queue: &str, body: &str) -> Result<(), AmqpError> {
        self.publish(&Pattern::direct(queue), body).await
    }

    /// Declares the durable queue `queue` and consumes it.
    ///
    /// # Parameters
    /// * `queue` - Name of the queue to consume
    /// * `handler` - Called once per delivery; its result acks, requeues or rejects it
    /// * `shutdown` - Resolving it stops the consumer gracefully
    pub async fn consume_from_queue<H, F>(
        &self,
        queue: &str,
        handler: H,
        shutdown: F,
    ) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.consume(&Pattern::direct(queue), handler, shutdown)
            .await
    }

    /// Declares the durable exchange `exchange` of type `kind` and publishes `body` to it with
    /// `routing_key`.
    ///
    /// # Parameters
    /// * `exchange` - Name of the destination exchange
    /// * `kind` - Exchange type, used when declaring it
    /// * `routing_key` - Routing key of the message
    /// * `body` - Text payload of the message
    pub async fn publish_to_exchange(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        routing_key: &str,
        body: &str,
    ) -> Result<(), AmqpError> {
        self.publish(&Pattern::pub_sub(exchange, kind, routing_key), body)
            .await
    }

    /// Declares the durable exchange `exchange` of type `kind`, binds a private server-named
    /// queue to it with `routing_key` and consumes that queue.
    ///
    /// # Parameters
    /// * `exchange` - Name of the exchange to subscribe to
    /// * `kind` - Exchange type, used when declaring it
    /// * `routing_key` - Binding key of the subscriber queue
    /// * `handler` - Called once per delivery; its result acks, requeues or rejects it
    /// * `shutdown` - Resolving it stops the consumer gracefully
    pub async fn consume_from_exchange<H, F>(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        routing_key: &str,
        handler: H,
        shutdown: F,
    ) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.consume(
            &Pattern::pub_sub(exchange, kind, routing_key),
            handler,
            shutdown,
        )
        .await
    }

    /// Publishes `body` to exchange A of a dead-letter relay.
    ///
    /// Nothing is declared: the relay must already exist, which is the case once a
    /// [`consume_dead_letter`](RabbitMQClient::consume_dead_letter) call has set it up.
    /// Publishing to a missing exchange A fails with `AmqpError::PublishingError`.
    ///
    /// # Parameters
    /// * `exchange_a` - Name of the relay's entry exchange
    /// * `body` - Text payload of the message
    pub async fn publish_dead_letter(&self, exchange_a: &str, body: &str) -> Result<(), AmqpError> {
        let session = AmqpSession::open_publisher(&self.cfg).await?;

        publish_on(&session, |publisher| async move {
            publisher
                .publish_raw(&Context::current(), exchange_a, "", body.as_bytes())
                .await
        })
        .await
    }

    /// Declares the dead-letter relay and consumes its queue B, which receives every message
    /// published to exchange A once it has waited `relay.ttl_ms` in queue A.
    ///
    /// # Parameters
    /// * `relay` - Exchange and queue names of the relay and its TTL
    /// * `handler` - Called once per delivery; its result acks, requeues or rejects it
    /// * `shutdown` - Resolving it stops the consumer gracefully
    pub async fn consume_dead_letter<H, F>(
        &self,
        relay: &DeadLetterRelay,
        handler: H,
        shutdown: F,
    ) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.consume(&Pattern::dead_letter(relay.clone()), handler, shutdown)
            .await
    }

    /// Publishes `body` according to `pattern`, waiting for the broker to confirm it.
    ///
    /// # Parameters
    /// * `pattern` - Messaging pattern deciding what is declared and where the message goes
    /// * `body` - Text payload of the message
    ///
    /// # Returns
    /// `Ok(())` once the broker acked the message
    pub async fn publish(&self, pattern: &Pattern, body: &str) -> Result<(), AmqpError> {
        let session = AmqpSession::open_publisher(&self.cfg).await?;

        publish_on(&session, |publisher| async move {
            publisher.publish(&Context::current(), pattern, body).await
        })
        .await
    }

    /// Declares the topology of `pattern` and consumes its queue until `shutdown` resolves or
    /// the subscription fails.
    ///
    /// # Parameters
    /// * `pattern` - Messaging pattern deciding what is declared and which queue is consumed
    /// * `handler` - Called once per delivery; its result acks, requeues or rejects it
    /// * `shutdown` - Resolving it stops the consumer gracefully
    ///
    /// # Returns
    /// `Ok(())` after a shutdown or when the broker ends the subscription, otherwise the
    /// failure that stopped the consumer
    pub async fn consume<H, F>(
        &self,
        pattern: &Pattern,
        handler: H,
        shutdown: F,
    ) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let session = AmqpSession::open(&self.cfg).await?;

        consume_on(&session, pattern, Arc::new(handler), shutdown.boxed()).await
    }
}

/// Runs `work` with a publisher on `session`, then closes the session whatever the outcome.
async fn publish_on<'s, S, W, Fut>(session: &'s S, work: W) -> Result<(), AmqpError>
where
    S: AmqpConnection,
    W: FnOnce(RabbitMQPublisher<'s>) -> Fut,
    Fut: Future<Output = Result<(), AmqpError>>,
{
    let result = work(RabbitMQPublisher::new(session)).await;

    session.close().await;
    result
}

/// Installs the consume topology of `pattern` on `session` and consumes its queue, then closes
/// the session whatever the outcome.
async fn consume_on<S>(
    session: &S,
    pattern: &Pattern,
    handler: Arc<dyn ConsumerHandler>,
    shutdown: BoxFuture<'static, ()>,
) -> Result<(), AmqpError>
where
    S: AmqpConnection,
{
    let result = async {
        let installed = pattern.consume_topology().install(session).await?;

        let queue = installed
            .queue_name(pattern.consume_queue())
            .unwrap_or(pattern.consume_queue())
            .to_owned();
        debug!(queue = %queue, "topology installed, starting consumer");

        session.consume_until(&queue, handler, shutdown).await
    }
    .await;

    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::AmqpChannel,
        exchange::ExchangeDefinition,
        handler::{ConsumerMessage, HandlerError},
        queue::QueueDefinition,
    };
    use async_trait::async_trait;
    use futures_util::future;
    use lapin::{publisher_confirm::Confirmation, types::FieldTable, BasicProperties};
    use mockall::{mock, Sequence};

    mock! {
        pub Session {}

        #[async_trait]
        impl AmqpChannel for Session {
            async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), lapin::Error>;
            async fn declare_queue(
                &self,
                def: &QueueDefinition,
                args: FieldTable,
            ) -> Result<String, lapin::Error>;
            async fn bind_queue(
                &self,
                queue: &str,
                exchange: &str,
                routing_key: &str,
            ) -> Result<(), lapin::Error>;
            async fn publish(
                &self,
                exchange: &str,
                routing_key: &str,
                payload: &[u8],
                properties: BasicProperties,
            ) -> Result<Confirmation, lapin::Error>;
        }

        #[async_trait]
        impl AmqpConnection for Session {
            async fn consume_until(
                &self,
                queue: &str,
                handler: Arc<dyn ConsumerHandler>,
                shutdown: BoxFuture<'static, ()>,
            ) -> Result<(), AmqpError>;
            async fn close(&self);
        }
    }

    fn noop_handler() -> Arc<dyn ConsumerHandler> {
        Arc::new(|_: &ConsumerMessage| -> Result<(), HandlerError> { Ok(()) })
    }

    #[tokio::test]
    async fn declaration_failure_still_closes_the_session() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_declare_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(lapin::Error::ChannelsLimitReached));
        session.expect_consume_until().never();
        session
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| ());

        let result = consume_on(
            &session,
            &Pattern::direct("q1"),
            noop_handler(),
            future::pending().boxed(),
        )
        .await;

        assert_eq!(result, Err(AmqpError::DeclareQueueError("q1".to_owned())));
    }

    #[tokio::test]
    async fn pub_sub_consumes_the_generated_queue() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_declare_exchange()
            .withf(|def| def.name() == "logs")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_declare_queue()
            .withf(|def, _| def.is_anonymous())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("amq.gen-42".to_owned()));
        session
            .expect_bind_queue()
            .withf(|queue, exchange, key| {
                queue == "amq.gen-42" && exchange == "logs" && key == "app.*"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        session
            .expect_consume_until()
            .withf(|queue, _, _| queue == "amq.gen-42")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        session
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| ());

        let pattern = Pattern::pub_sub("logs", ExchangeKind::Topic, "app.*");
        let result = consume_on(
            &session,
            &pattern,
            noop_handler(),
            future::ready(()).boxed(),
        )
        .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn consumer_failure_still_closes_the_session() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_declare_queue()
            .returning(|def, _| Ok(def.name().to_owned()));
        session
            .expect_consume_until()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(AmqpError::ConsumerError("connection reset".to_owned())));
        session
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| ());

        let result = consume_on(
            &session,
            &Pattern::direct("q1"),
            noop_handler(),
            future::pending().boxed(),
        )
        .await;

        assert_eq!(
            result,
            Err(AmqpError::ConsumerError("connection reset".to_owned()))
        );
    }

    #[tokio::test]
    async fn publish_failure_still_closes_the_session() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(Confirmation::Nack(None)));
        session
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| ());

        let result = publish_on(&session, |publisher| async move {
            publisher
                .publish_raw(&Context::new(), "missing-x", "", b"b")
                .await
        })
        .await;

        assert_eq!(result, Err(AmqpError::PublishingError));
    }

    #[tokio::test]
    async fn successful_publish_closes_the_session_once() {
        let mut session = MockSession::new();
        let mut seq = Sequence::new();

        session
            .expect_declare_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|def, _| Ok(def.name().to_owned()));
        session
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(Confirmation::Ack(None)));
        session
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| ());

        let pattern = Pattern::direct("q1");
        let result = publish_on(&session, |publisher| async move {
            publisher.publish(&Context::new(), &pattern, "hello").await
        })
        .await;

        assert_eq!(result, Ok(()));
    }
}
