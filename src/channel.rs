// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! Every public operation of this crate opens its own connection and channel, uses them, and
//! closes both before returning. `AmqpSession` bundles that pair and guarantees the close
//! sequence (channel first, then connection) runs exactly once.
//!
//! The broker calls issued on an open channel go through the `AmqpChannel` trait, and the
//! session itself is an `AmqpConnection`, so the topology, publishing and session handling
//! logic can be exercised without a broker.
//!
//! Publishing sessions run in confirm mode: a publish only succeeds once the broker has acked
//! the message.

use crate::{
    configs::RabbitMQConfigs, dispatcher::RabbitMQDispatcher, errors::AmqpError,
    exchange::ExchangeDefinition, handler::ConsumerHandler, queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use lapin::{
    options::{
        BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reply code sent to the broker when closing channels and connections normally.
const REPLY_SUCCESS: u16 = 200;

/// Broker operations issued on an open channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Declares the exchange described by `def`.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), lapin::Error>;

    /// Declares the queue described by `def` with the given arguments, returning the name the
    /// broker assigned to it (which differs from `def` only for anonymous queues).
    async fn declare_queue(
        &self,
        def: &QueueDefinition,
        args: FieldTable,
    ) -> Result<String, lapin::Error>;

    /// Binds `queue` to `exchange` using `routing_key`.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error>;

    /// Publishes `payload` to `exchange` with `routing_key` and waits for the broker's
    /// confirmation. On a channel without confirm mode the result is
    /// `Confirmation::NotRequested`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, lapin::Error>;
}

/// An open session with the broker: the calls of its channel plus subscribing and closing.
#[async_trait]
pub trait AmqpConnection: AmqpChannel {
    /// Subscribes to `queue` and dispatches its deliveries to `handler` until `shutdown`
    /// resolves or the subscription ends.
    async fn consume_until(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), AmqpError>;

    /// Closes the channel and then the connection.
    ///
    /// Must be called exactly once. Close failures are logged and otherwise ignored: the
    /// broker drops the channel together with the connection anyway.
    async fn close(&self);
}

#[async_trait]
impl AmqpChannel for Channel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), lapin::Error> {
        self.exchange_declare(
            &def.name,
            def.kind.clone().into(),
            ExchangeDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                auto_delete: def.delete,
                internal: def.internal,
                nowait: def.no_wait,
            },
            FieldTable::from(def.params.clone()),
        )
        .await
    }

    async fn declare_queue(
        &self,
        def: &QueueDefinition,
        args: FieldTable,
    ) -> Result<String, lapin::Error> {
        let queue = self
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                args,
            )
            .await?;

        Ok(queue.name().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, lapin::Error> {
        self.basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            payload,
            properties,
        )
        .await?
        .await
    }
}

/// One connection to the broker and the single channel opened on it.
pub struct AmqpSession {
    conn: Connection,
    channel: Arc<Channel>,
}

impl AmqpSession {
    /// Connects to the broker described by `cfg` and opens a channel.
    ///
    /// When `cfg.prefetch` is set the channel's QoS is configured before returning. If any step
    /// after the dial fails, whatever was already opened is closed before the error is returned.
    ///
    /// # Parameters
    /// * `cfg` - Broker address, credentials and channel settings
    ///
    /// # Returns
    /// The open session, or the error of the first step that failed
    pub async fn open(cfg: &RabbitMQConfigs) -> Result<AmqpSession, AmqpError> {
        debug!(host = %cfg.host, port = cfg.port, "creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let conn = match Connection::connect_uri(cfg.amqp_uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }?;
        debug!("amqp connected");

        debug!("creating amqp channel...");
        let channel = match conn.create_channel().await {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                close_connection(&conn).await;
                return Err(AmqpError::ChannelError);
            }
        };
        debug!("channel created");

        let session = AmqpSession {
            conn,
            channel: Arc::new(channel),
        };

        if let Some(prefetch) = cfg.prefetch {
            let qos = session
                .channel
                .basic_qos(prefetch, BasicQosOptions { global: false })
                .await;

            if let Err(err) = qos {
                error!(error = err.to_string(), prefetch, "error to configure qos");
                session.close().await;
                return Err(AmqpError::QoSDeclarationError(prefetch.to_string()));
            }
        }

        Ok(session)
    }

    /// Like [`AmqpSession::open`], with publisher confirms enabled on the channel.
    pub async fn open_publisher(cfg: &RabbitMQConfigs) -> Result<AmqpSession, AmqpError> {
        let session = AmqpSession::open(cfg).await?;

        let confirm = session
            .channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await;

        if let Err(err) = confirm {
            error!(error = err.to_string(), "error to enable publisher confirms");
            session.close().await;
            return Err(AmqpError::ChannelError);
        }

        Ok(session)
    }
}

#[async_trait]
impl AmqpChannel for AmqpSession {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), lapin::Error> {
        self.channel.declare_exchange(def).await
    }

    async fn declare_queue(
        &self,
        def: &QueueDefinition,
        args: FieldTable,
    ) -> Result<String, lapin::Error> {
        self.channel.declare_queue(def, args).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error> {
        self.channel.bind_queue(queue, exchange, routing_key).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, lapin::Error> {
        self.channel
            .publish(exchange, routing_key, payload, properties)
            .await
    }
}

#[async_trait]
impl AmqpConnection for AmqpSession {
    async fn consume_until(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), AmqpError> {
        RabbitMQDispatcher::new(self.channel.clone(), queue, handler)
            .consume_until(shutdown)
            .await
    }

    async fn close(&self) {
        debug!("closing amqp channel...");
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = err.to_string(), "error to close the channel");
        }

        close_connection(&self.conn).await;
    }
}

async fn close_connection(conn: &Connection) {
    debug!("closing amqp connection...");
    if let Err(err) = conn.close(REPLY_SUCCESS, "OK").await {
        warn!(error = err.to_string(), "error to close the connection");
    }
}
