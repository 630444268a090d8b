// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module collects exchanges, queues and the bindings between them and declares them on
//! the broker. Declarations are idempotent on the broker side, so installing the same topology
//! again is safe; installing a definition that conflicts with an existing entity fails.
//!
//! Installation stops at the first failure without rolling back what was already declared.

use crate::{
    channel::AmqpChannel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error};

/// Queue argument naming the exchange that receives dead-lettered messages
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument overriding the routing key of dead-lettered messages
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument setting the message TTL in milliseconds
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument setting the maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";

/// A set of exchanges, queues and bindings to be declared together.
///
/// Entities are installed in this order: every exchange, then every queue, then every
/// binding, each group in registration order. Declaring all exchanges first means a queue's
/// dead-letter exchange always exists by the time the queue is declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

/// Outcome of [`AmqpTopology::install`]: the broker-side name of every declared queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledTopology {
    queue_names: HashMap<String, String>,
}

impl InstalledTopology {
    /// Returns the name the broker assigned to the queue registered as `name`.
    ///
    /// Use `""` to look up the (last declared) anonymous queue.
    pub fn queue_name(&self, name: &str) -> Option<&str> {
        self.queue_names.get(name).map(String::as_str)
    }
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Adds an exchange definition to the topology.
    ///
    /// # Parameters
    /// * `def` - Exchange definition to add
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    ///
    /// # Parameters
    /// * `def` - Queue definition to add
    ///
    /// # Returns
    /// Self for method chaining
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    ///
    /// A binding whose queue name is empty targets the anonymous queue of this topology.
    ///
    /// # Parameters
    /// * `binding` - Binding to add
    ///
    /// # Returns
    /// Self for method chaining
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Declares the whole topology on `channel`.
    pub async fn install(
        &self,
        channel: &dyn AmqpChannel,
    ) -> Result<InstalledTopology, AmqpError> {
        self.install_exchanges(channel).await?;
        let installed = self.install_queues(channel).await?;
        self.binding_queues(channel, &installed).await?;

        Ok(installed)
    }

    async fn install_exchanges(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match channel.declare_exchange(exch).await {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = %exch.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queues(
        &self,
        channel: &dyn AmqpChannel,
    ) -> Result<InstalledTopology, AmqpError> {
        let mut installed = InstalledTopology::default();

        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match channel.declare_queue(def, queue_args(def)).await {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = %def.name,
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                Ok(name) => {
                    debug!("queue: {} was created", name);
                    installed.queue_names.insert(def.name.clone(), name);
                    Ok(())
                }
            }?;
        }

        Ok(installed)
    }

    async fn binding_queues(
        &self,
        channel: &dyn AmqpChannel,
        installed: &InstalledTopology,
    ) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            let queue_name = installed
                .queue_name(&binding.queue_name)
                .unwrap_or(&binding.queue_name);

            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                queue_name, binding.exchange_name, binding.routing_key
            );

            match channel
                .bind_queue(queue_name, &binding.exchange_name, &binding.routing_key)
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        queue_name.to_owned(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}

/// Builds the `x-*` declaration arguments for a queue.
pub(crate) fn queue_args(def: &QueueDefinition) -> FieldTable {
    let mut args = BTreeMap::<ShortString, AMQPValue>::new();

    if let Some(ttl) = def.ttl {
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    if let Some(max) = def.max_length {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH),
            AMQPValue::LongInt(LongInt::from(max)),
        );
    }

    if let Some(exchange) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    if let Some(key) = &def.dead_letter_routing_key {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(key.clone())),
        );
    }

    FieldTable::from(args)
}
