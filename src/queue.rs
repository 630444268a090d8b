// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Types describing the queues this crate declares and the bindings that route messages from
//! exchanges into them. A queue can carry a message time-to-live and a dead-letter exchange,
//! which is how the dead-letter relay moves expired messages from its staging queue to its
//! live queue.

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// An empty name asks the broker to generate one; the generated name is resolved when the
/// topology is installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// Creates a definition for a queue whose name is generated by the broker.
    pub fn anonymous() -> QueueDefinition {
        QueueDefinition::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete once its last consumer goes away.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the declaring connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the message time-to-live for the queue, in milliseconds.
    ///
    /// Messages older than this are removed from the queue, or re-published to the
    /// dead-letter exchange when one is configured.
    ///
    /// # Parameters
    /// * `ttl` - TTL in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    ///
    /// # Parameters
    /// * `max` - Maximum number of messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Routes expired and rejected messages to the given exchange.
    ///
    /// # Parameters
    /// * `exchange` - Name of the dead-letter exchange
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Overrides the routing key used when a message is dead-lettered.
    /// The original routing key is kept when unset.
    ///
    /// # Parameters
    /// * `key` - Routing key for dead-lettered messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_routing_key(mut self, key: &str) -> Self {
        self.dead_letter_routing_key = Some(key.to_owned());
        self
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    ///
    /// # Parameters
    /// * `exchange` - Name of the exchange
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    ///
    /// # Parameters
    /// * `key` - Binding key
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_has_no_extra_settings() {
        let def = QueueDefinition::new("orders");

        assert_eq!(def.name(), "orders");
        assert!(!def.durable && !def.delete && !def.exclusive);
        assert_eq!(def.ttl, None);
        assert_eq!(def.dead_letter_exchange, None);
    }

    #[test]
    fn anonymous_queue_has_an_empty_name() {
        let def = QueueDefinition::anonymous().exclusive().delete();

        assert!(def.is_anonymous());
        assert!(def.exclusive && def.delete);
    }

    #[test]
    fn staging_queue_carries_ttl_and_dead_letter_target() {
        let def = QueueDefinition::new("staging")
            .durable()
            .ttl(1000)
            .dead_letter_exchange("live");

        assert_eq!(def.ttl, Some(1000));
        assert_eq!(def.dead_letter_exchange.as_deref(), Some("live"));
        assert_eq!(def.dead_letter_routing_key, None);
    }
}
