// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messaging Patterns
//!
//! The three messaging patterns supported by [`RabbitMQClient`](crate::client::RabbitMQClient)
//! and the broker topology each one needs:
//!
//! - `Direct`: one durable queue, published to through the default exchange.
//! - `PubSub`: one durable exchange of any type; every consumer gets its own exclusive,
//!   auto-delete queue with a broker-generated name bound with a routing key.
//! - `DeadLetter`: a relay built from two fanout exchanges. Messages published to exchange A
//!   wait in queue A until their TTL expires, then the broker dead-letters them to exchange B
//!   and they land in queue B, where they are consumed.

use crate::{
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    topology::AmqpTopology,
};

/// Names and TTL of a dead-letter relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRelay {
    pub exchange_a: String,
    pub queue_a: String,
    pub exchange_b: String,
    pub queue_b: String,
    /// How long a message stays in queue A before being relayed, in milliseconds.
    pub ttl_ms: i32,
}

impl DeadLetterRelay {
    /// Describes a relay from `exchange_a` to `exchange_b`.
    ///
    /// # Parameters
    /// * `exchange_a` - Entry exchange, where messages are published
    /// * `queue_a` - Staging queue, where messages wait for `ttl_ms`
    /// * `exchange_b` - Dead-letter exchange of `queue_a`
    /// * `queue_b` - Live queue, where relayed messages are consumed
    /// * `ttl_ms` - Time a message spends in `queue_a`, in milliseconds
    pub fn new(
        exchange_a: &str,
        queue_a: &str,
        exchange_b: &str,
        queue_b: &str,
        ttl_ms: i32,
    ) -> DeadLetterRelay {
        DeadLetterRelay {
            exchange_a: exchange_a.to_owned(),
            queue_a: queue_a.to_owned(),
            exchange_b: exchange_b.to_owned(),
            queue_b: queue_b.to_owned(),
            ttl_ms,
        }
    }

    /// Both exchanges, both queues and both bindings of the relay.
    pub fn topology(&self) -> AmqpTopology {
        AmqpTopology::new()
            .exchange(ExchangeDefinition::new(&self.exchange_a).fanout().durable())
            .exchange(ExchangeDefinition::new(&self.exchange_b).fanout().durable())
            .queue(
                QueueDefinition::new(&self.queue_a)
                    .durable()
                    .ttl(self.ttl_ms)
                    .dead_letter_exchange(&self.exchange_b),
            )
            .queue(QueueDefinition::new(&self.queue_b).durable())
            .queue_binding(QueueBinding::new(&self.queue_a).exchange(&self.exchange_a))
            .queue_binding(QueueBinding::new(&self.queue_b).exchange(&self.exchange_b))
    }
}

/// A messaging pattern and the names it operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Direct {
        queue: String,
    },
    PubSub {
        exchange: String,
        kind: ExchangeKind,
        routing_key: String,
    },
    DeadLetter(DeadLetterRelay),
}

impl Pattern {
    pub fn direct(queue: &str) -> Pattern {
        Pattern::Direct {
            queue: queue.to_owned(),
        }
    }

    pub fn pub_sub(exchange: &str, kind: ExchangeKind, routing_key: &str) -> Pattern {
        Pattern::PubSub {
            exchange: exchange.to_owned(),
            kind,
            routing_key: routing_key.to_owned(),
        }
    }

    pub fn dead_letter(relay: DeadLetterRelay) -> Pattern {
        Pattern::DeadLetter(relay)
    }

    /// Exchange and routing key a publisher sends to.
    pub fn publish_target(&self) -> (&str, &str) {
        match self {
            Pattern::Direct { queue } => ("", queue.as_str()),
            Pattern::PubSub {
                exchange,
                routing_key,
                ..
            } => (exchange.as_str(), routing_key.as_str()),
            Pattern::DeadLetter(relay) => (relay.exchange_a.as_str(), ""),
        }
    }

    /// Entities declared before publishing.
    ///
    /// The dead-letter producer publishes straight to exchange A and relies on the consumer
    /// side having declared the relay.
    pub fn publish_topology(&self) -> AmqpTopology {
        match self {
            Pattern::Direct { queue } => {
                AmqpTopology::new().queue(QueueDefinition::new(queue).durable())
            }
            Pattern::PubSub { exchange, kind, .. } => AmqpTopology::new()
                .exchange(ExchangeDefinition::new(exchange).kind(kind.clone()).durable()),
            Pattern::DeadLetter(_) => AmqpTopology::new(),
        }
    }

    /// Entities declared before consuming.
    pub fn consume_topology(&self) -> AmqpTopology {
        match self {
            Pattern::Direct { queue } => {
                AmqpTopology::new().queue(QueueDefinition::new(queue).durable())
            }
            Pattern::PubSub {
                exchange,
                kind,
                routing_key,
            } => AmqpTopology::new()
                .exchange(ExchangeDefinition::new(exchange).kind(kind.clone()).durable())
                .queue(QueueDefinition::anonymous().exclusive().delete())
                .queue_binding(
                    QueueBinding::new("")
                        .exchange(exchange)
                        .routing_key(routing_key),
                ),
            Pattern::DeadLetter(relay) => relay.topology(),
        }
    }

    /// Queue the consumer subscribes to, as registered in [`Pattern::consume_topology`].
    ///
    /// Empty for `PubSub`, whose queue name is generated by the broker. The dead-letter relay
    /// is always consumed from queue B; queue A only holds messages that have not expired yet.
    pub fn consume_queue(&self) -> &str {
        match self {
            Pattern::Direct { queue } => queue.as_str(),
            Pattern::PubSub { .. } => "",
            Pattern::DeadLetter(relay) => relay.queue_b.as_str(),
        }
    }
}
