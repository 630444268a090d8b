// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Publish/consume helpers for RabbitMQ covering direct queues, exchange based pub/sub and a
//! dead-letter relay made of two fanout exchanges joined by a message TTL.
//!
//! Start from [`RabbitMQClient`]; the lower level modules are public for callers that need to
//! declare their own topology or drive a consumer on a channel they already own.

mod otel;

pub mod channel;
pub mod client;
pub mod configs;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod pattern;
pub mod publisher;
pub mod queue;
pub mod topology;

pub use client::RabbitMQClient;
pub use configs::RabbitMQConfigs;
pub use errors::AmqpError;
pub use exchange::ExchangeKind;
pub use handler::{ConsumerHandler, ConsumerMessage, HandlerError};
pub use pattern::{DeadLetterRelay, Pattern};
