// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! A `ConsumerHandler` is invoked once per delivered message. Its result decides what happens
//! to the message on the broker:
//!
//! | handler result               | broker action                                  |
//! |------------------------------|------------------------------------------------|
//! | `Ok(())`                     | ack                                            |
//! | `Err(HandlerError::Requeue)` | nack, requeued for redelivery                  |
//! | `Err(HandlerError::Reject)`  | nack without requeue (dead-lettered if the queue has a dead-letter exchange) |
//!
//! Plain closures `Fn(&ConsumerMessage) -> Result<(), HandlerError>` are handlers too.

use async_trait::async_trait;
use opentelemetry::Context;
use thiserror::Error;

/// A message delivered to a consumer, with its body decoded as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    /// Queue the message was consumed from.
    pub queue: String,
    pub body: String,
    /// The body exactly as received.
    pub data: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl ConsumerMessage {
    pub fn new(queue: &str, body: &str, delivery_tag: u64, redelivered: bool) -> ConsumerMessage {
        ConsumerMessage {
            queue: queue.to_owned(),
            body: body.to_owned(),
            data: body.as_bytes().to_vec(),
            delivery_tag,
            redelivered,
        }
    }
}

/// Failure outcome of a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Processing failed but may succeed later: the message goes back to the queue.
    #[error("transient handler failure `{0}`")]
    Requeue(String),

    /// Processing can never succeed: the message is dropped or dead-lettered.
    #[error("fatal handler failure `{0}`")]
    Reject(String),
}

/// Processes messages delivered to a consumer.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Handles one message. `ctx` carries the trace context propagated by the publisher.
    async fn exec(&self, ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&ConsumerMessage) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, msg: &ConsumerMessage) -> Result<(), HandlerError> {
        (self)(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn closures_are_handlers() {
        let seen = Arc::new(Mutex::new(vec![]));
        let handler = {
            let seen = seen.clone();
            move |msg: &ConsumerMessage| -> Result<(), HandlerError> {
                seen.lock().unwrap().push(msg.body.clone());
                Ok(())
            }
        };

        let result = handler
            .exec(&Context::new(), &ConsumerMessage::new("q1", "hello", 1, false))
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_owned()]);
    }

    #[tokio::test]
    async fn closure_errors_are_returned() {
        let handler = |_: &ConsumerMessage| -> Result<(), HandlerError> {
            Err(HandlerError::Reject("bad".into()))
        };

        let result = handler
            .exec(&Context::new(), &ConsumerMessage::new("q1", "hello", 1, false))
            .await;

        assert_eq!(result, Err(HandlerError::Reject("bad".into())));
    }

    #[test]
    fn message_keeps_the_raw_bytes() {
        let msg = ConsumerMessage::new("q1", "héllo", 7, true);

        assert_eq!(msg.data, "héllo".as_bytes());
        assert_eq!(msg.delivery_tag, 7);
        assert!(msg.redelivered);
    }
}
