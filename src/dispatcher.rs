// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! Runs the delivery loop of one subscription. The loop runs on its own tokio task and the
//! caller awaits it. Deliveries are handled strictly one at a time, in the order the broker sent
//! them; each one is acked or nacked before the next handler call starts.
//!
//! The loop ends when:
//! - the shutdown future resolves (the current message is finished first),
//! - the broker closes the delivery stream,
//! - the stream yields an error or an ack/nack cannot be sent,
//! - the handler panics.
//!
//! Only the first two are a clean exit; every other cause is returned as an `AmqpError`.

use crate::{
    consumer::{consume, InboundDelivery},
    errors::AmqpError,
    handler::ConsumerHandler,
    otel,
};
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::{fmt::Display, future::Future, sync::Arc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a delivery loop stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchEnd {
    Shutdown,
    StreamClosed,
}

/// Consumer of one queue on an open channel.
pub struct RabbitMQDispatcher {
    channel: Arc<Channel>,
    queue: String,
    handler: Arc<dyn ConsumerHandler>,
}

impl RabbitMQDispatcher {
    pub fn new(
        channel: Arc<Channel>,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
    ) -> RabbitMQDispatcher {
        RabbitMQDispatcher {
            channel,
            queue: queue.to_owned(),
            handler,
        }
    }

    /// Subscribes to the queue with manual acknowledgement and dispatches deliveries to the
    /// handler until `shutdown` resolves or the subscription ends.
    pub async fn consume_until<F>(self, shutdown: F) -> Result<(), AmqpError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let consumer_tag = Uuid::new_v4().to_string();

        let consumer = match self
            .channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = %self.queue,
                    "error to create the consumer"
                );
                Err(AmqpError::CreatingConsumerError(self.queue.clone()))
            }
            Ok(c) => Ok(c),
        }?;

        info!(queue = %self.queue, "waiting for messages");

        match spawn_dispatch(consumer, self.queue.clone(), self.handler, shutdown).await? {
            DispatchEnd::Shutdown => {
                if let Err(err) = self
                    .channel
                    .basic_cancel(&consumer_tag, BasicCancelOptions { nowait: false })
                    .await
                {
                    warn!(error = err.to_string(), "error to cancel the consumer");
                }
                Ok(())
            }
            DispatchEnd::StreamClosed => Ok(()),
        }
    }
}

/// Runs [`dispatch`] on its own task and waits for it.
///
/// A task that dies, e.g. because the handler panicked, is reported as
/// `AmqpError::DispatchError`.
pub(crate) async fn spawn_dispatch<S, D, E, F>(
    deliveries: S,
    queue: String,
    handler: Arc<dyn ConsumerHandler>,
    shutdown: F,
) -> Result<DispatchEnd, AmqpError>
where
    S: Stream<Item = Result<D, E>> + Unpin + Send + 'static,
    D: InboundDelivery + 'static,
    E: Display + Send + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::spawn(dispatch(deliveries, queue, handler, shutdown)).await {
        Ok(result) => result,
        Err(err) => {
            error!(error = err.to_string(), "dispatch task failure");
            Err(AmqpError::DispatchError(err.to_string()))
        }
    }
}

/// The delivery loop itself.
pub(crate) async fn dispatch<S, D, E, F>(
    mut deliveries: S,
    queue: String,
    handler: Arc<dyn ConsumerHandler>,
    shutdown: F,
) -> Result<DispatchEnd, AmqpError>
where
    S: Stream<Item = Result<D, E>> + Unpin,
    D: InboundDelivery,
    E: Display,
    F: Future<Output = ()>,
{
    let tracer = global::tracer(otel::TRACER_NAME);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // a pending shutdown wins over new deliveries
            biased;

            _ = &mut shutdown => {
                info!(queue = %queue, "consumer received shutdown event");
                return Ok(DispatchEnd::Shutdown);
            }

            next = deliveries.next() => match next {
                None => {
                    debug!(queue = %queue, "delivery stream closed");
                    return Ok(DispatchEnd::StreamClosed);
                }
                Some(Err(err)) => {
                    error!(error = err.to_string(), "errors consume msg");
                    return Err(AmqpError::ConsumerError(err.to_string()));
                }
                Some(Ok(delivery)) => {
                    let result = consume(&tracer, &queue, &delivery, handler.as_ref()).await;
                    if let Err(err) = result {
                        error!(error = err.to_string(), "error consume msg");
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::tests::FakeDelivery,
        handler::{ConsumerMessage, HandlerError},
    };
    use futures_util::stream;
    use std::{
        future::pending,
        sync::{Arc, Mutex},
    };

    type Events = Arc<Mutex<Vec<String>>>;

    fn recording_handler(events: &Events) -> Arc<dyn ConsumerHandler> {
        let events = events.clone();
        Arc::new(move |msg: &ConsumerMessage| -> Result<(), HandlerError> {
            events
                .lock()
                .unwrap()
                .push(format!("handle:{}", msg.delivery_tag));
            Ok(())
        })
    }

    fn deliveries(events: &Events, count: u64) -> Vec<Result<FakeDelivery, String>> {
        (1..=count)
            .map(|tag| {
                let body = format!("msg-{}", tag);
                Ok(FakeDelivery::new(tag, body.as_bytes(), events))
            })
            .collect()
    }

    #[tokio::test]
    async fn handles_and_acks_one_message_at_a_time_in_order() {
        let events = Events::default();
        let stream = stream::iter(deliveries(&events, 3));

        let end =
            spawn_dispatch(stream, "q1".into(), recording_handler(&events), pending()).await;

        assert_eq!(end, Ok(DispatchEnd::StreamClosed));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["handle:1", "ack:1", "handle:2", "ack:2", "handle:3", "ack:3"]
        );
    }

    #[tokio::test]
    async fn delivers_the_exact_body_once() {
        let events = Events::default();
        let bodies = Arc::new(Mutex::new(vec![]));
        let handler: Arc<dyn ConsumerHandler> = {
            let bodies = bodies.clone();
            Arc::new(move |msg: &ConsumerMessage| -> Result<(), HandlerError> {
                bodies.lock().unwrap().push(msg.data.clone());
                Ok(())
            })
        };
        let stream = stream::iter(vec![Ok::<_, String>(FakeDelivery::new(
            1, b"hello", &events,
        ))]);

        spawn_dispatch(stream, "q1".into(), handler, pending())
            .await
            .unwrap();

        assert_eq!(*bodies.lock().unwrap(), vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn non_utf8_bodies_are_handed_to_the_handler() {
        let events = Events::default();
        let stream = stream::iter(vec![Ok::<_, String>(FakeDelivery::new(
            1,
            &[0xff, 0xfe],
            &events,
        ))]);

        let end =
            spawn_dispatch(stream, "q1".into(), recording_handler(&events), pending()).await;

        assert_eq!(end, Ok(DispatchEnd::StreamClosed));
        assert_eq!(*events.lock().unwrap(), vec!["handle:1", "ack:1"]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let events = Events::default();
        let stream = stream::pending::<Result<FakeDelivery, String>>();

        let end =
            spawn_dispatch(stream, "q1".into(), recording_handler(&events), async {}).await;

        assert_eq!(end, Ok(DispatchEnd::Shutdown));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_observed_between_messages() {
        let events = Events::default();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let handler: Arc<dyn ConsumerHandler> = {
            let events = events.clone();
            Arc::new(move |msg: &ConsumerMessage| -> Result<(), HandlerError> {
                events
                    .lock()
                    .unwrap()
                    .push(format!("handle:{}", msg.delivery_tag));
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                Ok(())
            })
        };
        let stream = stream::iter(deliveries(&events, 3));

        let end = spawn_dispatch(stream, "q1".into(), handler, async {
            let _ = rx.await;
        })
        .await;

        assert_eq!(end, Ok(DispatchEnd::Shutdown));
        assert_eq!(*events.lock().unwrap(), vec!["handle:1", "ack:1"]);
    }

    #[tokio::test]
    async fn stream_errors_end_the_loop() {
        let events = Events::default();
        let mut items = deliveries(&events, 1);
        items.push(Err("connection reset".to_owned()));
        items.extend(deliveries(&events, 1));

        let end = spawn_dispatch(
            stream::iter(items),
            "q1".into(),
            recording_handler(&events),
            pending(),
        )
        .await;

        assert_eq!(
            end,
            Err(AmqpError::ConsumerError("connection reset".to_owned()))
        );
        assert_eq!(*events.lock().unwrap(), vec!["handle:1", "ack:1"]);
    }

    #[tokio::test]
    async fn ack_failures_end_the_loop() {
        let events = Events::default();
        let mut items = deliveries(&events, 2);
        if let Some(Ok(first)) = items.first_mut() {
            first.fail_ack = true;
        }

        let end = spawn_dispatch(
            stream::iter(items),
            "q1".into(),
            recording_handler(&events),
            pending(),
        )
        .await;

        assert_eq!(end, Err(AmqpError::AckMessageError));
        assert_eq!(*events.lock().unwrap(), vec!["handle:1"]);
    }

    #[tokio::test]
    async fn rejected_messages_do_not_stop_the_loop() {
        let events = Events::default();
        let handler: Arc<dyn ConsumerHandler> = Arc::new(
            |msg: &ConsumerMessage| -> Result<(), HandlerError> {
                if msg.delivery_tag == 1 {
                    Err(HandlerError::Reject("bad".into()))
                } else {
                    Ok(())
                }
            },
        );

        let end = spawn_dispatch(
            stream::iter(deliveries(&events, 2)),
            "q1".into(),
            handler,
            pending(),
        )
        .await;

        assert_eq!(end, Ok(DispatchEnd::StreamClosed));
        assert_eq!(*events.lock().unwrap(), vec!["nack:1:false", "ack:2"]);
    }

    #[tokio::test]
    async fn handler_panics_are_reported() {
        let events = Events::default();
        let handler: Arc<dyn ConsumerHandler> = Arc::new(
            |_: &ConsumerMessage| -> Result<(), HandlerError> { panic!("handler blew up") },
        );

        let end = spawn_dispatch(
            stream::iter(deliveries(&events, 1)),
            "q1".into(),
            handler,
            pending(),
        )
        .await;

        assert!(matches!(end, Err(AmqpError::DispatchError(_))));
        assert!(events.lock().unwrap().is_empty());
    }
}
