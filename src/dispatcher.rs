// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Dispatcher
//!
//! Drains a consumer's delivery stream in a background task and hands each
//! delivery to the registered [`ConsumerHandler`].
//!
//! Deliveries whose correlation id does not match a configured filter are
//! dropped silently. Survivors are dispatched either:
//! - sequentially, awaiting the handler on the dispatch task itself, so
//!   handlers see deliveries one at a time in arrival order; or
//! - concurrently, spawning one task per delivery, with at most
//!   `max_in_flight` handlers running at once. Completion order is not
//!   guaranteed. When the bound is reached the loop waits for a free slot
//!   before reading the next delivery.
//!
//! The loop runs until the stream ends (channel or connection teardown) or the
//! [`ConsumerHandle`] stops it. Handler outcomes are never observed; a
//! panicking handler is logged and the loop moves on to the next delivery.

use crate::{
    channel::{Broker, DeliveryStream},
    delivery::Delivery,
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use opentelemetry::trace::Span;
use std::{
    fmt,
    future::{pending, Future},
    panic::AssertUnwindSafe,
    sync::Arc,
};
use tokio::{
    sync::{watch, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, error, trace};

/// Application code run for each delivery.
///
/// Failures are the handler's own business: settle the delivery (when
/// auto-ack is off), log, or dead-letter as needed.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery);
}

/// [`ConsumerHandler`] wrapping an async closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Turns an async closure into a handler.
///
/// ```ignore
/// let handler = handler_fn(|delivery: Delivery| async move {
///     println!("{:?}", delivery.body());
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<HandlerFn<F>>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

#[async_trait]
impl<F, Fut> ConsumerHandler for HandlerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) {
        (self.f)(delivery).await
    }
}

/// How deliveries are handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    Sequential,
    Concurrent { max_in_flight: u32 },
}

/// The background task serving one consumer.
pub(crate) struct DispatchLoop {
    pub(crate) queue: String,
    pub(crate) policy: DispatchPolicy,
    pub(crate) correlation_filter: String,
    pub(crate) auto_ack: bool,
    pub(crate) handler: Arc<dyn ConsumerHandler>,
}

impl DispatchLoop {
    /// Whether `delivery` passes the correlation filter.
    pub(crate) fn accepts(&self, delivery: &Delivery) -> bool {
        self.correlation_filter.is_empty()
            || delivery.correlation_id() == Some(self.correlation_filter.as_str())
    }

    /// Starts draining `deliveries` in the background.
    pub(crate) fn spawn(
        self,
        broker: Arc<dyn Broker>,
        consumer_tag: String,
        deliveries: DeliveryStream,
    ) -> ConsumerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(deliveries, stop_rx));

        ConsumerHandle {
            consumer_tag,
            broker,
            stop: stop_tx,
            task,
        }
    }

    async fn run(self, mut deliveries: DeliveryStream, mut stop: watch::Receiver<bool>) {
        let workers = match self.policy {
            DispatchPolicy::Concurrent { max_in_flight } => {
                Some((Arc::new(Semaphore::new(max_in_flight as usize)), max_in_flight))
            }
            DispatchPolicy::Sequential => None,
        };

        debug!(queue = self.queue, policy = ?self.policy, "dispatching deliveries");

        loop {
            let next = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                None => {
                    debug!(queue = self.queue, "delivery stream closed");
                    break;
                }
                Some(Err(err)) => {
                    error!(error = err.to_string(), "errors consume msg");
                    continue;
                }
                Some(Ok(delivery)) => delivery,
            };

            if !self.accepts(&delivery) {
                trace!(
                    queue = self.queue,
                    correlation_id = delivery.correlation_id(),
                    "dropping delivery with unexpected correlation id"
                );
                continue;
            }

            let delivery = if self.auto_ack {
                delivery.without_acker()
            } else {
                delivery
            };

            match &workers {
                None => dispatch(self.handler.clone(), &self.queue, delivery).await,
                Some((pool, _)) => {
                    let permit = tokio::select! {
                        biased;
                        _ = stopped(&mut stop) => break,
                        permit = pool.clone().acquire_owned() => permit,
                    };

                    let Ok(permit) = permit else {
                        break;
                    };

                    let handler = self.handler.clone();
                    let queue = self.queue.clone();
                    tokio::spawn(async move {
                        dispatch(handler, &queue, delivery).await;
                        drop(permit);
                    });
                }
            }
        }

        // Wait for handlers still running before reporting the consumer as done.
        if let Some((pool, max_in_flight)) = workers {
            let _ = pool.acquire_many(max_in_flight).await;
        }

        debug!(queue = self.queue, "dispatcher stopped");
    }
}

/// Resolves once a stop is requested. A dropped handle never stops the loop.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let requested = stop.wait_for(|value| *value).await.is_ok();
    if !requested {
        pending::<()>().await;
    }
}

async fn dispatch(handler: Arc<dyn ConsumerHandler>, queue: &str, delivery: Delivery) {
    let mut span = otel::new_span(&delivery.properties, queue);
    let delivery_tag = delivery.delivery_tag;

    if AssertUnwindSafe(handler.handle(delivery))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(queue, delivery_tag, "consumer handler panicked");
    }

    span.end();
}

/// Control over a running consumer.
///
/// Dropping the handle leaves the consumer running until its stream ends.
pub struct ConsumerHandle {
    consumer_tag: String,
    broker: Arc<dyn Broker>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Tag the broker knows this consumer by.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the consumer on the broker, stops dispatching and waits for
    /// in-flight handlers to return.
    ///
    /// The dispatcher is stopped even when the broker cancel fails; the
    /// cancel error is returned afterwards.
    pub async fn stop(self) -> Result<(), AmqpError> {
        let cancelled = self.broker.basic_cancel(&self.consumer_tag).await;
        if let Err(err) = &cancelled {
            error!(
                error = err.to_string(),
                consumer = self.consumer_tag,
                "failure to cancel consumer"
            );
        }

        self.stop.send_replace(true);
        self.task.await.map_err(AmqpError::DispatchError)?;

        cancelled.map_err(|err| AmqpError::CancelConsumerError(self.consumer_tag, err))
    }

    /// Waits for the delivery stream to end on its own.
    pub async fn closed(self) -> Result<(), AmqpError> {
        self.task.await.map_err(AmqpError::DispatchError)
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("consumer_tag", &self.consumer_tag)
            .field("finished", &self.is_finished())
            .finish()
    }
}
