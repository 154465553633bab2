// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Call Context
//!
//! A [`CallContext`] bounds a `publish` call: it can carry a deadline, a
//! cancellation signal and the OpenTelemetry context to propagate in the
//! message headers. Clones share the same cancellation signal, and a context
//! derived with [`CallContext::with_cancel`] is still cancelled by every signal
//! of the context it was derived from.

use crate::errors::AmqpError;
use futures_util::future::select_all;
use opentelemetry::Context;
use std::{future::pending, time::Duration};
use tokio::{sync::watch, time::Instant};

/// Cancels every [`CallContext`] created from the same `with_cancel` call.
#[derive(Debug)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
}

impl CancelSignal {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    trace: Context,
    deadline: Option<Instant>,
    cancelled: Vec<watch::Receiver<bool>>,
}

impl CallContext {
    /// A context that never expires and cannot be cancelled.
    pub fn new() -> CallContext {
        CallContext::default()
    }

    /// Propagates `trace` in the headers of published messages.
    pub fn with_trace(mut self, trace: Context) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attaches a new cancellation signal and returns its trigger.
    ///
    /// Signals already attached keep cancelling the returned context.
    pub fn with_cancel(mut self) -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        self.cancelled.push(rx);
        (self, CancelSignal { tx })
    }

    pub fn trace(&self) -> &Context {
        &self.trace
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it already is.
    pub fn err(&self) -> Option<AmqpError> {
        if self.cancelled.iter().any(|rx| *rx.borrow()) {
            return Some(AmqpError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(AmqpError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context with neither.
    pub async fn done(&self) -> AmqpError {
        let cancelled = async {
            if self.cancelled.is_empty() {
                pending::<()>().await;
            }
            select_all(self.cancelled.iter().cloned().map(|rx| Box::pin(fired(rx)))).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => AmqpError::Cancelled,
            _ = expired => AmqpError::DeadlineExceeded,
        }
    }
}

/// Resolves once `rx` reports a cancel. A dropped signal never fires.
async fn fired(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_done() {
        assert!(CallContext::new().err().is_none());
    }

    #[test]
    fn cancel_is_seen_by_clones() {
        let (ctx, signal) = CallContext::new().with_cancel();
        let clone = ctx.clone();

        signal.cancel();

        assert!(matches!(ctx.err(), Some(AmqpError::Cancelled)));
        assert!(matches!(clone.err(), Some(AmqpError::Cancelled)));
    }

    #[test]
    fn derived_context_keeps_parent_cancel() {
        let (parent, parent_signal) = CallContext::new().with_cancel();
        let (child, _child_signal) = parent.clone().with_cancel();

        parent_signal.cancel();

        assert!(matches!(parent.err(), Some(AmqpError::Cancelled)));
        assert!(matches!(child.err(), Some(AmqpError::Cancelled)));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let (parent, _parent_signal) = CallContext::new().with_cancel();
        let (child, child_signal) = parent.clone().with_cancel();

        child_signal.cancel();

        assert!(parent.err().is_none());
        assert!(matches!(child.err(), Some(AmqpError::Cancelled)));
    }

    #[tokio::test]
    async fn done_resolves_on_parent_cancel() {
        let (parent, parent_signal) = CallContext::new().with_cancel();
        let (child, _child_signal) = parent.with_cancel();

        let waiter = tokio::spawn(async move { child.done().await });
        tokio::task::yield_now().await;
        parent_signal.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, AmqpError::Cancelled));
    }

    #[test]
    fn earliest_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(10))
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(5));

        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn done_resolves_on_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(10));
        assert!(matches!(ctx.done().await, AmqpError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(AmqpError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn done_resolves_on_cancel() {
        let (ctx, signal) = CallContext::new().with_cancel();

        let waiter = tokio::spawn(async move { ctx.done().await });
        tokio::task::yield_now().await;
        signal.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, AmqpError::Cancelled));
    }

    #[tokio::test]
    async fn dropped_signal_never_cancels() {
        let (ctx, signal) = CallContext::new().with_cancel();
        drop(signal);

        let result = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(result.is_err());
        assert!(ctx.err().is_none());
    }
}
