//! Settle-once completion handles.
//!
//! A [`Completion`] is owned by an endpoint or session and settled exactly
//! once when it finalizes. Every call to `close()` or `closed()` hands out a
//! [`Closed`] observing the same slot.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;

use super::error::CloseError;

/// Final outcome of an endpoint or session.
pub type CloseOutcome = Result<(), CloseError>;

#[derive(Debug)]
struct Slot {
    tx: watch::Sender<Option<CloseOutcome>>,
}

/// Writer side, held by the entity that finalizes.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    slot: Arc<Slot>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            slot: Arc::new(Slot { tx }),
        }
    }

    /// Store `outcome` unless already settled. Returns whether it was stored.
    pub(crate) fn settle(&self, outcome: CloseOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.slot.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub(crate) fn closed(&self) -> Closed {
        Closed {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Pending close of an endpoint or session.
///
/// Await it (it implements [`IntoFuture`]) to learn how the entity ended.
/// Clones observe the same outcome.
#[derive(Debug, Clone)]
pub struct Closed {
    slot: Arc<Slot>,
}

impl Closed {
    /// Whether both handles observe the same entity's close.
    pub fn same_as(&self, other: &Closed) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Whether the outcome is known.
    pub fn is_settled(&self) -> bool {
        self.slot.tx.borrow().is_some()
    }

    /// The outcome, if already settled.
    pub fn outcome(&self) -> Option<CloseOutcome> {
        self.slot.tx.borrow().clone()
    }

    /// Wait for the outcome.
    pub async fn wait(&self) -> CloseOutcome {
        let mut rx = self.slot.tx.subscribe();
        // The sender lives in `slot`, which we hold, so this cannot fail.
        let _ = rx.wait_for(Option::is_some).await;
        self.slot.tx.borrow().clone().unwrap_or(Ok(()))
    }
}

impl IntoFuture for Closed {
    type Output = CloseOutcome;
    type IntoFuture = Pin<Box<dyn Future<Output = CloseOutcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CloseContext;

    #[test]
    fn test_settle_once() {
        let completion = Completion::new();
        let closed = completion.closed();
        assert!(!closed.is_settled());
        assert!(closed.outcome().is_none());

        assert!(completion.settle(Ok(())));
        assert!(!completion.settle(Err(CloseError::EndpointClosed {
            context: CloseContext::SendFailure,
            status: -1,
        })));

        assert!(completion.closed().is_settled());
        assert!(matches!(closed.outcome(), Some(Ok(()))));
    }

    #[test]
    fn test_same_slot() {
        let a = Completion::new();
        let b = Completion::new();
        assert!(a.closed().same_as(&a.closed()));
        assert!(!a.closed().same_as(&b.closed()));
    }

    #[tokio::test]
    async fn test_await_after_settle() {
        let completion = Completion::new();
        let closed = completion.closed();
        let waiter = tokio::spawn(closed.clone().into_future());

        completion.settle(Err(CloseError::EndpointClosed {
            context: CloseContext::BindFailure,
            status: -98,
        }));

        let outcome = waiter.await.unwrap();
        assert!(matches!(
            outcome,
            Err(CloseError::EndpointClosed { status: -98, .. })
        ));
        // Late observers see the same outcome.
        assert!(closed.await.is_err());
    }
}
