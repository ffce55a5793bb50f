use super::hub::{ObservationHub, SubscriptionId};
use futures::Stream;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Value(T),
    /// Terminal: the subscription was released or the store closed.
    Unsubscribed,
}

impl<T> Event<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Event::Value(value) => Some(value),
            Event::Unsubscribed => None,
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        matches!(self, Event::Unsubscribed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// Released locally; `Unsubscribed` not yet handed out.
    Closing,
    Finished,
}

/// Handle to a live observation.
///
/// Values arrive in commit order on the subscription's own queue. Dropping
/// the handle releases the registry entry.
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: UnboundedReceiver<Event<T>>,
    hub: Weak<ObservationHub>,
    phase: Phase,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: UnboundedReceiver<Event<T>>,
        hub: Weak<ObservationHub>,
    ) -> Self {
        Self {
            id,
            receiver,
            hub,
            phase: Phase::Open,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Wait for the next event. Keeps returning `Unsubscribed` once finished.
    pub async fn next_event(&mut self) -> Event<T> {
        match self.phase {
            Phase::Open => {}
            Phase::Closing | Phase::Finished => {
                self.phase = Phase::Finished;
                return Event::Unsubscribed;
            }
        }
        match self.receiver.recv().await {
            Some(Event::Value(value)) => Event::Value(value),
            Some(Event::Unsubscribed) | None => {
                self.phase = Phase::Finished;
                Event::Unsubscribed
            }
        }
    }

    /// Next value, or `None` once the subscription has ended.
    pub async fn next_value(&mut self) -> Option<T> {
        self.next_event().await.into_value()
    }

    /// An already-queued event, if any.
    pub fn try_next_event(&mut self) -> Option<Event<T>> {
        match self.phase {
            Phase::Finished => return None,
            Phase::Closing => {
                self.phase = Phase::Finished;
                return Some(Event::Unsubscribed);
            }
            Phase::Open => {}
        }
        match self.receiver.try_recv() {
            Ok(Event::Value(value)) => Some(Event::Value(value)),
            Ok(Event::Unsubscribed) | Err(TryRecvError::Disconnected) => {
                self.phase = Phase::Finished;
                Some(Event::Unsubscribed)
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Release the observation. Queued values are discarded; the next event
    /// is `Unsubscribed`.
    pub fn unsubscribe(&mut self) {
        if self.phase != Phase::Open {
            return;
        }
        self.release();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        self.phase = Phase::Closing;
    }

    fn release(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if self.phase == Phase::Open {
            self.release();
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish()
    }
}

// No field is structurally pinned.
impl<T> Unpin for Subscription<T> {}

/// Yields every event including the terminal `Unsubscribed`, then ends.
impl<T> Stream for Subscription<T> {
    type Item = Event<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.phase {
            Phase::Finished => return Poll::Ready(None),
            Phase::Closing => {
                this.phase = Phase::Finished;
                return Poll::Ready(Some(Event::Unsubscribed));
            }
            Phase::Open => {}
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Event::Value(value))) => Poll::Ready(Some(Event::Value(value))),
            Poll::Ready(Some(Event::Unsubscribed)) | Poll::Ready(None) => {
                this.phase = Phase::Finished;
                Poll::Ready(Some(Event::Unsubscribed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
