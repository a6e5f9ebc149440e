//! The `events` module contains the [EventBus], a fan-out of new block notifications to every
//! live edge tracker.
//!
//! Each subscriber owns a bounded channel. A broadcast waits at most `send_timeout` per
//! subscriber, so a stalled tracker only misses that tick. Trackers re-read chain state on
//! every tick, so a missed notification is harmless.

use futures::future::join_all;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The [EventBus] struct broadcasts cloneable events to any number of subscribers.
#[derive(Debug)]
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    capacity: usize,
    send_timeout: Duration,
}

/// A handle receiving the events of an [EventBus]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next event.
    ///
    /// # Returns
    /// * `None` if `cancel` fired or the bus was dropped.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Creates a new [EventBus] whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            send_timeout,
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(sender);
        Subscription { receiver }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.is_closed());
        subscribers.len()
    }

    /// Sends `event` to every live subscriber concurrently.
    ///
    /// # Returns
    /// * The number of subscribers that received the event.
    pub async fn broadcast(&self, event: T) -> usize {
        let subscribers = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !s.is_closed());
            subscribers.clone()
        };
        let timeout = self.send_timeout;
        let sends = subscribers.iter().map(|subscriber| {
            let event = event.clone();
            async move {
                match tokio::time::timeout(timeout, subscriber.send(event)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => false,
                    Err(_) => {
                        tracing::debug!(target: "event-bus", "Subscriber did not accept event within {:?}, dropping it", timeout);
                        false
                    }
                }
            }
        });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let bus = EventBus::new(4, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.broadcast(1u64).await, 2);
        assert_eq!(first.next(&cancel).await, Some(1));
        assert_eq!(second.next(&cancel).await, Some(1));
    }

    #[tokio::test]
    async fn a_full_subscriber_misses_the_event_without_stalling_others() {
        let bus = EventBus::new(1, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let mut stalled = bus.subscribe();
        let mut live = bus.subscribe();

        assert_eq!(bus.broadcast(1u64).await, 2);
        assert_eq!(live.next(&cancel).await, Some(1));
        // `stalled` still holds the first event, so the second is dropped for it only.
        assert_eq!(bus.broadcast(2u64).await, 1);
        assert_eq!(live.next(&cancel).await, Some(2));
        assert_eq!(stalled.next(&cancel).await, Some(1));

        assert_eq!(bus.broadcast(3u64).await, 2);
        assert_eq!(stalled.next(&cancel).await, Some(3));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_and_cancellation_ends_waits() {
        let bus = EventBus::<u64>::new(1, Duration::from_millis(10));
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut kept = kept;
        assert_eq!(kept.next(&cancel).await, None);
    }
}
