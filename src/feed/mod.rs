//! Market event feed.
//!
//! Any number of producers push bars and quotes through cloned
//! [`FeedHandle`]s; a single [`EventFeed`] consumer hands them to the session
//! one at a time.

use crate::market::{Bar, MarketEvent, Quote};
use thiserror::Error;
use tokio::sync::mpsc;

/// The consuming side has gone away.
#[derive(Debug, Error, PartialEq)]
#[error("event feed closed")]
pub struct FeedClosed;

/// Producer handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<MarketEvent>,
}

impl FeedHandle {
    pub async fn send(&self, event: MarketEvent) -> Result<(), FeedClosed> {
        self.tx.send(event).await.map_err(|_| FeedClosed)
    }

    pub async fn bar(&self, bar: Bar) -> Result<(), FeedClosed> {
        self.send(MarketEvent::Bar(bar)).await
    }

    pub async fn quote(&self, quote: Quote) -> Result<(), FeedClosed> {
        self.send(MarketEvent::Quote(quote)).await
    }
}

/// Single consumer of the feed.
#[derive(Debug)]
pub struct EventFeed {
    rx: mpsc::Receiver<MarketEvent>,
}

impl EventFeed {
    /// Next event, or `None` once every handle is dropped and the queue drained.
    pub async fn next(&mut self) -> Option<MarketEvent> {
        self.rx.recv().await
    }
}

/// Create a bounded feed; producers wait when `capacity` events are queued.
pub fn channel(capacity: usize) -> (FeedHandle, EventFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedHandle { tx }, EventFeed { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InstrumentId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(k: usize) -> Bar {
        Bar {
            instrument: InstrumentId(k),
            open_time: Utc::now(),
            open: dec!(1),
            high: dec!(1.1),
            low: dec!(0.9),
            close: dec!(1),
        }
    }

    #[tokio::test]
    async fn test_events_from_many_producers_reach_one_consumer() {
        let (handle, mut feed) = channel(16);

        let mut tasks = Vec::new();
        for k in 0..3 {
            let producer = handle.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    producer.bar(bar(k)).await.unwrap();
                }
            }));
        }
        drop(handle);
        for task in tasks {
            task.await.unwrap();
        }

        let mut received = 0;
        while let Some(event) = feed.next().await {
            assert!(event.instrument().index() < 3);
            received += 1;
        }
        assert_eq!(received, 15);
    }

    #[tokio::test]
    async fn test_per_producer_order_preserved() {
        let (handle, mut feed) = channel(8);
        for k in 0..4 {
            handle.bar(bar(k)).await.unwrap();
        }
        drop(handle);

        for k in 0..4 {
            assert_eq!(feed.next().await.unwrap().instrument(), InstrumentId(k));
        }
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_consumer_dropped() {
        let (handle, feed) = channel(1);
        drop(feed);
        assert_eq!(handle.bar(bar(0)).await, Err(FeedClosed));
    }
}
