//! Wires a Join discipline directly into a Priority discipline: batches of
//! ten scalar items are unpacked and each item resubmitted with a priority
//! derived from its value, then drained in priority order.

use flowctl::divider::Rate as RateDivider;
use flowctl::join::{Join, JoinConfig};
use flowctl::priority::{Priority, PriorityConfig};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let (items_tx, items_rx) = mpsc::channel(32);
    let mut join = Join::new(JoinConfig::new(items_rx, 10)).unwrap();

    tokio::spawn(async move {
        for i in 1..=30u64 {
            items_tx.send(i).await.unwrap();
        }
    });

    let (high_tx, high_rx) = mpsc::channel(32);
    let (mid_tx, mid_rx) = mpsc::channel(32);
    let (low_tx, low_rx) = mpsc::channel(32);

    let feeder = tokio::spawn(async move {
        while let Some(batch) = join.output().recv().await {
            for item in batch.into_inner() {
                let priority = 1 + (item % 3);
                let sent = match priority {
                    3 => high_tx.send(item).await,
                    2 => mid_tx.send(item).await,
                    _ => low_tx.send(item).await,
                };
                sent.unwrap();
            }
        }
    });

    let config = PriorityConfig::new(RateDivider, 3)
        .with_input(3, high_rx)
        .with_input(2, mid_rx)
        .with_input(1, low_rx);
    let mut priority = Priority::new(config).unwrap();

    feeder.await.unwrap();

    while let Some(item) = priority.output().recv().await {
        println!("priority {}: {}", item.priority(), *item);
    }
}
