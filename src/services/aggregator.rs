//! Fan-in of position streams
//!
//! Merges any number of channels into one by recursive binary split: each half
//! is merged on its own and the two results are joined pairwise. Values come
//! out in arrival order; the output closes after its last input closed.

use tokio::sync::mpsc;

/// Buffer of every intermediate and the final merged channel
const MERGE_BUFFER: usize = 64;

/// Merge `inputs` into a single receiver. Must be called inside a tokio runtime.
pub fn merge<T: Send + 'static>(mut inputs: Vec<mpsc::Receiver<T>>) -> mpsc::Receiver<T> {
    match inputs.len() {
        0 => {
            let (_, rx) = mpsc::channel(1);
            rx
        }
        1 => inputs.remove(0),
        len => {
            let second = inputs.split_off(len / 2);
            merge_pair(merge(inputs), merge(second))
        }
    }
}

fn merge_pair<T: Send + 'static>(
    mut left: mpsc::Receiver<T>,
    mut right: mpsc::Receiver<T>,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(MERGE_BUFFER);

    tokio::spawn(async move {
        let mut left_open = true;
        let mut right_open = true;

        loop {
            let value = tokio::select! {
                value = left.recv(), if left_open => match value {
                    Some(value) => value,
                    None => {
                        left_open = false;
                        continue;
                    }
                },
                value = right.recv(), if right_open => match value {
                    Some(value) => value,
                    None => {
                        right_open = false;
                        continue;
                    }
                },
                else => break,
            };

            if tx.send(value).await.is_err() {
                // Nobody reads the merged stream any more
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }
        values
    }

    #[tokio::test]
    async fn test_zero_inputs_closed_immediately() {
        let rx = merge::<u32>(Vec::new());
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_input_passes_through() {
        let (tx, rx) = mpsc::channel(4);
        let merged = merge(vec![rx]);

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        assert_eq!(drain(merged).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_union_of_all_producers() {
        let mut receivers = Vec::new();
        for producer in 0..7u32 {
            let (tx, rx) = mpsc::channel(2);
            receivers.push(rx);
            tokio::spawn(async move {
                for i in 0..50u32 {
                    tx.send(producer * 1_000 + i).await.unwrap();
                }
            });
        }

        let values = drain(merge(receivers)).await;

        let expected: HashSet<u32> = (0..7u32)
            .flat_map(|p| (0..50u32).map(move |i| p * 1_000 + i))
            .collect();
        assert_eq!(values.len(), expected.len());
        assert_eq!(values.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn test_per_producer_order_kept() {
        let mut receivers = Vec::new();
        for producer in 0..3u32 {
            let (tx, rx) = mpsc::channel(1);
            receivers.push(rx);
            tokio::spawn(async move {
                for i in 0..20u32 {
                    tx.send((producer, i)).await.unwrap();
                }
            });
        }

        let values = drain(merge(receivers)).await;

        for producer in 0..3u32 {
            let seen: Vec<u32> = values.iter().filter(|(p, _)| *p == producer).map(|(_, i)| *i).collect();
            assert_eq!(seen, (0..20).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_closes_only_after_last_input() {
        let (tx_a, rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        let (tx_c, rx_c) = mpsc::channel(4);
        let mut merged = merge(vec![rx_a, rx_b, rx_c]);

        tx_a.send("a").await.unwrap();
        drop(tx_a);
        drop(tx_b);
        assert_eq!(merged.recv().await, Some("a"));

        tokio::task::yield_now().await;
        assert!(matches!(merged.try_recv(), Err(mpsc::error::TryRecvError::Empty)));

        tx_c.send("c").await.unwrap();
        assert_eq!(merged.recv().await, Some("c"));
        drop(tx_c);
        assert_eq!(merged.recv().await, None);
    }
}
