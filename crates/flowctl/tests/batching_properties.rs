//! Property tests for the two batching disciplines' universal invariants
//! (spec §8): Join/Unite preservation and Join's batch-sizing rule. Unite's
//! no-split rule is exercised with randomly sized input slices via `rand`,
//! since the property only bites when slice boundaries fall in varied
//! places relative to `join_size`.

use flowctl::join::{Join, JoinConfig};
use flowctl::unite::{Unite, UniteConfig};
use proptest::prelude::*;
use rand::Rng;
use tokio::sync::mpsc;

proptest! {
    // Join/Unite preservation: flatten(outputs) = input_items.
    #[test]
    fn join_preserves_all_items(
        join_size in 1u64..20,
        item_count in 0u64..500,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let (tx, rx) = mpsc::channel(64);
            let mut join = Join::new(JoinConfig::new(rx, join_size)).unwrap();

            tokio::spawn(async move {
                for i in 0..item_count {
                    tx.send(i).await.unwrap();
                }
            });

            let mut flattened = Vec::new();
            let mut batch_lens = Vec::new();
            while let Some(batch) = join.output().recv().await {
                batch_lens.push(batch.len() as u64);
                flattened.extend(batch.to_vec());
            }

            prop_assert_eq!(flattened, (0..item_count).collect::<Vec<_>>());

            // Batch sizing: every batch but possibly the last is exactly
            // join_size; the last is in [1, join_size].
            if let Some((&last, rest)) = batch_lens.split_last() {
                for &len in rest {
                    prop_assert_eq!(len, join_size);
                }
                prop_assert!(last >= 1 && last <= join_size);
            }

            Ok(())
        })?;
    }
}

#[tokio::test]
async fn unite_preserves_all_items_across_random_slices() {
    let join_size: u64 = 7;
    let mut rng = rand::thread_rng();

    let mut slices: Vec<Vec<u32>> = Vec::new();
    let mut next: u32 = 0;
    for _ in 0..40 {
        let len = rng.gen_range(0..=12usize);
        let slice: Vec<u32> = (0..len as u32).map(|_| {
            let v = next;
            next += 1;
            v
        }).collect();
        slices.push(slice);
    }
    let expected: Vec<u32> = (0..next).collect();

    let (tx, rx) = mpsc::channel(64);
    let mut unite = Unite::new(UniteConfig::new(rx, join_size)).unwrap();

    let sent = slices.clone();
    tokio::spawn(async move {
        for slice in sent {
            tx.send(slice).await.unwrap();
        }
    });

    let mut flattened = Vec::new();
    let mut batches: Vec<Vec<u32>> = Vec::new();
    while let Some(batch) = unite.output().recv().await {
        let owned = batch.to_vec();
        flattened.extend(owned.iter().copied());
        batches.push(owned);
    }

    assert_eq!(flattened, expected);

    // No-split: every non-empty input slice is either wholly contained in
    // exactly one output batch (contiguously) or is the sole content of its
    // output batch (oversize pass-through).
    for slice in slices.iter().filter(|s| !s.is_empty()) {
        let is_sole_batch = batches.iter().any(|b| b == slice);
        let is_contiguous_run = batches.iter().any(|b| {
            b.windows(slice.len())
                .any(|w| w == slice.as_slice())
        });
        assert!(
            is_sole_batch || is_contiguous_run,
            "slice {slice:?} was split across output batches: {batches:?}"
        );
    }
}
