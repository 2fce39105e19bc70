mod common;

use futures::executor::block_on;
use futures::stream::{self, TryStreamExt};
use lazystore_core::users;
use lazystore_core::{average, batches, Record, Result};
use proptest::prelude::*;

fn rows(ages: &[i64]) -> Vec<Result<Record>> {
    ages.iter()
        .enumerate()
        .map(|(i, &age)| Ok(Record::new().with("id", i as i64).with("age", age)))
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Property: batches cover every row, in order, and only the last is short
    #[test]
    fn prop_batches_partition_stream(
        ages in prop::collection::vec(0i64..120, 0..200),
        size in 1usize..20,
    ) {
        let out: Vec<Vec<Record>> =
            block_on(batches(stream::iter(rows(&ages)), size).unwrap().try_collect()).unwrap();

        let total: usize = out.iter().map(Vec::len).sum();
        prop_assert_eq!(total, ages.len());
        if let Some((last, full)) = out.split_last() {
            prop_assert!(full.iter().all(|b| b.len() == size));
            prop_assert!(!last.is_empty() && last.len() <= size);
        }

        let flattened: Vec<f64> = out
            .iter()
            .flatten()
            .map(|r| r.number("age").unwrap())
            .collect();
        let expected: Vec<f64> = ages.iter().map(|&a| a as f64).collect();
        prop_assert_eq!(flattened, expected);
    }

    /// Property: streaming average equals the arithmetic mean
    #[test]
    fn prop_average_matches_mean(ages in prop::collection::vec(0i64..120, 1..200)) {
        let mean = block_on(average(stream::iter(rows(&ages)), "age")).unwrap();
        let expected = ages.iter().sum::<i64>() as f64 / ages.len() as f64;
        prop_assert!((mean - expected).abs() < 1e-9);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: concatenated pages equal one unpaginated stream
    #[test]
    fn prop_pages_concatenate_to_stream(
        ages in prop::collection::vec(1u32..100, 0..40),
        page_size in 1usize..12,
    ) {
        let rt = runtime();
        let (paged, streamed, fetches) = rt.block_on(async {
            let (_dir, store) = common::seeded_store(&ages).await.unwrap();

            let mut scoped = store.acquire().await.unwrap();
            let streamed: Vec<Record> = users::stream_users(scoped.conn()).try_collect().await.unwrap();
            scoped.release().await;

            let mut pager = users::lazy_pagination(&store, page_size).unwrap();
            let mut paged = Vec::new();
            while let Some(page) = pager.next_page().await.unwrap() {
                assert!(page.len() <= page_size);
                paged.extend(page.rows);
            }
            (paged, streamed, pager.fetches())
        });

        prop_assert_eq!(&paged, &streamed);
        // One fetch per full page plus the terminating short or empty page
        prop_assert_eq!(fetches as usize, ages.len() / page_size + 1);
    }
}
