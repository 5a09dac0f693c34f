//! # Pipeline End-to-End Tests
//!
//! Split a staged dataset, let several consumers drain the chunk queue
//! concurrently, wait for the job to complete and clean up.

mod common;

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_test::assert_ok;

use common::{bars, market_csv, Pipeline, SOURCE_KEY};
use enrich_core::codec::decode_records;
use enrich_core::constants::keys;
use enrich_core::enrichment::StaticMarketData;
use enrich_core::messaging::{MessagingService, QueuedMessage};
use enrich_core::models::ChunkMessage;
use enrich_core::orchestration::SourceLocation;
use enrich_core::storage::ObjectStore;
use enrich_core::worker::Delivery;

fn market() -> StaticMarketData {
    StaticMarketData::new()
        .with_history("AAPL", bars(12))
        .with_history("MSFT", bars(4))
        .with_sector("AAPL", "Technology")
        .with_sector("MSFT", "Technology")
        .with_rate(1.0)
}

#[tokio::test]
async fn test_split_enrich_complete_and_clean_up() {
    let pipeline = Pipeline::new(market()).await;
    pipeline.stage_source(market_csv(120, &["AAPL", "MSFT", "ZZZ"])).await;
    let source_bucket = pipeline.config.storage.source_bucket.clone();
    let artifact_bucket = pipeline.config.storage.artifact_bucket.clone();

    let report = assert_ok!(
        pipeline
            .splitter()
            .split(&SourceLocation::new(&source_bucket, SOURCE_KEY))
            .await
    );
    assert_eq!(report.chunks, 3);
    assert_eq!(report.relocated_to.as_deref(), Some("inprocessing/market.csv"));
    assert_eq!(pipeline.tracker.get_total(&report.job_id).await.unwrap(), Some(3));

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let consumer = pipeline.consumer(&format!("worker-{i}"));
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move { consumer.run(shutdown_rx).await })
        })
        .collect();

    let observer = pipeline.observer();
    let total = assert_ok!(
        observer
            .wait_for_completion(&report.job_id, Duration::from_secs(10))
            .await
    );
    assert_eq!(total, 3);

    // Counting happens before the ack, so let the acks land before shutdown.
    let queue = pipeline.config.splitter.chunk_queue.clone();
    assert_ok!(
        tokio::time::timeout(Duration::from_secs(5), async {
            while pipeline.messaging.queue_length(&queue).await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    );
    shutdown_tx.send(()).unwrap();
    for handle in handles {
        assert_eq!(handle.await.unwrap().failed, 0);
    }
    let stats = pipeline.messaging.queue_stats(&queue).await.unwrap();
    assert_eq!(stats.total_acked, 3);

    let progress = pipeline.tracker.progress(&report.job_id).await.unwrap();
    assert_eq!(progress.processed, 3);
    assert!(progress.is_complete());
    assert_eq!(pipeline.store.object_count(&artifact_bucket), 3);

    // Every chunk keeps its 50-record slice in input order.
    let mut seen = Vec::new();
    for index in 1..=3 {
        let key = keys::chunk_object(&pipeline.config.storage.processed_prefix, &report.job_id, index);
        let body = pipeline.store.get(&artifact_bucket, &key).await.unwrap();
        let records = decode_records(&body).unwrap();
        assert_eq!(records.len(), if index == 3 { 20 } else { 50 });
        seen.extend(records.into_iter().map(|r| r.get("Name").unwrap().to_string()));
    }
    let expected: Vec<String> = (0..120).map(|i| format!("Company {i}")).collect();
    assert_eq!(seen, expected);

    let cleanup = assert_ok!(
        observer
            .observe_and_cleanup(&report.job_id, report.relocated_to.clone(), Duration::from_secs(1))
            .await
    );
    assert_eq!(cleanup.artifacts_deleted, 3);
    assert!(cleanup.source_removed);
    assert_eq!(pipeline.store.object_count(&artifact_bucket), 0);
    assert_eq!(pipeline.store.object_count(&source_bucket), 0);
}

#[tokio::test]
async fn test_unknown_ticker_degrades_to_defaults() {
    let pipeline = Pipeline::new(market()).await;
    pipeline
        .stage_source(b"Ticker,Name\nZZZ,Nobody\n,Blank\nAAPL,Apple\n".to_vec())
        .await;

    let report = pipeline
        .splitter()
        .split(&SourceLocation::new(&pipeline.config.storage.source_bucket, SOURCE_KEY))
        .await
        .unwrap();
    let stats = pipeline.consumer("worker-0").run_until_idle().await.unwrap();
    assert_eq!(stats.succeeded, 1);

    let key = keys::chunk_object(&pipeline.config.storage.processed_prefix, &report.job_id, 1);
    let body = pipeline
        .store
        .get(&pipeline.config.storage.artifact_bucket, &key)
        .await
        .unwrap();
    let records = decode_records(&body).unwrap();
    assert_eq!(records.len(), 3);

    for record in &records[..2] {
        assert_eq!(record.get("Sector"), Some("Unknown"));
        assert_eq!(record.get("Price_1"), Some(""));
        assert_eq!(record.get("Volume_10"), Some(""));
        assert_eq!(record.get("VolumeAvg"), Some("0"));
        assert_eq!(record.get("PriceSMA_EUR"), Some("0.00"));
        assert_eq!(record.get("CurrencyUsed"), Some("EUR"));
    }
    assert_eq!(records[2].get("Sector"), Some("Technology"));
    assert_eq!(records[2].get("Price_1"), Some("3.00"));
    assert_eq!(records[2].get("Name"), Some("Apple"));
}

#[tokio::test]
async fn test_duplicate_delivery_counts_once() {
    let pipeline = Pipeline::new(market()).await;
    pipeline.stage_source(market_csv(10, &["AAPL"])).await;

    let report = pipeline
        .splitter()
        .split(&SourceLocation::new(&pipeline.config.storage.source_bucket, SOURCE_KEY))
        .await
        .unwrap();

    let queue = pipeline.config.splitter.chunk_queue.clone();
    let mut batch: Vec<QueuedMessage<ChunkMessage>> = pipeline
        .messaging
        .receive_messages(&queue, 1, Duration::from_secs(30))
        .await
        .unwrap();
    let message = batch.pop().expect("one chunk").message;

    let worker = pipeline.worker();
    let artifact_bucket = pipeline.config.storage.artifact_bucket.clone();
    let key = keys::chunk_object(&pipeline.config.storage.processed_prefix, &report.job_id, 1);

    let first = worker.process_chunk(&message).await.unwrap();
    let after_first = pipeline.store.get(&artifact_bucket, &key).await.unwrap();
    let second = worker.process_chunk(&message).await.unwrap();
    let after_second = pipeline.store.get(&artifact_bucket, &key).await.unwrap();

    assert!(matches!(first.delivery, Delivery::Stored { processed: Some(1), .. }));
    assert!(matches!(second.delivery, Delivery::Stored { processed: None, .. }));
    assert_eq!(pipeline.tracker.get_processed(&report.job_id).await.unwrap(), Some(1));
    assert_eq!(pipeline.store.object_count(&artifact_bucket), 1);
    assert_eq!(after_first, after_second);
    assert_eq!(decode_records(&after_second).unwrap().len(), 10);
}

#[tokio::test]
async fn test_job_is_not_complete_before_every_chunk() {
    let pipeline = Pipeline::new(market()).await;
    pipeline.stage_source(market_csv(75, &["MSFT"])).await;

    let report = pipeline
        .splitter()
        .split(&SourceLocation::new(&pipeline.config.storage.source_bucket, SOURCE_KEY))
        .await
        .unwrap();
    assert_eq!(report.chunks, 2);

    let consumer = pipeline.consumer("worker-0");
    consumer.poll_once().await.unwrap();

    let observer = pipeline.observer();
    let err = observer
        .wait_for_completion(&report.job_id, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.to_string().contains(&report.job_id.to_string()));

    consumer.poll_once().await.unwrap();
    assert_eq!(
        observer
            .wait_for_completion(&report.job_id, Duration::from_millis(50))
            .await
            .unwrap(),
        2
    );
}
