//! Bus delivery vs. block arrival ordering.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{reconciler_with, CountingProcessor, GatedStore, RejectingProcessor, StubLedger};
use idv_orchestration::{InMemoryKVStore, ReconcileOutcome};
use shared_types::entities::{NodeId, RequestId};
use shared_types::ipc::{BusMessage, PrivateMessageType};

fn data_request(request_id: &str, height: u64) -> BusMessage {
    BusMessage::new(PrivateMessageType::DataRequest, request_id, height)
}

fn node() -> NodeId {
    NodeId::from("as1")
}

#[tokio::test]
async fn test_buffered_request_replayed_once_when_height_reached() {
    let processor = Arc::new(CountingProcessor::default());
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(90),
        processor.clone(),
    );

    let outcome = h
        .reconciler
        .on_message(&node(), data_request("R1", 100))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Buffered);
    assert_eq!(processor.total(), 0);
    assert_eq!(
        h.cache
            .get_request_ids_expected_in_block(&node(), 100, 100)
            .await
            .unwrap(),
        vec![(100, RequestId::from("R1"))]
    );

    // Blocks below the origin height do not release it
    h.ledger.advance_to(94);
    let early = h.reconciler.on_new_blocks(&node(), 91, 94).await.unwrap();
    assert_eq!(early.replayed, 0);
    assert_eq!(processor.total(), 0);

    h.ledger.advance_to(105);
    let summary = h.reconciler.on_new_blocks(&node(), 95, 105).await.unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(processor.count("R1"), 1);

    // Consumed: the index and the body are gone, a re-run does nothing
    assert!(h
        .cache
        .get_request_ids_expected_in_block(&node(), 0, u64::MAX)
        .await
        .unwrap()
        .is_empty());
    assert!(h
        .cache
        .get_request_received_from_mq(&node(), &RequestId::from("R1"))
        .await
        .unwrap()
        .is_none());
    h.reconciler.on_new_blocks(&node(), 95, 105).await.unwrap();
    assert_eq!(processor.count("R1"), 1);
}

#[tokio::test]
async fn test_request_behind_ledger_processed_immediately() {
    let processor = Arc::new(CountingProcessor::default());
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(120),
        processor.clone(),
    );

    let outcome = h
        .reconciler
        .on_message(&node(), data_request("R1", 100))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::ProcessedImmediately);
    assert_eq!(processor.count("R1"), 1);
    assert!(h
        .cache
        .get_request_received_from_mq(&node(), &RequestId::from("R1"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.metrics.get("requests_buffered"), Some(0));
}

#[tokio::test]
async fn test_window_cleared_even_without_buffered_body() {
    let processor = Arc::new(CountingProcessor::default());
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(50),
        processor.clone(),
    );

    // Index entries with no body behind them, as left by an earlier race
    for (height, request) in [(60, "R1"), (61, "R2")] {
        h.cache
            .add_request_id_expected_in_block(&node(), height, &RequestId::from(request))
            .await
            .unwrap();
    }

    h.ledger.advance_to(70);
    let summary = h.reconciler.on_new_blocks(&node(), 51, 70).await.unwrap();
    assert_eq!(summary.missing, 2);
    assert_eq!(processor.total(), 0);
    assert!(h
        .cache
        .get_request_ids_expected_in_block(&node(), 0, u64::MAX)
        .await
        .unwrap()
        .is_empty());
    assert!(h.reporter.errors.lock().is_empty());
}

#[tokio::test]
async fn test_concurrent_duplicate_delivery_processed_once() {
    let (processor, gate) = CountingProcessor::gated();
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(200),
        processor.clone(),
    );

    let first = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.on_message(&node(), data_request("R1", 100)).await })
    };
    gate.wait_reached().await;

    let second = h
        .reconciler
        .on_message(&node(), data_request("R1", 100))
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::Duplicate);

    gate.open();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, ReconcileOutcome::ProcessedImmediately);
    assert_eq!(processor.count("R1"), 1);
    assert_eq!(h.metrics.get("duplicate_deliveries"), Some(1));
    assert!(h.reconciler.lock_table().is_empty());
}

#[tokio::test]
async fn test_height_advancing_during_buffering_processes_once() {
    let store = GatedStore::new();
    let processor = Arc::new(CountingProcessor::default());
    let h = reconciler_with(store.clone(), StubLedger::at(90), processor.clone());

    // Bus path parks right after writing the buffer entry
    let bus = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.on_message(&node(), data_request("R1", 100)).await })
    };
    store.gate.wait_reached().await;

    // Ledger passes the origin height; the block path sees the lock and skips
    h.ledger.advance_to(105);
    let summary = h.reconciler.on_new_blocks(&node(), 95, 105).await.unwrap();
    assert_eq!(summary.skipped_locked, 1);
    assert_eq!(summary.replayed, 0);
    assert_eq!(processor.total(), 0);

    // Bus path re-checks, sees the new height and processes itself
    store.gate.open();
    let outcome = bus.await.unwrap().unwrap();
    assert_eq!(outcome, ReconcileOutcome::ProcessedAfterRecheck);
    assert_eq!(processor.count("R1"), 1);

    assert!(h
        .cache
        .get_request_received_from_mq(&node(), &RequestId::from("R1"))
        .await
        .unwrap()
        .is_none());
    assert!(h
        .cache
        .get_request_ids_expected_in_block(&node(), 0, u64::MAX)
        .await
        .unwrap()
        .is_empty());

    // A later block event finds nothing left to replay
    h.ledger.advance_to(110);
    h.reconciler.on_new_blocks(&node(), 106, 110).await.unwrap();
    assert_eq!(processor.count("R1"), 1);
}

#[tokio::test]
async fn test_nodes_are_isolated() {
    let processor = Arc::new(CountingProcessor::default());
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(10),
        processor.clone(),
    );
    let other = NodeId::from("as2");

    h.reconciler.on_message(&node(), data_request("R1", 20)).await.unwrap();
    h.reconciler.on_message(&other, data_request("R1", 20)).await.unwrap();

    h.ledger.advance_to(25);
    let summary = h.reconciler.on_new_blocks(&node(), 11, 25).await.unwrap();
    assert_eq!(summary.replayed, 1);

    // The other identity's buffer is untouched until its own event
    assert_eq!(
        h.cache
            .get_request_ids_expected_in_block(&other, 0, u64::MAX)
            .await
            .unwrap()
            .len(),
        1
    );
    h.reconciler.on_new_blocks(&other, 11, 25).await.unwrap();
    assert_eq!(processor.count("R1"), 2);
}

#[tokio::test]
async fn test_failed_replay_drops_buffered_body() {
    let processor = Arc::new(RejectingProcessor::default());
    let h = reconciler_with(
        Arc::new(InMemoryKVStore::new()),
        StubLedger::at(10),
        processor.clone(),
    );

    let outcome = h
        .reconciler
        .on_message(&node(), data_request("R1", 12))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Buffered);

    h.ledger.advance_to(13);
    let summary = h.reconciler.on_new_blocks(&node(), 11, 13).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(h.reporter.errors.lock().len(), 1);

    // Neither the index nor the body outlives the window
    assert!(h
        .cache
        .get_request_ids_expected_in_block(&node(), 0, u64::MAX)
        .await
        .unwrap()
        .is_empty());
    assert!(h
        .cache
        .get_request_received_from_mq(&node(), &RequestId::from("R1"))
        .await
        .unwrap()
        .is_none());
}
