mod common;

use common::{drain_one_job, harness};
use payrun::domain::batch::{BatchStatus, ItemStatus};
use payrun::domain::ports::{LedgerStore, TransferDisposition};
use payrun::error::DisbursementError;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn full_success_batch_completes() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    assert_eq!(batch.item_count, 3);
    assert_eq!(batch.total_amount, rust_decimal_macros::dec!(600));

    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let items = h.ledger.list_items(batch.id).await.unwrap();
    for item in &items {
        assert_eq!(item.status, ItemStatus::Processing);
        let reference = item.gateway_reference.clone().unwrap();
        h.gateway
            .set_status(&reference, TransferDisposition::Paid, None)
            .await;
    }

    let summary = h.service.reconcile(batch.id).await.unwrap();
    assert_eq!(summary.examined, 3);
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.errors, 0);

    let settled = h.service.get_batch(batch.id).await.unwrap();
    assert_eq!(settled.status, BatchStatus::Completed);
    assert_eq!(settled.completed_count, 3);
    assert_eq!(settled.failed_count, 0);
    let stamp = settled.processed_at.expect("processed_at set on completion");

    // Another sweep never disturbs a settled batch or its timestamp.
    h.service.reconcile(batch.id).await.unwrap();
    let again = h.service.get_batch(batch.id).await.unwrap();
    assert_eq!(again.status, BatchStatus::Completed);
    assert_eq!(again.processed_at, Some(stamp));
}

#[tokio::test]
async fn mixed_outcomes_settle_partially_completed() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let items = h.ledger.list_items(batch.id).await.unwrap();
    let (last, paid) = items.split_last().unwrap();
    for item in paid {
        let reference = item.gateway_reference.clone().unwrap();
        h.gateway
            .set_status(&reference, TransferDisposition::Paid, None)
            .await;
    }
    let failed_reference = last.gateway_reference.clone().unwrap();
    h.gateway
        .set_status(
            &failed_reference,
            TransferDisposition::Failed,
            Some("insufficient gateway balance"),
        )
        .await;

    h.service.reconcile(batch.id).await.unwrap();

    let settled = h.service.get_batch(batch.id).await.unwrap();
    assert_eq!(settled.status, BatchStatus::PartiallyCompleted);
    assert_eq!(settled.completed_count, 2);
    assert_eq!(settled.failed_count, 1);
    assert!(settled.processed_at.is_some());

    let failed_item = h.ledger.get_item(last.id).await.unwrap().unwrap();
    assert_eq!(failed_item.status, ItemStatus::Failed);
    assert_eq!(
        failed_item.error_message.as_deref(),
        Some("insufficient gateway balance")
    );
}

#[tokio::test]
async fn processing_twice_submits_once() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let references_before: Vec<_> = h
        .ledger
        .list_items(batch.id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.gateway_reference)
        .collect();

    // Re-run directly, as a racing worker would; the eligibility filter sees
    // every item holding a reference and never reaches the gateway.
    h.runner
        .run_job(payrun::domain::ports::Job::ProcessBatch(batch.id))
        .await;

    assert_eq!(h.gateway.submit_calls.load(Ordering::SeqCst), 1);
    let references_after: Vec<_> = h
        .ledger
        .list_items(batch.id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.gateway_reference)
        .collect();
    assert_eq!(references_before, references_after);
}

#[tokio::test]
async fn start_processing_guards_against_double_trigger() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    // Batch is now PROCESSING; the caller-facing layer must reject.
    let result = h.service.start_processing(batch.id).await;
    assert!(matches!(result, Err(DisbursementError::Validation(_))));

    let result = h.service.start_processing(999).await;
    assert!(matches!(result, Err(DisbursementError::NotFound(_))));
}

#[tokio::test]
async fn submission_failure_keeps_items_retryable() {
    let mut h = harness();
    h.gateway.fail_submission.store(true, Ordering::SeqCst);

    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    // Both attempts failed; items stay PROCESSING with no reference.
    assert_eq!(h.gateway.submit_calls.load(Ordering::SeqCst), 2);
    let items = h.ledger.list_items(batch.id).await.unwrap();
    for item in &items {
        assert_eq!(item.status, ItemStatus::Processing);
        assert!(item.gateway_reference.is_none());
    }

    // Gateway recovers; a manual re-trigger picks the same items up again.
    h.gateway.fail_submission.store(false, Ordering::SeqCst);
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let items = h.ledger.list_items(batch.id).await.unwrap();
    assert!(items.iter().all(|i| i.gateway_reference.is_some()));
}

#[tokio::test]
async fn partial_gateway_rejection_leaves_rejected_item_eligible() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    let items = h.ledger.list_items(batch.id).await.unwrap();
    let rejected = format!("PAYROLL_{}_{}", batch.id, items[0].id);
    h.gateway.reject_reference(&rejected).await;

    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let items = h.ledger.list_items(batch.id).await.unwrap();
    let stuck = &items[0];
    assert!(stuck.gateway_reference.is_none());
    assert!(stuck.is_eligible_for_submission());
    assert!(items[1..].iter().all(|i| i.gateway_reference.is_some()));
}

#[tokio::test]
async fn aggregate_counters_never_exceed_item_count() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", None).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    for item in h.ledger.list_items(batch.id).await.unwrap() {
        let reference = item.gateway_reference.unwrap();
        h.gateway
            .set_status(&reference, TransferDisposition::Paid, None)
            .await;
        h.service.reconcile(batch.id).await.unwrap();

        let observed = h.service.get_batch(batch.id).await.unwrap();
        assert!(observed.completed_count + observed.failed_count <= observed.item_count);
        assert_eq!(
            observed.status,
            BatchStatus::derive(
                observed.completed_count,
                observed.failed_count,
                observed.item_count
            )
        );
    }
}

#[tokio::test]
async fn get_status_summarizes_items() {
    let mut h = harness();
    let batch = h.service.create_batch("2026-08", Some(vec![1, 2])).await.unwrap();
    h.service.start_processing(batch.id).await.unwrap();
    drain_one_job(&mut h).await;

    let view = h.service.get_status(batch.id).await.unwrap();
    assert_eq!(view.items.len(), 2);
    assert_eq!(view.processing, 2);
    assert_eq!(view.pending + view.completed + view.failed, 0);

    let batches = h.service.list_batches().await.unwrap();
    assert_eq!(batches.len(), 1);
}
