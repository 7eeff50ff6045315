use crate::domain::batch::{Batch, BatchId, BatchItem, BatchStatus, ItemId, ItemStatus};
use crate::domain::ports::{
    BatchPatch, ItemPatch, Job, JobQueue, LedgerStore, NewBatch, NewItem, RecipientDirectory,
};
use crate::domain::recipient::{Recipient, RecipientId};
use crate::error::{DisbursementError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<RwLock<HashMap>>` for shared concurrent access. Backs the tests
/// and the worker's default wiring; the production relational store lives
/// behind the same `LedgerStore` port in the external persistence layer.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    batches: Arc<RwLock<HashMap<BatchId, Batch>>>,
    items: Arc<RwLock<HashMap<ItemId, BatchItem>>>,
    next_batch_id: Arc<AtomicU64>,
    next_item_id: Arc<AtomicU64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_batch(&self, batch: NewBatch, items: Vec<NewItem>) -> Result<Batch> {
        let mut batches = self.batches.write().await;
        let mut item_rows = self.items.write().await;

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let batch = Batch {
            id: batch_id,
            period: batch.period,
            total_amount: batch.total_amount,
            item_count: batch.item_count,
            status: BatchStatus::Pending,
            completed_count: 0,
            failed_count: 0,
            processed_at: None,
            created_at: Utc::now(),
        };
        batches.insert(batch_id, batch.clone());

        for item in items {
            let item_id = self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1;
            item_rows.insert(
                item_id,
                BatchItem {
                    id: item_id,
                    batch_id,
                    recipient_id: item.recipient_id,
                    amount: item.amount,
                    status: ItemStatus::Pending,
                    gateway_reference: None,
                    error_message: None,
                    processed_at: None,
                },
            );
        }
        Ok(batch)
    }

    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        let batches = self.batches.read().await;
        Ok(batches.get(&id).cloned())
    }

    async fn list_batches(&self) -> Result<Vec<Batch>> {
        let batches = self.batches.read().await;
        let mut all: Vec<Batch> = batches.values().cloned().collect();
        all.sort_by_key(|b| b.id);
        Ok(all)
    }

    async fn update_batch(&self, id: BatchId, patch: BatchPatch) -> Result<()> {
        let mut batches = self.batches.write().await;
        let batch = batches
            .get_mut(&id)
            .ok_or_else(|| DisbursementError::NotFound(format!("Batch {id} not found")))?;
        if let Some(status) = patch.status {
            batch.status = status;
        }
        if let Some(completed) = patch.completed_count {
            batch.completed_count = completed;
        }
        if let Some(failed) = patch.failed_count {
            batch.failed_count = failed;
        }
        if let Some(at) = patch.processed_at {
            batch.processed_at = Some(at);
        }
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<BatchItem>> {
        let items = self.items.read().await;
        Ok(items.get(&id).cloned())
    }

    async fn list_items(&self, batch_id: BatchId) -> Result<Vec<BatchItem>> {
        let items = self.items.read().await;
        let mut matching: Vec<BatchItem> = items
            .values()
            .filter(|item| item.batch_id == batch_id)
            .cloned()
            .collect();
        matching.sort_by_key(|item| item.id);
        Ok(matching)
    }

    async fn update_item(&self, id: ItemId, patch: ItemPatch) -> Result<()> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| DisbursementError::NotFound(format!("Batch item {id} not found")))?;
        apply_item_patch(item, patch);
        Ok(())
    }

    async fn update_item_if_open(&self, id: ItemId, patch: ItemPatch) -> Result<bool> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| DisbursementError::NotFound(format!("Batch item {id} not found")))?;
        if item.status.is_terminal() {
            return Ok(false);
        }
        apply_item_patch(item, patch);
        Ok(true)
    }
}

fn apply_item_patch(item: &mut BatchItem, patch: ItemPatch) {
    if let Some(status) = patch.status {
        item.status = status;
    }
    if let Some(reference) = patch.gateway_reference {
        item.gateway_reference = Some(reference);
    }
    if let Some(message) = patch.error_message {
        item.error_message = Some(message);
    }
    if let Some(at) = patch.processed_at {
        item.processed_at = Some(at);
    }
}

/// In-memory recipient directory snapshot.
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    recipients: Arc<RwLock<HashMap<RecipientId, Recipient>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(recipients: Vec<Recipient>) -> Self {
        let map = recipients.into_iter().map(|r| (r.id, r)).collect();
        Self {
            recipients: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn insert(&self, recipient: Recipient) {
        let mut recipients = self.recipients.write().await;
        recipients.insert(recipient.id, recipient);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>> {
        let recipients = self.recipients.read().await;
        Ok(recipients.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Recipient>> {
        let recipients = self.recipients.read().await;
        let mut active: Vec<Recipient> = recipients
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.id);
        Ok(active)
    }
}

/// In-process job queue over a tokio channel.
///
/// The production deployment substitutes a durable shared queue behind the
/// same `JobQueue` port; this one serves the worker binary and the tests.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl InMemoryJobQueue {
    /// Creates the queue handle and the receiver side the job runner drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| DisbursementError::Queue("Job queue is closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::Amount;
    use rust_decimal_macros::dec;

    fn new_batch() -> (NewBatch, Vec<NewItem>) {
        (
            NewBatch {
                period: "2026-08".to_string(),
                total_amount: dec!(300),
                item_count: 2,
            },
            vec![
                NewItem {
                    recipient_id: 1,
                    amount: Amount::new(dec!(100)).unwrap(),
                },
                NewItem {
                    recipient_id: 2,
                    amount: Amount::new(dec!(200)).unwrap(),
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_create_batch_inserts_pending_rows() {
        let ledger = InMemoryLedger::new();
        let (batch, items) = new_batch();
        let created = ledger.create_batch(batch, items).await.unwrap();

        assert_eq!(created.status, BatchStatus::Pending);
        assert_eq!(created.completed_count, 0);

        let rows = ledger.list_items(created.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|i| i.status == ItemStatus::Pending));
    }

    #[tokio::test]
    async fn test_item_patch_only_touches_set_fields() {
        let ledger = InMemoryLedger::new();
        let (batch, items) = new_batch();
        let created = ledger.create_batch(batch, items).await.unwrap();
        let item_id = ledger.list_items(created.id).await.unwrap()[0].id;

        ledger
            .update_item(item_id, ItemPatch::default().gateway_reference("GW-1"))
            .await
            .unwrap();

        let item = ledger.get_item(item_id).await.unwrap().unwrap();
        // Status untouched by a reference-only patch.
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.gateway_reference.as_deref(), Some("GW-1"));
        assert!(item.error_message.is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_leaves_terminal_item_untouched() {
        let ledger = InMemoryLedger::new();
        let (batch, items) = new_batch();
        let created = ledger.create_batch(batch, items).await.unwrap();
        let item_id = ledger.list_items(created.id).await.unwrap()[0].id;

        ledger
            .update_item(item_id, ItemPatch::default().status(ItemStatus::Completed))
            .await
            .unwrap();

        let applied = ledger
            .update_item_if_open(
                item_id,
                ItemPatch::default()
                    .status(ItemStatus::Processing)
                    .error_message("should never land"),
            )
            .await
            .unwrap();
        assert!(!applied);

        let item = ledger.get_item(item_id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(item.error_message.is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_applies_to_open_item() {
        let ledger = InMemoryLedger::new();
        let (batch, items) = new_batch();
        let created = ledger.create_batch(batch, items).await.unwrap();
        let item_id = ledger.list_items(created.id).await.unwrap()[0].id;

        let applied = ledger
            .update_item_if_open(item_id, ItemPatch::default().status(ItemStatus::Processing))
            .await
            .unwrap();
        assert!(applied);
        let item = ledger.get_item(item_id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Processing);
    }

    #[tokio::test]
    async fn test_update_unknown_item_is_not_found() {
        let ledger = InMemoryLedger::new();
        let result = ledger
            .update_item(999, ItemPatch::default().status(ItemStatus::Processing))
            .await;
        assert!(matches!(result, Err(DisbursementError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_queue_round_trip() {
        let (queue, mut receiver) = InMemoryJobQueue::channel();
        queue.enqueue(Job::ProcessBatch(7)).await.unwrap();
        assert_eq!(receiver.recv().await, Some(Job::ProcessBatch(7)));
    }
}
