use super::batch::{Batch, BatchId, BatchItem, BatchStatus, ItemId, ItemStatus};
use super::recipient::{Recipient, RecipientId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type DirectoryRef = Arc<dyn RecipientDirectory>;
pub type GatewayRef = Arc<dyn GatewayApi>;
pub type JobQueueRef = Arc<dyn JobQueue>;

/// Field values for a batch row insert, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub period: String,
    pub total_amount: Decimal,
    pub item_count: usize,
}

/// Field values for an item row insert, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub recipient_id: RecipientId,
    pub amount: super::batch::Amount,
}

/// Sparse patch for a batch row.
///
/// Only the fields that are `Some` are written; the set of mutable fields is
/// statically known here rather than derived from an arbitrary input object.
#[derive(Debug, Default, Clone)]
pub struct BatchPatch {
    pub status: Option<BatchStatus>,
    pub completed_count: Option<usize>,
    pub failed_count: Option<usize>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl BatchPatch {
    pub fn status(mut self, status: BatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn counts(mut self, completed: usize, failed: usize) -> Self {
        self.completed_count = Some(completed);
        self.failed_count = Some(failed);
        self
    }

    pub fn processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }
}

/// Sparse patch for an item row.
#[derive(Debug, Default, Clone)]
pub struct ItemPatch {
    pub status: Option<ItemStatus>,
    pub gateway_reference: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ItemPatch {
    pub fn status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn gateway_reference(mut self, reference: impl Into<String>) -> Self {
        self.gateway_reference = Some(reference.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }
}

/// Durable storage contract for batches and items.
///
/// The store is the single source of truth; every component reads then writes
/// through it without in-process locks, relying on the item-status idempotency
/// gates for concurrent-writer safety.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically inserts one batch row and its item rows, all PENDING.
    async fn create_batch(&self, batch: NewBatch, items: Vec<NewItem>) -> Result<Batch>;
    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>>;
    async fn list_batches(&self) -> Result<Vec<Batch>>;
    async fn update_batch(&self, id: BatchId, patch: BatchPatch) -> Result<()>;
    async fn get_item(&self, id: ItemId) -> Result<Option<BatchItem>>;
    async fn list_items(&self, batch_id: BatchId) -> Result<Vec<BatchItem>>;
    async fn update_item(&self, id: ItemId, patch: ItemPatch) -> Result<()>;
    /// Applies the patch only while the item is non-terminal, in one atomic
    /// read-check-write against the row. Returns `false`, leaving the row
    /// untouched, when the item is already COMPLETED or FAILED. Writers that
    /// change `status` go through here so a racing terminal update can never
    /// be overwritten.
    async fn update_item_if_open(&self, id: ItemId, patch: ItemPatch) -> Result<bool>;
}

/// Lookup contract against the recipient directory collaborator.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>>;
    async fn list_active(&self) -> Result<Vec<Recipient>>;
}

/// One transfer inside a gateway batch submission.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferRequest {
    pub reference: String,
    pub amount: Decimal,
    pub recipient_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub narration: String,
}

/// Gateway-reported state of a single transfer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransferDisposition {
    Pending,
    Paid,
    Failed,
}

/// Per-transfer entry in a submission or batch-details response, matched to
/// the caller's item by `reference`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferReceipt {
    pub reference: String,
    pub gateway_reference: Option<String>,
    pub disposition: TransferDisposition,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BatchSubmissionResult {
    pub batch_reference: Option<String>,
    pub transfers: Vec<TransferReceipt>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BatchDetails {
    pub batch_reference: String,
    pub transfers: Vec<TransferReceipt>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionStatus {
    pub reference: String,
    pub disposition: TransferDisposition,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AuthorizationResult {
    pub batch_reference: String,
    pub authorized: bool,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Balance {
    pub available: Decimal,
    pub currency: String,
}

/// Authenticated access to the external disbursement gateway.
///
/// Implementations never retry internally beyond the implicit token refresh;
/// retry policy belongs to the job runner.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn submit_batch(&self, transfers: Vec<TransferRequest>) -> Result<BatchSubmissionResult>;
    async fn authorize_batch(
        &self,
        batch_reference: &str,
        code: &str,
    ) -> Result<AuthorizationResult>;
    async fn get_transaction_status(&self, reference: &str) -> Result<TransactionStatus>;
    async fn get_batch_details(&self, batch_reference: &str) -> Result<BatchDetails>;
    async fn get_balance(&self) -> Result<Balance>;
}

/// A unit of background work.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Job {
    ProcessBatch(BatchId),
}

/// Handle to the shared work queue the job runner drains.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}
