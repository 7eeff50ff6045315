use super::notification::{NotificationOutcome, NotificationReceiver};
use super::orchestrator::BatchOrchestrator;
use super::reconciler::{ReconcileSummary, Reconciler};
use crate::domain::batch::{Batch, BatchId, BatchItem, BatchStatus, ItemStatus};
use crate::domain::ports::{
    AuthorizationResult, Balance, GatewayRef, Job, JobQueueRef, LedgerStoreRef,
};
use crate::domain::recipient::RecipientId;
use crate::error::{DisbursementError, Result};
use std::sync::Arc;
use tracing::info;

/// Batch with its items and summary counts, as returned by `get_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatusView {
    pub batch: Batch,
    pub items: Vec<BatchItem>,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Caller-facing composition root of the disbursement core.
///
/// The HTTP layer sits outside this crate and calls through here. The
/// caller-facing preconditions (the double-trigger guard on
/// `start_processing`, the ack-regardless webhook policy) live in this
/// facade.
pub struct DisbursementService {
    ledger: LedgerStoreRef,
    gateway: GatewayRef,
    queue: JobQueueRef,
    orchestrator: Arc<BatchOrchestrator>,
    reconciler: Reconciler,
    receiver: NotificationReceiver,
}

impl DisbursementService {
    pub fn new(
        ledger: LedgerStoreRef,
        gateway: GatewayRef,
        queue: JobQueueRef,
        orchestrator: Arc<BatchOrchestrator>,
        webhook_secret: impl AsRef<[u8]>,
    ) -> Self {
        let reconciler = Reconciler::new(ledger.clone(), gateway.clone(), orchestrator.clone());
        let receiver =
            NotificationReceiver::new(orchestrator.clone(), ledger.clone(), webhook_secret);
        Self {
            ledger,
            gateway,
            queue,
            orchestrator,
            reconciler,
            receiver,
        }
    }

    pub async fn create_batch(
        &self,
        period: &str,
        recipient_ids: Option<Vec<RecipientId>>,
    ) -> Result<Batch> {
        self.orchestrator.create_batch(period, recipient_ids).await
    }

    pub async fn get_batch(&self, id: BatchId) -> Result<Batch> {
        self.ledger
            .get_batch(id)
            .await?
            .ok_or_else(|| DisbursementError::NotFound(format!("Batch {id} not found")))
    }

    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        self.ledger.list_batches().await
    }

    /// Enqueues a processing job for the batch.
    ///
    /// Rejects batches already PROCESSING or COMPLETED before anything reaches
    /// the orchestrator: the orchestrator itself is idempotent, but a
    /// double-trigger would waste a gateway call cycle.
    pub async fn start_processing(&self, id: BatchId) -> Result<()> {
        let batch = self.get_batch(id).await?;
        if matches!(
            batch.status,
            BatchStatus::Processing | BatchStatus::Completed
        ) {
            return Err(DisbursementError::Validation(format!(
                "Batch {id} is already {:?}",
                batch.status
            )));
        }
        self.queue.enqueue(Job::ProcessBatch(id)).await?;
        info!(batch_id = id, "Enqueued batch for processing");
        Ok(())
    }

    /// Forwards a second-factor authorization code for a gateway batch. When a
    /// local batch id is supplied, follows up with reference backfill and a
    /// reconciliation sweep so items accepted during authorization get their
    /// gateway references and any already-settled transfers are picked up.
    pub async fn authorize_batch(
        &self,
        gateway_batch_reference: &str,
        code: &str,
        batch_id: Option<BatchId>,
    ) -> Result<AuthorizationResult> {
        let result = self
            .gateway
            .authorize_batch(gateway_batch_reference, code)
            .await?;

        if let Some(batch_id) = batch_id {
            let details = self.gateway.get_batch_details(gateway_batch_reference).await?;
            let backfilled = self
                .orchestrator
                .backfill_references(batch_id, &details)
                .await?;
            info!(batch_id, backfilled, "Backfilled references after authorization");
            self.reconciler.reconcile(batch_id).await?;
        }
        Ok(result)
    }

    pub async fn reconcile(&self, id: BatchId) -> Result<ReconcileSummary> {
        // Fail loudly on unknown batches rather than sweeping nothing.
        self.get_batch(id).await?;
        self.reconciler.reconcile(id).await
    }

    pub async fn get_status(&self, id: BatchId) -> Result<BatchStatusView> {
        let batch = self.get_batch(id).await?;
        let items = self.ledger.list_items(id).await?;
        let count = |status: ItemStatus| items.iter().filter(|i| i.status == status).count();
        Ok(BatchStatusView {
            pending: count(ItemStatus::Pending),
            processing: count(ItemStatus::Processing),
            completed: count(ItemStatus::Completed),
            failed: count(ItemStatus::Failed),
            batch,
            items,
        })
    }

    /// Applies a webhook event. Infallible: the transport layer always
    /// acknowledges the sender regardless of what happened internally.
    pub async fn receive_notification(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> NotificationOutcome {
        self.receiver.receive(raw_body, signature).await
    }

    pub async fn get_balance(&self) -> Result<Balance> {
        self.gateway.get_balance().await
    }
}
