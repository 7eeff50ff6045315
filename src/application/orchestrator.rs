use crate::domain::batch::{
    Batch, BatchId, BatchItem, BatchStatus, ItemStatus, idempotency_reference,
};
use crate::domain::ports::{
    BatchDetails, BatchPatch, DirectoryRef, GatewayRef, ItemPatch, LedgerStoreRef, NewBatch,
    NewItem, TransferRequest,
};
use crate::domain::recipient::RecipientId;
use crate::error::{DisbursementError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Terminal outcome applied to an item by the notification receiver or the
/// reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed { message: Option<String> },
}

/// The batch disbursement state machine.
///
/// Owns item eligibility, payload construction, submission, reference
/// backfill, and aggregate status derivation. Every invocation is idempotent:
/// re-running `execute` on a batch whose items all hold gateway references is
/// a no-op, and terminal transitions are gated on current item status.
pub struct BatchOrchestrator {
    ledger: LedgerStoreRef,
    directory: DirectoryRef,
    gateway: GatewayRef,
}

impl BatchOrchestrator {
    pub fn new(ledger: LedgerStoreRef, directory: DirectoryRef, gateway: GatewayRef) -> Self {
        Self {
            ledger,
            directory,
            gateway,
        }
    }

    /// Creates a batch with one PENDING item per resolved recipient.
    ///
    /// Amounts are snapshotted from the directory at this moment; later
    /// recipient edits never alter the created items. An explicit recipient
    /// list must name known, active recipients.
    pub async fn create_batch(
        &self,
        period: &str,
        recipient_ids: Option<Vec<RecipientId>>,
    ) -> Result<Batch> {
        if period.trim().is_empty() {
            return Err(DisbursementError::Validation(
                "Period must not be empty".to_string(),
            ));
        }

        let recipients = match recipient_ids {
            Some(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    let recipient = self.directory.get(id).await?.ok_or_else(|| {
                        DisbursementError::NotFound(format!("Recipient {id} not found"))
                    })?;
                    if !recipient.active {
                        return Err(DisbursementError::Validation(format!(
                            "Recipient {id} is not active"
                        )));
                    }
                    resolved.push(recipient);
                }
                resolved
            }
            None => self.directory.list_active().await?,
        };

        if recipients.is_empty() {
            return Err(DisbursementError::Validation(
                "Batch must contain at least one recipient".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(recipients.len());
        let mut total = Decimal::ZERO;
        for recipient in &recipients {
            let amount = recipient.amount.try_into().map_err(|_| {
                DisbursementError::Validation(format!(
                    "Recipient {} has a non-positive amount",
                    recipient.id
                ))
            })?;
            total += recipient.amount;
            items.push(NewItem {
                recipient_id: recipient.id,
                amount,
            });
        }

        let batch = self
            .ledger
            .create_batch(
                NewBatch {
                    period: period.to_string(),
                    total_amount: total,
                    item_count: items.len(),
                },
                items,
            )
            .await?;

        info!(
            batch_id = batch.id,
            items = batch.item_count,
            %batch.total_amount,
            "Created disbursement batch"
        );
        Ok(batch)
    }

    /// Runs one processing pass over a batch.
    ///
    /// Eligible items are flipped to PROCESSING before the gateway call, so a
    /// crash at any later point leaves them retryable through the same filter.
    /// A submission-level failure propagates to the caller (the job runner owns
    /// backoff); items keep PROCESSING without a reference and the next
    /// invocation picks them up again.
    pub async fn execute(&self, batch_id: BatchId) -> Result<()> {
        let batch = self.require_batch(batch_id).await?;
        let items = self.ledger.list_items(batch.id).await?;

        let eligible: Vec<BatchItem> = items
            .into_iter()
            .filter(BatchItem::is_eligible_for_submission)
            .collect();

        if eligible.is_empty() {
            info!(batch_id, "No eligible items; nothing to submit");
            self.recompute(batch_id).await?;
            return Ok(());
        }

        // A terminal update may land between the eligibility read and this
        // write; the conditional transition drops such items from the pass
        // instead of overwriting their terminal status.
        let mut submittable = Vec::with_capacity(eligible.len());
        for item in eligible {
            let marked = self
                .ledger
                .update_item_if_open(item.id, ItemPatch::default().status(ItemStatus::Processing))
                .await?;
            if marked {
                submittable.push(item);
            } else {
                warn!(batch_id, item_id = item.id, "Item finalized concurrently; skipping");
            }
        }

        if submittable.is_empty() {
            self.recompute(batch_id).await?;
            return Ok(());
        }

        let mut transfers = Vec::with_capacity(submittable.len());
        for item in &submittable {
            let recipient = self
                .directory
                .get(item.recipient_id)
                .await?
                .ok_or_else(|| {
                    DisbursementError::NotFound(format!(
                        "Recipient {} for item {} not found",
                        item.recipient_id, item.id
                    ))
                })?;
            transfers.push(TransferRequest {
                reference: idempotency_reference(batch.id, item.id),
                amount: item.amount.value(),
                recipient_name: recipient.name,
                account_number: recipient.account_number,
                bank_code: recipient.bank_code,
                narration: format!("Disbursement {} {}", batch.period, batch.id),
            });
        }

        info!(batch_id, transfers = transfers.len(), "Submitting batch to gateway");
        let submission = self.gateway.submit_batch(transfers).await?;

        for item in &submittable {
            let reference = idempotency_reference(batch.id, item.id);
            let receipt = submission
                .transfers
                .iter()
                .find(|receipt| receipt.reference == reference);
            match receipt.and_then(|r| r.gateway_reference.clone()) {
                Some(gateway_reference) => {
                    self.ledger
                        .update_item(
                            item.id,
                            ItemPatch::default().gateway_reference(gateway_reference),
                        )
                        .await?;
                }
                None => {
                    // Item rejected or omitted by the gateway's continue-on-failure
                    // mode; it stays PROCESSING without a reference and the next
                    // pass retries it.
                    warn!(batch_id, item_id = item.id, "No gateway reference returned");
                }
            }
        }

        self.recompute(batch_id).await?;
        Ok(())
    }

    /// Recomputes a batch's aggregate status from its current item rows.
    ///
    /// Commutative and idempotent; safe to call redundantly from concurrent
    /// writers. Always derives from the item rows read here, never from a
    /// cached prior aggregate. Sets `processed_at` on the first transition
    /// into a settled status and never overwrites it.
    pub async fn recompute(&self, batch_id: BatchId) -> Result<()> {
        let batch = self.require_batch(batch_id).await?;
        let items = self.ledger.list_items(batch_id).await?;

        let completed = items
            .iter()
            .filter(|i| i.status == ItemStatus::Completed)
            .count();
        let failed = items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .count();
        let status = BatchStatus::derive(completed, failed, batch.item_count);

        let mut patch = BatchPatch::default().status(status).counts(completed, failed);
        if status.is_settled() && batch.processed_at.is_none() {
            patch = patch.processed_at(Utc::now());
        }
        self.ledger.update_batch(batch_id, patch).await?;
        Ok(())
    }

    /// Applies a terminal outcome to an item, gated on current status.
    ///
    /// Items already COMPLETED or FAILED yield `AlreadyFinalized`, which every
    /// caller treats as a benign no-op, never a failure. This gate is the
    /// single defense shared by the notification receiver and the reconciler
    /// against duplicate, late, or racing terminal updates.
    pub async fn apply_terminal(&self, item_id: u64, outcome: TerminalOutcome) -> Result<()> {
        let patch = match &outcome {
            TerminalOutcome::Completed => ItemPatch::default()
                .status(ItemStatus::Completed)
                .processed_at(Utc::now()),
            TerminalOutcome::Failed { message } => {
                let mut patch = ItemPatch::default()
                    .status(ItemStatus::Failed)
                    .processed_at(Utc::now());
                if let Some(message) = message {
                    patch = patch.error_message(message.clone());
                }
                patch
            }
        };
        if !self.ledger.update_item_if_open(item_id, patch).await? {
            return Err(DisbursementError::AlreadyFinalized);
        }
        info!(item_id, ?outcome, "Finalized batch item");
        Ok(())
    }

    /// Persists gateway references reported by a batch-details lookup onto
    /// items that are still missing one. Used after out-of-band batch
    /// authorization, when the original submission response carried no
    /// per-transfer references yet.
    pub async fn backfill_references(
        &self,
        batch_id: BatchId,
        details: &BatchDetails,
    ) -> Result<usize> {
        let items = self.ledger.list_items(batch_id).await?;
        let mut backfilled = 0;
        for item in &items {
            if item.gateway_reference.is_some() {
                continue;
            }
            let reference = idempotency_reference(batch_id, item.id);
            if let Some(receipt) = details
                .transfers
                .iter()
                .find(|receipt| receipt.reference == reference)
                && let Some(gateway_reference) = &receipt.gateway_reference
            {
                self.ledger
                    .update_item(
                        item.id,
                        ItemPatch::default().gateway_reference(gateway_reference.clone()),
                    )
                    .await?;
                backfilled += 1;
            }
        }
        Ok(backfilled)
    }

    async fn require_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.ledger
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| DisbursementError::NotFound(format!("Batch {batch_id} not found")))
    }
}
