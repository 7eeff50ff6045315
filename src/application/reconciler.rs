use super::orchestrator::{BatchOrchestrator, TerminalOutcome};
use crate::domain::batch::BatchId;
use crate::domain::ports::{GatewayRef, LedgerStoreRef, TransferDisposition};
use crate::error::{DisbursementError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one reconciliation sweep.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ReconcileSummary {
    /// Items with a gateway reference that were looked up.
    pub examined: usize,
    /// Items that transitioned to a terminal status during this sweep.
    pub updated: usize,
    /// Per-item lookup failures. These never abort the sweep.
    pub errors: usize,
}

/// Poll-side counterpart of the notification receiver.
///
/// Closes the gap when push notifications are missed, delayed, or never
/// configured, by asking the gateway directly about every item it has accepted.
/// Writes go through the same terminal-status gate as notifications, so a
/// sweep never downgrades or re-finalizes an item, whichever update source got
/// there first.
pub struct Reconciler {
    ledger: LedgerStoreRef,
    gateway: GatewayRef,
    orchestrator: Arc<BatchOrchestrator>,
}

impl Reconciler {
    pub fn new(
        ledger: LedgerStoreRef,
        gateway: GatewayRef,
        orchestrator: Arc<BatchOrchestrator>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            orchestrator,
        }
    }

    /// Sweeps every item of the batch that holds a gateway reference.
    pub async fn reconcile(&self, batch_id: BatchId) -> Result<ReconcileSummary> {
        let items = self.ledger.list_items(batch_id).await?;
        let mut summary = ReconcileSummary::default();

        for item in items {
            let Some(reference) = item.gateway_reference.as_deref() else {
                continue;
            };
            summary.examined += 1;

            let status = match self.gateway.get_transaction_status(reference).await {
                Ok(status) => status,
                Err(error) => {
                    warn!(batch_id, item_id = item.id, %error, "Status lookup failed");
                    summary.errors += 1;
                    continue;
                }
            };

            let outcome = match status.disposition {
                TransferDisposition::Paid => TerminalOutcome::Completed,
                TransferDisposition::Failed => TerminalOutcome::Failed {
                    message: status.message.clone(),
                },
                TransferDisposition::Pending => continue,
            };

            match self.orchestrator.apply_terminal(item.id, outcome).await {
                Ok(()) => summary.updated += 1,
                // Benign race: another writer finalized the item first.
                Err(DisbursementError::AlreadyFinalized) => {}
                Err(error) => {
                    warn!(batch_id, item_id = item.id, %error, "Reconcile write failed");
                    summary.errors += 1;
                }
            }
        }

        self.orchestrator.recompute(batch_id).await?;
        info!(
            batch_id,
            examined = summary.examined,
            updated = summary.updated,
            errors = summary.errors,
            "Reconciliation sweep finished"
        );
        Ok(summary)
    }
}
