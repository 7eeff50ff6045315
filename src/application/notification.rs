use super::orchestrator::{BatchOrchestrator, TerminalOutcome};
use crate::domain::batch::parse_reference;
use crate::domain::ports::LedgerStoreRef;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// What the receiver did with an event. The transport wrapper acknowledges
/// receipt to the sender either way; this only distinguishes the paths for
/// logging and tests.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum NotificationOutcome {
    /// The item transitioned to a terminal status.
    Applied,
    /// The event was discarded without mutation.
    Ignored(IgnoreReason),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum IgnoreReason {
    MissingSignature,
    BadSignature,
    MalformedBody,
    UnparseableReference,
    /// The referenced item exists but belongs to a different batch than the
    /// reference claims.
    BatchMismatch,
    UnknownItem,
    AlreadyFinalized,
    UnrecognizedOutcome,
    StoreFailure,
}

/// Gateway-pushed event envelope.
///
/// `reference` is the idempotency reference this system synthesized at
/// submission time and is the sole correlation key back to an item.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    event: Option<String>,
    transfer: TransferEvent,
}

#[derive(Debug, Deserialize)]
struct TransferEvent {
    reference: String,
    #[serde(default)]
    gateway_reference: Option<String>,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Applies gateway-pushed terminal statuses to items, idempotently.
///
/// Verification, parsing, and lookup failures are all logged and swallowed:
/// the webhook sender must never observe a failure that would trigger its
/// retry storm, so `receive` is infallible by construction. Durability of
/// duplicate suppression comes from the terminal-status gate on the item row
/// itself, not from any in-process memory of seen events.
pub struct NotificationReceiver {
    orchestrator: Arc<BatchOrchestrator>,
    ledger: LedgerStoreRef,
    secret: Vec<u8>,
}

impl NotificationReceiver {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        ledger: LedgerStoreRef,
        secret: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Processes one raw event. Always returns an outcome, never an error.
    pub async fn receive(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> NotificationOutcome {
        let Some(signature) = signature else {
            warn!("Notification rejected: missing signature header");
            return NotificationOutcome::Ignored(IgnoreReason::MissingSignature);
        };
        if !self.verify_signature(raw_body, signature) {
            warn!("Notification rejected: signature verification failed");
            return NotificationOutcome::Ignored(IgnoreReason::BadSignature);
        }

        let envelope: EventEnvelope = match serde_json::from_slice(raw_body) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, "Notification body did not parse");
                return NotificationOutcome::Ignored(IgnoreReason::MalformedBody);
            }
        };

        let Some((batch_id, item_id)) = parse_reference(&envelope.transfer.reference) else {
            warn!(
                reference = %envelope.transfer.reference,
                "Notification reference did not correlate to an item"
            );
            return NotificationOutcome::Ignored(IgnoreReason::UnparseableReference);
        };

        let outcome = match classify(&envelope.transfer.status) {
            Some(outcome) => outcome,
            None => {
                warn!(
                    status = %envelope.transfer.status,
                    event = envelope.event.as_deref().unwrap_or("-"),
                    "Unrecognized notification outcome"
                );
                return NotificationOutcome::Ignored(IgnoreReason::UnrecognizedOutcome);
            }
        };
        let outcome = match outcome {
            TerminalOutcome::Failed { .. } => TerminalOutcome::Failed {
                message: envelope.transfer.message.clone(),
            },
            completed => completed,
        };

        // The batch half of the reference must agree with the item row before
        // any write; the recompute targets the batch the item belongs to, not
        // the one the sender claims.
        let item = match self.ledger.get_item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(batch_id, item_id, "Notification for unknown item ignored");
                return NotificationOutcome::Ignored(IgnoreReason::UnknownItem);
            }
            Err(error) => {
                warn!(batch_id, item_id, %error, "Item lookup for notification failed");
                return NotificationOutcome::Ignored(IgnoreReason::StoreFailure);
            }
        };
        if item.batch_id != batch_id {
            warn!(
                item_id,
                claimed_batch_id = batch_id,
                actual_batch_id = item.batch_id,
                "Notification reference names the wrong batch for its item"
            );
            return NotificationOutcome::Ignored(IgnoreReason::BatchMismatch);
        }

        match self.orchestrator.apply_terminal(item_id, outcome).await {
            Ok(()) => {
                info!(
                    batch_id,
                    item_id,
                    gateway_reference = envelope.transfer.gateway_reference.as_deref().unwrap_or("-"),
                    "Applied notification"
                );
                // The item already moved; a failed recompute only leaves the
                // aggregate counters stale, and the reconcile sweep converges them.
                if let Err(error) = self.orchestrator.recompute(item.batch_id).await {
                    warn!(batch_id = item.batch_id, %error, "Aggregate recompute after notification failed");
                }
                NotificationOutcome::Applied
            }
            Err(crate::error::DisbursementError::AlreadyFinalized) => {
                NotificationOutcome::Ignored(IgnoreReason::AlreadyFinalized)
            }
            Err(crate::error::DisbursementError::NotFound(_)) => {
                warn!(batch_id, item_id, "Notification for unknown item ignored");
                NotificationOutcome::Ignored(IgnoreReason::UnknownItem)
            }
            Err(error) => {
                warn!(batch_id, item_id, %error, "Notification apply failed");
                NotificationOutcome::Ignored(IgnoreReason::StoreFailure)
            }
        }
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Computes the hex HMAC-SHA256 signature for an event body. Exposed so the
/// worker's test traffic and the integration tests can sign envelopes the way
/// the gateway does.
pub fn sign_body(secret: impl AsRef<[u8]>, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_ref())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

fn classify(status: &str) -> Option<TerminalOutcome> {
    match status.to_ascii_lowercase().as_str() {
        "success" | "successful" | "paid" => Some(TerminalOutcome::Completed),
        "failed" | "failure" | "reversed" => Some(TerminalOutcome::Failed { message: None }),
        _ => None,
    }
}
