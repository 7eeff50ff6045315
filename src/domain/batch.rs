use crate::error::DisbursementError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type BatchId = u64;
pub type ItemId = u64;

/// Prefix for the idempotency references this system synthesizes.
const REFERENCE_PREFIX: &str = "PAYROLL";

/// Represents a positive monetary amount for a disbursement.
///
/// Wraps `rust_decimal::Decimal` to enforce that payment amounts are always
/// strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, DisbursementError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(DisbursementError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DisbursementError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Aggregate status of a batch, derived from its item statuses.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl BatchStatus {
    /// Derives the aggregate status from item counts.
    ///
    /// Adopts the permissive partial rule: any non-zero completed count with an
    /// incomplete or mixed outcome is PARTIALLY_COMPLETED.
    pub fn derive(completed: usize, failed: usize, total: usize) -> Self {
        if total > 0 && completed == total {
            Self::Completed
        } else if total > 0 && failed == total {
            Self::Failed
        } else if completed > 0 && (completed + failed < total || failed > 0) {
            Self::PartiallyCompleted
        } else {
            Self::Processing
        }
    }

    /// True once the batch has reached an outcome that sets `processed_at`.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted)
    }
}

/// Status of a single payment item within a batch.
///
/// COMPLETED and FAILED are terminal; no writer may mutate a terminal item.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One disbursement run covering many recipients.
///
/// `status`, `completed_count` and `failed_count` are derived from item rows by
/// aggregate recompute and are never caller-set after creation. `processed_at`
/// is set exactly once, on the first transition into COMPLETED or
/// PARTIALLY_COMPLETED.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub period: String,
    pub total_amount: Decimal,
    pub item_count: usize,
    pub status: BatchStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One recipient's payment within a batch.
///
/// `amount` is snapshotted from the recipient at batch-creation time; later
/// directory changes never alter a created item.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BatchItem {
    pub id: ItemId,
    pub batch_id: BatchId,
    pub recipient_id: u64,
    pub amount: Amount,
    pub status: ItemStatus,
    pub gateway_reference: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl BatchItem {
    /// Eligibility filter for (re)submission.
    ///
    /// PENDING items have never been picked up. PROCESSING items without a
    /// gateway reference were interrupted mid-submission and are safe to retry.
    /// An item that already holds a reference is never resubmitted, even if
    /// still PROCESSING: the gateway has accepted it and a second submission
    /// would double-pay.
    pub fn is_eligible_for_submission(&self) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Processing => self.gateway_reference.is_none(),
            ItemStatus::Completed | ItemStatus::Failed => false,
        }
    }

    /// The stable idempotency reference for this item.
    pub fn reference(&self) -> String {
        idempotency_reference(self.batch_id, self.id)
    }
}

/// Synthesizes the idempotency reference for an item.
///
/// Deterministic in `(batch_id, item_id)`, so the same item always carries the
/// same reference string across retries, and notifications can be correlated
/// back to the item.
pub fn idempotency_reference(batch_id: BatchId, item_id: ItemId) -> String {
    format!("{REFERENCE_PREFIX}_{batch_id}_{item_id}")
}

/// Parses `(batch_id, item_id)` back out of an idempotency reference.
///
/// Returns `None` for foreign prefixes, missing segments, or non-numeric ids.
pub fn parse_reference(reference: &str) -> Option<(BatchId, ItemId)> {
    let mut parts = reference.split('_');
    if parts.next()? != REFERENCE_PREFIX {
        return None;
    }
    let batch_id = parts.next()?.parse().ok()?;
    let item_id = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((batch_id, item_id))
}
