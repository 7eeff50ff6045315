use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type RecipientId = u64;

/// Directory snapshot of a payment recipient.
///
/// The directory itself is an external collaborator; this is the shape the
/// orchestrator consumes. `amount` is the recipient's current payout amount and
/// is copied onto the batch item at creation time, so later directory edits
/// never retroactively change a submitted item.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Recipient {
    pub id: RecipientId,
    pub name: String,
    pub account_number: String,
    pub bank_code: String,
    pub amount: Decimal,
    pub active: bool,
}
