use async_trait::async_trait;
use payrun::application::orchestrator::BatchOrchestrator;
use payrun::application::runner::{JobRunner, RetryPolicy};
use payrun::application::service::DisbursementService;
use payrun::domain::ports::{
    AuthorizationResult, Balance, BatchDetails, BatchSubmissionResult, GatewayApi, Job,
    TransactionStatus, TransferDisposition, TransferReceipt, TransferRequest,
};
use payrun::domain::recipient::Recipient;
use payrun::error::{DisbursementError, Result};
use payrun::infrastructure::in_memory::{InMemoryDirectory, InMemoryJobQueue, InMemoryLedger};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

pub const WEBHOOK_SECRET: &[u8] = b"whsec_test";

/// Scriptable gateway double shared by the integration suites.
///
/// Submission hands out `GW-{reference}` gateway references unless the
/// reference was marked rejected or submission failure is switched on.
/// Status lookups are served from the scripted map; unscripted references
/// error, standing in for a flaky gateway.
#[derive(Default)]
pub struct MockGateway {
    pub submit_calls: AtomicUsize,
    pub fail_submission: AtomicBool,
    rejected: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, (TransferDisposition, Option<String>)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject_reference(&self, reference: &str) {
        self.rejected.lock().await.push(reference.to_string());
    }

    pub async fn set_status(
        &self,
        gateway_reference: &str,
        disposition: TransferDisposition,
        message: Option<&str>,
    ) {
        self.statuses.lock().await.insert(
            gateway_reference.to_string(),
            (disposition, message.map(String::from)),
        );
    }
}

#[async_trait]
impl GatewayApi for MockGateway {
    async fn submit_batch(&self, transfers: Vec<TransferRequest>) -> Result<BatchSubmissionResult> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_submission.load(Ordering::SeqCst) {
            return Err(DisbursementError::Gateway(
                "connection reset by peer".to_string(),
            ));
        }
        let rejected = self.rejected.lock().await;
        Ok(BatchSubmissionResult {
            batch_reference: Some("GWB-1".to_string()),
            transfers: transfers
                .into_iter()
                .map(|t| {
                    let accepted = !rejected.contains(&t.reference);
                    TransferReceipt {
                        gateway_reference: accepted.then(|| format!("GW-{}", t.reference)),
                        disposition: if accepted {
                            TransferDisposition::Pending
                        } else {
                            TransferDisposition::Failed
                        },
                        message: (!accepted).then(|| "invalid account".to_string()),
                        reference: t.reference,
                    }
                })
                .collect(),
        })
    }

    async fn authorize_batch(
        &self,
        batch_reference: &str,
        _code: &str,
    ) -> Result<AuthorizationResult> {
        Ok(AuthorizationResult {
            batch_reference: batch_reference.to_string(),
            authorized: true,
            message: None,
        })
    }

    async fn get_transaction_status(&self, reference: &str) -> Result<TransactionStatus> {
        let statuses = self.statuses.lock().await;
        match statuses.get(reference) {
            Some((disposition, message)) => Ok(TransactionStatus {
                reference: reference.to_string(),
                disposition: *disposition,
                message: message.clone(),
            }),
            None => Err(DisbursementError::Gateway(format!(
                "Unknown reference {reference}"
            ))),
        }
    }

    async fn get_batch_details(&self, batch_reference: &str) -> Result<BatchDetails> {
        Ok(BatchDetails {
            batch_reference: batch_reference.to_string(),
            transfers: vec![],
        })
    }

    async fn get_balance(&self) -> Result<Balance> {
        Ok(Balance {
            available: dec!(1000000),
            currency: "NGN".to_string(),
        })
    }
}

pub struct Harness {
    pub service: DisbursementService,
    pub ledger: Arc<InMemoryLedger>,
    pub gateway: Arc<MockGateway>,
    pub runner: JobRunner,
    pub jobs: mpsc::UnboundedReceiver<Job>,
}

pub fn recipient(id: u64, amount: rust_decimal::Decimal) -> Recipient {
    Recipient {
        id,
        name: format!("Recipient {id}"),
        account_number: format!("0{id}00000000"),
        bank_code: "044".to_string(),
        amount,
        active: true,
    }
}

/// Standard fixture: three active recipients with amounts 100/200/300 and a
/// fast retry policy so backoff paths stay cheap to test.
pub fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let directory = Arc::new(InMemoryDirectory::with_recipients(vec![
        recipient(1, dec!(100)),
        recipient(2, dec!(200)),
        recipient(3, dec!(300)),
    ]));
    let gateway = Arc::new(MockGateway::new());
    let (queue, jobs) = InMemoryJobQueue::channel();

    let orchestrator = Arc::new(BatchOrchestrator::new(
        ledger.clone(),
        directory,
        gateway.clone(),
    ));
    let service = DisbursementService::new(
        ledger.clone(),
        gateway.clone(),
        Arc::new(queue),
        orchestrator.clone(),
        WEBHOOK_SECRET,
    );
    let runner = JobRunner::new(
        orchestrator,
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        },
    );

    Harness {
        service,
        ledger,
        gateway,
        runner,
        jobs,
    }
}

/// Runs the enqueued processing job exactly as the worker loop would.
pub async fn drain_one_job(harness: &mut Harness) {
    let job = harness.jobs.recv().await.expect("a job was enqueued");
    harness.runner.run_job(job).await;
}
