//! Submit-and-await orchestration.
//!
//! [`Pipeline::submit_and_await`] encodes an operation, reserves a nonce, signs and sends the
//! extrinsic, then follows its status stream until the requested [`WaitDepth`] is reached or
//! the transaction fails. Exactly one result is produced per call.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::Peekable;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use snafu::ResultExt;
use subxt::utils::{AccountId32, H256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::call_encoder::{CallEncoder, EncodedCall, Operation};
use crate::chain::{Ledger, StatusStream};
use crate::config::PipelineConfig;
use crate::error::{EncodeSnafu, Error, QueryFailedSnafu, Result};
use crate::signer::Signer;
use crate::tx_events::{DispatchOutcome, EmittedEvent, EventCollector};
use crate::tx_history::TxHistory;
use crate::tx_status::{Applied, StatusTracker, TransactionStatus, WaitDepth};
use crate::tx_submitter::{
    is_stale_nonce_error, SignedTransaction, SubmissionHandle, TransactionSubmitter,
};

/// How long to wait for one call, and how deep.
#[derive(Clone, Debug)]
pub struct WaitOptions {
    /// Status that ends the wait successfully.
    pub depth: WaitDepth,
    /// Wait window for the whole call, retries included. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Cancelling this token abandons the wait. Already sent transactions are not affected.
    pub cancel: CancellationToken,
}

impl WaitOptions {
    /// Unbounded wait for `depth`.
    pub fn new(depth: WaitDepth) -> Self {
        Self {
            depth,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bounds the wait to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandons the wait once `cancel` is cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What the caller gets back once the transaction reached the requested depth.
#[derive(Clone, Debug)]
pub struct Outcome {
    /// Status that satisfied the wait depth.
    pub status: TransactionStatus,
    /// Block the transaction was included in.
    pub block_hash: H256,
    /// Events emitted by the transaction, empty if they could not be collected.
    pub events: Vec<EmittedEvent>,
    /// Nonce the transaction used.
    pub nonce: u64,
    /// Hash of the extrinsic.
    pub tx_hash: H256,
    /// Every accepted status, oldest first.
    pub history: Vec<TransactionStatus>,
    /// Execution result according to the `System` events.
    pub dispatch: DispatchOutcome,
}

impl Outcome {
    /// Turns a failed dispatch into [`Error::ExtrinsicFailed`].
    pub fn ensure_success(self) -> Result<Self> {
        match &self.dispatch {
            DispatchOutcome::Failed(details) => Err(Error::ExtrinsicFailed {
                nonce: self.nonce,
                tx_hash: self.tx_hash,
                details: details.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// A transaction between submission and the delivery of its outcome.
pub struct PendingSubmission {
    transaction: SignedTransaction,
    tracker: StatusTracker,
    events: Vec<EmittedEvent>,
}

impl PendingSubmission {
    /// Starts tracking a freshly submitted transaction.
    pub fn new(transaction: SignedTransaction) -> Self {
        Self {
            transaction,
            tracker: StatusTracker::new(),
            events: Vec::new(),
        }
    }

    /// The submitted transaction.
    pub fn transaction(&self) -> &SignedTransaction {
        &self.transaction
    }

    /// Latest accepted status.
    pub fn status(&self) -> Option<&TransactionStatus> {
        self.tracker.current()
    }

    /// Events collected so far.
    pub fn events(&self) -> &[EmittedEvent] {
        &self.events
    }

    /// Feeds a notification to the tracker.
    pub fn apply(&mut self, status: TransactionStatus) -> Applied {
        self.tracker.on_notification(status)
    }

    fn into_outcome(self, status: TransactionStatus, block_hash: H256) -> Outcome {
        Outcome {
            dispatch: DispatchOutcome::from_events(&self.events),
            status,
            block_hash,
            nonce: self.transaction.nonce().value(),
            tx_hash: self.transaction.hash(),
            history: self.tracker.history().to_vec(),
            events: self.events,
        }
    }
}

/// Why a step of a call stopped before finishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interruption {
    Cancelled,
    TimedOut,
}

impl Interruption {
    fn into_error(
        self,
        nonce: Option<u64>,
        tx_hash: Option<H256>,
        last_status: Option<TransactionStatus>,
    ) -> Error {
        match self {
            Interruption::Cancelled => Error::Cancelled { nonce, tx_hash },
            Interruption::TimedOut => Error::Timeout {
                nonce,
                tx_hash,
                last_status,
            },
        }
    }
}

/// Runs `step` until it finishes, the caller cancels or `deadline` passes.
///
/// Cancellation wins over the deadline, and both over a step that is ready at the same time.
async fn interruptible<F: Future>(
    step: F,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> std::result::Result<F::Output, Interruption> {
    let timeout = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interruption::Cancelled),
        _ = timeout => Err(Interruption::TimedOut),
        output = step => Ok(output),
    }
}

/// Orchestrates encoding, nonce assignment, submission, tracking and event collection.
///
/// One instance serves any number of concurrent calls. Calls for the same account only
/// contend on nonce assignment.
pub struct Pipeline<L> {
    ledger: Arc<L>,
    encoder: CallEncoder,
    submitter: TransactionSubmitter<L>,
    events: EventCollector<L>,
    history: TxHistory,
    config: PipelineConfig,
}

impl<L: Ledger> Pipeline<L> {
    /// Creates a pipeline talking to `ledger`.
    pub fn new(ledger: Arc<L>, encoder: CallEncoder, config: PipelineConfig) -> Self {
        Self {
            submitter: TransactionSubmitter::new(ledger.clone()),
            events: EventCollector::new(ledger.clone()),
            ledger,
            encoder,
            history: TxHistory::with_capacity(config.history_capacity),
            config,
        }
    }

    /// The call encoder used for tagged operations.
    pub fn encoder(&self) -> &CallEncoder {
        &self.encoder
    }

    /// Retry and wait settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of status subscriptions currently held open.
    pub fn active_watches(&self) -> usize {
        self.submitter.watches().active()
    }

    /// Status history of a transaction submitted through this pipeline.
    pub async fn history(&self, tx_hash: H256) -> Option<Vec<TransactionStatus>> {
        self.history.get_history(&TxHistory::key(tx_hash)).await
    }

    /// Free balance of `account`.
    pub async fn balance(&self, account: &AccountId32) -> Result<u128> {
        self.ledger
            .free_balance(account)
            .await
            .context(QueryFailedSnafu)
    }

    /// Decimals of the chain's native token, if it advertises them.
    pub async fn token_decimals(&self) -> Result<Option<u32>> {
        self.ledger
            .token_decimals()
            .await
            .context(QueryFailedSnafu)
    }

    /// Encodes the operation `tag` with `args`, submits it signed by `signer` and waits for
    /// its outcome.
    pub async fn submit_and_await(
        &self,
        tag: &str,
        args: &Value,
        signer: &dyn Signer,
        options: WaitOptions,
    ) -> Result<Outcome> {
        let call = self.encoder.encode(tag, args).context(EncodeSnafu)?;
        self.submit_call_and_await(&call, signer, options).await
    }

    /// Like [`Pipeline::submit_and_await`] for an already built [`Operation`].
    pub async fn submit_operation_and_await(
        &self,
        operation: &Operation,
        signer: &dyn Signer,
        options: WaitOptions,
    ) -> Result<Outcome> {
        let call = self
            .encoder
            .encode_operation(operation)
            .context(EncodeSnafu)?;
        self.submit_call_and_await(&call, signer, options).await
    }

    /// Submits `call` and waits for its outcome, resubmitting after drops and failed sends.
    pub async fn submit_call_and_await(
        &self,
        call: &EncodedCall,
        signer: &dyn Signer,
        options: WaitOptions,
    ) -> Result<Outcome> {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut attempt = 0;

        loop {
            let result = self.attempt(call, signer, &options, deadline).await;

            let err = match result {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => err,
                other => return other,
            };

            attempt += 1;
            let backoff = self.config.retry_backoff(attempt);
            if deadline.is_some_and(|deadline| Instant::now() + backoff >= deadline) {
                warn!("⏱️ No time left to retry {}: {err}", call.tag());
                return Err(err);
            }

            warn!(
                "🔁 Retrying {} (attempt {attempt}/{}) in {backoff:?}: {err}",
                call.tag(),
                self.config.max_retries
            );
            tokio::select! {
                _ = options.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Reserves a nonce, sends `call` once and follows it until it settles.
    ///
    /// Every step is bounded by the caller's deadline and token. A nonce reserved before an
    /// interrupted send is kept, since the extrinsic may already be in the pool.
    async fn attempt(
        &self,
        call: &EncodedCall,
        signer: &dyn Signer,
        options: &WaitOptions,
        deadline: Option<Instant>,
    ) -> Result<Outcome> {
        let origin = signer.account_id();
        let reserve = self.submitter.nonces().next(&origin);
        let nonce = match interruptible(reserve, &options.cancel, deadline).await {
            Ok(nonce) => nonce?,
            Err(interruption) => {
                warn!("⏹️ Gave up on {} before a nonce was assigned", call.tag());
                return Err(interruption.into_error(None, None, None));
            }
        };

        let send = self.submitter.submit_with_nonce(call, nonce, signer);
        let handle = match interruptible(send, &options.cancel, deadline).await {
            Ok(handle) => handle?,
            Err(interruption) => {
                warn!(
                    "⏹️ Gave up on sending {} with nonce {nonce}, it may still reach the pool",
                    call.tag()
                );
                return Err(interruption.into_error(Some(nonce.value()), None, None));
            }
        };

        self.await_outcome(handle, options, deadline).await
    }

    /// Follows one submission until it settles, the deadline passes or the caller cancels.
    async fn await_outcome(
        &self,
        handle: SubmissionHandle,
        options: &WaitOptions,
        deadline: Option<Instant>,
    ) -> Result<Outcome> {
        let SubmissionHandle {
            transaction,
            statuses,
            registration: _registration,
        } = handle;
        let nonce = transaction.nonce().value();
        let tx_hash = transaction.hash();
        let mut pending = PendingSubmission::new(transaction);
        let mut statuses = statuses.peekable();

        let watch = self.watch(&mut pending, &mut statuses, options.depth);
        let settled = interruptible(watch, &options.cancel, deadline).await;

        match settled {
            Ok(Ok((status, block_hash))) => {
                info!("🎉 Transaction {tx_hash:?} (nonce {nonce}) reached {status}");
                Ok(pending.into_outcome(status, block_hash))
            }
            Ok(Err(err)) => Err(err),
            Err(interruption) => {
                match interruption {
                    Interruption::Cancelled => info!(
                        "🛑 Stopped waiting for {tx_hash:?} (nonce {nonce}), it may still land"
                    ),
                    Interruption::TimedOut => {
                        warn!("⏱️ Timed out waiting for {tx_hash:?} (nonce {nonce})")
                    }
                }
                Err(interruption.into_error(
                    Some(nonce),
                    Some(tx_hash),
                    pending.status().cloned(),
                ))
            }
        }
    }

    /// Applies notifications until the wait depth is reached or a failure is terminal.
    ///
    /// Success is only reported when no further notification is already queued, both before
    /// and after the events are fetched, so a queued retraction is never skipped.
    async fn watch(
        &self,
        pending: &mut PendingSubmission,
        statuses: &mut Peekable<StatusStream>,
        depth: WaitDepth,
    ) -> Result<(TransactionStatus, H256)> {
        let nonce = pending.transaction().nonce();
        let tx_hash = pending.transaction().hash();

        loop {
            let status = match statuses.next().await {
                Some(Ok(status)) => status,
                Some(Err(source)) => {
                    error!("❌ Status subscription for {tx_hash:?} failed: {source}");
                    return Err(Error::Watch {
                        nonce: nonce.value(),
                        tx_hash,
                        source,
                    });
                }
                None => {
                    warn!("⚠️ Status subscription for {tx_hash:?} closed early");
                    return Err(Error::SubscriptionClosed {
                        nonce: nonce.value(),
                        tx_hash,
                    });
                }
            };

            if pending.apply(status.clone()) != Applied::Ignored {
                info!("📡 Transaction {tx_hash:?} (nonce {nonce}): {status}");
                self.history.record(tx_hash, status).await;
            }

            let Some(current) = pending.status().cloned() else {
                continue;
            };

            match current {
                TransactionStatus::Invalid(reason) => {
                    error!("❌ Transaction {tx_hash:?} (nonce {nonce}) is invalid: {reason}");
                    if is_stale_nonce_error(&reason) {
                        self.submitter
                            .nonces()
                            .resync(pending.transaction().origin())
                            .await;
                    } else {
                        self.release_nonce(pending).await;
                    }
                    return Err(Error::Rejected {
                        nonce: nonce.value(),
                        tx_hash,
                        reason,
                    });
                }
                TransactionStatus::Dropped => {
                    warn!("⚠️ Transaction {tx_hash:?} (nonce {nonce}) was dropped");
                    self.release_nonce(pending).await;
                    return Err(Error::Dropped {
                        nonce: nonce.value(),
                        tx_hash,
                    });
                }
                TransactionStatus::Usurped => {
                    error!("❌ Transaction {tx_hash:?} (nonce {nonce}) was usurped");
                    return Err(Error::Usurped {
                        nonce: nonce.value(),
                        tx_hash,
                    });
                }
                _ => {}
            }

            if !depth.is_satisfied_by(&current) {
                continue;
            }
            let Some(block_hash) = current.block_hash() else {
                continue;
            };
            if !current.is_terminal() && has_queued(statuses) {
                continue;
            }

            let events = match self.events.collect_for(block_hash, tx_hash).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("⚠️ Could not collect events for {tx_hash:?}: {e}");
                    Vec::new()
                }
            };

            if !current.is_terminal() && has_queued(statuses) {
                debug!("notifications for {tx_hash:?} arrived while collecting events");
                continue;
            }

            pending.events = events;
            return Ok((current, block_hash));
        }
    }

    async fn release_nonce(&self, pending: &PendingSubmission) {
        let transaction = pending.transaction();
        self.submitter
            .nonces()
            .release(transaction.origin(), transaction.nonce())
            .await;
    }
}

/// Whether a notification is already waiting on the subscription.
fn has_queued(statuses: &mut Peekable<StatusStream>) -> bool {
    matches!(
        Pin::new(statuses).peek().now_or_never(),
        Some(Some(_))
    )
}
