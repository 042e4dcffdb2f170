//! substrate transaction submitter
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use snafu::ResultExt;
use subxt::utils::{AccountId32, MultiSignature, H256};

use crate::call_encoder::EncodedCall;
use crate::chain::{ChainStateOracle, StatusStream, SubmissionChannel};
use crate::error::{BuildSnafu, Error, Result};
use crate::nonce::{Nonce, NonceSequencer};
use crate::signer::Signer;

/// Hash identifying a submitted extrinsic, as computed by the node.
pub fn extrinsic_hash(extrinsic: &[u8]) -> H256 {
    H256(sp_core::hashing::blake2_256(extrinsic))
}

/// A call signed by its origin. Immutable, identified by [`SignedTransaction::hash`].
#[derive(Clone, Debug)]
pub struct SignedTransaction {
    call: EncodedCall,
    nonce: Nonce,
    origin: AccountId32,
    signature: MultiSignature,
    extrinsic: Vec<u8>,
    hash: H256,
}

impl SignedTransaction {
    /// The signed call.
    pub fn call(&self) -> &EncodedCall {
        &self.call
    }

    /// Nonce the transaction was signed with.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Account that signed the transaction.
    pub fn origin(&self) -> &AccountId32 {
        &self.origin
    }

    /// The origin's signature.
    pub fn signature(&self) -> &MultiSignature {
        &self.signature
    }

    /// The extrinsic bytes sent to the network.
    pub fn extrinsic(&self) -> &[u8] {
        &self.extrinsic
    }

    /// Content hash of the extrinsic.
    pub fn hash(&self) -> H256 {
        self.hash
    }
}

/// Counts live status subscriptions.
#[derive(Clone, Debug, Default)]
pub struct WatchRegistry {
    active: Arc<AtomicUsize>,
}

impl WatchRegistry {
    /// Number of registrations not yet dropped.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn register(&self) -> WatchRegistration {
        self.active.fetch_add(1, Ordering::SeqCst);
        WatchRegistration {
            active: self.active.clone(),
        }
    }
}

/// A live subscription, released on drop.
#[derive(Debug)]
pub struct WatchRegistration {
    active: Arc<AtomicUsize>,
}

impl Drop for WatchRegistration {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A submitted transaction together with its status subscription.
pub struct SubmissionHandle {
    /// The transaction that was sent.
    pub transaction: SignedTransaction,
    /// Status notifications for it.
    pub statuses: StatusStream,
    /// Keeps the subscription counted until the handle is dropped.
    pub registration: WatchRegistration,
}

/// Signs calls and hands them to the network, one nonce per successful submission.
pub struct TransactionSubmitter<L> {
    channel: Arc<L>,
    nonces: NonceSequencer<L>,
    watches: WatchRegistry,
}

impl<L: ChainStateOracle + SubmissionChannel> TransactionSubmitter<L> {
    /// Creates a submitter sending through `channel`, which also seeds nonces.
    pub fn new(channel: Arc<L>) -> Self {
        Self {
            nonces: NonceSequencer::new(channel.clone()),
            channel,
            watches: WatchRegistry::default(),
        }
    }

    /// The nonce sequencer shared by every submission.
    pub fn nonces(&self) -> &NonceSequencer<L> {
        &self.nonces
    }

    /// Live subscription counter.
    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// Reserves a nonce, signs `call` with `signer` and sends it.
    ///
    /// If anything after the nonce reservation fails the nonce is released, or the cache is
    /// refreshed when the node reports it as stale, so later submissions do not stall.
    pub async fn submit(&self, call: &EncodedCall, signer: &dyn Signer) -> Result<SubmissionHandle> {
        let nonce = self.nonces.next(&signer.account_id()).await?;
        self.submit_with_nonce(call, nonce, signer).await
    }

    /// Signs `call` at a nonce already reserved from [`TransactionSubmitter::nonces`] and
    /// sends it, releasing or refreshing the nonce on failure like [`Self::submit`].
    pub async fn submit_with_nonce(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
        signer: &dyn Signer,
    ) -> Result<SubmissionHandle> {
        let origin = signer.account_id();

        match self.sign_and_send(call, nonce, &origin, signer).await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                if is_stale_nonce_error(&err.to_string()) {
                    warn!("🔁 Nonce {nonce} likely stale: {err}");
                    self.nonces.resync(&origin).await;
                } else {
                    self.nonces.release(&origin, nonce).await;
                }
                Err(err)
            }
        }
    }

    async fn sign_and_send(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
        origin: &AccountId32,
        signer: &dyn Signer,
    ) -> Result<SubmissionHandle> {
        let payload = self
            .channel
            .signer_payload(call, nonce)
            .context(BuildSnafu {
                nonce: nonce.value(),
            })?;

        let signature = signer.sign(&payload).map_err(|e| {
            error!("❌ Signer refused transaction with nonce {nonce}: {e}");
            Error::Sign {
                nonce: nonce.value(),
                message: e.to_string(),
            }
        })?;

        let extrinsic = self
            .channel
            .assemble(call, nonce, origin, &signature)
            .context(BuildSnafu {
                nonce: nonce.value(),
            })?;
        let hash = extrinsic_hash(&extrinsic);

        let statuses = self
            .channel
            .submit_and_watch(extrinsic.clone())
            .await
            .map_err(|source| {
                error!("❌ Failed to submit {} with nonce {nonce}: {source}", call.tag());
                Error::Submit {
                    nonce: nonce.value(),
                    source,
                }
            })?;

        info!(
            "✅ Transaction {} submitted successfully: {:?} (nonce {nonce})",
            call.tag(),
            hash
        );

        Ok(SubmissionHandle {
            transaction: SignedTransaction {
                call: call.clone(),
                nonce,
                origin: origin.clone(),
                signature,
                extrinsic,
                hash,
            },
            statuses,
            registration: self.watches.register(),
        })
    }
}

/// Whether a node error means the nonce was already used on chain.
pub(crate) fn is_stale_nonce_error(err: &str) -> bool {
    err.contains("Priority is too low")
        || err.contains("Transaction is outdated")
        || err.contains("Stale")
}
