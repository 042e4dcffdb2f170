//! Seams between the pipeline and the ledger node.
//!
//! The pipeline only talks to the chain through these traits. [`crate::subxt_client`]
//! implements them over a live `subxt` connection; tests use a scripted in-memory ledger.
use async_trait::async_trait;
use futures::stream::BoxStream;
use subxt::utils::{AccountId32, MultiSignature, H256};

use crate::call_encoder::EncodedCall;
use crate::nonce::Nonce;
use crate::tx_events::EmittedEvent;
use crate::tx_status::TransactionStatus;

/// Ordered status notifications for one submitted transaction.
///
/// Dropping the stream unsubscribes.
pub type StatusStream = BoxStream<'static, Result<TransactionStatus, subxt::Error>>;

/// Read access to account state.
#[async_trait]
pub trait ChainStateOracle: Send + Sync {
    /// The nonce the chain expects for the next transaction from `account`.
    async fn account_nonce(&self, account: &AccountId32) -> Result<u64, subxt::Error>;

    /// Free balance of `account`.
    async fn free_balance(&self, account: &AccountId32) -> Result<u128, subxt::Error>;

    /// Decimals of the native token, if the chain advertises them.
    async fn token_decimals(&self) -> Result<Option<u32>, subxt::Error>;
}

/// Builds extrinsics and sends them to the network.
#[async_trait]
pub trait SubmissionChannel: Send + Sync {
    /// The bytes a signer must sign to authorize `call` at `nonce`.
    fn signer_payload(&self, call: &EncodedCall, nonce: Nonce) -> Result<Vec<u8>, subxt::Error>;

    /// The signed extrinsic bytes for `call` at `nonce`.
    fn assemble(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
        origin: &AccountId32,
        signature: &MultiSignature,
    ) -> Result<Vec<u8>, subxt::Error>;

    /// Sends signed extrinsic bytes and subscribes to their status.
    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusStream, subxt::Error>;
}

/// Read access to blocks and the events they emitted.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Position of the extrinsic `tx_hash` inside block `block_hash`, if it is there.
    async fn extrinsic_index(
        &self,
        block_hash: H256,
        tx_hash: H256,
    ) -> Result<Option<u32>, subxt::Error>;

    /// Every event emitted while executing block `block_hash`, in order.
    async fn events_at(&self, block_hash: H256) -> Result<Vec<EmittedEvent>, subxt::Error>;
}

/// Everything the orchestrator needs from a ledger node.
pub trait Ledger: ChainStateOracle + SubmissionChannel + EventSource + 'static {}

impl<T> Ledger for T where T: ChainStateOracle + SubmissionChannel + EventSource + 'static {}
