//! # Substrate Transaction Pipeline
//!
//! This library submits signed extrinsics to a Substrate-based blockchain and follows them
//! to an outcome: per-account nonce sequencing, call encoding, submission, status tracking
//! and collection of the events a transaction emitted.
//!
//! ## Modules
//! - [`pipeline`]: The submit-and-await orchestrator tying everything together.
//! - [`subxt_client`]: The live chain collaborators, built on `subxt`.

/// Error handling module.
///
/// Defines the error types using the `snafu` crate, one variant per way a submission can fail.
pub mod error;

/// Collaborator traits the pipeline uses to talk to a ledger node.
pub mod chain;

/// Call encoding module.
///
/// Turns operation tags and JSON arguments into SCALE encoded call data, including sudo and
/// batch wrappers.
pub mod call_encoder;

/// Per-account nonce sequencing.
pub mod nonce;

/// Cryptographic signer module.
///
/// Provides the [`signer::Signer`] seam and sr25519 signers loaded from secret uris or key files.
pub mod signer;

/// Transaction submission module.
///
/// Reserves nonces, signs calls and hands the extrinsics to the network.
pub mod tx_submitter;

/// Transaction status state machine.
pub mod tx_status;

/// Tx progress history
pub mod tx_history;

/// Event collection for included transactions.
pub mod tx_events;

/// Retry and wait configuration.
pub mod config;

/// The submit-and-await orchestrator.
pub mod pipeline;

/// `subxt` backed implementation of the collaborator traits.
pub mod subxt_client;

#[cfg(test)]
pub(crate) mod mock;

pub use call_encoder::{CallEncoder, EncodedCall, Operation, PalletNames};
pub use chain::Ledger;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{Outcome, Pipeline, WaitOptions};
pub use signer::{Signer, Sr25519Signer};
pub use subxt_client::SubxtClient;
pub use tx_status::{TransactionStatus, WaitDepth};
