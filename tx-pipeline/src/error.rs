use snafu::Snafu;
use subxt::utils::{AccountId32, H256};

use crate::call_encoder::EncodeError;
use crate::tx_status::TransactionStatus;

/// Represents errors that can occur while encoding, signing, submitting and tracking
/// transactions, or while loading the keys used to sign them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The first nonce query for an account failed. Retryable.
    #[snafu(display("Error fetching initial nonce for {account}: {source}"))]
    NonceInit {
        /// Account whose nonce could not be fetched.
        account: AccountId32,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The operation or its arguments could not be encoded. Caller error, not retryable.
    #[snafu(display("Error encoding call: {source}"))]
    Encode {
        /// The encoder error.
        source: EncodeError,
    },

    /// The signer refused or failed to sign the payload.
    #[snafu(display("Error signing transaction with nonce {nonce}: {message}"))]
    Sign {
        /// Nonce that was reserved for the transaction.
        nonce: u64,
        /// Reason reported by the signer.
        message: String,
    },

    /// The extrinsic could not be built from the call. Not retryable.
    #[snafu(display("Error building extrinsic with nonce {nonce}: {source}"))]
    Build {
        /// Nonce that was reserved for the transaction.
        nonce: u64,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The network channel rejected the send.
    #[snafu(display("Error submitting tx with nonce {nonce}: {source}"))]
    Submit {
        /// Nonce that was reserved for the transaction.
        nonce: u64,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The node reported the transaction as invalid. Not retryable with the same nonce.
    #[snafu(display("Transaction {tx_hash:?} with nonce {nonce} rejected as invalid: {reason}"))]
    Rejected {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
        /// Reason reported by the node.
        reason: String,
    },

    /// The node gave up on the transaction. Retryable, the nonce may be reused.
    #[snafu(display("Transaction {tx_hash:?} with nonce {nonce} dropped"))]
    Dropped {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
    },

    /// Another transaction with the same nonce took this one's place.
    #[snafu(display("Transaction {tx_hash:?} with nonce {nonce} usurped"))]
    Usurped {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
    },

    /// The wait window elapsed before a terminal status. The transaction may still land.
    ///
    /// `nonce` and `tx_hash` are unset when the window closed before they were known.
    #[snafu(display(
        "Timed out waiting for transaction {tx_hash:?} with nonce {nonce:?}, last status {last_status:?}"
    ))]
    Timeout {
        /// Nonce reserved for the transaction, if any.
        nonce: Option<u64>,
        /// Hash of the submitted extrinsic, if it was sent.
        tx_hash: Option<H256>,
        /// The last status observed before giving up.
        last_status: Option<TransactionStatus>,
    },

    /// The caller abandoned the wait. The transaction may still land.
    #[snafu(display("Stopped waiting for transaction {tx_hash:?} with nonce {nonce:?}"))]
    Cancelled {
        /// Nonce reserved for the transaction, if any.
        nonce: Option<u64>,
        /// Hash of the submitted extrinsic, if it was sent.
        tx_hash: Option<H256>,
    },

    /// The status subscription produced an error.
    #[snafu(display("Error while watching transaction {tx_hash:?} with nonce {nonce}: {source}"))]
    Watch {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The status subscription ended before the requested depth was reached.
    #[snafu(display(
        "Status subscription for transaction {tx_hash:?} with nonce {nonce} closed early"
    ))]
    SubscriptionClosed {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
    },

    /// Error when fetching the events of the including block.
    #[snafu(display("Error fetching events for block {block_hash:?}: {source}"))]
    FetchEvents {
        /// Block the events were requested for.
        block_hash: H256,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// A chain state query other than the nonce lookup failed.
    #[snafu(display("Chain state query failed: {source}"))]
    QueryFailed {
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The transaction was included in a block but failed execution.
    #[snafu(display("Extrinsic {tx_hash:?} with nonce {nonce} failed execution: {details}"))]
    ExtrinsicFailed {
        /// Nonce used by the transaction.
        nonce: u64,
        /// Hash of the submitted extrinsic.
        tx_hash: H256,
        /// Rendered `System.ExtrinsicFailed` payload.
        details: String,
    },

    /// Error when reading a substrate key from a file.
    #[snafu(display("Failed to read substrate key from file '{}': {}", path, source))]
    KeyFileRead {
        /// The path of the key file that could not be read.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Error when parsing a substrate key from a hexadecimal string.
    #[snafu(display("Failed to parse substrate key as hex: {}", source))]
    KeyParse {
        /// The underlying hex parsing error.
        source: hex::FromHexError,
    },

    /// Secret keys must be exactly 32 bytes long.
    #[snafu(display("Invalid key length: expected 32 bytes, got {}", length))]
    InvalidKeyLength {
        /// The actual length of the provided key.
        length: usize,
    },

    /// Error when failing to create a keypair from a secret key or uri.
    #[snafu(display("Failed to create keypair: {message}"))]
    KeypairCreation {
        /// Reason reported by `subxt_signer`.
        message: String,
    },

    /// Error when attempting to connect to a blockchain node.
    #[snafu(display("Error connecting to chain at {url}: {source}"))]
    Connection {
        /// Node url.
        url: String,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },
}

impl Error {
    /// The nonce the failed transaction used, when one had been assigned.
    ///
    /// Lets callers reconcile external state even after a timeout or cancellation.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Error::Sign { nonce, .. }
            | Error::Build { nonce, .. }
            | Error::Submit { nonce, .. }
            | Error::Rejected { nonce, .. }
            | Error::Dropped { nonce, .. }
            | Error::Usurped { nonce, .. }
            | Error::Watch { nonce, .. }
            | Error::SubscriptionClosed { nonce, .. }
            | Error::ExtrinsicFailed { nonce, .. } => Some(*nonce),
            Error::Timeout { nonce, .. } | Error::Cancelled { nonce, .. } => *nonce,
            _ => None,
        }
    }

    /// Whether the orchestrator may resubmit after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Dropped { .. } | Error::Submit { .. })
    }
}

/// Type alias for results that return a `Result<T, Error>`, simplifying error handling.
pub type Result<T, E = Error> = std::result::Result<T, E>;
