use std::str::FromStr;

use hex::FromHex;
use snafu::{ResultExt, Snafu};
use subxt::utils::{AccountId32, MultiSignature};
use subxt_signer::sr25519::Keypair;
use subxt_signer::SecretUri;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::*;

/// A signer refused to sign.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct SignerError {
    /// Reason for the refusal.
    pub message: String,
}

/// Holds key material and signs on behalf of one account.
///
/// The pipeline only ever borrows a signer; it never sees the key itself.
pub trait Signer: Send + Sync {
    /// The account transactions are signed for.
    fn account_id(&self) -> AccountId32;

    /// Signs the payload produced by [`crate::chain::SubmissionChannel::signer_payload`].
    fn sign(&self, payload: &[u8]) -> Result<MultiSignature, SignerError>;
}

/// An sr25519 keypair as a [`Signer`].
#[derive(Clone)]
pub struct Sr25519Signer {
    keypair: Keypair,
}

impl Sr25519Signer {
    /// Wraps an existing keypair.
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Derives a keypair from a secret uri, e.g. `//Alice` or a mnemonic with optional
    /// derivation path.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = SecretUri::from_str(uri).map_err(|e| Error::KeypairCreation {
            message: e.to_string(),
        })?;
        let keypair = Keypair::from_uri(&uri).map_err(|e| Error::KeypairCreation {
            message: e.to_string(),
        })?;
        Ok(Self::new(keypair))
    }
}

impl Signer for Sr25519Signer {
    fn account_id(&self) -> AccountId32 {
        self.keypair.public_key().to_account_id()
    }

    fn sign(&self, payload: &[u8]) -> Result<MultiSignature, SignerError> {
        Ok(MultiSignature::Sr25519(self.keypair.sign(payload).0))
    }
}

/// load a hex encoded sr25519 key from a file
pub async fn load_substrate_key(file_path: &str) -> Result<Sr25519Signer> {
    let mut file = File::open(file_path).await.context(KeyFileReadSnafu {
        path: file_path.to_string(),
    })?;

    let mut hex_string = String::new();
    file.read_to_string(&mut hex_string)
        .await
        .context(KeyFileReadSnafu {
            path: file_path.to_string(),
        })?;

    let key_bytes =
        Vec::from_hex(hex_string.trim().trim_start_matches("0x")).context(KeyParseSnafu)?;

    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKeyLength {
            length: key_bytes.len(),
        })?;

    Keypair::from_secret_key(key_bytes)
        .map(Sr25519Signer::new)
        .map_err(|e| Error::KeypairCreation {
            message: e.to_string(),
        })
}
