//! Per-account nonce assignment.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use snafu::ResultExt;
use subxt::utils::AccountId32;
use tokio::sync::Mutex;

use crate::chain::ChainStateOracle;
use crate::error::{NonceInitSnafu, Result};

/// Sequence number of a transaction from one account.
///
/// Only handed out by [`NonceSequencer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nonce(u64);

impl Nonce {
    /// The raw value placed in the extrinsic.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// In-memory counter for one account.
#[derive(Debug, Default)]
struct AccountNonces {
    /// Next fresh value, `None` until the chain has been queried.
    next: Option<u64>,
    /// Released values below `next`, handed out again before fresh ones.
    released: BTreeSet<u64>,
}

impl AccountNonces {
    fn take(&mut self, next: u64) -> u64 {
        if let Some(reused) = self.released.pop_first() {
            return reused;
        }
        self.next = Some(next + 1);
        next
    }

    fn release(&mut self, nonce: u64) {
        let Some(next) = self.next else {
            return;
        };
        if nonce >= next {
            return;
        }
        if nonce + 1 == next {
            let mut rewound = nonce;
            while rewound > 0 && self.released.remove(&(rewound - 1)) {
                rewound -= 1;
            }
            self.next = Some(rewound);
        } else {
            self.released.insert(nonce);
        }
    }
}

/// Hands out strictly increasing nonces per account.
///
/// Calls for the same account are serialized behind that account's lock, which is also held
/// while the starting nonce is fetched from the chain. Calls for different accounts only
/// contend on the short lookup of their entry.
pub struct NonceSequencer<O> {
    oracle: Arc<O>,
    accounts: Mutex<BTreeMap<AccountId32, Arc<Mutex<AccountNonces>>>>,
}

impl<O: ChainStateOracle> NonceSequencer<O> {
    /// Creates a sequencer that queries `oracle` for starting nonces.
    pub fn new(oracle: Arc<O>) -> Self {
        Self {
            oracle,
            accounts: Mutex::new(BTreeMap::new()),
        }
    }

    async fn entry(&self, account: &AccountId32) -> Arc<Mutex<AccountNonces>> {
        self.accounts
            .lock()
            .await
            .entry(account.clone())
            .or_default()
            .clone()
    }

    /// Reserves the next nonce for `account`.
    ///
    /// The first call for an account fetches its on-chain nonce. If that fails the account
    /// stays uninitialized and a later call queries again.
    pub async fn next(&self, account: &AccountId32) -> Result<Nonce> {
        let entry = self.entry(account).await;
        let mut nonces = entry.lock().await;

        let next = match nonces.next {
            Some(next) => next,
            None => {
                let on_chain = self
                    .oracle
                    .account_nonce(account)
                    .await
                    .context(NonceInitSnafu {
                        account: account.clone(),
                    })?;
                info!("🔢 Starting nonce for {account}: {on_chain}");
                on_chain
            }
        };

        Ok(Nonce(nonces.take(next)))
    }

    /// Gives `nonce` back so a later call can reuse it.
    ///
    /// Used when the transaction carrying it never made it into the pool or was rejected.
    pub async fn release(&self, account: &AccountId32, nonce: Nonce) {
        let entry = self.entry(account).await;
        let mut nonces = entry.lock().await;
        nonces.release(nonce.0);
        info!("♻️ Released nonce {nonce} for {account}");
    }

    /// Forgets the cached counter so the next call re-queries the chain.
    pub async fn resync(&self, account: &AccountId32) {
        let entry = self.entry(account).await;
        let mut nonces = entry.lock().await;
        *nonces = AccountNonces::default();
        warn!("🔁 Nonce cache for {account} cleared, will refresh from chain");
    }
}
