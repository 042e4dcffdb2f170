//! Scripted in-memory ledger for tests.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use codec::Encode;
use futures::channel::mpsc;
use futures::{stream, StreamExt};
use subxt::utils::{AccountId32, MultiSignature, H256};

use crate::call_encoder::{CallEncoder, CallIndices, EncodedCall, PalletNames};
use crate::chain::{ChainStateOracle, EventSource, StatusStream, SubmissionChannel};
use crate::nonce::Nonce;
use crate::signer::{Signer, SignerError};
use crate::tx_events::{EmittedEvent, Phase};
use crate::tx_status::TransactionStatus;
use crate::tx_submitter::extrinsic_hash;

/// One item of a status subscription.
pub(crate) enum Notice {
    Status(TransactionStatus),
    Error(String),
}

impl Notice {
    fn into_result(self) -> Result<TransactionStatus, subxt::Error> {
        match self {
            Notice::Status(status) => Ok(status),
            Notice::Error(message) => Err(subxt::Error::Other(message)),
        }
    }
}

/// What the next `submit_and_watch` call does.
pub(crate) enum Script {
    /// Accept and emit these notices, then close or stay open.
    Notices { notices: Vec<Notice>, keep_open: bool },
    /// Refuse the send.
    SubmitError(String),
    /// Accept and forward whatever the test sends.
    Manual(mpsc::UnboundedReceiver<Notice>),
    /// Never answer the send.
    Stall,
}

impl Script {
    /// Emits `statuses` and closes the subscription.
    pub(crate) fn statuses(statuses: Vec<TransactionStatus>) -> Self {
        Script::Notices {
            notices: statuses.into_iter().map(Notice::Status).collect(),
            keep_open: false,
        }
    }

    /// Emits `statuses` and keeps the subscription open.
    pub(crate) fn statuses_then_silence(statuses: Vec<TransactionStatus>) -> Self {
        Script::Notices {
            notices: statuses.into_iter().map(Notice::Status).collect(),
            keep_open: true,
        }
    }

    /// A subscription driven by the returned sender.
    pub(crate) fn manual() -> (Self, mpsc::UnboundedSender<Notice>) {
        let (sender, receiver) = mpsc::unbounded();
        (Script::Manual(receiver), sender)
    }
}

/// In-memory ledger implementing every collaborator trait.
#[derive(Default)]
pub(crate) struct MockLedger {
    nonces: Mutex<BTreeMap<AccountId32, u64>>,
    balances: Mutex<BTreeMap<AccountId32, u128>>,
    token_decimals: Mutex<Option<u32>>,
    nonce_queries: AtomicUsize,
    failing_nonce_queries: AtomicUsize,
    stalled_nonce_queries: AtomicBool,
    failing_assembly: AtomicBool,
    scripts: Mutex<VecDeque<Script>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    block_events: Mutex<HashMap<H256, Vec<EmittedEvent>>>,
    block_extrinsics: Mutex<HashMap<H256, Vec<H256>>>,
    include_in: Mutex<Option<H256>>,
    on_event_fetch: Mutex<Option<(mpsc::UnboundedSender<Notice>, Vec<Notice>)>>,
}

impl MockLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_nonce(&self, account: &AccountId32, nonce: u64) {
        self.nonces.lock().unwrap().insert(account.clone(), nonce);
    }

    pub(crate) fn set_balance(&self, account: &AccountId32, balance: u128) {
        self.balances.lock().unwrap().insert(account.clone(), balance);
    }

    pub(crate) fn set_token_decimals(&self, decimals: u32) {
        *self.token_decimals.lock().unwrap() = Some(decimals);
    }

    /// Makes the next `count` nonce queries fail.
    pub(crate) fn fail_nonce_queries(&self, count: usize) {
        self.failing_nonce_queries.store(count, Ordering::SeqCst);
    }

    /// Makes nonce queries hang forever.
    pub(crate) fn stall_nonce_queries(&self) {
        self.stalled_nonce_queries.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_assembly(&self, fail: bool) {
        self.failing_assembly.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn nonce_queries(&self) -> usize {
        self.nonce_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Every extrinsic accepted so far, in submission order.
    pub(crate) fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn set_block_events(&self, block: H256, events: Vec<EmittedEvent>) {
        self.block_events.lock().unwrap().insert(block, events);
    }

    /// Places every later submission into `block`, in submission order.
    pub(crate) fn include_submissions_in(&self, block: H256) {
        self.block_extrinsics.lock().unwrap().entry(block).or_default();
        *self.include_in.lock().unwrap() = Some(block);
    }

    /// Sends `notices` through `sender` the next time events are looked up.
    pub(crate) fn notify_on_event_fetch(
        &self,
        sender: mpsc::UnboundedSender<Notice>,
        notices: Vec<Notice>,
    ) {
        *self.on_event_fetch.lock().unwrap() = Some((sender, notices));
    }
}

#[async_trait]
impl ChainStateOracle for MockLedger {
    async fn account_nonce(&self, account: &AccountId32) -> Result<u64, subxt::Error> {
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        if self.stalled_nonce_queries.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let failing = self.failing_nonce_queries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_nonce_queries.store(failing - 1, Ordering::SeqCst);
            return Err(subxt::Error::Other("node unavailable".to_string()));
        }
        Ok(self
            .nonces
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or_default())
    }

    async fn free_balance(&self, account: &AccountId32) -> Result<u128, subxt::Error> {
        self.balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .ok_or_else(|| subxt::Error::Other(format!("no account {account}")))
    }

    async fn token_decimals(&self) -> Result<Option<u32>, subxt::Error> {
        Ok(*self.token_decimals.lock().unwrap())
    }
}

#[async_trait]
impl SubmissionChannel for MockLedger {
    fn signer_payload(&self, call: &EncodedCall, nonce: Nonce) -> Result<Vec<u8>, subxt::Error> {
        Ok((call.call_data().to_vec(), nonce.value()).encode())
    }

    fn assemble(
        &self,
        call: &EncodedCall,
        nonce: Nonce,
        origin: &AccountId32,
        signature: &MultiSignature,
    ) -> Result<Vec<u8>, subxt::Error> {
        if self.failing_assembly.load(Ordering::SeqCst) {
            return Err(subxt::Error::Other("unknown signed extension".to_string()));
        }
        Ok((nonce.value(), origin, signature, call.call_data().to_vec()).encode())
    }

    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusStream, subxt::Error> {
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::SubmitError(message)) => return Err(subxt::Error::Other(message)),
            Some(Script::Stall) => return std::future::pending().await,
            _ => {}
        }

        if let Some(block) = *self.include_in.lock().unwrap() {
            self.block_extrinsics
                .lock()
                .unwrap()
                .entry(block)
                .or_default()
                .push(extrinsic_hash(&extrinsic));
        }
        self.submitted.lock().unwrap().push(extrinsic);

        let statuses: StatusStream = match script {
            None => stream::pending().boxed(),
            Some(Script::Notices {
                notices,
                keep_open,
            }) => {
                let notices = stream::iter(notices.into_iter().map(Notice::into_result));
                if keep_open {
                    notices.chain(stream::pending()).boxed()
                } else {
                    notices.boxed()
                }
            }
            Some(Script::Manual(receiver)) => receiver.map(Notice::into_result).boxed(),
            Some(Script::SubmitError(_) | Script::Stall) => unreachable!("handled above"),
        };
        Ok(statuses)
    }
}

#[async_trait]
impl EventSource for MockLedger {
    async fn extrinsic_index(
        &self,
        block_hash: H256,
        tx_hash: H256,
    ) -> Result<Option<u32>, subxt::Error> {
        if let Some((sender, notices)) = self.on_event_fetch.lock().unwrap().take() {
            for notice in notices {
                let _ = sender.unbounded_send(notice);
            }
        }
        let extrinsics = self.block_extrinsics.lock().unwrap();
        match extrinsics.get(&block_hash) {
            Some(hashes) => Ok(hashes
                .iter()
                .position(|hash| *hash == tx_hash)
                .map(|index| index as u32)),
            None if self.block_events.lock().unwrap().contains_key(&block_hash) => Ok(None),
            None => Err(subxt::Error::Other(format!("unknown block {block_hash:?}"))),
        }
    }

    async fn events_at(&self, block_hash: H256) -> Result<Vec<EmittedEvent>, subxt::Error> {
        self.block_events
            .lock()
            .unwrap()
            .get(&block_hash)
            .cloned()
            .ok_or_else(|| subxt::Error::Other(format!("unknown block {block_hash:?}")))
    }
}

/// Deterministic signer that never touches real keys.
pub(crate) struct TestSigner {
    account: AccountId32,
    refuse: bool,
}

impl TestSigner {
    pub(crate) fn new(account: AccountId32) -> Self {
        Self {
            account,
            refuse: false,
        }
    }

    pub(crate) fn refusing(account: AccountId32) -> Self {
        Self {
            account,
            refuse: true,
        }
    }
}

impl Signer for TestSigner {
    fn account_id(&self) -> AccountId32 {
        self.account.clone()
    }

    fn sign(&self, payload: &[u8]) -> Result<MultiSignature, SignerError> {
        if self.refuse {
            return Err(SignerError {
                message: "hardware wallet locked".to_string(),
            });
        }
        let digest = sp_core::hashing::blake2_256(payload);
        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(&digest);
        signature[32..].copy_from_slice(&digest);
        Ok(MultiSignature::Sr25519(signature))
    }
}

pub(crate) fn account(seed: u8) -> AccountId32 {
    AccountId32([seed; 32])
}

pub(crate) fn event(phase: Phase, pallet: &str, method: &str) -> EmittedEvent {
    EmittedEvent {
        phase,
        pallet: pallet.to_string(),
        method: method.to_string(),
        args: Vec::new(),
    }
}

/// Encoder for a runtime with the pool pallet at index 40.
pub(crate) fn test_encoder() -> CallEncoder {
    let indices = CallIndices::default()
        .with_call("Zeropool", "lock", 40, 0)
        .with_call("Zeropool", "release", 40, 1)
        .with_call("Zeropool", "set_owner", 40, 2)
        .with_call("Zeropool", "set_operator", 40, 3)
        .with_call("Zeropool", "set_transfer_vk", 40, 4)
        .with_call("Zeropool", "set_tree_vk", 40, 5)
        .with_call("Zeropool", "transact", 40, 6)
        .with_call("Utility", "batch", 1, 0)
        .with_call("Balances", "set_balance", 4, 1)
        .with_call("Sudo", "sudo", 5, 0);
    CallEncoder::new(PalletNames::default(), indices)
}
