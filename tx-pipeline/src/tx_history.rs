use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use linked_list::LinkedList;
use log::debug;
use subxt::utils::H256;
use tokio::sync::Mutex;

use crate::tx_status::TransactionStatus;

/// A hashmap storing transaction history, where:
/// - The key is the extrinsic hash formatted as `0x…` hex.
/// - The value is the list of statuses the tracker accepted, oldest first.
pub type TxDb = HashMap<String, LinkedList<TransactionStatus>>;

/// Transactions kept when no capacity is configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Histories together with their eviction order.
#[derive(Default)]
struct Entries {
    /// Statuses per transaction.
    tx_map: TxDb,
    /// Keys in the order their first status was recorded.
    order: VecDeque<String>,
}

/// Thread-safe record of the status transitions of the most recent transactions.
///
/// Holds at most `capacity` transactions, evicting the oldest first. Clones share the same
/// underlying map.
#[derive(Clone)]
pub struct TxHistory {
    /// Shared map containing transaction progress history.
    entries: Arc<Mutex<Entries>>,
    /// Most transactions held at once.
    capacity: usize,
}

impl Default for TxHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl TxHistory {
    /// Creates an empty history with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty history holding at most `capacity` transactions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            capacity,
        }
    }

    /// Key under which `tx_hash` is stored.
    pub fn key(tx_hash: H256) -> String {
        format!("{:#x}", tx_hash)
    }

    /// Appends `status` to the history of `tx_hash`.
    pub async fn record(&self, tx_hash: H256, status: TransactionStatus) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock().await;
        let key = Self::key(tx_hash);

        if !entries.tx_map.contains_key(&key) {
            while entries.order.len() >= self.capacity {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.tx_map.remove(&oldest);
                debug!("evicted status history of {oldest}");
            }
            entries.order.push_back(key.clone());
        }

        entries
            .tx_map
            .entry(key)
            .or_insert_with(LinkedList::new)
            .push_back(status);
    }

    /// Retrieves the history of a transaction based on its hash.
    ///
    /// # Returns
    /// * `Some(Vec<TransactionStatus>)` - The statuses in the order they were accepted.
    /// * `None` - If the transaction hash is not found or was evicted.
    pub async fn get_history(&self, tx_hash: &str) -> Option<Vec<TransactionStatus>> {
        self.entries
            .lock()
            .await
            .tx_map
            .get(tx_hash)
            .map(|list| list.iter().cloned().collect())
    }

    /// Number of transactions currently held.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.order.len()
    }

    /// Whether no transaction is held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn statuses_are_kept_in_arrival_order() {
        let history = TxHistory::new();
        let tx = H256::repeat_byte(0xab);
        let block = H256::repeat_byte(1);

        history.record(tx, TransactionStatus::Ready).await;
        history.record(tx, TransactionStatus::InBlock(block)).await;
        history.record(H256::repeat_byte(2), TransactionStatus::Dropped).await;

        let key = TxHistory::key(tx);
        assert!(key.starts_with("0xabab"));
        assert_eq!(
            history.get_history(&key).await,
            Some(vec![
                TransactionStatus::Ready,
                TransactionStatus::InBlock(block)
            ])
        );
        assert_eq!(history.len().await, 2);
    }

    #[tokio::test]
    async fn unknown_transactions_have_no_history() {
        let history = TxHistory::new();
        assert_eq!(history.get_history("0x00").await, None);
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn the_oldest_transaction_is_evicted_at_capacity() {
        let history = TxHistory::with_capacity(2);
        let (first, second, third) = (
            H256::repeat_byte(1),
            H256::repeat_byte(2),
            H256::repeat_byte(3),
        );

        history.record(first, TransactionStatus::Ready).await;
        history.record(second, TransactionStatus::Ready).await;
        history.record(first, TransactionStatus::Broadcast).await;
        history.record(third, TransactionStatus::Ready).await;

        assert_eq!(history.len().await, 2);
        assert_eq!(history.get_history(&TxHistory::key(first)).await, None);
        assert_eq!(
            history.get_history(&TxHistory::key(second)).await,
            Some(vec![TransactionStatus::Ready])
        );
        assert_eq!(
            history.get_history(&TxHistory::key(third)).await,
            Some(vec![TransactionStatus::Ready])
        );
    }

    #[tokio::test]
    async fn a_zero_capacity_keeps_nothing() {
        let history = TxHistory::with_capacity(0);
        history
            .record(H256::repeat_byte(1), TransactionStatus::Ready)
            .await;
        assert!(history.is_empty().await);
    }
}
