//! Per-transaction lifecycle tracking.
//!
//! A [`StatusTracker`] consumes the notifications of one submitted transaction and keeps
//! the lifecycle monotonic: duplicates are no-ops, stale notifications are ignored and the
//! only backward edge is `InBlock → Retracted`.
use std::fmt;

use clap::ValueEnum;
use log::{debug, warn};
use subxt::utils::H256;

/// Lifecycle notification for a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Validated and waiting in the pool.
    Ready,
    /// Gossiped to peers.
    Broadcast,
    /// Included in a block that may still be reorged.
    InBlock(H256),
    /// Included in a finalized block.
    Finalized(H256),
    /// Rejected before inclusion, with the node's reason.
    Invalid(String),
    /// The network gave up on the transaction.
    Dropped,
    /// Replaced by another transaction using the same nonce.
    Usurped,
    /// The including block left the canonical chain.
    Retracted,
}

impl TransactionStatus {
    /// Whether no further notification can change the outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Finalized(_)
                | TransactionStatus::Invalid(_)
                | TransactionStatus::Dropped
                | TransactionStatus::Usurped
        )
    }

    /// Hash of the block the transaction is (or was) included in.
    pub fn block_hash(&self) -> Option<H256> {
        match self {
            TransactionStatus::InBlock(hash) | TransactionStatus::Finalized(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Short status name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionStatus::Ready => "Ready",
            TransactionStatus::Broadcast => "Broadcast",
            TransactionStatus::InBlock(_) => "InBlock",
            TransactionStatus::Finalized(_) => "Finalized",
            TransactionStatus::Invalid(_) => "Invalid",
            TransactionStatus::Dropped => "Dropped",
            TransactionStatus::Usurped => "Usurped",
            TransactionStatus::Retracted => "Retracted",
        }
    }

    /// Position on the success path, `None` for failures and retraction.
    fn progress_rank(&self) -> Option<u8> {
        match self {
            TransactionStatus::Ready => Some(1),
            TransactionStatus::Broadcast => Some(2),
            TransactionStatus::InBlock(_) => Some(3),
            TransactionStatus::Finalized(_) => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.block_hash()) {
            (TransactionStatus::Invalid(reason), _) => write!(f, "Invalid({reason})"),
            (_, Some(hash)) => write!(f, "{}({hash:?})", self.kind()),
            (_, None) => f.write_str(self.kind()),
        }
    }
}

/// How far the orchestrator waits before reporting an outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum WaitDepth {
    /// Stop at the first block inclusion. Fast, but the block can still be retracted.
    InBlock,
    /// Stop once the including block is final.
    #[default]
    Finalized,
}

impl WaitDepth {
    /// Whether `status` is deep enough to report success.
    pub fn is_satisfied_by(&self, status: &TransactionStatus) -> bool {
        match self {
            WaitDepth::InBlock => matches!(
                status,
                TransactionStatus::InBlock(_) | TransactionStatus::Finalized(_)
            ),
            WaitDepth::Finalized => matches!(status, TransactionStatus::Finalized(_)),
        }
    }
}

/// Result of feeding one notification to a [`StatusTracker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The notification moved the lifecycle forward (or along the retraction edge).
    Advanced,
    /// Duplicate, stale or arriving after a terminal state. Nothing changed.
    Ignored,
    /// The notification reached a terminal state. Reported at most once.
    Terminal,
}

/// State machine for the notifications of one submitted transaction.
#[derive(Clone, Debug, Default)]
pub struct StatusTracker {
    current: Option<TransactionStatus>,
    history: Vec<TransactionStatus>,
}

impl StatusTracker {
    /// Tracker that has not seen any notification yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest accepted status.
    pub fn current(&self) -> Option<&TransactionStatus> {
        self.current.as_ref()
    }

    /// Every accepted status, oldest first.
    pub fn history(&self) -> &[TransactionStatus] {
        &self.history
    }

    /// Whether a terminal status has been accepted.
    pub fn is_terminal(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(TransactionStatus::is_terminal)
    }

    /// Applies a notification.
    pub fn on_notification(&mut self, status: TransactionStatus) -> Applied {
        if self.is_terminal() {
            debug!("ignoring {status} after terminal {:?}", self.current);
            return Applied::Ignored;
        }

        if self.current.as_ref() == Some(&status) {
            return Applied::Ignored;
        }

        let accept = match (&self.current, &status) {
            (Some(TransactionStatus::InBlock(_)), TransactionStatus::Retracted) => true,
            (_, TransactionStatus::Retracted) => false,
            (
                _,
                TransactionStatus::Invalid(_)
                | TransactionStatus::Dropped
                | TransactionStatus::Usurped,
            ) => true,
            (Some(TransactionStatus::InBlock(old)), TransactionStatus::InBlock(new)) => {
                warn!("⚠️ Transaction moved from block {old:?} to {new:?} without retraction");
                true
            }
            (current, next) => {
                let current_rank = current
                    .as_ref()
                    .and_then(TransactionStatus::progress_rank)
                    .unwrap_or(0);
                next.progress_rank()
                    .is_some_and(|rank| rank > current_rank)
            }
        };

        if !accept {
            debug!("ignoring stale {status} (current {:?})", self.current);
            return Applied::Ignored;
        }

        let terminal = status.is_terminal();
        self.history.push(status.clone());
        self.current = Some(status);

        if terminal {
            Applied::Terminal
        } else {
            Applied::Advanced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn feed(tracker: &mut StatusTracker, statuses: &[TransactionStatus]) -> Vec<Applied> {
        statuses
            .iter()
            .cloned()
            .map(|status| tracker.on_notification(status))
            .collect()
    }

    #[test]
    fn we_can_follow_the_success_path() {
        let mut tracker = StatusTracker::new();
        let applied = feed(
            &mut tracker,
            &[
                TransactionStatus::Ready,
                TransactionStatus::Broadcast,
                TransactionStatus::InBlock(block(1)),
                TransactionStatus::Finalized(block(1)),
            ],
        );

        assert_eq!(
            applied,
            vec![
                Applied::Advanced,
                Applied::Advanced,
                Applied::Advanced,
                Applied::Terminal
            ]
        );
        assert_eq!(tracker.current(), Some(&TransactionStatus::Finalized(block(1))));
        assert_eq!(tracker.history().len(), 4);
    }

    #[test]
    fn duplicate_notifications_are_no_ops() {
        let mut tracker = StatusTracker::new();
        tracker.on_notification(TransactionStatus::Ready);
        tracker.on_notification(TransactionStatus::InBlock(block(1)));
        let history = tracker.history().to_vec();

        assert_eq!(
            tracker.on_notification(TransactionStatus::InBlock(block(1))),
            Applied::Ignored
        );
        assert_eq!(tracker.history(), history.as_slice());
    }

    #[test]
    fn terminal_state_is_reported_once_and_never_left() {
        let mut tracker = StatusTracker::new();
        tracker.on_notification(TransactionStatus::InBlock(block(1)));
        assert_eq!(
            tracker.on_notification(TransactionStatus::Finalized(block(1))),
            Applied::Terminal
        );

        let after = feed(
            &mut tracker,
            &[
                TransactionStatus::Finalized(block(1)),
                TransactionStatus::Retracted,
                TransactionStatus::Dropped,
                TransactionStatus::InBlock(block(2)),
            ],
        );

        assert!(after.iter().all(|applied| *applied == Applied::Ignored));
        assert_eq!(tracker.current(), Some(&TransactionStatus::Finalized(block(1))));
    }

    #[test]
    fn stale_notifications_do_not_regress() {
        let mut tracker = StatusTracker::new();
        tracker.on_notification(TransactionStatus::InBlock(block(1)));

        assert_eq!(
            tracker.on_notification(TransactionStatus::Broadcast),
            Applied::Ignored
        );
        assert_eq!(tracker.on_notification(TransactionStatus::Ready), Applied::Ignored);
        assert_eq!(tracker.current(), Some(&TransactionStatus::InBlock(block(1))));
    }

    #[test]
    fn retraction_is_only_accepted_from_in_block() {
        let mut tracker = StatusTracker::new();
        tracker.on_notification(TransactionStatus::Broadcast);
        assert_eq!(
            tracker.on_notification(TransactionStatus::Retracted),
            Applied::Ignored
        );

        tracker.on_notification(TransactionStatus::InBlock(block(1)));
        assert_eq!(
            tracker.on_notification(TransactionStatus::Retracted),
            Applied::Advanced
        );
        assert!(!tracker.is_terminal());

        // back in the pool, so earlier stages are accepted again
        assert_eq!(
            tracker.on_notification(TransactionStatus::Broadcast),
            Applied::Advanced
        );
        assert_eq!(
            tracker.on_notification(TransactionStatus::InBlock(block(2))),
            Applied::Advanced
        );
    }

    #[test]
    fn missing_notifications_are_tolerated() {
        let mut tracker = StatusTracker::new();
        let applied = feed(
            &mut tracker,
            &[TransactionStatus::Ready, TransactionStatus::Finalized(block(3))],
        );

        assert_eq!(applied, vec![Applied::Advanced, Applied::Terminal]);
    }

    #[test]
    fn failures_are_terminal() {
        for failure in [
            TransactionStatus::Invalid("bad signature".to_string()),
            TransactionStatus::Dropped,
            TransactionStatus::Usurped,
        ] {
            let mut tracker = StatusTracker::new();
            tracker.on_notification(TransactionStatus::Ready);
            assert_eq!(tracker.on_notification(failure.clone()), Applied::Terminal);
            assert!(tracker.is_terminal());
            assert_eq!(tracker.on_notification(failure), Applied::Ignored);
        }
    }

    #[test]
    fn dropped_after_retraction_is_terminal() {
        let mut tracker = StatusTracker::new();
        feed(
            &mut tracker,
            &[
                TransactionStatus::InBlock(block(1)),
                TransactionStatus::Retracted,
            ],
        );

        assert_eq!(
            tracker.on_notification(TransactionStatus::Dropped),
            Applied::Terminal
        );
    }

    #[test]
    fn a_new_block_without_retraction_replaces_the_old_one() {
        let mut tracker = StatusTracker::new();
        tracker.on_notification(TransactionStatus::InBlock(block(1)));

        assert_eq!(
            tracker.on_notification(TransactionStatus::InBlock(block(2))),
            Applied::Advanced
        );
        assert_eq!(tracker.current().and_then(TransactionStatus::block_hash), Some(block(2)));
    }

    #[test]
    fn wait_depth_decides_when_to_stop() {
        let in_block = TransactionStatus::InBlock(block(1));
        let finalized = TransactionStatus::Finalized(block(1));

        assert!(WaitDepth::InBlock.is_satisfied_by(&in_block));
        assert!(WaitDepth::InBlock.is_satisfied_by(&finalized));
        assert!(!WaitDepth::InBlock.is_satisfied_by(&TransactionStatus::Retracted));
        assert!(!WaitDepth::Finalized.is_satisfied_by(&in_block));
        assert!(WaitDepth::Finalized.is_satisfied_by(&finalized));
    }
}
