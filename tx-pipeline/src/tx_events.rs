//! Events emitted by the inclusion of a transaction.
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use snafu::ResultExt;
use subxt::utils::H256;

use crate::chain::EventSource;
use crate::error::{FetchEventsSnafu, Result};

/// When, during block execution, an event was emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// While applying the extrinsic at this index.
    ApplyExtrinsic(u32),
    /// After all extrinsics were applied.
    Finalization,
    /// Before any extrinsic was applied.
    Initialization,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::ApplyExtrinsic(index) => write!(f, "ApplyExtrinsic({index})"),
            Phase::Finalization => f.write_str("Finalization"),
            Phase::Initialization => f.write_str("Initialization"),
        }
    }
}

/// A decoded runtime event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmittedEvent {
    /// Execution phase.
    pub phase: Phase,
    /// Pallet that emitted the event.
    pub pallet: String,
    /// Event variant.
    pub method: String,
    /// Rendered event fields, in declaration order.
    pub args: Vec<String>,
}

impl EmittedEvent {
    /// Whether this is `pallet.method`.
    pub fn is(&self, pallet: &str, method: &str) -> bool {
        self.pallet == pallet && self.method == method
    }
}

impl fmt::Display for EmittedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {}.{} [{}]",
            self.phase,
            self.pallet,
            self.method,
            self.args.join(", ")
        )
    }
}

/// Whether the runtime executed the extrinsic successfully, according to `System` events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `System.ExtrinsicSuccess` was emitted.
    Success,
    /// `System.ExtrinsicFailed` was emitted, with its rendered payload.
    Failed(String),
    /// Neither event was found.
    Unknown,
}

impl DispatchOutcome {
    /// Reads the dispatch result from a transaction's events.
    pub fn from_events(events: &[EmittedEvent]) -> Self {
        for event in events {
            if event.is("System", "ExtrinsicSuccess") {
                return DispatchOutcome::Success;
            }
            if event.is("System", "ExtrinsicFailed") {
                return DispatchOutcome::Failed(event.args.join(", "));
            }
        }
        DispatchOutcome::Unknown
    }
}

/// Narrows the events of a block down to one extrinsic.
pub struct EventCollector<S> {
    source: Arc<S>,
}

impl<S: EventSource> EventCollector<S> {
    /// Creates a collector reading from `source`.
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Events emitted while applying the extrinsic at `transaction_index` of `block_hash`.
    ///
    /// An extrinsic without events yields an empty list.
    pub async fn collect(
        &self,
        block_hash: H256,
        transaction_index: u32,
    ) -> Result<Vec<EmittedEvent>> {
        let events = self
            .source
            .events_at(block_hash)
            .await
            .context(FetchEventsSnafu { block_hash })?;

        Ok(events
            .into_iter()
            .filter(|event| event.phase == Phase::ApplyExtrinsic(transaction_index))
            .collect())
    }

    /// Events emitted by the extrinsic `tx_hash` in `block_hash`.
    ///
    /// Locates the extrinsic first. If it is not part of the block the result is empty.
    pub async fn collect_for(&self, block_hash: H256, tx_hash: H256) -> Result<Vec<EmittedEvent>> {
        let index = self
            .source
            .extrinsic_index(block_hash, tx_hash)
            .await
            .context(FetchEventsSnafu { block_hash })?;

        match index {
            Some(index) => {
                let events = self.collect(block_hash, index).await?;
                info!(
                    "📜 Collected {} events for extrinsic {index} of block {block_hash:?}",
                    events.len()
                );
                Ok(events)
            }
            None => {
                warn!("⚠️ Extrinsic {tx_hash:?} not found in block {block_hash:?}");
                Ok(Vec::new())
            }
        }
    }
}
