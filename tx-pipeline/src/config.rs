use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::pipeline::WaitOptions;
use crate::tx_history::DEFAULT_HISTORY_CAPACITY;
use crate::tx_status::WaitDepth;

/// CLI args controlling how long and how often the pipeline waits and retries.
#[derive(Clone, Debug, Args)]
pub struct PipelineConfig {
    /// Stop waiting at block inclusion or at finalization.
    #[arg(long, env = "WAIT_FOR", value_enum, default_value_t = WaitDepth::Finalized)]
    pub wait_for: WaitDepth,

    /// Seconds to wait for the requested depth before giving up. 0 waits forever.
    #[arg(long, env = "TX_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    /// Resubmissions allowed after a dropped transaction or a failed send.
    #[arg(long, env = "TX_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay between resubmissions, multiplied by the attempt number.
    #[arg(long, env = "TX_RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Transactions whose status history is kept for lookup, oldest evicted first.
    #[arg(long, env = "TX_HISTORY_CAPACITY", default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_for: WaitDepth::Finalized,
            timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 500,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// The wait window, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Delay before resubmission number `attempt`, starting at 1.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Wait options derived from this config, with a fresh cancellation token.
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            depth: self.wait_for,
            timeout: self.timeout(),
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestParser {
        #[command(flatten)]
        config: PipelineConfig,
    }

    #[test]
    fn defaults_wait_for_finality() {
        let parsed = TestParser::parse_from(["test"]).config;

        assert_eq!(parsed.wait_for, WaitDepth::Finalized);
        assert_eq!(parsed.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(parsed.max_retries, 3);
        assert_eq!(parsed.retry_backoff(2), Duration::from_millis(1000));
        assert_eq!(parsed.history_capacity, 1024);
    }

    #[test]
    fn we_can_wait_for_inclusion_without_timeout() {
        let parsed =
            TestParser::parse_from(["test", "--wait-for", "in-block", "--timeout-secs", "0"])
                .config;

        assert_eq!(parsed.wait_for, WaitDepth::InBlock);
        assert_eq!(parsed.timeout(), None);

        let options = parsed.wait_options();
        assert_eq!(options.depth, WaitDepth::InBlock);
        assert!(!options.cancel.is_cancelled());
    }
}
