//! Per-application configuration.

use serde::{Deserialize, Serialize};

/// All-reduce expansion strategy.
///
/// The multi-ring expander is selected implicitly when the task graph
/// carries jump-list ring descriptors; it has no strategy value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllReduceStrategy {
    /// Logical ring with `2(n-1)` rounds of `n` parallel flows (the default).
    #[default]
    Ring,
    /// Gather to the first group member, then scatter back.
    ParamServer,
    /// Dense pair-shuffle: all ordered pairs, twice.
    PairShuffle,
}

/// Tuning consumed by the simulator core for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transport slow-start threshold, in data-packet-size units.
    #[serde(default = "default_ssthresh")]
    pub ssthresh: u64,
    /// All-reduce expansion strategy.
    #[serde(default)]
    pub strategy: AllReduceStrategy,
    /// Optional logical-to-physical node permutation applied to every flow
    /// endpoint; identity when absent.
    #[serde(default)]
    pub gpus: Option<Vec<usize>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ssthresh: default_ssthresh(),
            strategy: AllReduceStrategy::default(),
            gpus: None,
        }
    }
}

fn default_ssthresh() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_is_ring() {
        assert_eq!(AllReduceStrategy::default(), AllReduceStrategy::Ring);
        assert_eq!(AppConfig::default().strategy, AllReduceStrategy::Ring);
    }

    #[test]
    fn test_config_from_json() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"ssthresh": 40, "strategy": "param_server"}"#)
                .unwrap();
        assert_eq!(cfg.ssthresh, 40);
        assert_eq!(cfg.strategy, AllReduceStrategy::ParamServer);
        assert!(cfg.gpus.is_none());
    }
}
