//! Node configuration: a YAML file where every field has a default, then
//! command-line / environment overrides on top.
//!
//! ```yaml
//! chain_id: sepolia
//! database_url: "sqlite:./chainanchor.db?mode=rwc"
//! rpc:
//!   endpoints: ["https://rpc-a.example", "https://rpc-b.example"]
//! indexer:
//!   confirmations: 6
//!   batch_size: 25
//! submitter:
//!   enabled: true
//!   rewards_contract: "0x…"
//!   # either a local key (signed raw transactions) ...
//!   coordinator_private_key: "0x…"
//!   # ... or an account the node signs for
//!   coordinator_address: "0x…"
//!   reward: { base: "1", per_transfer: "0.01", cap: "5", decimals: 18 }
//! log:
//!   level: info
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use chainanchor_core::commitment::LeafLayout;
use chainanchor_core::reward::{RewardError, RewardPolicy};
use chainanchor_indexer::builder::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use chainanchor_indexer::IngesterConfig;
use chainanchor_observability::LogConfig;
use chainanchor_rpc::{PoolConfig, RetryConfig};
use chainanchor_submitter::SubmitterConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: String,
    pub database_url: String,
    pub rpc: RpcSection,
    pub indexer: IndexerSection,
    pub submitter: SubmitterSection,
    pub log: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: "sepolia".into(),
            database_url: "sqlite:./chainanchor.db?mode=rwc".into(),
            rpc: RpcSection::default(),
            indexer: IndexerSection::default(),
            submitter: SubmitterSection::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub endpoints: Vec<String>,
    pub cooldown_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            cooldown_ms: 60_000,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSection {
    pub start_block: Option<u64>,
    pub confirmations: u64,
    pub batch_size: u64,
    pub poll_interval_ms: u64,
    pub health_log_interval_ms: u64,
    pub fetch_concurrency: usize,
    pub block_retry: RetrySection,
    /// `with_recipient` or `without_recipient`.
    pub leaf_layout: LeafLayout,
}

impl Default for IndexerSection {
    fn default() -> Self {
        Self {
            start_block: None,
            confirmations: 6,
            batch_size: 25,
            poll_interval_ms: 4_000,
            health_log_interval_ms: 60_000,
            fetch_concurrency: 4,
            block_retry: RetrySection::default(),
            leaf_layout: LeafLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitterSection {
    pub enabled: bool,
    pub dry_run: bool,
    pub interval_ms: u64,
    pub batch_limit: usize,
    pub min_valid_attestations: u64,
    pub tx_confirmations: u64,
    pub submission_timeout_ms: u64,
    pub rewards_contract: Option<String>,
    /// Signs submissions locally. Takes precedence over `coordinator_address`.
    pub coordinator_private_key: Option<String>,
    /// Node-managed account, used when no private key is set.
    pub coordinator_address: Option<String>,
    /// Node used for submission. Falls back to the first indexer endpoint.
    pub rpc_url: Option<String>,
    pub reward: RewardSection,
}

impl Default for SubmitterSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: false,
            interval_ms: 15_000,
            batch_limit: 10,
            min_valid_attestations: 1,
            tx_confirmations: 1,
            submission_timeout_ms: 180_000,
            rewards_contract: None,
            coordinator_private_key: None,
            coordinator_address: None,
            rpc_url: None,
            reward: RewardSection::default(),
        }
    }
}

impl SubmitterSection {
    /// Enabled and actually sending transactions.
    pub fn is_live(&self) -> bool {
        self.enabled && !self.dry_run
    }
}

/// Reward parameters as decimal token amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSection {
    pub base: String,
    pub per_transfer: String,
    pub cap: Option<String>,
    pub decimals: u8,
}

impl Default for RewardSection {
    fn default() -> Self {
        Self {
            base: "0".into(),
            per_transfer: "0".into(),
            cap: None,
            decimals: 18,
        }
    }
}

impl NodeConfig {
    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            Ok(Self::default())
        }
    }

    pub fn with_chain_id(mut self, chain_id: Option<String>) -> Self {
        if let Some(chain_id) = chain_id {
            self.chain_id = chain_id;
        }
        self
    }

    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if let Some(database_url) = database_url {
            self.database_url = database_url;
        }
        self
    }

    /// Replaces the endpoint list when `endpoints` is non-empty.
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        if !endpoints.is_empty() {
            self.rpc.endpoints = endpoints;
        }
        self
    }

    pub fn with_log_level(mut self, level: Option<String>) -> Self {
        if let Some(level) = level {
            self.log.level = level;
        }
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.log.json |= json;
        self
    }

    pub fn with_coordinator_private_key(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.submitter.coordinator_private_key = Some(key);
        }
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.submitter.dry_run |= dry_run;
        self
    }

    /// Reject settings the pipeline cannot run with. `for_run` adds the
    /// checks that only matter when ingesting and submitting.
    pub fn validate(&self, for_run: bool) -> anyhow::Result<()> {
        let size = self.indexer.batch_size;
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
            bail!("indexer.batch_size must be within {MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}, got {size}");
        }
        if self.chain_id.is_empty() {
            bail!("chain_id must not be empty");
        }
        self.reward_policy().context("invalid submitter.reward")?;

        if for_run {
            if self.rpc.endpoints.is_empty() {
                bail!("rpc.endpoints must list at least one endpoint");
            }
            if self.submitter.is_live() {
                if self.submitter.rewards_contract.is_none() {
                    bail!("submitter.rewards_contract is required for live submission");
                }
                if self.submitter.coordinator_private_key.is_none() && self.submitter.coordinator_address.is_none() {
                    bail!("submitter.coordinator_private_key or submitter.coordinator_address is required for live submission");
                }
            }
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            cooldown: Duration::from_millis(self.rpc.cooldown_ms),
            ..PoolConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.request_timeout_ms)
    }

    pub fn ingester_config(&self) -> IngesterConfig {
        let idx = &self.indexer;
        IngesterConfig {
            chain_id: self.chain_id.clone(),
            start_block: idx.start_block,
            confirmations: idx.confirmations,
            batch_size: idx.batch_size,
            poll_interval: Duration::from_millis(idx.poll_interval_ms),
            health_log_interval: Duration::from_millis(idx.health_log_interval_ms),
            fetch_concurrency: idx.fetch_concurrency,
            block_retry: RetryConfig {
                max_attempts: idx.block_retry.max_attempts,
                initial_backoff: Duration::from_millis(idx.block_retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(idx.block_retry.max_backoff_ms),
                ..RetryConfig::default()
            },
            leaf_layout: idx.leaf_layout,
        }
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        let sub = &self.submitter;
        SubmitterConfig {
            chain_id: self.chain_id.clone(),
            enabled: sub.enabled,
            dry_run: sub.dry_run,
            interval: Duration::from_millis(sub.interval_ms),
            batch_limit: sub.batch_limit,
            min_valid_attestations: sub.min_valid_attestations,
            tx_confirmations: sub.tx_confirmations,
            submission_timeout: Duration::from_millis(sub.submission_timeout_ms),
        }
    }

    pub fn reward_policy(&self) -> Result<RewardPolicy, RewardError> {
        let reward = &self.submitter.reward;
        RewardPolicy::from_decimal_strings(
            &reward.base,
            &reward.per_transfer,
            reward.cap.as_deref(),
            reward.decimals,
        )
    }

    /// Endpoint the settlement ledger talks to.
    pub fn submission_rpc_url(&self) -> Option<&str> {
        self.submitter
            .rpc_url
            .as_deref()
            .or_else(|| self.rpc.endpoints.first().map(String::as_str))
    }
}
