//! # chainanchor
//!
//! Node binary for the transfer indexer and proof submitter.
//!
//! ```sh
//! chainanchor --config chainanchor.yaml run
//! chainanchor status
//! chainanchor batches --ready
//! chainanchor transfers --address 0xabc… --limit 50
//! chainanchor reward --transfers 120
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use chainanchor_core::query::{list_transfers, Direction, TransferQuery};
use chainanchor_core::reward::format_units;
use chainanchor_core::store::LedgerStore;
use chainanchor_indexer::{IngesterBuilder, PooledChainSource};
use chainanchor_observability::{init_tracing, PipelineMetrics};
use chainanchor_rpc::{EndpointPool, HttpRpcClient, RpcTransport};
use chainanchor_storage::SqliteLedger;
use chainanchor_submitter::{BatchSubmitter, RpcSettlementLedger, SettlementLedger};

use crate::config::NodeConfig;

/// Index ERC-20 transfers into Merkle-committed batches and anchor them on-chain.
#[derive(Debug, Parser)]
#[command(name = "chainanchor", author, version, about, long_about = None)]
struct Cli {
    /// The configuration file. Defaults apply when it does not exist.
    #[arg(long, value_name = "CONFIG", env = "CHAINANCHOR_CONFIG", default_value = "chainanchor.yaml", global = true)]
    config: PathBuf,
    /// Chain key used for every stored row.
    #[arg(long = "chain", value_name = "CHAIN_ID", env = "CHAINANCHOR_CHAIN_ID", global = true)]
    chain_id: Option<String>,
    /// Ledger store URL, e.g. `sqlite:./chainanchor.db?mode=rwc`.
    #[arg(long = "database-url", value_name = "URL", env = "CHAINANCHOR_DATABASE_URL", global = true)]
    database_url: Option<String>,
    /// Upstream JSON-RPC endpoint. Repeat or comma-separate for a pool.
    #[arg(
        long = "rpc-endpoint",
        value_name = "URL",
        env = "CHAINANCHOR_RPC_ENDPOINTS",
        value_delimiter = ',',
        global = true
    )]
    rpc_endpoints: Vec<String>,
    /// Global log level.
    #[arg(long = "log-level", value_name = "LEVEL", env = "CHAINANCHOR_LOG_LEVEL", global = true)]
    log_level: Option<String>,
    /// Emit JSON logs.
    #[arg(long = "log-json", env = "CHAINANCHOR_LOG_JSON", global = true)]
    log_json: bool,
    /// Key that signs proof submissions. Read from the environment only.
    #[arg(long, env = "CHAINANCHOR_COORDINATOR_PRIVATE_KEY", hide = true, hide_env_values = true)]
    coordinator_private_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the ingester and, when enabled, the batch submitter
    Run {
        /// Log submissions instead of sending them
        #[arg(long, env = "CHAINANCHOR_DRY_RUN")]
        dry_run: bool,
    },
    /// Show the checkpoint and stored row counts
    Status,
    /// List recent batches
    Batches {
        /// Only batches the submitter would pick up
        #[arg(long)]
        ready: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Page through indexed transfers
    Transfers(TransfersArgs),
    /// Price a batch with the configured reward policy
    Reward {
        /// Transfers in the batch
        #[arg(long)]
        transfers: u64,
    },
}

#[derive(Debug, clap::Args)]
struct TransfersArgs {
    #[arg(long)]
    from_block: Option<u64>,
    #[arg(long)]
    to_block: Option<u64>,
    /// Matches sender or recipient
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    min_value: Option<String>,
    #[arg(long)]
    max_value: Option<String>,
    #[arg(long)]
    from_timestamp: Option<i64>,
    #[arg(long)]
    to_timestamp: Option<i64>,
    /// `next_cursor` of the previous page
    #[arg(long)]
    cursor: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    /// Oldest first
    #[arg(long)]
    asc: bool,
}

impl From<TransfersArgs> for TransferQuery {
    fn from(args: TransfersArgs) -> Self {
        TransferQuery {
            chain_id: None,
            from_block: args.from_block,
            to_block: args.to_block,
            address: args.address,
            token: args.token,
            min_value: args.min_value,
            max_value: args.max_value,
            from_timestamp: args.from_timestamp,
            to_timestamp: args.to_timestamp,
            cursor: args.cursor,
            limit: args.limit,
            direction: Some(if args.asc { Direction::Asc } else { Direction::Desc }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let dry_run = matches!(cli.command, Commands::Run { dry_run: true });
    let config = NodeConfig::load_or_default(&cli.config)?
        .with_chain_id(cli.chain_id)
        .with_database_url(cli.database_url)
        .with_endpoints(cli.rpc_endpoints)
        .with_log_level(cli.log_level)
        .with_json_logs(cli.log_json)
        .with_coordinator_private_key(cli.coordinator_private_key)
        .with_dry_run(dry_run);

    init_tracing(&config.log);

    match cli.command {
        Commands::Run { .. } => run(config).await,
        Commands::Status => status(&config).await,
        Commands::Batches { ready, limit } => batches(&config, ready, limit).await,
        Commands::Transfers(args) => transfers(&config, args.into()).await,
        Commands::Reward { transfers } => reward(&config, transfers),
    }
}

async fn open_store(config: &NodeConfig) -> anyhow::Result<Arc<SqliteLedger>> {
    let store = SqliteLedger::open(&config.database_url)
        .await
        .with_context(|| format!("failed to open ledger store at {}", config.database_url))?;
    Ok(Arc::new(store))
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    config.validate(true)?;
    let metrics = PipelineMetrics::global();
    let store = open_store(&config).await?;

    let transports = config
        .rpc
        .endpoints
        .iter()
        .map(|url| -> anyhow::Result<Arc<dyn RpcTransport>> {
            let client = HttpRpcClient::new(url.clone(), config.request_timeout())
                .with_context(|| format!("failed to build RPC client for {url}"))?;
            Ok(Arc::new(client))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let pool = EndpointPool::new(transports, config.pool_config())
        .context("failed to build endpoint pool")?
        .with_metrics(metrics.clone());
    tracing::info!(
        chain = %config.chain_id,
        endpoints = pool.len(),
        store = %config.database_url,
        "Starting chainanchor node"
    );
    let source = Arc::new(PooledChainSource::new(Arc::new(pool)));

    let mut ingester = IngesterBuilder::new()
        .config(config.ingester_config())
        .metrics(metrics.clone())
        .build(source, store.clone());

    let ledger = if config.submitter.is_live() {
        Some(settlement_ledger(&config)?)
    } else {
        None
    };
    let policy = config.reward_policy().context("invalid submitter.reward")?;
    let submitter = Arc::new(
        BatchSubmitter::new(config.submitter_config(), store, ledger, policy, metrics)
            .context("failed to build batch submitter")?,
    );

    let submitter_handle = submitter.handle();
    let submitter_task = tokio::spawn({
        let submitter = submitter.clone();
        async move { submitter.run().await }
    });

    let ingester_handle = ingester.handle();
    let shutdown_handle = submitter_handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            ingester_handle.stop();
            shutdown_handle.stop();
        }
    });

    let result = ingester.run().await.context("ingester stopped with an error");
    submitter_handle.stop();
    submitter_task
        .await
        .context("submitter task panicked")?
        .context("submitter stopped with an error")?;
    result
}

fn settlement_ledger(config: &NodeConfig) -> anyhow::Result<Arc<dyn SettlementLedger>> {
    let sub = &config.submitter;
    let url = config
        .submission_rpc_url()
        .context("no RPC endpoint for submission")?;
    let contract = sub
        .rewards_contract
        .as_deref()
        .context("submitter.rewards_contract is required")?;

    let transport: Arc<dyn RpcTransport> = Arc::new(
        HttpRpcClient::new(url, config.request_timeout())
            .with_context(|| format!("failed to build RPC client for {url}"))?,
    );
    let ledger = match (sub.coordinator_private_key.as_deref(), sub.coordinator_address.as_deref()) {
        (Some(key), _) => RpcSettlementLedger::with_private_key(transport, contract, key),
        (None, Some(coordinator)) => RpcSettlementLedger::new(transport, contract, coordinator),
        (None, None) => anyhow::bail!("submitter.coordinator_private_key or submitter.coordinator_address is required"),
    }
    .context("invalid settlement ledger configuration")?;
    tracing::info!(
        sender = %ledger.sender_address(),
        local_signing = ledger.signs_locally(),
        url = %url,
        "Settlement ledger ready"
    );
    Ok(Arc::new(ledger))
}

async fn status(config: &NodeConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let chain = config.chain_id.as_str();

    let checkpoint = store.load_checkpoint(chain).await?;
    let report = serde_json::json!({
        "chain_id": chain,
        "checkpoint": checkpoint,
        "blocks": store.count_blocks(chain).await?,
        "transfers": store.count_transfers(chain).await?,
        "batches": store.recent_batches(chain, 5).await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn batches(config: &NodeConfig, ready: bool, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let chain = config.chain_id.as_str();
    let batches = if ready {
        store.submittable_batches(chain, limit).await?
    } else {
        store.recent_batches(chain, limit).await?
    };

    for batch in &batches {
        println!(
            "{:<32} {:<10} transfers={:<6} root={} tx={}",
            batch.id(),
            batch.onchain_status,
            batch.record.total_transfers,
            batch.record.merkle_root,
            batch.onchain_tx_hash.as_deref().unwrap_or("-"),
        );
    }
    if batches.is_empty() {
        println!("no batches");
    }
    Ok(())
}

async fn transfers(config: &NodeConfig, query: TransferQuery) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let page = list_transfers(store.as_ref(), &config.chain_id, &query)
        .await
        .context("transfer query rejected")?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

fn reward(config: &NodeConfig, transfers: u64) -> anyhow::Result<()> {
    let policy = config.reward_policy().context("invalid submitter.reward")?;
    let decimals = config.submitter.reward.decimals;
    let amount = policy.reward(transfers);
    println!("{amount} ({} tokens)", format_units(amount, decimals));
    Ok(())
}
