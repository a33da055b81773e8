//! dfindex CLI: inspect defaults and replay block files into an index.
//!
//! Usage:
//! ```bash
//! dfindex info --network regtest
//! dfindex replay --blocks ./blocks.json --network regtest
//! dfindex replay --blocks ./blocks.json --sqlite ./dfindex.db --json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dfindex_core::indexer::{IndexerConfig, Network};
use dfindex_core::rpc::NoGovernance;
use dfindex_core::types::format_sats;
use dfindex_follower::{FollowerBuilder, MemoryNode};
use dfindex_models::{block, loan, poolpair, poolswap, supply, token, IndexContext, IndexerRegistry};
use dfindex_storage::{Database, SqliteKv};

#[derive(Parser)]
#[command(
    name = "dfindex",
    about = "Reorg-safe DeFi chain indexer",
    long_about = "
dfindex: follows a DeFiChain node, decodes DFTX custom transactions and
maintains reorg-safe views of tokens, pools, oracles, loans and supply.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter (default: info)
",
    version
)]
struct Cli {
    /// JSON config file; command-line flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Network defaults to use
    #[arg(short, long, global = true, value_enum)]
    network: Option<NetworkArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration and indexer order
    Info,

    /// Index a JSON array of blocks and print the resulting views
    Replay {
        /// File with a JSON array of `getblock <hash> 2` blocks
        #[arg(short, long)]
        blocks: PathBuf,
        /// First height to index
        #[arg(long)]
        from_height: Option<u32>,
        /// Persist into this SQLite file instead of memory
        #[arg(long)]
        sqlite: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkArg {
    Mainnet,
    Testnet,
    Regtest,
}

impl From<NetworkArg> for Network {
    fn from(n: NetworkArg) -> Self {
        match n {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Testnet => Network::Testnet,
            NetworkArg::Regtest => Network::Regtest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.network.map(Network::from))?;

    match cli.command {
        Commands::Info => cmd_info(&config),
        Commands::Replay {
            blocks,
            from_height,
            sqlite,
            json,
        } => {
            let mut config = config;
            if let Some(h) = from_height {
                config.from_height = h;
            }
            cmd_replay(config, &blocks, sqlite.as_deref(), json).await
        }
    }
}

fn load_config(path: Option<&Path>, network: Option<Network>) -> Result<IndexerConfig> {
    let mut config = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))?
        }
        None => IndexerConfig::default(),
    };
    if let Some(n) = network {
        config.network = n;
        config.burn_script_hex = n.burn_script_hex().to_string();
    }
    Ok(config)
}

fn cmd_info(config: &IndexerConfig) -> Result<()> {
    println!("dfindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Network:          {}", config.network);
    println!("  From height:      {}", config.from_height);
    println!("  Poll interval:    {} ms", config.poll_interval_ms);
    println!("  Volume windows:   {:?} s", config.volume_windows);
    println!("  Oracle window:    {} s", config.oracle_price_window_secs);
    println!("  Burn script:      {}", config.burn_script_hex);
    println!("  Storage backends: memory, SQLite");
    println!("  Indexers:");
    for indexer in IndexerRegistry::default().indexers() {
        println!("    {indexer}");
    }
    Ok(())
}

async fn cmd_replay(config: IndexerConfig, blocks: &Path, sqlite: Option<&str>, as_json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(blocks)
        .with_context(|| format!("reading blocks {}", blocks.display()))?;
    let node = Arc::new(MemoryNode::from_json(&raw).context("parsing blocks")?);

    let db = match sqlite {
        Some(path) => Database::new(Arc::new(SqliteKv::open(path).await?)),
        None => Database::memory(),
    };

    let mut follower = FollowerBuilder::with_config(config).build(node, db.clone(), Arc::new(NoGovernance));
    let synced = follower.sync().await.context("replay failed")?;
    info!(height = ?synced, "Replay complete");

    print_views(follower.context(), &db, as_json).await
}

async fn print_views(ctx: &IndexContext, db: &Database, as_json: bool) -> Result<()> {
    let tip = block::highest(db).await?;
    let tokens = token::list(db).await?;
    let pools = poolpair::list(db).await?;
    let schemes = loan::list(db, 100).await?;
    let default_scheme = loan::default_scheme(db).await?;
    let supply = supply::latest(ctx, db).await?;

    let mut volumes = Vec::new();
    for pool in &pools {
        for window in &ctx.config.volume_windows {
            if let Some(v) = poolswap::latest_volume(db, pool.pool_pair_id, *window).await? {
                volumes.push(v);
            }
        }
    }

    if as_json {
        let out = json!({
            "tip": tip,
            "tokens": tokens,
            "pool_pairs": pools,
            "pool_volumes": volumes,
            "loan_schemes": schemes,
            "default_loan_scheme": default_scheme,
            "supply": supply,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match &tip {
        Some(t) => println!("Tip: {} {}", t.height, t.hash),
        None => println!("Tip: (nothing indexed)"),
    }
    println!("\nTokens ({}):", tokens.len());
    for t in &tokens {
        println!(
            "  {:>4}  {:<16} minted {:>20}{}",
            t.token_id,
            t.symbol_key,
            format_sats(t.minted),
            if t.is_lps { "  (LP)" } else { "" }
        );
    }
    println!("\nPool pairs ({}):", pools.len());
    for p in &pools {
        println!(
            "  {:>4}  {:<16} {}/{}  commission {}",
            p.pool_pair_id,
            p.pair_symbol,
            p.token_a,
            p.token_b,
            format_sats(p.commission)
        );
    }
    for v in &volumes {
        let total: i64 = v.amounts.values().sum();
        println!(
            "  volume {:<12} window {:>6}s  swaps {:>4}  in {}",
            v.key,
            v.window,
            v.count,
            format_sats(total)
        );
    }
    println!("\nLoan schemes ({}):", schemes.len());
    for s in &schemes {
        let marker = match &default_scheme {
            Some(d) if d.scheme_id == s.id => "  (default)",
            _ => "",
        };
        println!("  {:<8} ratio {:>4}%  rate {}{}", s.id, s.ratio, format_sats(s.rate), marker);
    }
    if let Some(s) = &supply {
        println!("\nSupply at {}:", s.block.height);
        println!("  minted      {}", format_sats(s.minted));
        println!("  burned      {}", format_sats(s.burned));
        println!("  locked      {}", format_sats(s.locked));
        println!("  circulating {}", format_sats(s.circulating));
    }
    Ok(())
}
