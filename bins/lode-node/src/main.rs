//! Lode full node binary.
//!
//! Wallet management, chain bootstrap, transfers, and the gossip server,
//! all namespaced by `--node-id` so several nodes can share one machine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use lode_chain::{find_utxo, new_transaction, Chain, UtxoSet};
use lode_core::address;
use lode_core::pow::ProofOfWork;
use lode_core::types::Transaction;
use lode_network::{Node, NodeConfig};
use lode_wallet::WalletStore;

/// Lode: a minimal UTXO proof-of-work cryptocurrency node.
#[derive(Parser, Debug)]
#[command(name = "lode-node", version, about)]
struct Cli {
    /// Node id; namespaces the data directory and doubles as the listen port.
    #[arg(long, env = "NODE_ID", default_value = "3000")]
    node_id: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Known-peer file path.
    #[arg(long, default_value = "./nodes.nd")]
    peers_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new wallet and print its address.
    CreateWallet,
    /// List the addresses of every stored wallet.
    ListAddresses,
    /// Create the chain and mine the genesis block paying ADDRESS.
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },
    /// Sum the unspent outputs locked to ADDRESS.
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Transfer AMOUNT from one owned address to another address.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the block locally instead of submitting to the network.
        #[arg(long)]
        mine: bool,
    },
    /// Run the gossip server, optionally mining to MINER.
    StartNode {
        #[arg(long)]
        miner: Option<String>,
    },
    /// Dump every block from the tip back to genesis.
    PrintChain,
    /// Rebuild the UTXO index from a full chain scan.
    ReindexUtxo,
}

impl Cli {
    fn db_path(&self) -> PathBuf {
        PathBuf::from(format!("./tmp/blocks_{}", self.node_id))
    }

    fn wallet_dir(&self) -> PathBuf {
        PathBuf::from(format!("./wallets_{}", self.node_id))
    }

    fn listen_addr(&self) -> String {
        format!("127.0.0.1:{}", self.node_id)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match &cli.command {
        Command::CreateWallet => create_wallet(&cli),
        Command::ListAddresses => list_addresses(&cli),
        Command::CreateBlockchain { address } => create_blockchain(&cli, address),
        Command::GetBalance { address } => get_balance(&cli, address),
        Command::Send { from, to, amount, mine } => send(&cli, from, to, *amount, *mine).await,
        Command::StartNode { miner } => start_node(&cli, miner.clone()).await,
        Command::PrintChain => print_chain(&cli),
        Command::ReindexUtxo => reindex_utxo(&cli),
    }
}

fn create_wallet(cli: &Cli) -> anyhow::Result<()> {
    let mut store = WalletStore::open(cli.wallet_dir())?;
    let address = store.create_wallet()?;
    println!("new address: {address}");
    Ok(())
}

fn list_addresses(cli: &Cli) -> anyhow::Result<()> {
    let store = WalletStore::open(cli.wallet_dir())?;
    for address in store.addresses() {
        println!("{address}");
    }
    Ok(())
}

fn create_blockchain(cli: &Cli, address: &str) -> anyhow::Result<()> {
    if !address::validate_address(address) {
        bail!("invalid address: {address}");
    }
    let chain = Chain::create(cli.db_path(), address)?;
    let utxo = UtxoSet::new(chain.db());
    utxo.reindex(find_utxo(&chain)?)?;
    println!("chain created, genesis {}", chain.tip());
    Ok(())
}

fn get_balance(cli: &Cli, address: &str) -> anyhow::Result<()> {
    if !address::validate_address(address) {
        bail!("invalid address: {address}");
    }
    let chain = Chain::open(cli.db_path())?;
    let utxo = UtxoSet::new(chain.db());

    let pubkey_hash = address::decode_address(address)?;
    let balance: u64 = utxo
        .find_unspent_outputs(&pubkey_hash)?
        .iter()
        .map(|out| out.value)
        .sum();
    println!("balance of {address}: {balance}");
    Ok(())
}

async fn send(cli: &Cli, from: &str, to: &str, amount: u64, mine: bool) -> anyhow::Result<()> {
    if !address::validate_address(from) {
        bail!("invalid sender address: {from}");
    }
    if !address::validate_address(to) {
        bail!("invalid recipient address: {to}");
    }

    let chain = Chain::open(cli.db_path())?;
    let utxo = UtxoSet::new(chain.db());
    let wallets = WalletStore::open(cli.wallet_dir())?;
    let wallet = wallets.get(from)?;

    let tx = new_transaction(wallet, to, amount, &utxo, &chain)?;

    if mine {
        let coinbase = Transaction::coinbase(from, Vec::new())?;
        let block = chain.mine_block(vec![coinbase, tx])?;
        utxo.update(&block)?;
        println!("mined block {} at height {}", block.hash, block.height);
    } else {
        let bootstrap = lode_network::peers::load_peers(&cli.peers_file)?
            .into_iter()
            .next()
            .context("no known peers; start a node first")?;
        lode_network::send_tx(&bootstrap, &cli.listen_addr(), &tx).await?;
        println!("transaction {} submitted to {bootstrap}", tx.id);
    }
    Ok(())
}

async fn start_node(cli: &Cli, miner: Option<String>) -> anyhow::Result<()> {
    if let Some(miner) = &miner {
        if !address::validate_address(miner) {
            bail!("invalid miner address: {miner}");
        }
        info!(miner = %miner, "mining enabled");
    }

    let chain = Arc::new(Chain::open(cli.db_path())?);
    let config = NodeConfig {
        listen_addr: cli.listen_addr(),
        miner_address: miner,
        peers_file: cli.peers_file.clone(),
    };
    let node = Node::bind(config, chain).await?;

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = node.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, closing store");
        }
        _ = sigterm.recv() => {
            info!("terminate received, closing store");
        }
    }
    Ok(())
}

fn print_chain(cli: &Cli) -> anyhow::Result<()> {
    let chain = Chain::open(cli.db_path())?;
    let mut iter = chain.iterator();
    while let Some(block) = iter.next_block()? {
        println!("block   {}", block.hash);
        println!("height  {}", block.height);
        println!("prev    {}", block.prev_hash);
        println!("nonce   {}", block.nonce);
        println!("pow     {}", ProofOfWork::new(&block).validate()?);
        println!("txs     {}", block.transactions.len());
        println!();
    }
    Ok(())
}

fn reindex_utxo(cli: &Cli) -> anyhow::Result<()> {
    let chain = Chain::open(cli.db_path())?;
    let utxo = UtxoSet::new(chain.db());
    utxo.reindex(find_utxo(&chain)?)?;
    println!("utxo index rebuilt: {} transactions", utxo.count_transactions()?);
    Ok(())
}

fn init_logging(level: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}
