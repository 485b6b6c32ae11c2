//! Test fixtures: funded chains and running nodes on ephemeral ports.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lode_chain::{find_utxo, Chain, UtxoSet};
use lode_network::{Node, NodeConfig, NodeState};
use lode_wallet::Wallet;

/// A chain whose genesis coinbase pays `wallet`, with a fresh UTXO index.
pub struct ChainFixture {
    pub chain: Arc<Chain>,
    pub utxo: UtxoSet,
    pub wallet: Wallet,
    pub dir: tempfile::TempDir,
}

/// Create a chain in a temp directory, funding a new wallet via genesis.
pub fn funded_chain() -> ChainFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let wallet = Wallet::generate();
    let chain = Arc::new(
        Chain::create(dir.path().join("blocks_3000"), &wallet.address()).expect("create chain"),
    );
    let utxo = UtxoSet::new(chain.db());
    utxo.reindex(find_utxo(&chain).expect("scan")).expect("reindex");
    ChainFixture { chain, utxo, wallet, dir }
}

/// Bind a node on an ephemeral port over an existing chain.
///
/// The peer file at `dir/nodes.nd` is not written here: tests write it
/// after learning every participant's bound address, before `start`.
pub async fn bind_node(dir: &Path, chain: Arc<Chain>, miner: Option<String>) -> Node {
    let config = NodeConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        miner_address: miner,
        peers_file: dir.join("nodes.nd"),
    };
    Node::bind(config, chain).await.expect("bind node")
}

/// Run a bound node on a background task.
pub fn start(node: Node) -> (Arc<NodeState>, tokio::task::JoinHandle<()>) {
    let state = node.state();
    let handle = tokio::spawn(async move {
        let _ = node.run().await;
    });
    (state, handle)
}

/// Poll `predicate` every 50ms until it holds or `timeout` elapses.
pub async fn wait_until(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}
