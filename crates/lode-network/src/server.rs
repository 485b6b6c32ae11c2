//! Node runtime: accept loop, message handlers, gossip, and the mine cycle.
//!
//! Every connection carries exactly one frame. Handlers run concurrently
//! on spawned tasks and share state through the mutexes on [`NodeState`];
//! no lock is held across I/O. Peer I/O failures are logged and the peer
//! pruned; one bad peer never kills the node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use lode_chain::{find_utxo, Chain, UtxoSet};
use lode_core::constants::PROTOCOL_VERSION;
use lode_core::error::{LodeError, NetworkError};
use lode_core::mempool::Mempool;
use lode_core::types::{Block, Hash256, Transaction};

use crate::message::{Addr, BlockMsg, GetBlocks, GetData, Inv, InvKind, Message, TxMsg, Version};
use crate::peers::{self, KnownPeers};

/// Deadline for dialing a peer and for draining one inbound frame.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Startup configuration for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the accept loop binds to. Port 0 picks an ephemeral port.
    pub listen_addr: String,
    /// Mining reward address; `None` disables the mine trigger.
    pub miner_address: Option<String>,
    /// Path of the newline-delimited known-peer file.
    pub peers_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            miner_address: None,
            peers_file: PathBuf::from("./nodes.nd"),
        }
    }
}

/// Shared state of a running node.
///
/// Configuration fields are set once at startup and read-only afterwards;
/// every mutable field sits behind its own mutex.
pub struct NodeState {
    /// Our own `host:port`, as peers should dial it.
    pub node_addr: String,
    /// Reward address that turns this node into a miner.
    pub miner_address: Option<String>,
    /// Where the known-peer list is persisted.
    pub peers_file: PathBuf,
    pub chain: Arc<Chain>,
    pub utxo: UtxoSet,
    pub mempool: Mutex<Mempool>,
    pub peers: Mutex<KnownPeers>,
    /// Block ids announced by a peer and not yet downloaded.
    pub blocks_in_transit: Mutex<Vec<Vec<u8>>>,
}

impl NodeState {
    /// Whether this node is index 0 of the known-peer list.
    pub fn is_bootstrap(&self) -> bool {
        self.peers.lock().first().as_deref() == Some(self.node_addr.as_str())
    }

    /// Rebuild the UTXO index from a full chain scan.
    pub fn reindex_utxo(&self) -> Result<(), LodeError> {
        self.utxo.reindex(find_utxo(&self.chain)?)
    }

    /// Persist a snapshot of the known-peer list.
    fn persist_peers(&self) {
        let snapshot = self.peers.lock().all();
        if let Err(e) = peers::save_peers(&self.peers_file, &snapshot) {
            warn!(error = %e, "failed to persist peer list");
        }
    }

    // --- Handlers ---

    async fn handle_version(&self, payload: Version) -> Result<(), LodeError> {
        let best_height = self.chain.get_best_height()?;
        debug!(ours = best_height, theirs = payload.best_height, peer = %payload.addr_from, "version");

        if best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await;
        } else if best_height > payload.best_height {
            self.send_version(&payload.addr_from).await;
        }
        self.peers.lock().add(payload.addr_from);
        Ok(())
    }

    async fn handle_get_blocks(&self, payload: GetBlocks) -> Result<(), LodeError> {
        let items: Vec<Vec<u8>> = self
            .chain
            .get_block_hashes()?
            .iter()
            .map(|hash| hash.as_bytes().to_vec())
            .collect();
        self.send_inv(&payload.addr_from, InvKind::Block, items).await;
        Ok(())
    }

    async fn handle_inv(&self, payload: Inv) -> Result<(), LodeError> {
        debug!(kind = ?payload.kind, count = payload.items.len(), "inventory received");
        match payload.kind {
            InvKind::Block => {
                let first = {
                    let mut transit = self.blocks_in_transit.lock();
                    *transit = payload.items;
                    if transit.is_empty() { None } else { Some(transit.remove(0)) }
                };
                if let Some(id) = first {
                    self.send_get_data(&payload.addr_from, InvKind::Block, id).await;
                }
            }
            InvKind::Tx => {
                let Some(id) = payload.items.first() else {
                    return Ok(());
                };
                if !self.mempool.lock().contains(&hex::encode(id)) {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, id.clone()).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, payload: GetData) -> Result<(), LodeError> {
        match payload.kind {
            InvKind::Block => {
                let hash = Hash256::from_slice(&payload.id)?;
                match self.chain.get_block(&hash) {
                    Ok(block) => self.send_block(&payload.addr_from, &block).await,
                    Err(e) => warn!(%hash, error = %e, "requested block unavailable"),
                }
            }
            InvKind::Tx => {
                let txid = hex::encode(&payload.id);
                let tx = self.mempool.lock().get(&txid).cloned();
                match tx {
                    Some(tx) => self.send_tx(&payload.addr_from, &tx).await,
                    None => warn!(txid = %txid, "requested transaction not in mempool"),
                }
            }
        }
        Ok(())
    }

    async fn handle_block(&self, payload: BlockMsg) -> Result<(), LodeError> {
        let block = Block::decode(&payload.block)?;
        info!(hash = %block.hash, height = block.height, "block received");
        self.chain.add_block(&block)?;

        let next = {
            let mut transit = self.blocks_in_transit.lock();
            if transit.is_empty() { None } else { Some(transit.remove(0)) }
        };
        match next {
            Some(id) => {
                self.send_get_data(&payload.addr_from, InvKind::Block, id).await;
            }
            None => {
                self.reindex_utxo()?;
            }
        }
        Ok(())
    }

    async fn handle_tx(&self, payload: TxMsg) -> Result<(), LodeError> {
        let tx = Transaction::decode(&payload.transaction)?;
        let id_bytes = tx.id.as_bytes().to_vec();
        {
            let mut pool = self.mempool.lock();
            let txid = pool.insert(tx);
            debug!(txid = %txid, pending = pool.len(), "transaction pooled");
        }

        if self.is_bootstrap() {
            let known = self.peers.lock().all();
            for peer in known {
                if peer != self.node_addr && peer != payload.addr_from {
                    self.send_inv(&peer, InvKind::Tx, vec![id_bytes.clone()]).await;
                }
            }
        } else if self.miner_address.is_some() && self.mempool.lock().len() >= 2 {
            self.mine_pending().await?;
        }
        Ok(())
    }

    async fn handle_addr(&self, payload: Addr) -> Result<(), LodeError> {
        {
            let mut known = self.peers.lock();
            known.extend(payload.address_list);
            info!(known = known.len(), "peer list updated");
        }
        self.persist_peers();

        let known = self.peers.lock().all();
        for peer in known {
            if peer != self.node_addr {
                self.send_get_blocks(&peer).await;
            }
        }
        Ok(())
    }

    /// One mine cycle: verify the pool, append a coinbase, run the
    /// proof-of-work on a blocking thread, rebuild the UTXO index, clear
    /// the pool, and announce the block. Repeats while the pool refills
    /// during mining.
    async fn mine_pending(&self) -> Result<(), LodeError> {
        let Some(miner) = self.miner_address.clone() else {
            return Ok(());
        };

        loop {
            let candidates = self.mempool.lock().transactions();
            let mut txs = Vec::new();
            for tx in candidates {
                match self.chain.verify_transaction(&tx) {
                    Ok(true) => txs.push(tx),
                    Ok(false) => warn!(txid = %tx.id, "dropping invalid transaction"),
                    Err(e) => warn!(txid = %tx.id, error = %e, "transaction verification failed"),
                }
            }
            if txs.is_empty() {
                warn!("no valid transactions in the pool, mining coinbase only");
            }
            txs.push(Transaction::coinbase(&miner, Vec::new())?);

            let chain = self.chain.clone();
            let block = tokio::task::spawn_blocking(move || chain.mine_block(txs))
                .await
                .map_err(|e| LodeError::Storage(format!("mining task: {e}")))??;

            self.reindex_utxo()?;
            self.mempool.lock().clear();

            let known = self.peers.lock().all();
            for peer in known {
                if peer != self.node_addr {
                    self.send_inv(&peer, InvKind::Block, vec![block.hash.as_bytes().to_vec()])
                        .await;
                }
            }

            if self.mempool.lock().is_empty() {
                return Ok(());
            }
            debug!("mempool refilled during mining, running another cycle");
        }
    }

    // --- Senders (best-effort, failures prune the peer) ---

    async fn send_message(&self, addr: &str, message: Message) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, command = message.command(), "failed to encode frame");
                return;
            }
        };
        if let Err(e) = dial(addr, &frame).await {
            warn!(peer = addr, error = %e, "peer unreachable, pruning");
            self.peers.lock().remove(addr);
        }
    }

    async fn send_version(&self, addr: &str) {
        let best_height = match self.chain.get_best_height() {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "cannot read best height");
                return;
            }
        };
        self.send_message(
            addr,
            Message::Version(Version {
                version: PROTOCOL_VERSION,
                best_height,
                addr_from: self.node_addr.clone(),
            }),
        )
        .await;
    }

    async fn send_get_blocks(&self, addr: &str) {
        self.send_message(
            addr,
            Message::GetBlocks(GetBlocks { addr_from: self.node_addr.clone() }),
        )
        .await;
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
        self.send_message(
            addr,
            Message::Inv(Inv { addr_from: self.node_addr.clone(), kind, items }),
        )
        .await;
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Vec<u8>) {
        self.send_message(
            addr,
            Message::GetData(GetData { addr_from: self.node_addr.clone(), kind, id }),
        )
        .await;
    }

    async fn send_block(&self, addr: &str, block: &Block) {
        let encoded = match block.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode block");
                return;
            }
        };
        self.send_message(
            addr,
            Message::Block(BlockMsg { addr_from: self.node_addr.clone(), block: encoded }),
        )
        .await;
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) {
        let encoded = match tx.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode transaction");
                return;
            }
        };
        self.send_message(
            addr,
            Message::Tx(TxMsg { addr_from: self.node_addr.clone(), transaction: encoded }),
        )
        .await;
    }

    /// Share our known peers (plus ourselves) with another node.
    pub async fn send_addr(&self, addr: &str) {
        let mut address_list = self.peers.lock().all();
        if !address_list.contains(&self.node_addr) {
            address_list.push(self.node_addr.clone());
        }
        self.send_message(addr, Message::Addr(Addr { address_list })).await;
    }
}

/// A bound node, ready to run its accept loop.
pub struct Node {
    listener: TcpListener,
    state: Arc<NodeState>,
}

impl Node {
    /// Bind the listener and assemble the shared state.
    ///
    /// The node address peers see is the actual bound address, so a
    /// `listen_addr` with port 0 works for tests.
    pub async fn bind(config: NodeConfig, chain: Arc<Chain>) -> Result<Self, LodeError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| NetworkError::Io(e.to_string()))?;
        let node_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::Io(e.to_string()))?
            .to_string();

        let utxo = UtxoSet::new(chain.db());
        let state = Arc::new(NodeState {
            node_addr,
            miner_address: config.miner_address,
            peers_file: config.peers_file,
            chain,
            utxo,
            mempool: Mutex::new(Mempool::new()),
            peers: Mutex::new(KnownPeers::new()),
            blocks_in_transit: Mutex::new(Vec::new()),
        });
        Ok(Self { listener, state })
    }

    /// Shared state handle, usable while the node runs.
    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    /// The bound `host:port`.
    pub fn local_addr(&self) -> &str {
        &self.state.node_addr
    }

    /// Run the accept loop forever.
    ///
    /// Loads the known-peer file (seeding it with our own address when
    /// empty) and, unless we are the bootstrap node, introduces ourselves
    /// to peer index 0 with a `version` message.
    pub async fn run(self) -> Result<(), LodeError> {
        let Node { listener, state } = self;

        {
            let loaded = peers::load_peers(&state.peers_file)?;
            let mut known = state.peers.lock();
            known.extend(loaded);
            if known.is_empty() {
                known.add(state.node_addr.clone());
            }
        }

        let bootstrap = state.peers.lock().first();
        if let Some(bootstrap) = bootstrap {
            if bootstrap != state.node_addr {
                state.send_version(&bootstrap).await;
            }
        }

        info!(addr = %state.node_addr, miner = state.miner_address.is_some(), "node listening");
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!(peer = %remote, error = %e, "connection handling failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

/// Drain one frame from the connection and dispatch it.
async fn handle_connection(state: Arc<NodeState>, mut stream: TcpStream) -> Result<(), LodeError> {
    let mut buf = Vec::new();
    timeout(IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| NetworkError::Io(e.to_string()))?;

    let message = Message::from_frame(&buf)?;
    debug!(command = message.command(), "received");

    match message {
        Message::Version(p) => state.handle_version(p).await,
        Message::Addr(p) => state.handle_addr(p).await,
        Message::GetBlocks(p) => state.handle_get_blocks(p).await,
        Message::Inv(p) => state.handle_inv(p).await,
        Message::GetData(p) => state.handle_get_data(p).await,
        Message::Block(p) => state.handle_block(p).await,
        Message::Tx(p) => state.handle_tx(p).await,
    }
}

/// Dial `addr`, write one frame, and close the connection.
pub async fn dial(addr: &str, frame: &[u8]) -> Result<(), NetworkError> {
    let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| NetworkError::Io(e.to_string()))?;
    timeout(IO_TIMEOUT, stream.write_all(frame))
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| NetworkError::Io(e.to_string()))?;
    timeout(IO_TIMEOUT, stream.shutdown())
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| NetworkError::Io(e.to_string()))?;
    Ok(())
}

/// Submit a transaction to a node. Used by the CLI `send` path and tests.
pub async fn send_tx(addr: &str, from: &str, tx: &Transaction) -> Result<(), LodeError> {
    let frame = Message::Tx(TxMsg {
        addr_from: from.to_string(),
        transaction: tx.encode()?,
    })
    .to_frame()?;
    dial(addr, &frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::address;
    use lode_core::crypto::KeyPair;

    fn test_address() -> String {
        let kp = KeyPair::generate();
        address::encode_address(&address::hash160(&kp.public_key().to_raw_bytes()))
    }

    async fn test_node(dir: &tempfile::TempDir, miner: Option<String>) -> Node {
        let chain = Arc::new(
            Chain::create(dir.path().join("blocks"), &test_address()).unwrap(),
        );
        let config = NodeConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            miner_address: miner,
            peers_file: dir.path().join("nodes.nd"),
        };
        Node::bind(config, chain).await.unwrap()
    }

    #[tokio::test]
    async fn bind_resolves_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        assert!(!node.local_addr().ends_with(":0"));
    }

    #[tokio::test]
    async fn handle_tx_pools_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        let state = node.state();

        let tx = Transaction::coinbase(&test_address(), Vec::new()).unwrap();
        let payload = TxMsg {
            addr_from: "127.0.0.1:1".to_string(),
            transaction: tx.encode().unwrap(),
        };
        state.handle_tx(payload).await.unwrap();

        let pool = state.mempool.lock();
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&hex::encode(tx.id.as_bytes())));
    }

    #[tokio::test]
    async fn handle_inv_tracks_blocks_in_transit() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        let state = node.state();

        // The unreachable sender only matters for the getdata reply, which
        // is best-effort; the in-transit bookkeeping is what we check.
        let payload = Inv {
            addr_from: "127.0.0.1:1".to_string(),
            kind: InvKind::Block,
            items: vec![vec![0xAA; 32], vec![0xBB; 32], vec![0xCC; 32]],
        };
        state.handle_inv(payload).await.unwrap();

        let transit = state.blocks_in_transit.lock();
        assert_eq!(*transit, vec![vec![0xBB; 32], vec![0xCC; 32]]);
    }

    #[tokio::test]
    async fn handle_version_registers_peer() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        let state = node.state();

        let payload = Version {
            version: PROTOCOL_VERSION,
            best_height: 0,
            addr_from: "127.0.0.1:1".to_string(),
        };
        state.handle_version(payload).await.unwrap();
        assert!(state.peers.lock().contains("127.0.0.1:1"));
    }

    #[tokio::test]
    async fn bootstrap_detection() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        let state = node.state();

        assert!(!state.is_bootstrap());
        state.peers.lock().add(state.node_addr.clone());
        assert!(state.is_bootstrap());
    }

    #[tokio::test]
    async fn unreachable_peer_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, None).await;
        let state = node.state();

        state.peers.lock().add("127.0.0.1:1");
        state.send_get_blocks("127.0.0.1:1").await;
        assert!(!state.peers.lock().contains("127.0.0.1:1"));
    }
}
