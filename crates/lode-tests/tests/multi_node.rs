//! Multi-node scenarios over real TCP on ephemeral localhost ports.

use std::sync::Arc;
use std::time::Duration;

use lode_chain::{find_utxo, new_transaction, Chain, UtxoSet};
use lode_core::types::Transaction;
use lode_network::peers::save_peers;
use lode_tests::helpers::{bind_node, start, wait_until};
use lode_wallet::Wallet;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_peers_converge_on_longest_chain() {
    // Node X: genesis plus three mined blocks.
    let dir_x = tempfile::tempdir().unwrap();
    let wallet_x = Wallet::generate();
    let chain_x = Arc::new(
        Chain::create(dir_x.path().join("blocks"), &wallet_x.address()).unwrap(),
    );
    for _ in 0..3 {
        let coinbase = Transaction::coinbase(&wallet_x.address(), Vec::new()).unwrap();
        chain_x.mine_block(vec![coinbase]).unwrap();
    }
    assert_eq!(chain_x.get_best_height().unwrap(), 3);
    let x_hashes = chain_x.get_block_hashes().unwrap();

    let node_x = bind_node(dir_x.path(), chain_x.clone(), None).await;
    let x_addr = node_x.local_addr().to_string();
    save_peers(&dir_x.path().join("nodes.nd"), &[x_addr.clone()]).unwrap();
    let (_state_x, _task_x) = start(node_x);

    // Node Y: fresh chain at height 0, bootstrapping from X.
    let dir_y = tempfile::tempdir().unwrap();
    let wallet_y = Wallet::generate();
    let chain_y = Arc::new(
        Chain::create(dir_y.path().join("blocks"), &wallet_y.address()).unwrap(),
    );
    let node_y = bind_node(dir_y.path(), chain_y.clone(), None).await;
    save_peers(&dir_y.path().join("nodes.nd"), &[x_addr.clone()]).unwrap();
    let (state_y, _task_y) = start(node_y);

    // Y dials X with version{height: 0} at startup and pulls the chain.
    let y_hashes = {
        let chain = state_y.chain.clone();
        let expected = x_hashes.clone();
        assert!(
            wait_until(
                move || chain.get_block_hashes().map(|h| h == expected).unwrap_or(false),
                CONVERGE_TIMEOUT,
            )
            .await,
            "node Y never converged on X's chain"
        );
        state_y.chain.get_block_hashes().unwrap()
    };

    assert_eq!(y_hashes, x_hashes);
    assert_eq!(state_y.chain.tip(), chain_x.tip());
    assert_eq!(state_y.chain.get_best_height().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mempool_fills_then_miner_produces_block() {
    // Bootstrap node B holds a chain where wallets A and C are each funded
    // by a coinbase.
    let dir_b = tempfile::tempdir().unwrap();
    let wallet_a = Wallet::generate();
    let wallet_c = Wallet::generate();
    let chain_b = Arc::new(
        Chain::create(dir_b.path().join("blocks"), &wallet_a.address()).unwrap(),
    );
    let coinbase_c = Transaction::coinbase(&wallet_c.address(), Vec::new()).unwrap();
    chain_b.mine_block(vec![coinbase_c]).unwrap();
    let utxo_b = UtxoSet::new(chain_b.db());
    utxo_b.reindex(find_utxo(&chain_b).unwrap()).unwrap();

    let node_b = bind_node(dir_b.path(), chain_b.clone(), None).await;
    let b_addr = node_b.local_addr().to_string();
    save_peers(&dir_b.path().join("nodes.nd"), &[b_addr.clone()]).unwrap();
    let (state_b, _task_b) = start(node_b);

    // Miner node M syncs from B, then mines once its mempool holds two
    // transactions.
    let dir_m = tempfile::tempdir().unwrap();
    let wallet_m = Wallet::generate();
    let chain_m = Arc::new(
        Chain::create(dir_m.path().join("blocks"), &wallet_m.address()).unwrap(),
    );
    let node_m = bind_node(dir_m.path(), chain_m.clone(), Some(wallet_m.address())).await;
    save_peers(&dir_m.path().join("nodes.nd"), &[b_addr.clone()]).unwrap();
    let (state_m, _task_m) = start(node_m);

    // Wait for M to converge on B's chain so it can verify the transfers.
    {
        let chain = state_m.chain.clone();
        let expected = chain_b.get_block_hashes().unwrap();
        assert!(
            wait_until(
                move || chain.get_block_hashes().map(|h| h == expected).unwrap_or(false),
                CONVERGE_TIMEOUT,
            )
            .await,
            "miner never synced the bootstrap chain"
        );
    }

    let recipient = Wallet::generate();
    let tx1 = new_transaction(&wallet_a, &recipient.address(), 4, &utxo_b, &chain_b).unwrap();
    let tx2 = new_transaction(&wallet_c, &recipient.address(), 3, &utxo_b, &chain_b).unwrap();

    // First transaction reaches B, which re-broadcasts it to M via
    // inv/getdata; wait until M pools it before sending the second so the
    // mine trigger fires exactly once.
    lode_network::send_tx(&b_addr, "127.0.0.1:1", &tx1).await.unwrap();
    {
        let state = state_m.clone();
        assert!(
            wait_until(move || state.mempool.lock().len() == 1, CONVERGE_TIMEOUT).await,
            "first transaction never reached the miner"
        );
    }

    lode_network::send_tx(&b_addr, "127.0.0.1:1", &tx2).await.unwrap();

    // After its second tx the miner produces a block with both transfers
    // plus its coinbase, and clears its mempool.
    {
        let state = state_m.clone();
        assert!(
            wait_until(
                move || state.chain.get_best_height().map(|h| h == 2).unwrap_or(false)
                    && state.mempool.lock().is_empty(),
                CONVERGE_TIMEOUT,
            )
            .await,
            "miner never produced the block"
        );
    }

    let mined = state_m.chain.get_block(&state_m.chain.tip()).unwrap();
    assert_eq!(mined.height, 2);
    assert_eq!(mined.transactions.len(), 3, "two transfers plus coinbase");
    let mined_ids: Vec<_> = mined.transactions.iter().map(|tx| tx.id).collect();
    assert!(mined_ids.contains(&tx1.id));
    assert!(mined_ids.contains(&tx2.id));
    assert!(mined.transactions.iter().any(|tx| tx.is_coinbase()));

    // The block gossips back to the bootstrap node.
    {
        let state = state_b.clone();
        assert!(
            wait_until(
                move || state.chain.get_best_height().map(|h| h == 2).unwrap_or(false),
                CONVERGE_TIMEOUT,
            )
            .await,
            "bootstrap never received the mined block"
        );
    }
    assert_eq!(state_b.chain.tip(), state_m.chain.tip());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn addr_gossip_merges_and_persists_peers() {
    let dir_a = tempfile::tempdir().unwrap();
    let wallet_a = Wallet::generate();
    let chain_a = Arc::new(
        Chain::create(dir_a.path().join("blocks"), &wallet_a.address()).unwrap(),
    );
    let node_a = bind_node(dir_a.path(), chain_a, None).await;
    let a_addr = node_a.local_addr().to_string();
    let state_a = node_a.state();

    let dir_b = tempfile::tempdir().unwrap();
    let wallet_b = Wallet::generate();
    let chain_b = Arc::new(
        Chain::create(dir_b.path().join("blocks"), &wallet_b.address()).unwrap(),
    );
    let node_b = bind_node(dir_b.path(), chain_b, None).await;
    let b_addr = node_b.local_addr().to_string();
    save_peers(&dir_b.path().join("nodes.nd"), &[b_addr.clone()]).unwrap();
    let peers_file_b = dir_b.path().join("nodes.nd");
    let (state_b, _task_b) = start(node_b);

    // A announces itself to B with an addr message.
    state_a.send_addr(&b_addr).await;

    {
        let state = state_b.clone();
        let expected = a_addr.clone();
        assert!(
            wait_until(move || state.peers.lock().contains(&expected), CONVERGE_TIMEOUT).await,
            "addr message never merged into B's peer list"
        );
    }

    let persisted = lode_network::peers::load_peers(&peers_file_b).unwrap();
    assert!(persisted.contains(&a_addr), "peer list not persisted: {persisted:?}");
}
