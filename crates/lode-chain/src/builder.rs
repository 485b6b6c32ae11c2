//! Building signed transfers from a wallet's spendable outputs.

use chrono::Utc;
use tracing::debug;

use lode_core::address;
use lode_core::error::{LodeError, TransactionError};
use lode_core::types::{Hash256, Transaction, TxInput, TxOutput};
use lode_wallet::Wallet;

use crate::chain::Chain;
use crate::utxo::UtxoSet;

/// Build and sign a transfer of `amount` from `wallet` to `to`.
///
/// Selects inputs greedily via [`UtxoSet::find_spendable`], fails with
/// [`TransactionError::InsufficientFunds`] when the wallet cannot cover
/// the amount, and adds a change output back to the sender when the
/// selection overshoots.
pub fn new_transaction(
    wallet: &Wallet,
    to: &str,
    amount: u64,
    utxo: &UtxoSet,
    chain: &Chain,
) -> Result<Transaction, LodeError> {
    let pubkey = wallet.pubkey_bytes();
    let pubkey_hash = address::hash160(&pubkey);

    let (accumulated, spendable) = utxo.find_spendable(&pubkey_hash, amount)?;
    if accumulated < amount {
        return Err(TransactionError::InsufficientFunds { have: accumulated, need: amount }.into());
    }

    let mut inputs = Vec::new();
    for (txid_hex, out_indexes) in &spendable {
        let txid_bytes = hex::decode(txid_hex)
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        let prev_txid = Hash256::from_slice(&txid_bytes)?;
        for &out_index in out_indexes {
            inputs.push(TxInput {
                prev_txid,
                out_index,
                signature: Vec::new(),
                pubkey: pubkey.to_vec(),
            });
        }
    }

    let mut outputs = vec![TxOutput::new(amount, to)?];
    if accumulated > amount {
        outputs.push(TxOutput { value: accumulated - amount, pubkey_hash });
    }

    let mut tx = Transaction {
        timestamp: Utc::now().timestamp(),
        id: Hash256::ZERO,
        inputs,
        outputs,
    };
    tx.id = tx.hash()?;
    chain.sign_transaction(&mut tx, wallet.keypair())?;

    debug!(txid = %tx.id, amount, "transaction built");
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::find_utxo;
    use lode_core::constants::SUBSIDY;

    struct Fixture {
        chain: Chain,
        utxo: UtxoSet,
        wallet: Wallet,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::generate();
        let chain = Chain::create(dir.path().join("blocks"), &wallet.address()).unwrap();
        let utxo = UtxoSet::new(chain.db());
        utxo.reindex(find_utxo(&chain).unwrap()).unwrap();
        Fixture { chain, utxo, wallet, _dir: dir }
    }

    #[test]
    fn transfer_with_change() {
        let f = fixture();
        let recipient = Wallet::generate();

        let tx = new_transaction(&f.wallet, &recipient.address(), 4, &f.utxo, &f.chain).unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 4);
        assert_eq!(
            tx.outputs[0].pubkey_hash,
            address::decode_address(&recipient.address()).unwrap()
        );
        assert_eq!(tx.outputs[1].value, SUBSIDY - 4);
        assert!(f.chain.verify_transaction(&tx).unwrap());
    }

    #[test]
    fn exact_transfer_has_no_change() {
        let f = fixture();
        let recipient = Wallet::generate();
        let tx =
            new_transaction(&f.wallet, &recipient.address(), SUBSIDY, &f.utxo, &f.chain).unwrap();
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn insufficient_funds() {
        let f = fixture();
        let recipient = Wallet::generate();
        let err = new_transaction(&f.wallet, &recipient.address(), SUBSIDY * 2, &f.utxo, &f.chain)
            .unwrap_err();
        assert!(matches!(
            err,
            LodeError::Transaction(TransactionError::InsufficientFunds {
                have: SUBSIDY,
                need
            }) if need == SUBSIDY * 2
        ));
    }

    #[test]
    fn built_transaction_mines() {
        let f = fixture();
        let recipient = Wallet::generate();
        let tx = new_transaction(&f.wallet, &recipient.address(), 3, &f.utxo, &f.chain).unwrap();
        let block = f.chain.mine_block(vec![tx]).unwrap();
        assert_eq!(block.height, 1);
    }
}
