// Transaction builder

use crate::core::{KeyHash, Transaction, TxInput, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::UtxoSet;
use crate::wallet::Wallet;

/// Build a signed transfer of `amount` from `from` to `to`.
///
/// Outputs are selected greedily from the index. The recipient output comes
/// first; a change output back to the sender follows when the selection
/// exceeds `amount`. Every input is signed over the trimmed digest.
pub fn build_transfer(from: &Wallet, to: &KeyHash, amount: u64, utxo: &UtxoSet) -> Result<Transaction> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let sender = from.key_hash();
    let (selected, total) = utxo.spendable_outputs(&sender, amount)?;
    if total < amount {
        return Err(LedgerError::InsufficientFunds {
            needed: amount,
            available: total,
        });
    }

    // Create inputs (unsigned)
    let inputs: Vec<TxInput> = selected
        .iter()
        .flat_map(|(tx_hash, indices)| indices.iter().map(|index| TxInput::new(*tx_hash, *index)))
        .collect();

    // Payment output, then change
    let mut outputs = vec![TxOutput::new(amount, *to)];
    let change = total - amount;
    if change > 0 {
        outputs.push(TxOutput::new(change, sender));
    }

    let mut tx = Transaction::new(inputs, outputs);
    sign_transaction(&mut tx, from);

    log::debug!(
        "Built transfer of {} to {} spending {} outputs",
        amount,
        to,
        tx.inputs.len()
    );
    Ok(tx)
}

/// Sign every input of `tx` with `wallet`
pub fn sign_transaction(tx: &mut Transaction, wallet: &Wallet) {
    let digest = tx.trimmed_digest();
    let signature = wallet.sign(&digest);
    let public_key = wallet.public_key_bytes();

    for input in &mut tx.inputs {
        input.signature = signature.clone();
        input.public_key = public_key.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::TransactionValidator;

    fn funded(wallet: &Wallet, rewards: u64) -> UtxoSet {
        let mut utxo = UtxoSet::new();
        for height in 0..rewards {
            utxo.apply_transaction(&Transaction::reward(wallet.key_hash(), 10, height));
        }
        utxo
    }

    #[test]
    fn test_transfer_with_change() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let utxo = funded(&alice, 1);

        let tx = build_transfer(&alice, &bob.key_hash(), 4, &utxo).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2); // Payment + change
        assert_eq!(tx.outputs[0], TxOutput::new(4, bob.key_hash()));
        assert_eq!(tx.outputs[1], TxOutput::new(6, alice.key_hash()));
        assert_eq!(tx.inputs[0].public_key, alice.public_key_bytes());
        assert!(TransactionValidator::verify(&tx, &utxo));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let utxo = funded(&alice, 2);

        let tx = build_transfer(&alice, &bob.key_hash(), 20, &utxo).unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs, vec![TxOutput::new(20, bob.key_hash())]);
        assert!(TransactionValidator::verify(&tx, &utxo));
    }

    #[test]
    fn test_insufficient_funds() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let utxo = funded(&alice, 1);

        let result = build_transfer(&alice, &bob.key_hash(), 11, &utxo);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                needed: 11,
                available: 10
            })
        ));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let alice = Wallet::generate().unwrap();
        let utxo = funded(&alice, 1);

        let result = build_transfer(&alice, &alice.key_hash(), 0, &utxo);
        assert!(matches!(result, Err(LedgerError::InvalidAmount)));
    }

    #[test]
    fn test_overflowing_selection_rejected() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let mut utxo = UtxoSet::new();
        utxo.apply_transaction(&Transaction::new(
            Vec::new(),
            vec![TxOutput::new(1, alice.key_hash()), TxOutput::new(u64::MAX, alice.key_hash())],
        ));

        let result = build_transfer(&alice, &bob.key_hash(), u64::MAX, &utxo);
        assert!(matches!(
            result,
            Err(LedgerError::InvalidTransaction(crate::consensus::TxError::ValueOverflow))
        ));
    }
}
