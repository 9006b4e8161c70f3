// UTXO (Unspent Transaction Output) index

use crate::consensus::TxError;
use crate::core::{
    read_u64, Block, DecodeError, Hash256, KeyHash, Serializable, Transaction, TxOutput,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

/// An output that is still spendable, with its position in the creating
/// transaction. Positions never shift when sibling outputs are spent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UnspentOutput {
    pub index: u64,
    pub output: TxOutput,
}

impl UnspentOutput {
    pub fn new(index: u64, output: TxOutput) -> Self {
        Self { index, output }
    }
}

impl Serializable for UnspentOutput {
    fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(36);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.output.serialize());
        bytes
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let index = read_u64(reader)?;
        let output = TxOutput::from_reader(reader)?;
        Ok(Self { index, output })
    }
}

/// Transaction hashes whose entries changed during an update
pub type UtxoDelta = BTreeSet<Hash256>;

/// Outputs selected to fund a transfer: tx hash -> output indices
pub type Selection = BTreeMap<Hash256, Vec<u64>>;

/// Mapping from transaction hash to that transaction's unspent outputs.
///
/// Entries are kept in ascending hash order, which makes iteration (and so
/// output selection) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<Hash256, Vec<UnspentOutput>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rebuild: replay every transaction of every block, in order
    pub fn index<'a, I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut set = Self::new();
        for block in blocks {
            for tx in &block.transactions {
                set.apply_transaction(tx);
            }
        }
        set
    }

    /// Consume the outputs `tx` spends and add the outputs it creates.
    /// Returns the keys that changed.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> UtxoDelta {
        let mut delta = UtxoDelta::new();

        for input in tx.inputs.iter().filter(|input| !input.is_coinbase()) {
            if let Some(outputs) = self.entries.get_mut(&input.prev_tx_hash) {
                outputs.retain(|unspent| unspent.index != input.prev_index);
                if outputs.is_empty() {
                    self.entries.remove(&input.prev_tx_hash);
                }
                delta.insert(input.prev_tx_hash);
            }
        }

        if !tx.outputs.is_empty() {
            let tx_hash = tx.hash();
            let outputs = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| UnspentOutput::new(index as u64, output.clone()))
                .collect();
            self.entries.insert(tx_hash, outputs);
            delta.insert(tx_hash);
        }

        delta
    }

    /// Unspent outputs of one transaction
    pub fn get(&self, tx_hash: &Hash256) -> Option<&[UnspentOutput]> {
        self.entries.get(tx_hash).map(Vec::as_slice)
    }

    /// Look up a single unspent output
    pub fn find_output(&self, tx_hash: &Hash256, index: u64) -> Option<&TxOutput> {
        self.entries
            .get(tx_hash)?
            .iter()
            .find(|unspent| unspent.index == index)
            .map(|unspent| &unspent.output)
    }

    /// Greedily collect outputs locked to `owner` until they cover `amount`.
    ///
    /// On success the selection is non-empty (unless `amount` is zero) and
    /// the total is at least `amount`. When funds are insufficient the
    /// selection is empty and the total is everything `owner` holds.
    pub fn spendable_outputs(&self, owner: &KeyHash, amount: u64) -> Result<(Selection, u64), TxError> {
        let mut selected = Selection::new();
        let mut total = 0u64;

        if amount == 0 {
            return Ok((selected, total));
        }

        for (tx_hash, outputs) in &self.entries {
            for unspent in outputs {
                if !unspent.output.is_locked_to(owner) {
                    continue;
                }
                selected.entry(*tx_hash).or_default().push(unspent.index);
                total = total
                    .checked_add(unspent.output.value)
                    .ok_or(TxError::ValueOverflow)?;
                if total >= amount {
                    return Ok((selected, total));
                }
            }
        }

        Ok((Selection::new(), total))
    }

    /// Sum of every unspent output locked to `owner`, `None` on overflow
    pub fn balance_of(&self, owner: &KeyHash) -> Option<u64> {
        Self::checked_sum(self.outputs().filter(|output| output.is_locked_to(owner)))
    }

    /// Sum of every unspent output in the index, `None` on overflow
    pub fn total_value(&self) -> Option<u64> {
        Self::checked_sum(self.outputs())
    }

    fn checked_sum<'a>(mut outputs: impl Iterator<Item = &'a TxOutput>) -> Option<u64> {
        outputs.try_fold(0u64, |total, output| total.checked_add(output.value))
    }

    /// Number of transactions with at least one unspent output
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn output_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &[UnspentOutput])> {
        self.entries
            .iter()
            .map(|(hash, outputs)| (hash, outputs.as_slice()))
    }

    fn outputs(&self) -> impl Iterator<Item = &TxOutput> {
        self.entries
            .values()
            .flat_map(|outputs| outputs.iter().map(|unspent| &unspent.output))
    }

    /// Restore one entry read back from storage
    pub(crate) fn insert_entry(&mut self, tx_hash: Hash256, outputs: Vec<UnspentOutput>) {
        if !outputs.is_empty() {
            self.entries.insert(tx_hash, outputs);
        }
    }
}
