//! Unspent-output storage contract and the in-memory buffering used to make
//! block application atomic.
//!
//! `UpdatableOutputSet` is the persistence seam: any key-indexed store can
//! implement it. The processor never mutates a store directly; it works
//! against an [`OutputsOverlay`] and the controller commits the overlay only
//! after the whole block validated, collecting a [`BlockUndo`] for exact
//! reversion during reorgs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::types::{Hash, OutPoint};

/// One spendable output, keyed by `(tx_hash, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub tx_hash: Hash,
    pub index: u32,
    /// Height of the block that created the output.
    pub height: u64,
    pub value: u64,
    pub pubkey_script: Vec<u8>,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.index)
    }
}

/// Storage contract for a set of live outputs. Parameterized over the entry
/// type so a wallet-local set can reuse the same block-application code with
/// its own annotated entries.
pub trait UpdatableOutputSet<T> {
    /// Look up a single live entry.
    fn find(&self, outpoint: &OutPoint) -> Result<Option<T>>;

    /// Every live entry created by `tx_hash`.
    fn find_by_tx(&self, tx_hash: &Hash) -> Result<Vec<T>>;

    /// Register a new live entry. The key must not already be live.
    fn create(&mut self, output: T) -> Result<()>;

    /// Remove and return a live entry, `None` when the key is not live.
    fn spend(&mut self, outpoint: &OutPoint) -> Result<Option<T>>;
}

/// Hash-map backed output set.
#[derive(Debug, Default)]
pub struct MemoryOutputSet {
    entries: HashMap<OutPoint, UnspentOutput>,
}

impl MemoryOutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UpdatableOutputSet<UnspentOutput> for MemoryOutputSet {
    fn find(&self, outpoint: &OutPoint) -> Result<Option<UnspentOutput>> {
        Ok(self.entries.get(outpoint).cloned())
    }

    fn find_by_tx(&self, tx_hash: &Hash) -> Result<Vec<UnspentOutput>> {
        Ok(self
            .entries
            .values()
            .filter(|output| output.tx_hash == *tx_hash)
            .cloned()
            .collect())
    }

    fn create(&mut self, output: UnspentOutput) -> Result<()> {
        let key = output.outpoint();
        if self.entries.contains_key(&key) {
            return Err(ChainError::Storage(format!(
                "output {}:{} was already live",
                crate::types::hex_id(&key.tx_hash),
                key.index
            )));
        }
        self.entries.insert(key, output);
        Ok(())
    }

    fn spend(&mut self, outpoint: &OutPoint) -> Result<Option<UnspentOutput>> {
        Ok(self.entries.remove(outpoint))
    }
}

/// Everything needed to undo one committed block: outpoints it created and
/// the full entries it consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockUndo {
    pub created: Vec<OutPoint>,
    pub spent: Vec<UnspentOutput>,
}

/// Copy-on-write view over a base set. Creations and spends accumulate in
/// memory; the base is untouched until the detached [`OutputsDelta`] is
/// applied. Dropping the overlay discards the half-built delta, which is how
/// a failed block leaves no trace.
pub struct OutputsOverlay<'a, S> {
    base: &'a S,
    created: HashMap<OutPoint, UnspentOutput>,
    created_order: Vec<OutPoint>,
    spent_from_base: HashMap<OutPoint, UnspentOutput>,
    spent_order: Vec<OutPoint>,
}

impl<'a, S: UpdatableOutputSet<UnspentOutput>> OutputsOverlay<'a, S> {
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            created: HashMap::new(),
            created_order: Vec::new(),
            spent_from_base: HashMap::new(),
            spent_order: Vec::new(),
        }
    }

    /// Detach the buffered changes so they can be applied once the borrow
    /// on the base set is released.
    pub fn into_delta(mut self) -> OutputsDelta {
        let created = self
            .created_order
            .drain(..)
            .filter_map(|outpoint| self.created.remove(&outpoint))
            .collect();
        OutputsDelta {
            created,
            spent: self.spent_order,
        }
    }
}

/// The net effect of one block, detached from any borrow.
#[derive(Debug, Clone, Default)]
pub struct OutputsDelta {
    created: Vec<UnspentOutput>,
    spent: Vec<OutPoint>,
}

impl OutputsDelta {
    /// Replay the delta onto a base set, returning the undo data in commit
    /// order. On a storage failure the partially applied work is rolled
    /// back before the error surfaces, so the base is left as it was.
    pub fn apply<S: UpdatableOutputSet<UnspentOutput>>(self, base: &mut S) -> Result<BlockUndo> {
        let created: Vec<OutPoint> = self.created.iter().map(|output| output.outpoint()).collect();
        let spent = transfer(base, &self.spent, &self.created)?;
        Ok(BlockUndo { created, spent })
    }
}

/// Spend `spends` then install `creates` as one unit: if any call fails,
/// everything already done is undone before the error is returned, leaving
/// the base in its pre-call state. Returns the consumed entries.
fn transfer<S: UpdatableOutputSet<UnspentOutput>>(
    base: &mut S,
    spends: &[OutPoint],
    creates: &[UnspentOutput],
) -> Result<Vec<UnspentOutput>> {
    let mut consumed = Vec::with_capacity(spends.len());
    let mut installed = 0;
    let mut failure = None;

    for outpoint in spends {
        match base.spend(outpoint) {
            Ok(Some(output)) => consumed.push(output),
            Ok(None) => {
                failure = Some(ChainError::Storage(format!(
                    "output {}:{} vanished mid-update",
                    crate::types::hex_id(&outpoint.tx_hash),
                    outpoint.index
                )));
                break;
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    if failure.is_none() {
        for output in creates {
            match base.create(output.clone()) {
                Ok(()) => installed += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
    }

    match failure {
        None => Ok(consumed),
        Some(err) => {
            for output in creates.iter().take(installed) {
                base.spend(&output.outpoint())?;
            }
            for output in consumed {
                base.create(output)?;
            }
            Err(err)
        }
    }
}

impl<'a, S: UpdatableOutputSet<UnspentOutput>> UpdatableOutputSet<UnspentOutput>
    for OutputsOverlay<'a, S>
{
    fn find(&self, outpoint: &OutPoint) -> Result<Option<UnspentOutput>> {
        // A creation wins over a spend of the same key: spending a base
        // entry and re-creating under its outpoint leaves the new entry live.
        if let Some(output) = self.created.get(outpoint) {
            return Ok(Some(output.clone()));
        }
        if self.spent_from_base.contains_key(outpoint) {
            return Ok(None);
        }
        self.base.find(outpoint)
    }

    fn find_by_tx(&self, tx_hash: &Hash) -> Result<Vec<UnspentOutput>> {
        let mut outputs: Vec<UnspentOutput> = self
            .base
            .find_by_tx(tx_hash)?
            .into_iter()
            .filter(|output| !self.spent_from_base.contains_key(&output.outpoint()))
            .collect();
        outputs.extend(
            self.created
                .values()
                .filter(|output| output.tx_hash == *tx_hash)
                .cloned(),
        );
        Ok(outputs)
    }

    fn create(&mut self, output: UnspentOutput) -> Result<()> {
        let key = output.outpoint();
        self.created_order.push(key);
        self.created.insert(key, output);
        Ok(())
    }

    fn spend(&mut self, outpoint: &OutPoint) -> Result<Option<UnspentOutput>> {
        // A same-block output never reaches the base set at all.
        if let Some(output) = self.created.remove(outpoint) {
            self.created_order.retain(|key| key != outpoint);
            return Ok(Some(output));
        }
        if self.spent_from_base.contains_key(outpoint) {
            return Ok(None);
        }
        match self.base.find(outpoint)? {
            Some(output) => {
                self.spent_from_base.insert(*outpoint, output.clone());
                self.spent_order.push(*outpoint);
                Ok(Some(output))
            }
            None => Ok(None),
        }
    }
}

/// Inverse of a committed block: spend what it created, restore what it
/// consumed. On a storage failure the partially reverted work is re-applied
/// before the error surfaces, so the base stays on the block's post-commit
/// state and the undo data remains usable for a retry.
pub fn revert<S: UpdatableOutputSet<UnspentOutput>>(base: &mut S, undo: &BlockUndo) -> Result<()> {
    let spends: Vec<OutPoint> = undo.created.iter().rev().copied().collect();
    transfer(base, &spends, &undo.spent).map(|_| ())
}
