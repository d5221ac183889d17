//! Header-tree management.
//!
//! `HeaderChain` owns every header record the node has seen, linked into a
//! tree rooted at the injected genesis header. It tracks two chains over
//! that tree: the best *header* chain (highest cumulative work among valid
//! records, first-seen order breaking ties) and the best *content* chain
//! (the prefix whose bodies have been connected to the UTXO set). Header
//! membership is recomputed here; content membership only ever moves through
//! `extend_content` and `truncate_to`, driven by the inclusion controller.

use std::collections::HashMap;

use log::{debug, info};

use crate::error::ProtocolViolation;
use crate::header_rules;
use crate::params::NetworkParams;
use crate::pow::{block_work, U256};
use crate::types::{hex_id, BlockHeader, Hash};

/// One header plus everything derived from its position in the tree.
#[derive(Debug, Clone)]
pub struct HeaderRecord {
    pub header: BlockHeader,
    pub hash: Hash,
    pub height: u64,
    pub cumulative_work: U256,
    pub is_valid: bool,
    pub is_in_best_header_chain: bool,
    pub has_content: bool,
    pub is_in_best_content_chain: bool,
    /// First-seen sequence number; the replay-stable tie break.
    arrival: u64,
}

/// Outcome of submitting one header to [`HeaderChain::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderStatus {
    /// A new record was created and passed validation.
    Accepted,
    /// The header was already present; nothing changed.
    AlreadyKnown,
    /// The parent is unknown; resubmit after more headers arrive.
    NotYetLinkable,
    /// A record was created but marked invalid.
    Invalid(ProtocolViolation),
}

/// Contiguous read-only ancestor view. Offset 0 is the tip the view was
/// built from; each following record is its parent.
pub struct Subchain<'a> {
    records: Vec<&'a HeaderRecord>,
}

impl<'a> Subchain<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record `offset` parents above the tip (0 = tip).
    pub fn get_by_offset(&self, offset: usize) -> &HeaderRecord {
        self.records[offset]
    }

    pub fn get_by_height(&self, height: u64) -> Option<&HeaderRecord> {
        let tip_height = self.tip().height;
        if height > tip_height {
            return None;
        }
        self.records.get((tip_height - height) as usize).copied()
    }

    pub fn tip(&self) -> &HeaderRecord {
        self.records[0]
    }
}

/// The header tree plus both chain-membership markings.
pub struct HeaderChain {
    params: NetworkParams,
    records: HashMap<Hash, HeaderRecord>,
    children: HashMap<Hash, Vec<Hash>>,
    /// Best header chain ordered by height; index = height.
    best_chain: Vec<Hash>,
    genesis_hash: Hash,
    content_tip: Hash,
    next_arrival: u64,
}

impl HeaderChain {
    /// Create a chain anchored at the params' genesis header. Genesis is by
    /// definition valid, on both best chains and needs no body connected.
    pub fn new(params: NetworkParams) -> Self {
        let genesis = params.genesis;
        let genesis_hash = genesis.hash();
        let record = HeaderRecord {
            header: genesis,
            hash: genesis_hash,
            height: 0,
            cumulative_work: block_work(genesis.bits),
            is_valid: true,
            is_in_best_header_chain: true,
            has_content: true,
            is_in_best_content_chain: true,
            arrival: 0,
        };
        let mut records = HashMap::new();
        records.insert(genesis_hash, record);
        Self {
            params,
            records,
            children: HashMap::new(),
            best_chain: vec![genesis_hash],
            genesis_hash,
            content_tip: genesis_hash,
            next_arrival: 1,
        }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn genesis_hash(&self) -> &Hash {
        &self.genesis_hash
    }

    pub fn record(&self, hash: &Hash) -> Option<&HeaderRecord> {
        self.records.get(hash)
    }

    /// Valid record with the highest cumulative work.
    pub fn best_head(&self) -> &HeaderRecord {
        let hash = self.best_chain.last().unwrap_or(&self.genesis_hash);
        &self.records[hash]
    }

    /// Hash on the best header chain at `height`, if the chain reaches it.
    pub fn best_chain_hash_at(&self, height: u64) -> Option<&Hash> {
        self.best_chain.get(height as usize)
    }

    /// Tip of the best content chain.
    pub fn content_tip(&self) -> &HeaderRecord {
        &self.records[&self.content_tip]
    }

    /// Ingest a batch of headers in submission order. Each header gets its
    /// own status; records are created for everything linkable, including
    /// rule violators (inserted with `is_valid = false` so repeats are
    /// recognized instead of revalidated).
    pub fn add(&mut self, headers: &[BlockHeader], now: u32) -> Vec<HeaderStatus> {
        let mut statuses = Vec::with_capacity(headers.len());
        let mut best_dirty = false;

        for header in headers {
            let hash = header.hash();
            if self.records.contains_key(&hash) {
                statuses.push(HeaderStatus::AlreadyKnown);
                continue;
            }
            let (parent_height, parent_work, parent_valid) =
                match self.records.get(&header.prev_hash) {
                    Some(parent) => (parent.height, parent.cumulative_work, parent.is_valid),
                    None => {
                        debug!(
                            "header {} not linkable: unknown parent {}",
                            hex_id(&hash),
                            hex_id(&header.prev_hash)
                        );
                        statuses.push(HeaderStatus::NotYetLinkable);
                        continue;
                    }
                };

            let height = parent_height + 1;
            let cumulative_work = parent_work.add(&block_work(header.bits));

            let verdict = if parent_valid {
                let window = self.validation_window(height);
                let ancestors = self.subchain_up_to(&header.prev_hash, window);
                header_rules::validate_header(&self.params, header, &hash, height, &ancestors, now)
            } else {
                Err(ProtocolViolation::InvalidAncestor)
            };

            let is_valid = verdict.is_ok();
            let record = HeaderRecord {
                header: *header,
                hash,
                height,
                cumulative_work,
                is_valid,
                is_in_best_header_chain: false,
                has_content: false,
                is_in_best_content_chain: false,
                arrival: self.next_arrival,
            };
            self.next_arrival += 1;
            self.records.insert(hash, record);
            self.children.entry(header.prev_hash).or_default().push(hash);

            match verdict {
                Ok(()) => {
                    debug!("accepted header {} at height {}", hex_id(&hash), height);
                    best_dirty = true;
                    statuses.push(HeaderStatus::Accepted);
                }
                Err(violation) => {
                    info!(
                        "rejected header {} at height {}: {}",
                        hex_id(&hash),
                        height,
                        violation
                    );
                    statuses.push(HeaderStatus::Invalid(violation));
                }
            }
        }

        if best_dirty {
            self.update_best_chain();
        }
        statuses
    }

    /// Mark a record and all its descendants invalid, then re-elect the best
    /// head among the surviving valid branches. Validity only ever flips to
    /// false.
    pub fn mark_invalid(&mut self, hash: &Hash) {
        let mut pending = vec![*hash];
        let mut flipped = false;
        while let Some(current) = pending.pop() {
            if let Some(record) = self.records.get_mut(&current) {
                if record.is_valid {
                    record.is_valid = false;
                    flipped = true;
                    if let Some(children) = self.children.get(&current) {
                        pending.extend(children.iter().copied());
                    }
                }
            }
        }
        if flipped {
            info!("invalidated header {} and descendants", hex_id(hash));
            self.update_best_chain();
        }
    }

    /// Contiguous view of `length` records ending at `tip_hash` (inclusive).
    /// `None` when fewer exist.
    pub fn subchain(&self, tip_hash: &Hash, length: usize) -> Option<Subchain<'_>> {
        let view = self.subchain_up_to(tip_hash, length);
        if view.len() == length {
            Some(view)
        } else {
            None
        }
    }

    /// Record the arrival of a block body for a known header.
    pub fn set_content(&mut self, hash: &Hash) -> bool {
        match self.records.get_mut(hash) {
            Some(record) => {
                record.has_content = true;
                true
            }
            None => false,
        }
    }

    /// Advance the content chain by one block; `hash` must be the child of
    /// the current content tip on the best header chain.
    pub fn extend_content(&mut self, hash: &Hash) {
        debug_assert_eq!(
            self.records[hash].header.prev_hash, self.content_tip,
            "content chain must advance by exactly one block"
        );
        if let Some(record) = self.records.get_mut(hash) {
            record.is_in_best_content_chain = true;
            self.content_tip = *hash;
        }
    }

    /// Demote content-chain membership back to `target`, or to the deepest
    /// ancestor shared with the best header chain when `target` is unknown,
    /// invalid or not on the content chain. Returns the demoted hashes,
    /// tip-first, so the caller can unwind UTXO state in the same order.
    /// Header-side state is never touched here.
    pub fn truncate_to(&mut self, target: &Hash) -> Vec<Hash> {
        let target = match self.records.get(target) {
            Some(record) if record.is_valid && record.is_in_best_content_chain => *target,
            _ => self.common_content_ancestor(),
        };
        let mut demoted = Vec::new();
        let mut current = self.content_tip;
        while current != target {
            let Some(record) = self.records.get_mut(&current) else {
                break;
            };
            record.is_in_best_content_chain = false;
            demoted.push(current);
            current = record.header.prev_hash;
        }
        self.content_tip = target;
        if !demoted.is_empty() {
            info!(
                "content chain truncated to {} ({} blocks demoted)",
                hex_id(&target),
                demoted.len()
            );
        }
        demoted
    }

    /// Demote the content chain to the deepest record shared with the best
    /// header chain.
    pub fn truncate(&mut self) -> Vec<Hash> {
        let ancestor = self.common_content_ancestor();
        self.truncate_to(&ancestor)
    }

    /// Demote exactly the content tip, the inverse of `extend_content`.
    /// Returns the demoted hash, or `None` at genesis.
    pub fn retract_content(&mut self) -> Option<Hash> {
        let tip = self.content_tip;
        if tip == self.genesis_hash {
            return None;
        }
        let record = self.records.get_mut(&tip)?;
        record.is_in_best_content_chain = false;
        self.content_tip = record.header.prev_hash;
        Some(tip)
    }

    /// Deepest record that is valid and on both the best header chain and
    /// the best content chain. Genesis always qualifies.
    pub fn common_content_ancestor(&self) -> Hash {
        let mut current = self.content_tip;
        loop {
            let record = &self.records[&current];
            if record.is_valid && record.is_in_best_header_chain {
                return current;
            }
            current = record.header.prev_hash;
        }
    }

    fn validation_window(&self, height: u64) -> usize {
        if self.params.is_retarget_height(height) {
            // The retarget rule needs the whole window; the median rule
            // still wants its full span when the interval is shorter.
            (self.params.retarget_interval as usize).max(header_rules::MEDIAN_TIME_SPAN)
        } else {
            header_rules::MEDIAN_TIME_SPAN
        }
    }

    fn subchain_up_to(&self, tip_hash: &Hash, max_len: usize) -> Subchain<'_> {
        let mut records = Vec::with_capacity(max_len.min(64));
        let mut current = tip_hash;
        while records.len() < max_len {
            match self.records.get(current) {
                Some(record) => {
                    records.push(record);
                    if record.height == 0 {
                        break;
                    }
                    current = &record.header.prev_hash;
                }
                None => break,
            }
        }
        Subchain { records }
    }

    fn update_best_chain(&mut self) {
        let best = self.elect_best_hash();
        if self.best_chain.last() == Some(&best) {
            return;
        }

        for hash in &self.best_chain {
            if let Some(record) = self.records.get_mut(hash) {
                record.is_in_best_header_chain = false;
            }
        }

        let mut path = Vec::new();
        let mut current = best;
        loop {
            path.push(current);
            let record = &self.records[&current];
            if record.height == 0 {
                break;
            }
            current = record.header.prev_hash;
        }
        path.reverse();
        for hash in &path {
            if let Some(record) = self.records.get_mut(hash) {
                record.is_in_best_header_chain = true;
            }
        }

        let head = &self.records[&best];
        info!(
            "best header now {} at height {}",
            hex_id(&best),
            head.height
        );
        self.best_chain = path;
    }

    /// Maximum cumulative work among valid records; on equal work the
    /// earlier-seen record keeps the lead, so replays converge on the same
    /// head regardless of batching.
    fn elect_best_hash(&self) -> Hash {
        let mut best = &self.records[&self.genesis_hash];
        for record in self.records.values() {
            if !record.is_valid {
                continue;
            }
            if record.cumulative_work > best.cumulative_work
                || (record.cumulative_work == best.cumulative_work
                    && record.arrival < best.arrival)
            {
                best = record;
            }
        }
        best.hash
    }
}
