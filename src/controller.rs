//! Block inclusion and reversion.
//!
//! `ConsensusController` is the only writer of chain state. It watches for
//! the content chain falling off the best header chain (revert) or lagging
//! behind it (include), and moves the content tip one block per step so a
//! late-discovered invalid block costs at most the work already committed
//! for its ancestors. All mutation happens inside a single mutex; readers
//! take short locks against fully applied state only.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::chain::{HeaderChain, HeaderStatus};
use crate::content_rules;
use crate::error::{ChainError, Result};
use crate::events::{ChainEvent, EventBus};
use crate::outputs::{self, BlockUndo, UnspentOutput, UpdatableOutputSet};
use crate::params::NetworkParams;
use crate::processor;
use crate::types::{hex_id, Block, BlockHeader, Hash, OutPoint};

/// Safety-net wakeup interval for the worker, in case a signal is missed.
const WORKER_TIMEOUT: Duration = Duration::from_millis(500);

enum Signal {
    StateChanged,
    Shutdown,
}

/// Everything behind the single-writer lock.
struct ChainState<S> {
    chain: HeaderChain,
    outputs: S,
    /// Bodies received but not yet connected, keyed by header hash.
    bodies: HashMap<Hash, Block>,
    /// Undo data for every connected block, bottom-most first.
    undo_stack: Vec<(Hash, BlockUndo)>,
}

/// Drives the content chain after the header chain, one block at a time.
pub struct ConsensusController<S> {
    state: Arc<Mutex<ChainState<S>>>,
    events: Arc<EventBus>,
    signals: Sender<Signal>,
    signal_sink: Mutex<Option<Receiver<Signal>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: UpdatableOutputSet<UnspentOutput> + Send + 'static> ConsensusController<S> {
    /// Build a controller over an empty chain anchored at the params'
    /// genesis. No worker runs yet; either call [`start`](Self::start) or
    /// drive [`advance_once`](Self::advance_once) directly.
    pub fn new(params: NetworkParams, outputs: S) -> Self {
        let (signals, receiver) = channel();
        Self {
            state: Arc::new(Mutex::new(ChainState {
                chain: HeaderChain::new(params),
                outputs,
                bodies: HashMap::new(),
                undo_stack: Vec::new(),
            })),
            events: Arc::new(EventBus::new()),
            signals,
            signal_sink: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. The worker wakes on every state change and
    /// on a bounded timeout, then steps until idle.
    pub fn start(&self) {
        let receiver = match self.signal_sink.lock().take() {
            Some(receiver) => receiver,
            None => return,
        };
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        let handle = thread::spawn(move || loop {
            match receiver.recv_timeout(WORKER_TIMEOUT) {
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Signal::StateChanged) | Err(RecvTimeoutError::Timeout) => {}
            }
            loop {
                match Self::step(&state, &events) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        // State is unchanged; the next wakeup retries.
                        error!("chain step failed: {}", err);
                        break;
                    }
                }
            }
        });
        *self.worker.lock() = Some(handle);
    }

    /// Stop the worker after its in-flight step completes.
    pub fn shutdown(&self) {
        let _ = self.signals.send(Signal::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Subscribe to chain events published from this point on.
    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Ingest headers in submission order. Statuses mirror
    /// [`HeaderChain::add`]; a changed best header is announced once.
    pub fn add_headers(&self, headers: &[BlockHeader], now: u32) -> Vec<HeaderStatus> {
        let statuses = {
            let mut state = self.state.lock();
            let before = state.chain.best_head().hash;
            let statuses = state.chain.add(headers, now);
            let head = state.chain.best_head();
            if head.hash != before {
                self.events.publish(ChainEvent::BestHeaderChanged {
                    hash: head.hash,
                    height: head.height,
                });
            }
            statuses
        };
        if statuses
            .iter()
            .any(|status| *status == HeaderStatus::Accepted)
        {
            let _ = self.signals.send(Signal::StateChanged);
        }
        statuses
    }

    /// Attach a block body to its known header. Returns false (and drops
    /// the body) when the header has never been linked.
    pub fn add_block_content(&self, block: Block) -> bool {
        let hash = block.header.hash();
        let stored = {
            let mut state = self.state.lock();
            if state.chain.set_content(&hash) {
                state.bodies.insert(hash, block);
                true
            } else {
                debug!("dropping body for unknown header {}", hex_id(&hash));
                false
            }
        };
        if stored {
            let _ = self.signals.send(Signal::StateChanged);
        }
        stored
    }

    /// Best header tip as `(hash, height)`.
    pub fn best_header(&self) -> (Hash, u64) {
        let state = self.state.lock();
        let head = state.chain.best_head();
        (head.hash, head.height)
    }

    /// Content tip as `(hash, height)`.
    pub fn content_tip(&self) -> (Hash, u64) {
        let state = self.state.lock();
        let tip = state.chain.content_tip();
        (tip.hash, tip.height)
    }

    /// Read one live output from the applied state.
    pub fn find_output(&self, outpoint: &OutPoint) -> Result<Option<UnspentOutput>> {
        self.state.lock().outputs.find(outpoint)
    }

    /// Run one scheduling unit: either revert the content chain to the
    /// best header chain, or connect the single next ready block. Returns
    /// whether anything changed; callers loop while it does.
    pub fn advance_once(&self) -> Result<bool> {
        Self::step(&self.state, &self.events)
    }

    fn step(state: &Mutex<ChainState<S>>, events: &EventBus) -> Result<bool> {
        let mut state = state.lock();

        let tip = state.chain.content_tip();
        if !tip.is_valid || !tip.is_in_best_header_chain {
            return Self::revert_to_best_chain(&mut state, events);
        }
        let tip_height = tip.height;

        let next_hash = match state.chain.best_chain_hash_at(tip_height + 1) {
            Some(hash) => *hash,
            None => return Ok(false),
        };
        let ready = state
            .chain
            .record(&next_hash)
            .map(|record| record.has_content)
            .unwrap_or(false);
        if !ready || !state.bodies.contains_key(&next_hash) {
            return Ok(false);
        }
        Self::include_block(&mut state, events, next_hash, tip_height + 1)
    }

    /// The content chain was built on a branch the header side abandoned:
    /// unwind to the deepest ancestor shared with the best header chain.
    /// Each block's outputs are reverted before its membership flag and undo
    /// entry go, so a storage failure mid-reorg leaves the content tip, the
    /// undo stack and the store agreeing on the blocks still applied.
    fn revert_to_best_chain(state: &mut ChainState<S>, events: &EventBus) -> Result<bool> {
        let target = state.chain.common_content_ancestor();
        let mut reverted = 0usize;
        let outcome = loop {
            let tip_hash = state.chain.content_tip().hash;
            if tip_hash == target {
                break Ok(());
            }
            let undo = match state.undo_stack.last() {
                Some((undone, undo)) if *undone == tip_hash => undo,
                _ => {
                    break Err(ChainError::Storage(format!(
                        "undo data out of step with content chain at {}",
                        hex_id(&tip_hash)
                    )))
                }
            };
            if let Err(err) = outputs::revert(&mut state.outputs, undo) {
                break Err(err);
            }
            state.undo_stack.pop();
            state.chain.retract_content();
            reverted += 1;
        };
        if reverted > 0 {
            let tip = state.chain.content_tip();
            info!(
                "reverted {} blocks, content tip now {} at height {}",
                reverted,
                hex_id(&tip.hash),
                tip.height
            );
            events.publish(ChainEvent::BestContentChanged {
                hash: tip.hash,
                height: tip.height,
            });
        }
        outcome.map(|()| reverted > 0)
    }

    /// Validate and connect exactly one block. A protocol violation marks
    /// the header invalid and still counts as progress, since the header
    /// chain re-elects and the next step re-evaluates.
    fn include_block(
        state: &mut ChainState<S>,
        events: &EventBus,
        hash: Hash,
        height: u64,
    ) -> Result<bool> {
        let verdict = {
            let block = match state.bodies.get(&hash) {
                Some(block) => block,
                None => return Ok(false),
            };
            content_rules::validate_block_content(block)
                .map_err(ChainError::from)
                .and_then(|()| {
                    processor::update_outputs(state.chain.params(), &state.outputs, height, block)
                })
        };

        match verdict {
            Ok(delta) => {
                let undo = delta.apply(&mut state.outputs)?;
                state.undo_stack.push((hash, undo));
                state.chain.extend_content(&hash);
                debug!("connected block {} at height {}", hex_id(&hash), height);
                events.publish(ChainEvent::BestContentChanged { hash, height });
                Ok(true)
            }
            Err(ChainError::Protocol(violation)) => {
                warn!(
                    "block {} at height {} violates consensus: {}",
                    hex_id(&hash),
                    height,
                    violation
                );
                let before = state.chain.best_head().hash;
                state.chain.mark_invalid(&hash);
                state.bodies.remove(&hash);
                let head = state.chain.best_head();
                if head.hash != before {
                    events.publish(ChainEvent::BestHeaderChanged {
                        hash: head.hash,
                        height: head.height,
                    });
                }
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

impl<S> Drop for ConsensusController<S> {
    fn drop(&mut self) {
        let _ = self.signals.send(Signal::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
