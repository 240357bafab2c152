//! The cycle-detection state engine: the per-event state machine described
//! in §4 of the design. `CycleEngine` owns every piece of state exclusively
//! (§5 — single-threaded cooperative, no sharing) and is driven one event at
//! a time by `handle_event`, or continuously by `run`.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::cache::{DummyCache, ProtectedCache};
use crate::config::EngineConfig;
use crate::cycle_counter::CycleCounter;
use crate::dispatcher;
use crate::doublespend::DoublespendTracker;
use crate::error::EventSourceError;
use crate::events::{EventSource, Label, MempoolEvent};
use crate::feerate::{is_top_block, FeeRate};
use crate::rpc::{FeeOracle, NodeClient};
use crate::types::{RawTx, Txid, Utxo};

/// Log a cache/bytes/rate summary every this many processed events.
const STATS_LOG_INTERVAL: u64 = 100;

pub struct CycleEngine {
    dummy: DummyCache,
    protected: ProtectedCache,
    doublespent: DoublespendTracker,
    cycle_counts: CycleCounter,
    topblock_rate: FeeRate,
    config: EngineConfig,
    events_processed: u64,
    last_sequence: HashMap<String, u32>,
}

impl CycleEngine {
    pub fn new(config: EngineConfig, topblock_rate: FeeRate) -> Self {
        CycleEngine {
            dummy: DummyCache::new(),
            protected: ProtectedCache::new(),
            doublespent: DoublespendTracker::new(),
            cycle_counts: CycleCounter::new(),
            topblock_rate,
            config,
            events_processed: 0,
            last_sequence: HashMap::new(),
        }
    }

    pub fn protected_len(&self) -> usize {
        self.protected.len()
    }

    pub fn dummy_len(&self) -> usize {
        self.dummy.len()
    }

    pub fn cycle_count(&self, utxo: &Utxo) -> u32 {
        self.cycle_counts.get(utxo)
    }

    pub fn protected_tx(&self, txid: &Txid) -> Option<&RawTx> {
        self.protected.get(txid)
    }

    pub fn utxo_backed_by(&self, utxo: &Utxo) -> Option<&Txid> {
        self.protected.txid_for_utxo(utxo)
    }

    /// Checks the universal invariants P2-P4/P6 against the current state,
    /// plus P5 against the caller's claim about where in the event cycle we
    /// are. Panics with a descriptive message on the first violation found;
    /// intended for test harnesses, not the hot path.
    pub fn assert_invariants(&self, just_finished_add: bool) {
        if let Err(e) = self.protected.check_invariants() {
            panic!("protected cache invariant violated: {e}");
        }
        if let Err(e) = self.dummy.check_invariants() {
            panic!("dummy cache invariant violated: {e}");
        }
        if just_finished_add && !self.doublespent.is_empty() {
            panic!("P5 violated: utxos_being_doublespent non-empty after an Add event completed");
        }
    }

    /// Drive the engine forever from `events`, dispatching RPC calls against
    /// `node` and refreshing the threshold from `fee_oracle` on block-tip
    /// events. Returns only when the event source is permanently closed or
    /// hands back a malformed frame.
    pub async fn run(
        &mut self,
        events: &mut dyn EventSource,
        node: &dyn NodeClient,
        fee_oracle: &dyn FeeOracle,
    ) -> Result<(), EventSourceError> {
        loop {
            let event = events.recv().await?;
            self.handle_event(event, node, fee_oracle).await;
        }
    }

    pub async fn handle_event(
        &mut self,
        event: MempoolEvent,
        node: &dyn NodeClient,
        fee_oracle: &dyn FeeOracle,
    ) {
        self.events_processed += 1;
        self.note_sequence(&event);

        if self.events_processed % STATS_LOG_INTERVAL == 0 {
            self.log_stats();
        }

        match event.label {
            Label::Add => self.handle_add(event.txid, node).await,
            Label::Remove => self.handle_remove(event.txid),
            Label::BlockConnected | Label::BlockDisconnected => {
                self.handle_epoch(fee_oracle).await
            }
            Label::Other(_) => {}
        }
    }

    fn note_sequence(&mut self, event: &MempoolEvent) {
        if let Some(&last) = self.last_sequence.get(&event.topic) {
            let expected = last.wrapping_add(1);
            if event.sequence != expected {
                warn!(
                    topic = %event.topic,
                    expected,
                    got = event.sequence,
                    "sequence gap on event topic"
                );
            }
        }
        self.last_sequence.insert(event.topic.clone(), event.sequence);
    }

    fn log_stats(&self) {
        info!(
            events_processed = self.events_processed,
            dummy_cache_len = self.dummy.len(),
            dummy_bytes = self.dummy.bytes(),
            protected_cache_len = self.protected.len(),
            protected_bytes = self.protected.bytes(),
            "engine stats"
        );
    }

    /// §4.3: populate `utxos_being_doublespent` from a Remove of a
    /// previously-cached top-block tx. Ignored if the removed tx was never
    /// top-block (never entered `dummy_cache`).
    fn handle_remove(&mut self, txid: Txid) {
        let Some(replaced) = self.dummy.get(&txid) else {
            return;
        };
        debug!(txid = %hex::encode(txid), "tx removed; tracking its inputs as doublespent");
        self.doublespent.record(replaced);
    }

    /// §4.2/§4.4-§4.8/§4.11: handle an Add event end to end.
    async fn handle_add(&mut self, txid: Txid, node: &dyn NodeClient) {
        let entry = match node.get_mempool_entry(&txid).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(txid = %hex::encode(txid), "mempool entry missing on Add; dropping");
                self.doublespent.clear();
                return;
            }
            Err(e) => {
                warn!(txid = %hex::encode(txid), error = %e, "get_mempool_entry failed; dropping event");
                self.doublespent.clear();
                return;
            }
        };

        if is_top_block(&entry, self.topblock_rate, self.config.package_mode) {
            match node.get_raw_transaction(&txid).await {
                Ok(Some(raw_tx)) => {
                    self.dummy.insert(raw_tx.clone());
                    self.classify_inputs(&raw_tx);
                }
                Ok(None) => {
                    debug!(txid = %hex::encode(txid), "raw tx missing on Add; dropping");
                    self.doublespent.clear();
                    return;
                }
                Err(e) => {
                    warn!(txid = %hex::encode(txid), error = %e, "get_raw_transaction failed; dropping event");
                    self.doublespent.clear();
                    return;
                }
            }
        }

        self.handle_top_to_bottom(node).await;
        // §4.3/§4.11: unconditional, whether or not this Add matched anything (P5).
        self.doublespent.clear();
    }

    /// §4.5: per-input transition classification against the incoming
    /// top-block tx's own inputs.
    fn classify_inputs(&mut self, raw_tx: &RawTx) {
        for utxo in &raw_tx.inputs {
            let replaced_txid = self.doublespent.replaced_txid(utxo).copied();
            let currently_protected = self.protected.covers_utxo(utxo);

            match (replaced_txid, currently_protected) {
                (None, true) => self.evict_bottom_to_top(utxo),
                (Some(replaced_txid), false) => {
                    self.doublespent.remove(utxo);
                    self.try_admit(*utxo, replaced_txid);
                }
                (Some(_), true) => {
                    // Already protected; just drain the doublespent entry.
                    self.doublespent.remove(utxo);
                }
                (None, false) => {}
            }
        }
    }

    /// §4.6: `utxo` has been re-spent by a new top-block tx; surrender the
    /// cached defender for it.
    fn evict_bottom_to_top(&mut self, utxo: &Utxo) {
        if let Some(evicted) = self.protected.evict(utxo) {
            info!(
                utxo = ?utxo,
                evicted_txid = %hex::encode(evicted.txid),
                "Bottom->Top: utxo re-spent by top-block tx, surrendering cached defender"
            );
        }
    }

    /// §4.7 (and its reuse from the Top->Bottom path, §4.8/§9): cache the tx
    /// that `utxo`'s top-block spend replaced, if the cycle threshold has
    /// been met and admission doesn't violate disjointness (I5).
    fn try_admit(&mut self, utxo: Utxo, replaced_txid: Txid) {
        if self.cycle_counts.get(&utxo) < self.config.cycle_thresh {
            return;
        }
        let Some(replaced) = self.dummy.get(&replaced_txid).cloned() else {
            return;
        };
        // `replaced` may already be protected under a different one of its own
        // inputs (a multi-input tx defending two separately-cycling UTXOs);
        // that isn't an overlap with another transaction, so the disjointness
        // check only applies to a tx not yet admitted at all.
        let already_admitted = self.protected.get(&replaced_txid).is_some();
        if !already_admitted && !self.protected.is_disjoint(&replaced) {
            debug!(
                utxo = ?utxo,
                replaced_txid = %hex::encode(replaced_txid),
                "refusing admission: inputs overlap an already-protected transaction"
            );
            return;
        }
        info!(
            utxo = ?utxo,
            replaced_txid = %hex::encode(replaced_txid),
            "caching replaced transaction for possible resubmission"
        );
        self.protected.admit(utxo, replaced);
    }

    /// §4.8: UTXOs left in `utxos_being_doublespent` after §4.5 were not
    /// respent by a top-block tx — Top->Bottom. Per the source this is also
    /// where a first-time admission can happen for a UTXO that went straight
    /// from a top-block spend to a below-top one without an intervening
    /// Top->Top replacement.
    async fn handle_top_to_bottom(&mut self, node: &dyn NodeClient) {
        let pending: Vec<(Utxo, Txid)> =
            self.doublespent.iter().map(|(u, t)| (*u, *t)).collect();

        for (utxo, replaced_txid) in pending {
            // Only meaningful if we still hold the replaced tx's body.
            if self.dummy.get(&replaced_txid).is_none() {
                continue;
            }
            let count = self.cycle_counts.increment(utxo);
            info!(utxo = ?utxo, count, "Top->Bottom: utxo cycled");

            if count >= self.config.cycle_thresh && !self.protected.covers_utxo(&utxo) {
                self.try_admit(utxo, replaced_txid);
            }

            if let Some(tx) = self.protected.tx_for_utxo(&utxo).cloned() {
                dispatcher::resubmit(node, &tx).await;
            }
        }
    }

    /// §4.10: on a block-tip event, wipe state if over budget, then always
    /// refresh the threshold.
    async fn handle_epoch(&mut self, fee_oracle: &dyn FeeOracle) {
        if self.protected.bytes() > self.config.cache_byte_budget
            || self.dummy.bytes() >= self.config.cache_byte_budget
        {
            info!(
                protected_bytes = self.protected.bytes(),
                dummy_bytes = self.dummy.bytes(),
                budget = self.config.cache_byte_budget,
                "cache byte budget exceeded; wiping engine state"
            );
            self.dummy.clear();
            self.protected.clear();
            self.doublespent.clear();
            self.cycle_counts.clear();
        }

        match fee_oracle.topblock_rate().await {
            Ok(rate) => self.topblock_rate = rate,
            Err(e) => warn!(error = %e, "failed to refresh top-block rate; keeping previous value"),
        }
    }
}

#[cfg(test)]
mod test_support {
    //! In-memory fakes for `NodeClient`/`EventSource`/`FeeOracle`, used by
    //! this module's own unit tests. The integration scenarios in
    //! `tests/engine_scenarios.rs` define their own copies, since a
    //! `#[cfg(test)]` item in this crate isn't visible to external test
    //! binaries linking against the normal (non-test) build of the library.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{EventSourceError, RpcError};
    use crate::events::{EventSource, MempoolEvent};
    use crate::feerate::FeeRate;
    use crate::rpc::{FeeOracle, NodeClient};
    use crate::types::{MempoolEntry, RawTx, Txid};

    #[derive(Default)]
    pub struct FakeNode {
        pub entries: Mutex<HashMap<Txid, MempoolEntry>>,
        pub raw_txs: Mutex<HashMap<Txid, RawTx>>,
        pub sent: Mutex<Vec<Txid>>,
    }

    impl FakeNode {
        pub fn with_tx(self, tx: RawTx, entry: MempoolEntry) -> Self {
            self.entries.lock().unwrap().insert(tx.txid, entry);
            self.raw_txs.lock().unwrap().insert(tx.txid, tx);
            self
        }

        pub fn sent_txids(&self) -> Vec<Txid> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeClient for FakeNode {
        async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<RawTx>, RpcError> {
            Ok(self.raw_txs.lock().unwrap().get(txid).cloned())
        }

        async fn get_mempool_entry(&self, txid: &Txid) -> Result<Option<MempoolEntry>, RpcError> {
            Ok(self.entries.lock().unwrap().get(txid).copied())
        }

        async fn send_raw_transaction(&self, tx: &RawTx) -> Result<(), RpcError> {
            self.sent.lock().unwrap().push(tx.txid);
            Ok(())
        }
    }

    pub struct FixedFeeOracle(pub FeeRate);

    #[async_trait]
    impl FeeOracle for FixedFeeOracle {
        async fn topblock_rate(&self) -> Result<FeeRate, RpcError> {
            Ok(self.0)
        }
    }

    pub struct FakeEventSource {
        pub events: std::collections::VecDeque<MempoolEvent>,
    }

    impl FakeEventSource {
        pub fn new(events: Vec<MempoolEvent>) -> Self {
            FakeEventSource { events: events.into() }
        }
    }

    #[async_trait]
    impl EventSource for FakeEventSource {
        async fn recv(&mut self) -> Result<MempoolEvent, EventSourceError> {
            self.events.pop_front().ok_or(EventSourceError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeEventSource, FakeNode, FixedFeeOracle};
    use super::*;
    use crate::events::MempoolEvent;

    fn add_event(seq: u32, txid: Txid) -> MempoolEvent {
        let mut body = [0u8; 33];
        body[..32].copy_from_slice(&txid);
        body[32] = b'A';
        MempoolEvent::parse(b"rawtx", &body, &seq.to_le_bytes()).unwrap()
    }

    fn remove_event(seq: u32, txid: Txid) -> MempoolEvent {
        let mut body = [0u8; 33];
        body[..32].copy_from_slice(&txid);
        body[32] = b'R';
        MempoolEvent::parse(b"rawtx", &body, &seq.to_le_bytes()).unwrap()
    }

    fn tx(id: u8, inputs: &[Utxo]) -> RawTx {
        RawTx { txid: [id; 32], hex: "ab".repeat(100), inputs: inputs.to_vec() }
    }

    fn threshold() -> FeeRate {
        FeeRate::from_sat_per_kvb(50_000)
    }

    fn top_entry() -> crate::types::MempoolEntry {
        crate::types::MempoolEntry { ancestor_count: 1, ancestor_size_vb: 200, ancestor_fees_sat: 20_000 }
    }

    fn bottom_entry() -> crate::types::MempoolEntry {
        crate::types::MempoolEntry { ancestor_count: 1, ancestor_size_vb: 200, ancestor_fees_sat: 200 }
    }

    #[tokio::test]
    async fn add_of_unknown_entry_is_ignored() {
        let node = FakeNode::default();
        let mut engine = CycleEngine::new(EngineConfig::new(1_000_000), threshold());
        let oracle = FixedFeeOracle(threshold());

        engine.handle_event(add_event(0, [1u8; 32]), &node, &oracle).await;
        assert_eq!(engine.dummy_len(), 0);
    }

    #[tokio::test]
    async fn top_to_bottom_caches_and_resubmits_defender() {
        let watched = Utxo::new([1u8; 32], 0);
        let defender = tx(1, &[watched]);
        let replacement = tx(2, &[watched]);

        let node = FakeNode::default()
            .with_tx(defender.clone(), top_entry())
            .with_tx(replacement.clone(), bottom_entry());
        let mut engine = CycleEngine::new(EngineConfig::new(1_000_000), threshold());
        let oracle = FixedFeeOracle(threshold());

        engine.handle_event(add_event(0, defender.txid), &node, &oracle).await;
        engine.handle_event(remove_event(1, defender.txid), &node, &oracle).await;
        engine.handle_event(add_event(2, replacement.txid), &node, &oracle).await;

        assert_eq!(engine.cycle_count(&watched), 1);
        assert_eq!(engine.utxo_backed_by(&watched), Some(&defender.txid));
        assert_eq!(node.sent_txids(), vec![defender.txid]);
    }

    #[tokio::test]
    async fn run_stops_when_event_source_closes() {
        let node = FakeNode::default();
        let oracle = FixedFeeOracle(threshold());
        let mut engine = CycleEngine::new(EngineConfig::new(1_000_000), threshold());
        let mut events = FakeEventSource::new(vec![]);

        let result = engine.run(&mut events, &node, &oracle).await;
        assert!(matches!(result, Err(EventSourceError::Closed)));
    }
}
