//! The protected-tx cache: a transient "dummy" cache of recently seen
//! top-block transactions, and the "protected" cache of transactions chosen
//! for possible resubmission, indexed by the UTXO they spend.
//!
//! Both containers maintain their own byte accounting (I3) incrementally.
//! `ProtectedCache` additionally owns I1/I2/I5: the only way to get a
//! transaction into `protected_cache` is through `admit`, which requires the
//! caller to have already checked `is_disjoint`, and the only way out is
//! `evict`, which always removes the txid from every index in lockstep.

use std::collections::{HashMap, HashSet};

use crate::types::{RawTx, Txid, Utxo};

/// Recently seen top-block transactions, kept in case they are later Removed
/// from the mempool — Remove events don't carry a tx body, so this is the
/// only place a body can be found at that point.
#[derive(Debug, Default)]
pub struct DummyCache {
    entries: HashMap<Txid, RawTx>,
    bytes: u64,
}

impl DummyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: RawTx) {
        self.bytes += tx.byte_size();
        self.entries.insert(tx.txid, tx);
    }

    pub fn get(&self, txid: &Txid) -> Option<&RawTx> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Checks I3 (P4) holds right now. Test/debug use only.
    pub fn check_invariants(&self) -> Result<(), String> {
        let expected: u64 = self.entries.values().map(RawTx::byte_size).sum();
        if expected != self.bytes {
            return Err(format!("dummy_bytes drifted: tracked {}, actual {}", self.bytes, expected));
        }
        Ok(())
    }
}

/// Transactions cached because they look worth resubmitting, keyed both by
/// their own txid and by the UTXO they spend.
#[derive(Debug, Default)]
pub struct ProtectedCache {
    entries: HashMap<Txid, RawTx>,
    bytes: u64,
    utxo_index: HashMap<Utxo, Txid>,
    cycled_input_set: HashSet<Utxo>,
}

impl ProtectedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, txid: &Txid) -> Option<&RawTx> {
        self.entries.get(txid)
    }

    /// The txid of the protected tx currently backing `utxo`, if any.
    pub fn txid_for_utxo(&self, utxo: &Utxo) -> Option<&Txid> {
        self.utxo_index.get(utxo)
    }

    pub fn covers_utxo(&self, utxo: &Utxo) -> bool {
        self.utxo_index.contains_key(utxo)
    }

    /// The tx currently backing `utxo`, resolved through both indexes. `None`
    /// only if `utxo_index` points at a txid not present in `entries`, which
    /// would be an invariant violation (I1) — it never happens if `admit`
    /// and `evict` are the only mutators.
    pub fn tx_for_utxo(&self, utxo: &Utxo) -> Option<&RawTx> {
        self.utxo_index.get(utxo).and_then(|txid| self.entries.get(txid))
    }

    /// I5: true if none of `tx`'s inputs is already spent by a protected tx.
    pub fn is_disjoint(&self, tx: &RawTx) -> bool {
        tx.inputs.iter().all(|u| !self.cycled_input_set.contains(u))
    }

    /// Admit `tx` as the protected defender of `utxo`. Callers must have
    /// already verified `is_disjoint(&tx)`; this is not re-checked here so
    /// that the refusal can be logged with context at the call site.
    ///
    /// A single multi-input transaction can back more than one UTXO (e.g. two
    /// of its inputs each independently crossed the threshold); only the
    /// first such admission should count its bytes and inputs, or I3/I5 drift.
    pub fn admit(&mut self, utxo: Utxo, tx: RawTx) {
        if !self.entries.contains_key(&tx.txid) {
            self.bytes += tx.byte_size();
            self.cycled_input_set.extend(tx.inputs.iter().copied());
            self.entries.insert(tx.txid, tx.clone());
        }
        self.utxo_index.insert(utxo, tx.txid);
    }

    /// Evict the protected tx currently backing `utxo`, if any, restoring
    /// I1-I3 for the removed entry. Returns the evicted tx.
    ///
    /// If another UTXO is still backed by the same txid (see `admit`), the
    /// shared entry itself, its bytes, and its cycled inputs stay put — only
    /// this UTXO's pointer into it is dropped.
    pub fn evict(&mut self, utxo: &Utxo) -> Option<RawTx> {
        let txid = self.utxo_index.remove(utxo)?;
        let still_referenced = self.utxo_index.values().any(|t| *t == txid);
        if still_referenced {
            return self.entries.get(&txid).cloned();
        }
        let tx = self.entries.remove(&txid)?;
        self.bytes -= tx.byte_size();
        for v in &tx.inputs {
            self.cycled_input_set.remove(v);
        }
        Some(tx)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.utxo_index.clear();
        self.cycled_input_set.clear();
        self.bytes = 0;
    }

    /// Checks I1-I3/I5 (P2/P3/P4/P6) hold right now. Intended for test and
    /// debug assertions, not the hot path — it's O(entries × avg inputs).
    pub fn check_invariants(&self) -> Result<(), String> {
        for txid in self.utxo_index.values() {
            if !self.entries.contains_key(txid) {
                return Err(format!("utxo_index references unknown txid {}", hex::encode(txid)));
            }
        }

        let mut expected_bytes = 0u64;
        let mut expected_inputs: HashSet<Utxo> = HashSet::new();
        for tx in self.entries.values() {
            expected_bytes += tx.byte_size();
            for utxo in &tx.inputs {
                if !expected_inputs.insert(*utxo) {
                    return Err(format!(
                        "two protected transactions share input {:?} (I5 violated)",
                        utxo
                    ));
                }
            }
        }

        if expected_bytes != self.bytes {
            return Err(format!("protected_bytes drifted: tracked {}, actual {}", self.bytes, expected_bytes));
        }
        if expected_inputs != self.cycled_input_set {
            return Err("cycled_input_set does not match the union of protected inputs".to_string());
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn cycled_input_set(&self) -> &HashSet<Utxo> {
        &self.cycled_input_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(txid: u8, inputs: &[Utxo]) -> RawTx {
        RawTx { txid: [txid; 32], hex: "ab".repeat(10), inputs: inputs.to_vec() }
    }

    #[test]
    fn dummy_cache_tracks_bytes_incrementally() {
        let mut cache = DummyCache::new();
        let a = tx(1, &[]);
        let a_size = a.byte_size();
        cache.insert(a);
        assert_eq!(cache.bytes(), a_size);
        cache.clear();
        assert_eq!(cache.bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn admit_and_evict_round_trip_bytes_and_input_set() {
        let u1 = Utxo::new([9u8; 32], 0);
        let p = tx(1, &[u1]);
        let size = p.byte_size();
        let mut cache = ProtectedCache::new();

        assert!(cache.is_disjoint(&p));
        cache.admit(u1, p.clone());
        assert_eq!(cache.bytes(), size);
        assert!(cache.covers_utxo(&u1));
        assert!(cache.cycled_input_set().contains(&u1));

        let evicted = cache.evict(&u1).unwrap();
        assert_eq!(evicted.txid, p.txid);
        assert_eq!(cache.bytes(), 0);
        assert!(!cache.covers_utxo(&u1));
        assert!(!cache.cycled_input_set().contains(&u1));
    }

    #[test]
    fn disjointness_refuses_overlapping_inputs() {
        let u1 = Utxo::new([1u8; 32], 0);
        let u2 = Utxo::new([2u8; 32], 0);
        let u3 = Utxo::new([3u8; 32], 0);
        let mut cache = ProtectedCache::new();
        cache.admit(u1, tx(1, &[u1, u2]));

        let candidate = tx(2, &[u3, u2]);
        assert!(!cache.is_disjoint(&candidate));
    }

    #[test]
    fn evicting_unknown_utxo_is_a_no_op() {
        let mut cache = ProtectedCache::new();
        assert!(cache.evict(&Utxo::new([1u8; 32], 0)).is_none());
    }

    #[test]
    fn admitting_same_tx_for_two_utxos_counts_bytes_once() {
        let u1 = Utxo::new([1u8; 32], 0);
        let u2 = Utxo::new([1u8; 32], 1);
        let p = tx(1, &[u1, u2]);
        let size = p.byte_size();
        let mut cache = ProtectedCache::new();

        cache.admit(u1, p.clone());
        cache.admit(u2, p.clone());

        assert_eq!(cache.bytes(), size);
        assert!(cache.covers_utxo(&u1));
        assert!(cache.covers_utxo(&u2));
        assert_eq!(cache.cycled_input_set().len(), 2);

        // Evicting one side still leaves the other pointing at a live entry.
        cache.evict(&u1);
        assert!(cache.get(&p.txid).is_some());
        assert!(cache.covers_utxo(&u2));
    }
}
