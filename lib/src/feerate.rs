//! Exact feerate arithmetic. Adversarial transactions are constructed to sit
//! exactly on the top-block threshold, so every comparison here is done by
//! cross-multiplying integer fractions — never by converting to a float.

use crate::types::MempoolEntry;

/// A feerate expressed as an exact fraction (numerator over denominator),
/// conventionally in satoshis per thousand vbytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRate {
    numer: u128,
    denom: u128,
}

impl FeeRate {
    /// `sat_per_kvb` satoshis per kilo-vbyte, as a whole number.
    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        FeeRate { numer: sat_per_kvb as u128, denom: 1 }
    }

    /// The effective ancestor-aggregate rate of a mempool entry, in sat/kvB.
    pub fn from_ancestor(fees_sat: u64, size_vb: u64) -> Self {
        FeeRate { numer: fees_sat as u128 * 1000, denom: size_vb.max(1) as u128 }
    }

    /// `self >= other`, computed without division so there is no rounding at
    /// the threshold boundary.
    pub fn ge(&self, other: &FeeRate) -> bool {
        self.numer * other.denom >= other.numer * self.denom
    }
}

/// How aggressively to consider ancestor packages when classifying a
/// transaction as top-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageMode {
    /// Only singleton transactions (`ancestor_count == 1`) are candidates for
    /// top-block classification; anything else classifies as not-top-block,
    /// ala HTLC-X transactions in the minimal variant.
    SingletonOnly,
    /// Ancestor packages of any size are classified by their aggregate
    /// feerate.
    Extended,
}

/// Whether `entry` is at or above `topblock_rate`, i.e. a "top-block" transaction.
pub fn is_top_block(entry: &MempoolEntry, topblock_rate: FeeRate, mode: PackageMode) -> bool {
    if mode == PackageMode::SingletonOnly && entry.ancestor_count != 1 {
        return false;
    }
    let entry_rate = FeeRate::from_ancestor(entry.ancestor_fees_sat, entry.ancestor_size_vb);
    entry_rate.ge(&topblock_rate)
}
