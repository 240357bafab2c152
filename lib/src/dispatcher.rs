//! The resubmission dispatcher (§4.9): fire-and-forget re-broadcast of a
//! cached transaction. Neither outcome mutates engine state — a rejection is
//! not taken as evidence the UTXO is no longer contested, so the engine will
//! keep resubmitting on every subsequent Top->Bottom transition until the
//! next epoch wipe.

use tracing::{info, warn};

use crate::rpc::NodeClient;
use crate::types::RawTx;

pub async fn resubmit(node: &dyn NodeClient, tx: &RawTx) {
    match node.send_raw_transaction(tx).await {
        Ok(()) => info!(txid = %hex::encode(tx.txid), "resubmitted cached transaction"),
        Err(e) => warn!(txid = %hex::encode(tx.txid), error = %e, "resubmission failed; keeping entry cached"),
    }
}
