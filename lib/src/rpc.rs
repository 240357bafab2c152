//! The node's JSON-RPC interface and the fee oracle, as abstract traits. The
//! `anticycle-node` crate supplies concrete implementations over HTTP; tests
//! drive the engine against in-memory fakes.

use async_trait::async_trait;

use crate::error::RpcError;
use crate::feerate::FeeRate;
use crate::types::{MempoolEntry, RawTx, Txid};

/// The four RPC methods the engine needs from the node. A return of `Ok(None)`
/// means "no longer observable" (mined, evicted, or never existed) and is
/// treated identically to a data-absence error — it is not itself an error.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<RawTx>, RpcError>;
    async fn get_mempool_entry(&self, txid: &Txid) -> Result<Option<MempoolEntry>, RpcError>;

    /// Fire-and-forget: the caller does not treat a rejection as proof that
    /// the UTXO is gone, only logs it.
    async fn send_raw_transaction(&self, tx: &RawTx) -> Result<(), RpcError>;
}

/// Returns the current top-block feerate, e.g. via `estimatesmartfee` on the
/// node or an external fee-estimation API.
#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn topblock_rate(&self) -> Result<FeeRate, RpcError>;
}
