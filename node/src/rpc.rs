//! JSON-RPC 1.0 client for Bitcoin Core, and the two `FeeOracle`
//! implementations: one backed by the node's own `estimatesmartfee`, one by
//! an external HTTP fee-estimation API (e.g. mempool.space).

use anticycle_core::error::RpcError;
use anticycle_core::feerate::FeeRate;
use anticycle_core::rpc::{FeeOracle, NodeClient};
use anticycle_core::types::{MempoolEntry, RawTx, Txid, Utxo};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::str::FromStr;

/// Parses a JSON-RPC BTC amount into satoshis via exact decimal arithmetic.
/// `serde_json`'s `arbitrary_precision` feature keeps the original decimal
/// text intact through parsing, so this never rounds through `f64` the way
/// `Value::as_f64` would — a feerate sitting exactly on the top-block
/// threshold must not be nudged across it by a lossy conversion.
fn btc_to_sat(value: &Value) -> Result<u64, RpcError> {
    let text = value.to_string();
    let btc = BigDecimal::from_str(&text)
        .map_err(|e| RpcError::Decode(format!("invalid BTC amount {text:?}: {e}")))?;
    let sat = (btc * BigDecimal::from(100_000_000u64)).round(0);
    sat.to_string()
        .parse::<u64>()
        .map_err(|e| RpcError::Decode(format!("BTC amount {text:?} out of range: {e}")))
}

pub struct BitcoinRpcClient {
    http: reqwest::Client,
    url: String,
    user: String,
    pass: String,
}

impl BitcoinRpcClient {
    pub fn new(url: String, user: String, pass: String) -> Self {
        BitcoinRpcClient { http: reqwest::Client::new(), url, user, pass }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "anticycle",
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let reply: Value = resp.json().await.map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message =
                error.get("message").and_then(Value::as_str).unwrap_or("").to_string();
            return Err(RpcError::Remote { code, message });
        }
        reply
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("response missing result field".to_string()))
    }

    /// Treats RPC error code -5 ("No such transaction") as "not found" rather
    /// than a transport failure, since a mined/evicted tx is routine here.
    async fn call_allow_missing(&self, method: &str, params: Value) -> Result<Option<Value>, RpcError> {
        match self.call(method, params).await {
            Ok(value) => Ok(Some(value)),
            Err(RpcError::Remote { code: -5, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn parse_txid_hex(s: &str) -> Result<Txid, RpcError> {
    let bytes = hex::decode(s).map_err(|e| RpcError::Decode(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(RpcError::Decode(format!("expected 32-byte txid, got {} bytes", bytes.len())));
    }
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&bytes);
    // RPC hands back txids in display (big-endian) order; internal ordering
    // used throughout this crate is whatever bytes the node returns.
    Ok(txid)
}

fn parse_inputs(vin: &[Value]) -> Result<Vec<Utxo>, RpcError> {
    vin.iter()
        .map(|entry| {
            let prev_txid = entry
                .get("txid")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::Decode("vin entry missing txid".to_string()))?;
            let vout = entry
                .get("vout")
                .and_then(Value::as_u64)
                .ok_or_else(|| RpcError::Decode("vin entry missing vout".to_string()))?;
            Ok(Utxo::new(parse_txid_hex(prev_txid)?, vout as u32))
        })
        .collect()
}

#[async_trait]
impl NodeClient for BitcoinRpcClient {
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<RawTx>, RpcError> {
        let txid_hex = hex::encode(txid);
        let Some(result) = self
            .call_allow_missing("getrawtransaction", json!([txid_hex, true]))
            .await?
        else {
            return Ok(None);
        };

        let hex_body = result
            .get("hex")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("getrawtransaction missing hex".to_string()))?
            .to_string();
        let vin = result
            .get("vin")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::Decode("getrawtransaction missing vin".to_string()))?;

        Ok(Some(RawTx { txid: *txid, hex: hex_body, inputs: parse_inputs(vin)? }))
    }

    async fn get_mempool_entry(&self, txid: &Txid) -> Result<Option<MempoolEntry>, RpcError> {
        let txid_hex = hex::encode(txid);
        let Some(result) = self.call_allow_missing("getmempoolentry", json!([txid_hex])).await? else {
            return Ok(None);
        };

        let ancestor_count = result
            .get("ancestorcount")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Decode("getmempoolentry missing ancestorcount".to_string()))?
            as u32;
        let ancestor_size_vb = result
            .get("ancestorsize")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Decode("getmempoolentry missing ancestorsize".to_string()))?;
        let ancestor_fees_sat = result
            .get("fees")
            .and_then(|f| f.get("ancestor"))
            .ok_or_else(|| RpcError::Decode("getmempoolentry missing fees.ancestor".to_string()))
            .and_then(btc_to_sat)?;

        Ok(Some(MempoolEntry { ancestor_count, ancestor_size_vb, ancestor_fees_sat }))
    }

    async fn send_raw_transaction(&self, tx: &RawTx) -> Result<(), RpcError> {
        self.call("sendrawtransaction", json!([tx.hex])).await?;
        Ok(())
    }
}

/// Fee oracle backed by the node's own mempool-fee-histogram estimator.
pub struct RpcFeeOracle<'a> {
    client: &'a BitcoinRpcClient,
}

impl<'a> RpcFeeOracle<'a> {
    pub fn new(client: &'a BitcoinRpcClient) -> Self {
        RpcFeeOracle { client }
    }
}

#[async_trait]
impl<'a> FeeOracle for RpcFeeOracle<'a> {
    async fn topblock_rate(&self) -> Result<FeeRate, RpcError> {
        let result = self.client.call("estimatesmartfee", json!([3])).await?;
        let sat_per_kvb = result
            .get("feerate")
            .ok_or_else(|| RpcError::Decode("estimatesmartfee missing feerate".to_string()))
            .and_then(btc_to_sat)?;
        Ok(FeeRate::from_sat_per_kvb(sat_per_kvb))
    }
}

/// Fee oracle backed by an external HTTP API returning
/// `{"fastestFee": sat_per_vb, ...}`, e.g. mempool.space.
pub struct HttpFeeOracle {
    http: reqwest::Client,
    url: String,
}

pub const DEFAULT_FEE_API_URL: &str = "https://mempool.space/api/v1/fees/recommended";

impl HttpFeeOracle {
    pub fn new(url: String) -> Self {
        HttpFeeOracle { http: reqwest::Client::new(), url }
    }
}

impl Default for HttpFeeOracle {
    fn default() -> Self {
        HttpFeeOracle::new(DEFAULT_FEE_API_URL.to_string())
    }
}

#[async_trait]
impl FeeOracle for HttpFeeOracle {
    async fn topblock_rate(&self) -> Result<FeeRate, RpcError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let body: Value = resp.json().await.map_err(|e| RpcError::Transport(e.to_string()))?;
        let sat_per_vb = body
            .get("fastestFee")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Decode("fee API response missing fastestFee".to_string()))?;
        Ok(FeeRate::from_sat_per_kvb(sat_per_vb * 1000))
    }
}
