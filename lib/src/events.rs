//! The mempool event schema (§4.2) and the abstract transport the engine
//! consumes events from.

use async_trait::async_trait;

use crate::error::EventSourceError;
use crate::types::Txid;

/// The four event labels the engine understands. Anything else is ignored at
/// the top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Add,
    Remove,
    BlockConnected,
    BlockDisconnected,
    Other(u8),
}

impl Label {
    fn from_byte(b: u8) -> Self {
        match b {
            b'A' => Label::Add,
            b'R' => Label::Remove,
            b'C' => Label::BlockConnected,
            b'D' => Label::BlockDisconnected,
            other => Label::Other(other),
        }
    }
}

/// One parsed mempool notification.
#[derive(Debug, Clone)]
pub struct MempoolEvent {
    /// The pub/sub topic string; used only for logging.
    pub topic: String,
    pub txid: Txid,
    pub label: Label,
    /// Little-endian sequence number; used only for drop detection/logging.
    pub sequence: u32,
}

impl MempoolEvent {
    /// Parse the three wire frames described in §4.2/§6: topic, `txid || label`,
    /// and a little-endian u32 sequence number.
    pub fn parse(topic: &[u8], body: &[u8], sequence: &[u8]) -> Result<Self, EventSourceError> {
        if body.len() != 33 {
            return Err(EventSourceError::Malformed(format!(
                "expected 33-byte body (txid + label), got {}",
                body.len()
            )));
        }
        if sequence.len() != 4 {
            return Err(EventSourceError::Malformed(format!(
                "expected 4-byte sequence, got {}",
                sequence.len()
            )));
        }

        let mut txid = [0u8; 32];
        txid.copy_from_slice(&body[..32]);
        let label = Label::from_byte(body[32]);
        let sequence = u32::from_le_bytes([sequence[0], sequence[1], sequence[2], sequence[3]]);
        let topic = String::from_utf8_lossy(topic).into_owned();

        Ok(MempoolEvent { topic, txid, label, sequence })
    }
}

/// The abstract mempool event transport. The shipped implementation is a
/// ZeroMQ SUB socket (see the `anticycle-node` crate); tests drive the
/// engine with an in-memory fake.
#[async_trait]
pub trait EventSource: Send {
    async fn recv(&mut self) -> Result<MempoolEvent, EventSourceError>;
}
