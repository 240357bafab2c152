use thiserror::Error;

/// Fatal at startup; the process must not proceed without these being resolved.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("must set {0} to connect to the node")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Transient transport failure talking to the node's JSON-RPC interface or the
/// fee oracle. The engine logs these and drops the triggering event; it never
/// treats a transport error as evidence that a transaction is gone.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Decode(String),
    /// The node answered with a well-formed JSON-RPC error object; `code` is
    /// its `error.code` field (e.g. `-5`, "No such transaction"), kept
    /// structured so callers can match on specific codes instead of
    /// string-matching the message.
    #[error("node returned RPC error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Failure of the mempool event transport itself. `Closed` is the only variant
/// that should end the engine's main loop.
#[derive(Error, Debug)]
pub enum EventSourceError {
    #[error("event source closed")]
    Closed,
    #[error("malformed event frame: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
}
