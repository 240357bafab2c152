//! Daemon configuration: where the node lives, how to authenticate to it, and
//! which transports to use. Layered the same way as the engine's own
//! [`anticycle_core::EngineConfig`]: environment variables, with an optional
//! `.env` file, override hardcoded defaults; `RPCUSER`/`RPCPASS` have no
//! sensible default and are fatal if missing. `cache_byte_budget` is not an
//! env var at all — it is the daemon's one required CLI argument.

use anticycle_core::feerate::PackageMode;
use anticycle_core::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeOracleKind {
    Rpc,
    Http,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// `http://host:port` of the node's JSON-RPC interface.
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// ZeroMQ endpoint publishing the event stream, e.g. `tcp://localhost:28332`.
    pub event_source_endpoint: String,
    pub fee_oracle: FeeOracleKind,
    pub cycle_thresh: u32,
    pub package_mode: PackageMode,
}

impl NodeConfig {
    /// Load configuration with the following priority:
    /// 1. Environment variables (highest priority)
    /// 2. `.env` file
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let rpc_user = env_var("RPCUSER").ok_or(ConfigError::MissingEnvVar("RPCUSER"))?;
        let rpc_pass = env_var("RPCPASS").ok_or(ConfigError::MissingEnvVar("RPCPASS"))?;

        let rpc_host = env_var("RPC_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let rpc_port: u16 = parse_env_or("RPC_PORT", 8332)?;

        let fee_oracle = match env_var("FEE_ORACLE").as_deref() {
            None | Some("rpc") => FeeOracleKind::Rpc,
            Some("http") => FeeOracleKind::Http,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "FEE_ORACLE",
                    reason: format!("expected \"rpc\" or \"http\", got \"{other}\""),
                })
            }
        };

        let package_mode = match env_var("PACKAGE_MODE").as_deref() {
            None | Some("singleton") => PackageMode::SingletonOnly,
            Some("extended") => PackageMode::Extended,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "PACKAGE_MODE",
                    reason: format!("expected \"singleton\" or \"extended\", got \"{other}\""),
                })
            }
        };

        Ok(NodeConfig {
            rpc_url: format!("http://{rpc_host}:{rpc_port}"),
            rpc_user,
            rpc_pass,
            event_source_endpoint: env_var("EVENT_SOURCE_ENDPOINT")
                .unwrap_or_else(|| "tcp://localhost:28332".to_string()),
            fee_oracle,
            cycle_thresh: parse_env_or("CYCLE_THRESH", anticycle_core::config::DEFAULT_CYCLE_THRESH)?,
            package_mode,
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parses `key` if set, else falls back to `default`. Unlike a plain
/// `.ok()`-swallowed parse, a *present but unparsable* value is a
/// misconfiguration, not an absence, so it is rejected with
/// `ConfigError::InvalidValue` rather than silently substituting `default`.
fn parse_env_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: key,
            reason: format!("expected a valid value, got \"{raw}\""),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fails_without_rpc_credentials() {
        for key in ["RPCUSER", "RPCPASS"] {
            std::env::remove_var(key);
        }
        let err = NodeConfig::load();
        assert!(matches!(err, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn load_rejects_unparsable_rpc_port_instead_of_defaulting() {
        std::env::set_var("RPCUSER", "user");
        std::env::set_var("RPCPASS", "pass");
        std::env::set_var("RPC_PORT", "not-a-port");

        let err = NodeConfig::load();

        std::env::remove_var("RPCUSER");
        std::env::remove_var("RPCPASS");
        std::env::remove_var("RPC_PORT");

        assert!(matches!(err, Err(ConfigError::InvalidValue { name: "RPC_PORT", .. })));
    }
}
