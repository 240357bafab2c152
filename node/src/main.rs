use anticycle_core::config::EngineConfig;
use anticycle_core::engine::CycleEngine;
use anticycle_core::rpc::FeeOracle;
use anyhow::{Context, Result};
use argh::FromArgs;
use tracing::{error, info};

mod config;
mod rpc;
mod zmq_source;

use config::{FeeOracleKind, NodeConfig};
use rpc::{BitcoinRpcClient, HttpFeeOracle, RpcFeeOracle};
use zmq_source::ZmqEventSource;

#[derive(FromArgs)]
/// Watches a Bitcoin Core mempool for replacement-cycling attacks and
/// resubmits cycled-out defenders of watched UTXOs.
struct Args {
    #[argh(positional)]
    /// cache byte budget, in megabytes
    cache_byte_budget_mb: u64,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Args = argh::from_env();

    let config = match NodeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    info!(
        rpc_url = %config.rpc_url,
        event_source_endpoint = %config.event_source_endpoint,
        fee_oracle = ?config.fee_oracle,
        package_mode = ?config.package_mode,
        cache_byte_budget_mb = args.cache_byte_budget_mb,
        "starting anticycle"
    );

    let node = BitcoinRpcClient::new(config.rpc_url.clone(), config.rpc_user.clone(), config.rpc_pass.clone());

    let oracle: Box<dyn FeeOracle + '_> = match config.fee_oracle {
        FeeOracleKind::Rpc => Box::new(RpcFeeOracle::new(&node)),
        FeeOracleKind::Http => Box::new(HttpFeeOracle::default()),
    };

    let initial_rate = oracle
        .topblock_rate()
        .await
        .context("failed to fetch initial top-block feerate")?;

    let engine_config = EngineConfig::new(args.cache_byte_budget_mb * 1_000_000)
        .with_cycle_thresh(config.cycle_thresh)
        .with_package_mode(config.package_mode);
    let mut engine = CycleEngine::new(engine_config, initial_rate);

    let mut events = ZmqEventSource::connect(&config.event_source_endpoint)
        .context("failed to connect to event source")?;

    tokio::select! {
        result = engine.run(&mut events, &node, oracle.as_ref()) => {
            if let Err(e) = result {
                error!(error = %e, "event source closed; shutting down");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
