use bridge_engine::run::{run_bridge_engine, BridgeConfig, EngineOpts};
use clap::Parser;
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = EngineOpts::parse();
    let config = BridgeConfig::load(opts.config.as_deref())?;

    run_bridge_engine(config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
}
