//! `gatewayd`: the gateway daemon's entry point. Loads configuration,
//! wires the bridge, and runs the streaming and rendezvous engines
//! concurrently until either one fails.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use gw_server::bridge_handler::BridgeHandler;
use gw_server::cli::Cli;
use gw_server::rendezvous_acceptor::RendezvousAcceptor;
use gw_server::signaling_udp::UdpSignalingTransport;
use gw_server::streaming_acceptor::StreamingAcceptor;
use gw_server::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    let config = cli.apply(base);
    config.validate()?;

    tracing_subscriber::fmt().with_env_filter(config.log_level.clone()).init();

    tracing::info!(host = %config.host, port = config.port, middle = config.middle, "starting gatewayd");

    let transport = UdpSignalingTransport::bind(config.signaling_listen_addr()).await?;
    let bridge = Arc::new(BridgeHandler::new(transport, None).with_rtp_config(config.rtp_config()));

    let rendezvous = RendezvousAcceptor::bind(config.rendezvous_listen_addr(), config.middle_upstream).await?;
    rendezvous.spawn_sweep_loop(Duration::from_secs(config.freq_manage));

    if config.no_rtmp {
        rendezvous.run().await?;
        return Ok(());
    }

    let streaming = StreamingAcceptor::bind(config.streaming_listen_addr()?, bridge.clone(), Some(bridge)).await?;

    tokio::select! {
        result = streaming.run() => result?,
        result = rendezvous.run() => result?,
    }

    Ok(())
}
