use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use warp::Filter;

use auralis_gateway::config;
use auralis_gateway::tts::{handle_rejection, tts_routes, TtsGateway};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auralis_gateway=info,warp=warn".into()),
        )
        .init();

    let gateway = Arc::new(TtsGateway::from_env().await);
    info!(
        enabled = gateway.enabled(),
        default_provider = %gateway.default_provider_id().await,
        "tts gateway initialised"
    );

    let addr: SocketAddr = config::env_or(&["TTS_GATEWAY_ADDR"], "127.0.0.1:8780")
        .parse()
        .context("invalid TTS_GATEWAY_ADDR")?;
    let api = tts_routes(gateway).recover(handle_rejection);

    info!(%addr, "serving /tts");
    warp::serve(api).run(addr).await;
    Ok(())
}
