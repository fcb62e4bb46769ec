use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use page_forge_proxy::{AppConfig, ReqwestChatClient, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        base_url = %config.upstream.base_url,
        bundle_root = %config.bundle_root.display(),
        "starting page proxy"
    );
    if config.upstream.api_key.is_none() {
        tracing::warn!("OLLAMA_API_KEY is not set; /generate will fail until it is");
    }

    let backend = Arc::new(ReqwestChatClient::new(config.upstream.clone())?);
    let router = build_router(config.clone(), backend);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
