use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use authrelay_gateway::{AuthServer, GatewayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,authrelay_gateway=debug")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    info!(
        "[Main] AuthRelay gateway v{} ({})",
        env!("CARGO_PKG_VERSION"),
        config.environment
    );

    AuthServer::new(config)?.run().await
}
