use std::sync::Arc;

use anyhow::Context;

use vulndigest::aggregator::Aggregator;
use vulndigest::config::Config;
use vulndigest::llm::LlmGateway;
use vulndigest::logging::init_logging;
use vulndigest::routes::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Must outlive the server so buffered log lines get flushed.
    let _log_guard = init_logging(&config);

    let state = AppState {
        aggregator: Arc::new(Aggregator::from_config(&config)),
        gateway: Arc::new(LlmGateway::new()),
    };
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "vulndigest listening");

    axum::serve(listener, app)
        .await
        .context("server exited with an error")?;

    Ok(())
}
