use anyhow::Context;

use neurosearch_rag::config::Config;
use neurosearch_rag::core::logging;
use neurosearch_rag::runtime::ServiceRuntime;
use neurosearch_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    logging::init(&config.log_dir);

    let state = AppState::initialize(config)
        .await
        .context("failed to initialize service")?;

    ServiceRuntime::new(state)
        .run()
        .await
        .context("server error")?;

    Ok(())
}
