use tracing::info;

use rugwatch::{AppConfig, AppContext, Probes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env();
    rugwatch::logging::init_logging(&config)?;

    let ctx = AppContext::bootstrap(config, Probes::default()).await?;
    let handles = ctx.start_background();
    info!(
        loops = handles.len(),
        "rugwatch control plane running, ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
