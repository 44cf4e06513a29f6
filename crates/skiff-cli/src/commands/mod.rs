pub mod nodes;
pub mod publish;
pub mod tunnel;
pub mod volume;

use tracing::info;

/// Block until Ctrl-C.
pub async fn until_interrupted() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("interrupted, disconnecting");
    Ok(())
}
