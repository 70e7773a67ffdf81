use anyhow::{bail, Result};
use tokio::signal;
use tracing::info;

use crate::bot::{build_controller, RunOutcome};
use crate::config::BotConfig;

/// Run the bot in the foreground until Ctrl+C or until it gives up
pub async fn execute(config: BotConfig) -> Result<()> {
    let mut controller = build_controller(&config)?;

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            cancel.cancel();
        }
    });

    match controller.run().await {
        RunOutcome::Stopped => {
            info!("Bot shutdown complete");
            Ok(())
        }
        RunOutcome::RetriesExhausted => bail!(
            "Bot stopped after {max} consecutive failures",
            max = config.max_retries
        ),
    }
}
