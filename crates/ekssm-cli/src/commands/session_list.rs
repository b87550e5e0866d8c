//! Session list command implementation

use anyhow::{Context, Result};

use ekssm_session::SessionOrchestrator;

use crate::output::format_sessions;

/// Execute `session list`
pub async fn session_list(orchestrator: &SessionOrchestrator) -> Result<()> {
    let sessions = orchestrator
        .list()
        .await
        .context("Failed to load session state")?;
    println!("{}", format_sessions(&sessions));
    Ok(())
}
