//! Session stop command implementation

use anyhow::{Context, Result};

use ekssm_session::SessionOrchestrator;

use crate::output::{print_success, print_warning};

/// Execute `session stop`: one session by ID, or all of them
pub async fn session_stop(
    orchestrator: &SessionOrchestrator,
    session_id: Option<&str>,
) -> Result<()> {
    match session_id {
        Some(id) => {
            orchestrator.stop_session(id).await?;
            print_success(&format!("Stopped session {}", id));
        }
        None => {
            let stopped = orchestrator.stop_all().await.map_err(|e| {
                print_warning("Some sessions could not be fully cleaned up; session state was cleared anyway.");
                e
            });
            let stopped = stopped.context("Encountered errors while stopping sessions")?;
            if stopped == 0 {
                print_success("No active sessions to stop");
            } else {
                print_success(&format!("Stopped {} session(s)", stopped));
            }
        }
    }
    Ok(())
}
