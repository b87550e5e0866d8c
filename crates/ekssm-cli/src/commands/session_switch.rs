//! Session switch command implementation

use anyhow::Result;

use ekssm_session::SessionOrchestrator;

use crate::output::{export_line, print_hint};

/// Execute `session switch`
///
/// Prints only the `export` line on stdout so the output can be `eval`ed.
pub async fn session_switch(orchestrator: &SessionOrchestrator, session_id: &str) -> Result<()> {
    match orchestrator.switch_target(session_id).await {
        Ok(path) => {
            println!("{}", export_line(&path));
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            let any_sessions = orchestrator
                .list()
                .await
                .map(|sessions| !sessions.is_empty())
                .unwrap_or(false);
            if any_sessions {
                print_hint("Use 'ekssm session list' to see available session IDs.");
            } else {
                print_hint("No active sessions found. Use 'ekssm session start' to create one.");
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
