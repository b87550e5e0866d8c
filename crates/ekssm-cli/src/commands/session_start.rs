//! Session start command implementation

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ekssm_core::port;
use ekssm_session::{SessionOrchestrator, SessionTarget};

use crate::output::{format_started, print_success};

/// Execute `session start`
///
/// An empty or `0` `local_port` allocates a free port.
pub async fn session_start(
    orchestrator: &SessionOrchestrator,
    cluster_name: &str,
    instance_id: &str,
    local_port: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let target = SessionTarget {
        cluster_name: cluster_name.to_string(),
        instance_id: instance_id.to_string(),
        local_port: port::parse_local_port(local_port)?,
    };

    let started = orchestrator
        .start_session(&target, cancel)
        .await
        .context("Failed to start session")?;

    print_success("Successfully started ekssm session in background.");
    println!("{}", format_started(&started));
    Ok(())
}
