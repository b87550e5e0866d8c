//! Run command implementation

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use ekssm_core::port;
use ekssm_session::{SessionOrchestrator, SessionTarget};

/// Execute `run`: tunnel, run `command` with `KUBECONFIG` set, tear down
///
/// Errors are returned unwrapped so the caller can map a failed command to
/// its exit code.
pub async fn run_command(
    orchestrator: &SessionOrchestrator,
    cluster_name: &str,
    instance_id: &str,
    local_port: Option<&str>,
    command: &[String],
    cancel: &CancellationToken,
) -> Result<()> {
    let target = SessionTarget {
        cluster_name: cluster_name.to_string(),
        instance_id: instance_id.to_string(),
        local_port: port::parse_local_port(local_port)?,
    };
    orchestrator.run(&target, command, cancel).await?;
    Ok(())
}
