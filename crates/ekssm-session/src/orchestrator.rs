//! Session orchestration
//!
//! Composes port allocation, tunnels, kubeconfig files and the session store
//! into the user-facing flows:
//!
//! - `start_session`: persistent tunnel that outlives this process
//! - `stop_session` / `stop_all`: tear down recorded tunnels by PID
//! - `list` / `switch_target`: read-only views of the store
//! - `run`: ephemeral tunnel scoped to one foreign command
//!
//! Every flow that creates side effects undoes them when a later step fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use ekssm_core::credentials::{self, CredentialFiles};
use ekssm_core::port;
use ekssm_core::process::{self, TerminateOptions, TerminateOutcome};
use ekssm_core::{Config, EkssmError, Result, SessionRecord, SessionStore};

use crate::remote::{ForwardTarget, RemoteAccess};
use crate::tunnel::{TunnelOptions, TunnelProcess};

/// Environment variable pointing kubectl at a kubeconfig
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Cluster and bastion for a start or run request
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub cluster_name: String,
    pub instance_id: String,
    /// Explicit local port; `None` allocates one
    pub local_port: Option<u16>,
}

impl SessionTarget {
    fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() || self.instance_id.is_empty() {
            return Err(EkssmError::Config(
                "cluster name and instance ID are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a successful `start_session`
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub record: SessionRecord,
    /// Cluster API host the tunnel forwards to
    pub remote_host: String,
    pub remote_port: u16,
}

/// Drives the session lifecycle flows
pub struct SessionOrchestrator {
    config: Config,
    remote: Arc<dyn RemoteAccess>,
    store: Arc<SessionStore>,
    credentials: CredentialFiles,
    span: Span,
}

impl SessionOrchestrator {
    /// Create an orchestrator.
    ///
    /// Every flow runs inside `span`, so callers can attach per-invocation
    /// fields to all of its log output.
    pub fn new(config: Config, remote: Arc<dyn RemoteAccess>, span: Span) -> Self {
        let store = Arc::new(SessionStore::new(&config));
        let credentials = CredentialFiles::new(config.kubeconfig_dir());
        Self {
            config,
            remote,
            store,
            credentials,
            span,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn credentials(&self) -> &CredentialFiles {
        &self.credentials
    }

    /// Run a store operation on the blocking pool.
    ///
    /// Store calls may sleep while another process holds the state lock;
    /// keeping them off the runtime lets timeouts and cancellation proceed.
    async fn store_op<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&SessionStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| EkssmError::Process(format!("session store task failed: {}", e)))?
    }

    fn tunnel(&self, target: ForwardTarget) -> TunnelProcess {
        TunnelProcess::new(
            Arc::clone(&self.remote),
            target,
            TunnelOptions::from(&self.config),
        )
    }

    async fn forward_target(&self, target: &SessionTarget) -> Result<ForwardTarget> {
        target.validate()?;
        let remote_host = self.remote.cluster_endpoint(&target.cluster_name).await?;
        let local_port = port::resolve_port(target.local_port)?;
        Ok(ForwardTarget {
            instance_id: target.instance_id.clone(),
            local_port,
            remote_host,
            remote_port: self.config.remote_port,
        })
    }

    // ------------------------------------------------------------------
    // start
    // ------------------------------------------------------------------

    /// Start a persistent session and record it.
    ///
    /// The tunnel is started before anything is persisted. If writing the
    /// kubeconfig or the record fails afterwards, the tunnel is stopped and
    /// the kubeconfig removed before the error is returned.
    pub async fn start_session(
        &self,
        target: &SessionTarget,
        cancel: &CancellationToken,
    ) -> Result<StartedSession> {
        self.start_session_inner(target, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn start_session_inner(
        &self,
        target: &SessionTarget,
        cancel: &CancellationToken,
    ) -> Result<StartedSession> {
        tracing::info!("Starting new ekssm session...");
        let forward = self.forward_target(target).await?;
        let session_id = SessionRecord::new_session_id();
        tracing::debug!("Generated session ID {}", session_id);

        let mut tunnel = self.tunnel(forward.clone());
        let pid = tunnel.start(cancel).await?;

        let path = self
            .credentials
            .path_for_session(&target.cluster_name, &session_id);
        let record = SessionRecord {
            pid,
            session_id,
            cluster_name: target.cluster_name.clone(),
            instance_id: target.instance_id.clone(),
            local_port: forward.local_port,
            credential_file_path: path.clone(),
            remote_session_id: tunnel.remote_session_id().map(str::to_string),
        };

        if let Err(e) = self.persist(&record, cancel).await {
            tracing::error!(
                "Failed to record session {}: {}. Stopping tunnel (PID {})...",
                record.session_id,
                e,
                pid
            );
            if let Err(stop_err) = tunnel.stop().await {
                tracing::warn!("Failed to stop tunnel during compensation: {}", stop_err);
            }
            if let Err(rm_err) = self.credentials.remove(&path) {
                tracing::warn!("Failed to remove kubeconfig {:?}: {}", path, rm_err);
            }
            return Err(e);
        }

        tunnel.detach();
        tracing::info!(
            "Session {} started in background (PID {})",
            record.session_id,
            pid
        );
        Ok(StartedSession {
            record,
            remote_host: forward.remote_host,
            remote_port: forward.remote_port,
        })
    }

    async fn persist(&self, record: &SessionRecord, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EkssmError::Cancelled);
        }
        let content = credentials::generate(
            &record.cluster_name,
            &credentials::local_endpoint(record.local_port),
        );
        self.credentials
            .write(&record.credential_file_path, &content)?;
        if cancel.is_cancelled() {
            return Err(EkssmError::Cancelled);
        }
        let record = record.clone();
        self.store_op(move |store| store.add(record)).await
    }

    // ------------------------------------------------------------------
    // stop
    // ------------------------------------------------------------------

    /// Stop one recorded session.
    ///
    /// An unknown ID fails with `NotFound` without touching the store. Every
    /// cleanup step is attempted; the first failure is returned.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        async {
            tracing::info!("Stopping session {}", session_id);
            let id = session_id.to_string();
            let record = self.store_op(move |store| store.get(&id)).await?;
            self.teardown(&record, true).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop every recorded session, then clear the store.
    ///
    /// Individual failures do not stop the loop; the store is cleared even if
    /// some sessions could not be cleaned up. Returns how many sessions were
    /// stopped cleanly, or the first error.
    pub async fn stop_all(&self) -> Result<usize> {
        async {
            let sessions = self.store_op(|store| store.get_all()).await?;
            if sessions.is_empty() {
                tracing::info!("No active sessions found to stop");
                if let Err(e) = self.store_op(|store| store.clear_all()).await {
                    tracing::warn!("Failed to ensure state file is cleared: {}", e);
                }
                return Ok(0);
            }

            tracing::info!("Stopping {} sessions...", sessions.len());
            let mut stopped = 0;
            let mut first_error = None;
            for (id, record) in &sessions {
                match self.teardown(record, false).await {
                    Ok(()) => stopped += 1,
                    Err(e) => {
                        tracing::error!("Failed to fully stop session {}: {}", id, e);
                        first_error.get_or_insert(e);
                    }
                }
            }

            if let Err(e) = self.store_op(|store| store.clear_all()).await {
                tracing::warn!("Failed to clear session state: {}", e);
                first_error.get_or_insert(e);
            }

            tracing::info!("Finished stopping sessions ({} stopped cleanly)", stopped);
            first_error.map_or(Ok(stopped), Err)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn teardown(&self, record: &SessionRecord, remove_record: bool) -> Result<()> {
        let mut first_error = None;

        if record.has_valid_pid() {
            match process::terminate(record.pid, TerminateOptions::from(&self.config)).await {
                Ok(TerminateOutcome::Signalled) => tracing::warn!(
                    "Process {} for session {} is still shutting down",
                    record.pid,
                    record.session_id
                ),
                Ok(outcome) => tracing::debug!(
                    "Process {} for session {}: {:?}",
                    record.pid,
                    record.session_id,
                    outcome
                ),
                Err(e) => {
                    tracing::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        } else {
            tracing::warn!(
                "Session {} has invalid PID {}, skipping process termination",
                record.session_id,
                record.pid
            );
        }

        if let Some(remote_id) = &record.remote_session_id {
            if let Err(e) = self.remote.terminate_session(remote_id).await {
                tracing::warn!("Failed to terminate remote session {}: {}", remote_id, e);
            }
        }

        if record.has_credential_file() {
            if let Err(e) = self.credentials.remove(&record.credential_file_path) {
                tracing::error!(
                    "Failed to remove kubeconfig {:?}: {}",
                    record.credential_file_path,
                    e
                );
                first_error.get_or_insert(e);
            }
        } else {
            tracing::warn!(
                "No kubeconfig path recorded for session {}, skipping removal",
                record.session_id
            );
        }

        if remove_record {
            let id = record.session_id.clone();
            if let Err(e) = self.store_op(move |store| store.remove(&id)).await {
                tracing::error!("Failed to remove session {} from state: {}", record.session_id, e);
                first_error.get_or_insert(e);
            }
        }

        if first_error.is_none() {
            tracing::info!("Cleaned up session {}", record.session_id);
        }
        first_error.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------
    // list / switch
    // ------------------------------------------------------------------

    /// All recorded sessions, ordered by session ID
    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        let sessions = self
            .store_op(|store| store.get_all())
            .instrument(self.span.clone())
            .await?;
        Ok(sessions.into_values().collect())
    }

    /// Kubeconfig path of a recorded session
    pub async fn switch_target(&self, session_id: &str) -> Result<PathBuf> {
        async {
            let id = session_id.to_string();
            let record = self.store_op(move |store| store.get(&id)).await?;
            if !record.has_credential_file() {
                return Err(EkssmError::Config(format!(
                    "session '{}' exists but has no associated kubeconfig path",
                    session_id
                )));
            }
            tracing::info!(
                "Switching to session {} (cluster {})",
                record.session_id,
                record.cluster_name
            );
            Ok(record.credential_file_path)
        }
        .instrument(self.span.clone())
        .await
    }

    // ------------------------------------------------------------------
    // run
    // ------------------------------------------------------------------

    /// Run `command` with an ephemeral tunnel and kubeconfig.
    ///
    /// The tunnel starts in a background task while the kubeconfig is
    /// written. The command is launched only once the tunnel is ready, and
    /// the tunnel and kubeconfig are released exactly once on every exit
    /// path. A non-zero command exit yields `CommandFailed`.
    pub async fn run(
        &self,
        target: &SessionTarget,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        async {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| EkssmError::Config("no command provided".to_string()))?;
            tracing::debug!("Command to execute: {}", command.join(" "));

            let forward = self.forward_target(target).await?;
            let mut scope = RunScope::new(
                self.credentials.clone(),
                self.credentials.path_for_run(&target.cluster_name),
            );
            let result = self
                .run_in_scope(&mut scope, &target.cluster_name, forward, program, args, cancel)
                .await;
            scope.release().await;
            result
        }
        .instrument(self.span.clone())
        .await
    }

    async fn run_in_scope(
        &self,
        scope: &mut RunScope,
        cluster_name: &str,
        forward: ForwardTarget,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let startup_cancel = cancel.child_token();
        let mut tunnel = self.tunnel(forward.clone());
        let mut startup = tokio::spawn({
            let startup_cancel = startup_cancel.clone();
            async move {
                tracing::debug!("Starting tunnel in background...");
                let result = tunnel.start(&startup_cancel).await;
                (tunnel, result)
            }
            .in_current_span()
        });

        let content = credentials::generate(
            cluster_name,
            &credentials::local_endpoint(forward.local_port),
        );
        let written = self.credentials.write(scope.path(), &content);
        if written.is_err() {
            startup_cancel.cancel();
        } else {
            tracing::debug!("Temporary kubeconfig written to {:?}", scope.path());
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Operation cancelled");
                startup.await
            }
            joined = &mut startup => joined,
        };
        let (tunnel, started) = joined
            .map_err(|e| EkssmError::Process(format!("tunnel startup task failed: {}", e)))?;
        scope.hold(tunnel);

        written?;
        if cancel.is_cancelled() {
            return Err(EkssmError::Cancelled);
        }
        started?;

        tracing::debug!(
            "Executing {} with {}={:?}",
            program,
            KUBECONFIG_ENV,
            scope.path()
        );
        let mut child = Command::new(program)
            .args(args)
            .env(KUBECONFIG_ENV, scope.path())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EkssmError::Process(format!("failed to execute {}: {}", program, e)))?;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Operation cancelled, stopping {}", program);
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(EkssmError::Cancelled);
            }
            status = child.wait() => status
                .map_err(|e| EkssmError::Process(format!("failed to wait for {}: {}", program, e)))?,
        };

        if status.success() {
            tracing::debug!("Command finished successfully");
            Ok(())
        } else {
            Err(EkssmError::CommandFailed {
                code: status.code().unwrap_or(1),
            })
        }
    }
}

/// Resources owned by one `run`, released exactly once
///
/// `release` stops the tunnel and then removes the kubeconfig. If the scope
/// is dropped without being released (e.g. the future was aborted), `Drop`
/// kills the plugin and removes the file synchronously.
struct RunScope {
    credentials: CredentialFiles,
    path: PathBuf,
    tunnel: Option<TunnelProcess>,
    released: bool,
}

impl RunScope {
    fn new(credentials: CredentialFiles, path: PathBuf) -> Self {
        Self {
            credentials,
            path,
            tunnel: None,
            released: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn hold(&mut self, tunnel: TunnelProcess) {
        self.tunnel = Some(tunnel);
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut tunnel) = self.tunnel.take() {
            tracing::debug!("Stopping tunnel...");
            if let Err(e) = tunnel.stop().await {
                tracing::warn!("Failed to stop tunnel cleanly: {}", e);
            }
        }

        tracing::debug!("Removing temporary kubeconfig {:?}", self.path);
        if let Err(e) = self.credentials.remove(&self.path) {
            tracing::warn!("Failed to remove temporary kubeconfig {:?}: {}", self.path, e);
        }
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.abort();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}
