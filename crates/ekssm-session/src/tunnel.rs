//! One forwarding tunnel: negotiated remote session plus plugin subprocess
//!
//! ```text
//! Idle -> Negotiating -> SubprocessStarting -> WaitingForPort -> Ready -> Stopping -> Stopped
//!   \__________\_______________\____________________\__________ Failed
//! ```
//!
//! A failed or cancelled [`TunnelProcess::start`] stops whatever it already
//! created before returning, so no plugin process or remote session leaks.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use ekssm_core::port::{self, WaitOptions};
use ekssm_core::process::{self, Signal};
use ekssm_core::{Config, EkssmError, Result};

use crate::remote::{ForwardTarget, PluginSessionInput, RemoteAccess};

/// Upper bound on collecting stderr from a plugin that exited early
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`TunnelProcess`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Negotiating,
    SubprocessStarting,
    WaitingForPort,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Plugin invocation and timing settings
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Forwarding plugin executable
    pub plugin_path: PathBuf,
    /// Readiness probe timing
    pub wait: WaitOptions,
    /// How long to wait for the plugin after SIGINT before killing it
    pub stop_timeout: Duration,
}

impl From<&Config> for TunnelOptions {
    fn from(config: &Config) -> Self {
        Self {
            plugin_path: config.plugin_path.clone(),
            wait: WaitOptions::from(config),
            stop_timeout: config.plugin_stop_timeout,
        }
    }
}

/// Owns one tunnel for the duration of an orchestrator flow
pub struct TunnelProcess {
    remote: Arc<dyn RemoteAccess>,
    target: ForwardTarget,
    options: TunnelOptions,
    state: TunnelState,
    child: Option<Child>,
    pid: Option<i32>,
    session_id: Option<String>,
    stderr: Arc<Mutex<String>>,
}

impl TunnelProcess {
    pub fn new(remote: Arc<dyn RemoteAccess>, target: ForwardTarget, options: TunnelOptions) -> Self {
        Self {
            remote,
            target,
            options,
            state: TunnelState::Idle,
            child: None,
            pid: None,
            session_id: None,
            stderr: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// PID of the running plugin
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Negotiated remote session ID
    pub fn remote_session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Everything the plugin has written to stderr so far
    pub fn captured_stderr(&self) -> String {
        self.stderr
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Negotiate, launch the plugin and wait until the local port accepts
    /// connections. Returns the plugin PID.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<i32> {
        match self.try_start(cancel).await {
            Ok(pid) => {
                self.state = TunnelState::Ready;
                tracing::info!(
                    "Tunnel ready: localhost:{} -> {}:{} (via {}, PID {})",
                    self.target.local_port,
                    self.target.remote_host,
                    self.target.remote_port,
                    self.target.instance_id,
                    pid
                );
                Ok(pid)
            }
            Err(e) => {
                if let Err(stop_err) = self.stop().await {
                    tracing::warn!("Cleanup after failed tunnel start also failed: {}", stop_err);
                }
                self.state = TunnelState::Failed;
                Err(e)
            }
        }
    }

    async fn try_start(&mut self, cancel: &CancellationToken) -> Result<i32> {
        self.validate()?;
        let region = self.remote.region().await.ok_or_else(|| {
            EkssmError::Config("AWS region not set for the forwarding plugin".to_string())
        })?;

        tracing::debug!(
            "Starting port forwarding to {}:{} via instance {} on local port {}",
            self.target.remote_host,
            self.target.remote_port,
            self.target.instance_id,
            self.target.local_port
        );

        self.state = TunnelState::Negotiating;
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EkssmError::Cancelled),
            negotiated = self.remote.negotiate_session(&self.target) => negotiated?,
        };
        self.session_id = Some(session.session_id.clone());
        tracing::debug!("Negotiated remote session {}", session.session_id);

        self.state = TunnelState::SubprocessStarting;
        let payload = serde_json::to_string(&PluginSessionInput::new(&self.target, &session))
            .map_err(|e| EkssmError::Process(format!("failed to encode plugin input: {}", e)))?;

        let mut child = Command::new(&self.options.plugin_path)
            .arg(payload)
            .arg(&region)
            .arg("StartSession")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EkssmError::Process(format!(
                    "failed to start {}: {}",
                    self.options.plugin_path.display(),
                    e
                ))
            })?;

        let drain = child.stderr.take().map(|stderr| {
            let buffer = Arc::clone(&self.stderr);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            })
        });

        let pid = match child.id() {
            Some(id) => id as i32,
            None => {
                self.child = Some(child);
                return Err(EkssmError::Process("plugin exited immediately".to_string()));
            }
        };
        self.pid = Some(pid);
        tracing::debug!("Forwarding plugin started (PID {})", pid);

        self.state = TunnelState::WaitingForPort;
        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EkssmError::Cancelled),
            exited = child.wait() => Err(match exited {
                Ok(status) => EkssmError::Process(format!(
                    "forwarding plugin exited before the tunnel was ready ({})",
                    status
                )),
                Err(e) => EkssmError::Process(format!("failed to wait for plugin: {}", e)),
            }),
            ready = port::wait_for_port(self.target.local_port, self.options.wait) => ready,
        };
        self.child = Some(child);

        if let Err(e) = ready {
            if let (EkssmError::Process(_), Some(drain)) = (&e, drain) {
                // The plugin is gone; let the reader reach EOF before reporting.
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await;
            }
            let stderr = self.captured_stderr();
            if !stderr.trim().is_empty() {
                tracing::error!("Forwarding plugin stderr: {}", stderr.trim());
            }
            return Err(e);
        }

        Ok(pid)
    }

    fn validate(&self) -> Result<()> {
        let missing = if self.target.instance_id.is_empty() {
            Some("instance ID")
        } else if self.target.local_port == 0 {
            Some("local port")
        } else if self.target.remote_host.is_empty() {
            Some("remote host (cluster endpoint)")
        } else if self.target.remote_port == 0 {
            Some("remote port")
        } else {
            None
        };
        match missing {
            Some(field) => Err(EkssmError::Config(format!("{} is required", field))),
            None => Ok(()),
        }
    }

    /// Stop the plugin and terminate the remote session.
    ///
    /// Both steps always run; the first error is returned. Calling this on an
    /// already-stopped tunnel does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.child.is_none() && self.session_id.is_none() {
            return Ok(());
        }
        self.state = TunnelState::Stopping;
        let mut first_error = None;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = stop_child(&mut child, self.options.stop_timeout).await {
                tracing::error!("Failed to stop forwarding plugin: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(session_id) = self.session_id.take() {
            if let Err(e) = self.remote.terminate_session(&session_id).await {
                tracing::warn!("Failed to terminate remote session {}: {}", session_id, e);
                first_error.get_or_insert(e);
            }
        }

        self.pid = None;
        self.state = TunnelState::Stopped;
        first_error.map_or(Ok(()), Err)
    }

    /// Kill the plugin without waiting or contacting the remote API.
    ///
    /// Used from synchronous drop paths where nothing can be awaited.
    pub fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!("Killing forwarding plugin (PID {:?}) without cleanup", self.pid);
            let _ = child.start_kill();
        }
        self.pid = None;
        self.session_id = None;
        self.state = TunnelState::Stopped;
    }

    /// Release the plugin process so it outlives this invocation.
    ///
    /// The tunnel keeps running; it is later stopped by PID.
    pub fn detach(mut self) {
        if let Some(child) = self.child.take() {
            tracing::debug!("Detaching forwarding plugin (PID {:?})", child.id());
        }
    }
}

/// SIGINT the plugin and wait for it, killing it after `stop_timeout`
async fn stop_child(child: &mut Child, stop_timeout: Duration) -> Result<()> {
    let interrupted = match child.id() {
        Some(pid) => process::send_signal(pid as i32, Signal::Interrupt).map_err(|e| {
            EkssmError::Process(format!("failed to interrupt plugin (PID {}): {}", pid, e))
        }),
        None => Ok(()),
    };
    if interrupted.is_err() {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("Forwarding plugin exited: {}", status),
        Ok(Err(e)) => {
            return Err(EkssmError::Process(format!(
                "failed to wait for plugin: {}",
                e
            )))
        }
        Err(_) => {
            tracing::warn!(
                "Forwarding plugin still running {:?} after interrupt, killing",
                stop_timeout
            );
            child
                .kill()
                .await
                .map_err(|e| EkssmError::Process(format!("failed to kill plugin: {}", e)))?;
        }
    }
    interrupted
}

impl std::fmt::Debug for TunnelProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelProcess")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::NegotiatedSession;
    use async_trait::async_trait;
    use std::net::TcpListener;
    use std::sync::OnceLock;
    use tempfile::TempDir;
    use tokio::time::Instant;

    struct RefusingRemote {
        region: Option<String>,
    }

    #[async_trait]
    impl RemoteAccess for RefusingRemote {
        async fn region(&self) -> Option<String> {
            self.region.clone()
        }

        async fn cluster_endpoint(&self, _cluster_name: &str) -> Result<String> {
            Ok("cluster.example".to_string())
        }

        async fn negotiate_session(&self, _target: &ForwardTarget) -> Result<NegotiatedSession> {
            Err(EkssmError::Negotiation("access denied".to_string()))
        }

        async fn terminate_session(&self, _session_id: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Negotiates successfully, optionally binding the local port and
    /// optionally failing termination.
    struct ScriptedRemote {
        bind_port: bool,
        fail_terminate: bool,
        listener: Mutex<Option<TcpListener>>,
        terminate_calls: Mutex<u32>,
    }

    impl ScriptedRemote {
        fn new(bind_port: bool, fail_terminate: bool) -> Arc<Self> {
            Arc::new(Self {
                bind_port,
                fail_terminate,
                listener: Mutex::new(None),
                terminate_calls: Mutex::new(0),
            })
        }

        fn terminate_calls(&self) -> u32 {
            *self.terminate_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RemoteAccess for ScriptedRemote {
        async fn region(&self) -> Option<String> {
            Some("eu-west-1".to_string())
        }

        async fn cluster_endpoint(&self, _cluster_name: &str) -> Result<String> {
            Ok("cluster.example".to_string())
        }

        async fn negotiate_session(&self, target: &ForwardTarget) -> Result<NegotiatedSession> {
            if self.bind_port {
                let listener = TcpListener::bind(("127.0.0.1", target.local_port))?;
                *self.listener.lock().unwrap() = Some(listener);
            }
            Ok(NegotiatedSession {
                session_id: "sess-1".to_string(),
                stream_url: "wss://example".to_string(),
                token: "tok".to_string(),
            })
        }

        async fn terminate_session(&self, session_id: &str) -> Result<()> {
            *self.terminate_calls.lock().unwrap() += 1;
            self.listener.lock().unwrap().take();
            if self.fail_terminate {
                return Err(EkssmError::Negotiation(format!(
                    "session {} could not be terminated",
                    session_id
                )));
            }
            Ok(())
        }
    }

    /// Stand-in plugins, written once so no test executes a file that is
    /// still open for writing.
    fn script(name: &str) -> PathBuf {
        static SCRIPTS: OnceLock<TempDir> = OnceLock::new();
        let dir = SCRIPTS.get_or_init(|| {
            let dir = TempDir::new().unwrap();
            for (file, body) in [
                ("ignores-interrupt", "#!/bin/sh\ntrap '' INT\nexec sleep 30\n"),
                ("exits-early", "#!/bin/sh\necho 'invalid session token' >&2\nexit 3\n"),
            ] {
                let path = dir.path().join(file);
                std::fs::write(&path, body).unwrap();
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                        .unwrap();
                }
            }
            dir
        });
        dir.path().join(name)
    }

    fn scripted_tunnel(
        remote: Arc<ScriptedRemote>,
        plugin: &str,
        stop_timeout: Duration,
    ) -> TunnelProcess {
        let config = Config {
            plugin_path: script(plugin),
            port_wait_timeout: Duration::from_secs(20),
            port_retry_interval: Duration::from_millis(50),
            port_connect_timeout: Duration::from_millis(200),
            plugin_stop_timeout: stop_timeout,
            ..Config::default()
        };
        let target = ForwardTarget {
            local_port: port::find_available_port().unwrap(),
            ..target()
        };
        TunnelProcess::new(remote, target, TunnelOptions::from(&config))
    }

    fn tunnel(region: Option<&str>, target: ForwardTarget) -> TunnelProcess {
        let remote = Arc::new(RefusingRemote {
            region: region.map(str::to_string),
        });
        TunnelProcess::new(remote, target, TunnelOptions::from(&Config::default()))
    }

    fn target() -> ForwardTarget {
        ForwardTarget {
            instance_id: "i-abc".to_string(),
            local_port: 9443,
            remote_host: "cluster.example".to_string(),
            remote_port: 443,
        }
    }

    #[tokio::test]
    async fn test_missing_inputs_are_config_errors() {
        let mut missing_instance = target();
        missing_instance.instance_id.clear();
        let mut t = tunnel(Some("eu-west-1"), missing_instance);
        let err = t.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EkssmError::Config(_)));
        assert_eq!(t.state(), TunnelState::Failed);

        let mut missing_port = target();
        missing_port.local_port = 0;
        let mut t = tunnel(Some("eu-west-1"), missing_port);
        assert!(matches!(
            t.start(&CancellationToken::new()).await.unwrap_err(),
            EkssmError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_region_is_config_error() {
        let mut t = tunnel(None, target());
        let err = t.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EkssmError::Config(_)));
    }

    #[tokio::test]
    async fn test_negotiation_failure_leaves_nothing_running() {
        let mut t = tunnel(Some("eu-west-1"), target());
        let err = t.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EkssmError::Negotiation(_)));
        assert!(t.pid().is_none());
        assert!(t.remote_session_id().is_none());
        assert_eq!(t.state(), TunnelState::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_negotiation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut t = tunnel(Some("eu-west-1"), target());
        let err = t.start(&cancel).await.unwrap_err();
        assert!(matches!(err, EkssmError::Cancelled));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut t = tunnel(Some("eu-west-1"), target());
        t.stop().await.unwrap();
        t.stop().await.unwrap();
        assert_eq!(t.state(), TunnelState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_stubborn_plugin_and_reports_remote_failure() {
        let remote = ScriptedRemote::new(true, true);
        let mut t = scripted_tunnel(remote.clone(), "ignores-interrupt", Duration::from_millis(300));
        let pid = t.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(t.state(), TunnelState::Ready);

        // Give the shell time to install its trap before the exec.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(process::is_process_alive(pid));

        let started = Instant::now();
        let err = t.stop().await.unwrap_err();
        assert!(matches!(err, EkssmError::Negotiation(_)));
        assert!(started.elapsed() >= Duration::from_millis(300));

        // Killed after the interrupt timeout, and the remote step still ran.
        assert!(!process::is_process_alive(pid));
        assert_eq!(remote.terminate_calls(), 1);
        assert!(t.pid().is_none());
        assert!(t.remote_session_id().is_none());
        assert_eq!(t.state(), TunnelState::Stopped);

        t.stop().await.unwrap();
        assert_eq!(remote.terminate_calls(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plugin_exit_fails_start_without_waiting_for_port() {
        let remote = ScriptedRemote::new(false, false);
        let mut t = scripted_tunnel(remote.clone(), "exits-early", Duration::from_secs(2));

        let started = Instant::now();
        let err = t.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EkssmError::Process(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(t.captured_stderr().contains("invalid session token"));

        assert_eq!(t.state(), TunnelState::Failed);
        assert!(t.pid().is_none());
        assert_eq!(remote.terminate_calls(), 1);
    }
}
