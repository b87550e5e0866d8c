//! Tunnel and state settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Standard HTTPS port used by the EKS API server
pub const EKS_API_PORT: u16 = 443;

/// Configuration for session lifecycle operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the state file, lock file and generated kubeconfigs
    pub base_dir: PathBuf,

    /// Forwarding plugin executable
    pub plugin_path: PathBuf,

    /// Remote port of the cluster API endpoint
    pub remote_port: u16,

    /// AWS region override (otherwise resolved from the environment)
    pub region: Option<String>,

    /// Overall readiness wait for the local port
    #[serde(with = "duration_millis")]
    pub port_wait_timeout: Duration,

    /// Delay between readiness probes
    #[serde(with = "duration_millis")]
    pub port_retry_interval: Duration,

    /// Per-probe connect timeout
    #[serde(with = "duration_millis")]
    pub port_connect_timeout: Duration,

    /// How long `stop` waits for a signalled process to exit
    #[serde(with = "duration_millis")]
    pub stop_grace_period: Duration,

    /// Delay before escalating to SIGKILL after a failed SIGTERM
    #[serde(with = "duration_millis")]
    pub kill_delay: Duration,

    /// Upper bound on waiting for an interrupted plugin before killing it
    #[serde(with = "duration_millis")]
    pub plugin_stop_timeout: Duration,

    /// How long to wait for the cross-process state lock
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: super::default_base_dir(),
            plugin_path: PathBuf::from(default_plugin_name()),
            remote_port: EKS_API_PORT,
            region: None,
            port_wait_timeout: Duration::from_secs(30),
            port_retry_interval: Duration::from_millis(300),
            port_connect_timeout: Duration::from_millis(500),
            stop_grace_period: Duration::from_secs(1),
            kill_delay: Duration::from_millis(500),
            plugin_stop_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a configuration rooted at `base_dir` with default settings
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Path of the persisted session map
    pub fn state_path(&self) -> PathBuf {
        self.base_dir.join("sessions.json")
    }

    /// Path of the advisory lock guarding the state file
    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join("sessions.lock")
    }

    /// Root directory for generated kubeconfig files
    pub fn kubeconfig_dir(&self) -> PathBuf {
        self.base_dir.join("kubeconfigs")
    }
}

fn default_plugin_name() -> &'static str {
    if cfg!(windows) {
        "session-manager-plugin.exe"
    } else {
        "session-manager-plugin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.remote_port, 443);
        assert_eq!(config.port_wait_timeout, Duration::from_secs(30));
        assert_eq!(config.port_retry_interval, Duration::from_millis(300));
        assert_eq!(config.port_connect_timeout, Duration::from_millis(500));
        assert!(config.base_dir.ends_with(".ekssm"));
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::with_base_dir("/tmp/ekssm-test");
        assert_eq!(
            config.state_path(),
            PathBuf::from("/tmp/ekssm-test/sessions.json")
        );
        assert_eq!(
            config.lock_path(),
            PathBuf::from("/tmp/ekssm-test/sessions.lock")
        );
        assert_eq!(
            config.kubeconfig_dir(),
            PathBuf::from("/tmp/ekssm-test/kubeconfigs")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("remote_port = 8443\nlock_timeout = 250").unwrap();
        assert_eq!(config.remote_port, 8443);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_grace_period, Duration::from_secs(1));
    }
}
