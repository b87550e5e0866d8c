//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Persisted session map, keyed by session ID
pub type SessionMap = BTreeMap<String, SessionRecord>;

/// One active tunnel session as recorded in the state file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// PID of the forwarding plugin process
    pub pid: i32,
    /// Unique session ID (UUID), primary key
    pub session_id: String,
    /// EKS cluster name
    pub cluster_name: String,
    /// Bastion instance ID
    pub instance_id: String,
    /// Local port bound by the plugin
    pub local_port: u16,
    /// Generated kubeconfig for this session
    #[serde(rename = "kubeconfig_path", default)]
    pub credential_file_path: PathBuf,
    /// SSM session ID negotiated for the tunnel (absent in older records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_session_id: Option<String>,
}

impl SessionRecord {
    /// Generate a fresh session ID
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Whether the record still names a live-looking process
    pub fn has_valid_pid(&self) -> bool {
        self.pid > 0
    }

    /// Whether the record has an associated kubeconfig path
    pub fn has_credential_file(&self) -> bool {
        !self.credential_file_path.as_os_str().is_empty()
    }
}
