//! Remote-access capability
//!
//! Everything that talks to the cloud control plane (cluster lookup, tunnel
//! session negotiation and termination) goes through [`RemoteAccess`], so the
//! lifecycle logic can be driven by an in-process fake in tests.

mod aws;

pub use aws::AwsRemoteAccess;

use std::collections::BTreeMap;

use async_trait::async_trait;
use ekssm_core::Result;
use serde::Serialize;

/// SSM document that forwards a local port to a host reachable from the instance
pub const PORT_FORWARD_DOCUMENT: &str = "AWS-StartPortForwardingSessionToRemoteHost";

/// Where a tunnel forwards to, and through which instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Bastion instance the session is brokered through
    pub instance_id: String,
    /// Local port the forwarding plugin binds
    pub local_port: u16,
    /// Host reachable from the bastion (the cluster API endpoint)
    pub remote_host: String,
    /// Port on the remote host
    pub remote_port: u16,
}

impl ForwardTarget {
    /// Parameters for [`PORT_FORWARD_DOCUMENT`]
    pub fn document_parameters(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            (
                "localPortNumber".to_string(),
                vec![self.local_port.to_string()],
            ),
            ("host".to_string(), vec![self.remote_host.clone()]),
            ("portNumber".to_string(), vec![self.remote_port.to_string()]),
        ])
    }
}

/// Credentials for one negotiated tunnel session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSession {
    /// Remote session identifier, used for termination
    pub session_id: String,
    /// Data channel URL the plugin connects to
    pub stream_url: String,
    /// One-time connection token
    pub token: String,
}

/// Control-plane operations the lifecycle engine depends on
#[async_trait]
pub trait RemoteAccess: Send + Sync {
    /// Region passed to the forwarding plugin, if one is configured
    async fn region(&self) -> Option<String>;

    /// Resolve the API server host of `cluster_name` (scheme stripped)
    async fn cluster_endpoint(&self, cluster_name: &str) -> Result<String>;

    /// Open a port-forwarding session towards `target`
    async fn negotiate_session(&self, target: &ForwardTarget) -> Result<NegotiatedSession>;

    /// Terminate a previously negotiated session
    async fn terminate_session(&self, session_id: &str) -> Result<()>;
}

/// JSON argument understood by the forwarding plugin
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PluginSessionInput<'a> {
    pub target: &'a str,
    pub document_name: &'a str,
    pub parameters: BTreeMap<String, Vec<String>>,
    pub session_id: &'a str,
    pub stream_url: &'a str,
    pub token_value: &'a str,
}

impl<'a> PluginSessionInput<'a> {
    pub(crate) fn new(target: &'a ForwardTarget, session: &'a NegotiatedSession) -> Self {
        Self {
            target: &target.instance_id,
            document_name: PORT_FORWARD_DOCUMENT,
            parameters: target.document_parameters(),
            session_id: &session.session_id,
            stream_url: &session.stream_url,
            token_value: &session.token,
        }
    }
}

/// Strip the scheme from a cluster endpoint URL
pub fn endpoint_host(endpoint: &str) -> &str {
    endpoint.strip_prefix("https://").unwrap_or(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ForwardTarget {
        ForwardTarget {
            instance_id: "i-abc".to_string(),
            local_port: 9443,
            remote_host: "ABC.gr7.eu-west-1.eks.amazonaws.com".to_string(),
            remote_port: 443,
        }
    }

    #[test]
    fn test_document_parameters() {
        let params = target().document_parameters();
        assert_eq!(params["localPortNumber"], vec!["9443"]);
        assert_eq!(params["host"], vec!["ABC.gr7.eu-west-1.eks.amazonaws.com"]);
        assert_eq!(params["portNumber"], vec!["443"]);
    }

    #[test]
    fn test_plugin_input_field_names() {
        let target = target();
        let session = NegotiatedSession {
            session_id: "sess-1".to_string(),
            stream_url: "wss://example".to_string(),
            token: "tok".to_string(),
        };
        let json = serde_json::to_value(PluginSessionInput::new(&target, &session)).unwrap();
        assert_eq!(json["Target"], "i-abc");
        assert_eq!(json["DocumentName"], PORT_FORWARD_DOCUMENT);
        assert_eq!(json["SessionId"], "sess-1");
        assert_eq!(json["StreamUrl"], "wss://example");
        assert_eq!(json["TokenValue"], "tok");
        assert_eq!(json["Parameters"]["host"][0], target.remote_host);
    }

    #[test]
    fn test_endpoint_host() {
        assert_eq!(endpoint_host("https://abc.eks.amazonaws.com"), "abc.eks.amazonaws.com");
        assert_eq!(endpoint_host("abc.eks.amazonaws.com"), "abc.eks.amazonaws.com");
    }
}
