//! AWS-backed remote access (EKS for cluster lookup, SSM for tunnels)

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ssm::error::DisplayErrorContext;
use tokio::sync::OnceCell;

use ekssm_core::{EkssmError, Result};

use super::{endpoint_host, ForwardTarget, NegotiatedSession, RemoteAccess, PORT_FORWARD_DOCUMENT};

/// EKS and SSM clients sharing one resolved SDK configuration
///
/// The SDK configuration is loaded on first use, so commands that never
/// reach AWS do not pay for credential and region resolution.
#[derive(Debug)]
pub struct AwsRemoteAccess {
    region_override: Option<String>,
    clients: OnceCell<Clients>,
}

#[derive(Debug)]
struct Clients {
    eks: aws_sdk_eks::Client,
    ssm: aws_sdk_ssm::Client,
    region: Option<String>,
}

impl AwsRemoteAccess {
    /// Use the standard AWS provider chain for credentials and region.
    ///
    /// `region_override` takes precedence over the environment and profile.
    pub fn new(region_override: Option<String>) -> Self {
        Self {
            region_override,
            clients: OnceCell::new(),
        }
    }

    async fn clients(&self) -> &Clients {
        self.clients
            .get_or_init(|| async {
                tracing::debug!("Initializing AWS clients");
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if let Some(region) = &self.region_override {
                    loader = loader.region(Region::new(region.clone()));
                }
                let sdk_config = loader.load().await;
                let region = sdk_config.region().map(|r| r.to_string());
                if region.is_none() {
                    tracing::warn!("No AWS region configured");
                }
                Clients {
                    eks: aws_sdk_eks::Client::new(&sdk_config),
                    ssm: aws_sdk_ssm::Client::new(&sdk_config),
                    region,
                }
            })
            .await
    }
}

#[async_trait]
impl RemoteAccess for AwsRemoteAccess {
    async fn region(&self) -> Option<String> {
        self.clients().await.region.clone()
    }

    async fn cluster_endpoint(&self, cluster_name: &str) -> Result<String> {
        if cluster_name.is_empty() {
            return Err(EkssmError::Config("cluster name is required".to_string()));
        }
        tracing::debug!("Fetching endpoint for EKS cluster {}", cluster_name);

        let output = self
            .clients()
            .await
            .eks
            .describe_cluster()
            .name(cluster_name)
            .send()
            .await
            .map_err(|e| {
                EkssmError::Negotiation(format!(
                    "failed to describe EKS cluster {}: {}",
                    cluster_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        let endpoint = output
            .cluster()
            .and_then(|cluster| cluster.endpoint())
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| {
                EkssmError::Negotiation(format!(
                    "EKS API returned no endpoint for cluster {}",
                    cluster_name
                ))
            })?;

        tracing::debug!("EKS API server endpoint: {}", endpoint);
        Ok(endpoint_host(endpoint).to_string())
    }

    async fn negotiate_session(&self, target: &ForwardTarget) -> Result<NegotiatedSession> {
        let output = self
            .clients()
            .await
            .ssm
            .start_session()
            .target(&target.instance_id)
            .document_name(PORT_FORWARD_DOCUMENT)
            .set_parameters(Some(target.document_parameters().into_iter().collect()))
            .send()
            .await
            .map_err(|e| {
                EkssmError::Negotiation(format!(
                    "failed to start SSM session via {}: {}",
                    target.instance_id,
                    DisplayErrorContext(&e)
                ))
            })?;

        let field = |value: Option<&str>, name: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| EkssmError::Negotiation(format!("StartSession returned no {}", name)))
        };

        Ok(NegotiatedSession {
            session_id: field(output.session_id(), "session ID")?,
            stream_url: field(output.stream_url(), "stream URL")?,
            token: field(output.token_value(), "token")?,
        })
    }

    async fn terminate_session(&self, session_id: &str) -> Result<()> {
        tracing::debug!("Terminating SSM session {}", session_id);
        self.clients()
            .await
            .ssm
            .terminate_session()
            .session_id(session_id)
            .send()
            .await
            .map_err(|e| {
                EkssmError::Negotiation(format!(
                    "failed to terminate SSM session {}: {}",
                    session_id,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
