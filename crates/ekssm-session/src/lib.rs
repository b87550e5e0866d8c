//! ekssm-session: Tunnel session lifecycle for ekssm
//!
//! Opens SSM port-forwarding tunnels to private EKS API endpoints, records
//! them in the session store, and tears them down again, compensating for
//! partial failures and honouring cancellation from OS signals.

pub mod orchestrator;
pub mod remote;
pub mod signal;
pub mod tunnel;

pub use orchestrator::{SessionOrchestrator, SessionTarget, StartedSession, KUBECONFIG_ENV};
pub use remote::{AwsRemoteAccess, ForwardTarget, NegotiatedSession, RemoteAccess};
pub use signal::spawn_signal_listener;
pub use tunnel::{TunnelOptions, TunnelProcess, TunnelState};
