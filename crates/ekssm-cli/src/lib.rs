//! ekssm: Command-line interface for the ekssm session lifecycle engine
//!
//! Provides the `ekssm` CLI for starting, listing, switching and stopping
//! tunnel sessions to private EKS clusters, and for running one-off commands
//! through an ephemeral tunnel.

pub mod commands;
pub mod output;
