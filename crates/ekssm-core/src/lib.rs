//! ekssm-core: Core types, configuration and persisted state for ekssm
//!
//! This crate provides the leaf components of the session lifecycle engine:
//! the error taxonomy, configuration, session records and their on-disk
//! store, local port allocation, and generated kubeconfig files.

pub mod config;
pub mod credentials;
pub mod error;
pub mod lock;
pub mod port;
pub mod process;
pub mod store;
pub mod types;

pub use config::Config;
pub use credentials::CredentialFiles;
pub use error::{EkssmError, Result};
pub use store::SessionStore;
pub use types::{SessionMap, SessionRecord};
