//! Local port allocation and readiness probing
//!
//! Ports handed out by [`find_available_port`] are not reserved: another
//! process can claim the port between the probe listener closing and the
//! forwarding plugin binding it.

use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

use crate::error::{EkssmError, Result};

/// Readiness probe timing
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Overall deadline
    pub timeout: Duration,
    /// Delay between attempts
    pub retry_interval: Duration,
    /// Per-attempt connect timeout
    pub connect_timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(300),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::Config> for WaitOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            timeout: config.port_wait_timeout,
            retry_interval: config.port_retry_interval,
            connect_timeout: config.port_connect_timeout,
        }
    }
}

/// Ask the OS for a free loopback port
pub fn find_available_port() -> Result<u16> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(EkssmError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(EkssmError::PortAllocation)?
        .port();
    drop(listener);
    tracing::debug!("Allocated local port {}", port);
    Ok(port)
}

/// Interpret a user-supplied `--local-port` value.
///
/// Empty and `"0"` mean "allocate dynamically" and yield `None`.
pub fn parse_local_port(value: Option<&str>) -> Result<Option<u16>> {
    match value.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(raw) => raw
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .map(Some)
            .ok_or_else(|| EkssmError::Config(format!("invalid local port '{}'", raw))),
    }
}

/// Use the requested port or allocate one
pub fn resolve_port(requested: Option<u16>) -> Result<u16> {
    match requested {
        Some(port) => {
            tracing::info!("Using user-specified local port: {}", port);
            Ok(port)
        }
        None => {
            let port = find_available_port()?;
            tracing::info!("Using dynamically allocated local port: {}", port);
            Ok(port)
        }
    }
}

/// Poll `localhost:port` until a TCP connection succeeds or the deadline passes
pub async fn wait_for_port(port: u16, opts: WaitOptions) -> Result<()> {
    let deadline = Instant::now() + opts.timeout;
    let mut last_error = String::from("no connection attempt completed");

    tracing::debug!(
        "Waiting for port {} to become available (timeout: {:?})",
        port,
        opts.timeout
    );

    while Instant::now() < deadline {
        match timeout(opts.connect_timeout, TcpStream::connect(("localhost", port))).await {
            Ok(Ok(_stream)) => {
                tracing::debug!("Port {} is now available", port);
                return Ok(());
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("connect timed out after {:?}", opts.connect_timeout),
        }
        tracing::debug!("Port {} not ready yet, retrying: {}", port, last_error);
        sleep(opts.retry_interval).await;
    }

    Err(EkssmError::Timeout {
        port,
        timeout: opts.timeout,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(600),
            retry_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_found_port_can_be_bound() {
        let port = find_available_port().unwrap();
        assert_ne!(port, 0);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_parse_local_port() {
        assert_eq!(parse_local_port(None).unwrap(), None);
        assert_eq!(parse_local_port(Some("")).unwrap(), None);
        assert_eq!(parse_local_port(Some("0")).unwrap(), None);
        assert_eq!(parse_local_port(Some("9443")).unwrap(), Some(9443));
        assert!(parse_local_port(Some("abc")).is_err());
        assert!(parse_local_port(Some("70000")).is_err());
    }

    #[test]
    fn test_resolve_port_keeps_explicit() {
        assert_eq!(resolve_port(Some(8443)).unwrap(), 8443);
        assert_ne!(resolve_port(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_port(port, fast()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_closed_port_times_out() {
        let port = find_available_port().unwrap();
        let err = wait_for_port(port, fast()).await.unwrap_err();
        match err {
            EkssmError::Timeout { port: p, .. } => assert_eq!(p, port),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
