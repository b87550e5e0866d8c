//! Generated kubeconfig files
//!
//! Every session gets its own kubeconfig under
//! `<base>/kubeconfigs/<cluster>/<session-id>.yaml`, pointing kubectl at the
//! local tunnel endpoint and delegating token acquisition to
//! `aws eks get-token`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{EkssmError, Result};

/// Derives and writes kubeconfig paths below a base directory
#[derive(Debug, Clone)]
pub struct CredentialFiles {
    base: PathBuf,
}

impl CredentialFiles {
    /// Create a manager rooted at `base` (normally `<base_dir>/kubeconfigs`)
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Kubeconfig path for a persistent session
    pub fn path_for_session(&self, cluster: &str, session_id: &str) -> PathBuf {
        self.base.join(cluster).join(format!("{}.yaml", session_id))
    }

    /// Kubeconfig path for an ephemeral `run`.
    ///
    /// Scoped by the current process ID so concurrent runs against the same
    /// cluster do not overwrite each other.
    pub fn path_for_run(&self, cluster: &str) -> PathBuf {
        self.base
            .join(cluster)
            .join(format!("run-{}.yaml", std::process::id()))
    }

    /// Write `content` to `path` with owner-only permissions.
    ///
    /// Parent directories are created as needed and an existing file is
    /// replaced via a temp file + rename.
    pub fn write(&self, path: &Path, content: &str) -> Result<()> {
        tracing::debug!("Writing kubeconfig to {:?}", path);
        write_private(path, content).map_err(|e| EkssmError::write(path, e))
    }

    /// Remove a kubeconfig, treating an already-absent file as success.
    ///
    /// Returns `true` if a file was deleted.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!("Removed kubeconfig {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Kubeconfig {:?} already removed", path);
                Ok(false)
            }
            Err(e) => Err(EkssmError::Io(e)),
        }
    }
}

/// Local endpoint URL for a tunnel bound to `port`
pub fn local_endpoint(port: u16) -> String {
    format!("https://localhost:{}", port)
}

/// Render a kubeconfig for `cluster_name` served at `endpoint`.
///
/// TLS verification is skipped because the certificate is issued for the
/// cluster's real hostname, not `localhost`.
pub fn generate(cluster_name: &str, endpoint: &str) -> String {
    format!(
        r#"apiVersion: v1
clusters:
- cluster:
    server: {endpoint}
    insecure-skip-tls-verify: true
  name: {cluster}
contexts:
- context:
    cluster: {cluster}
    user: aws
  name: {cluster}
current-context: {cluster}
kind: Config
preferences: {{}}
users:
- name: aws
  user:
    exec:
      apiVersion: client.authentication.k8s.io/v1beta1
      command: aws
      args:
        - eks
        - get-token
        - --cluster-name
        - {cluster}
"#,
        endpoint = endpoint,
        cluster = cluster_name
    )
}

fn write_private(path: &Path, content: &str) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = options.open(&temp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = result.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_contains_inputs() {
        let content = generate("test-cluster", "https://localhost:9443");
        assert!(content.contains("test-cluster"));
        assert!(content.contains("server: https://localhost:9443"));
        assert!(content.contains("get-token"));
        assert!(content.contains("preferences: {}"));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate("demo", &local_endpoint(12345));
        let b = generate("demo", &local_endpoint(12345));
        assert_eq!(a, b);
    }

    #[test]
    fn test_paths() {
        let files = CredentialFiles::new("/base/kubeconfigs");
        assert_eq!(
            files.path_for_session("demo", "abc"),
            PathBuf::from("/base/kubeconfigs/demo/abc.yaml")
        );
        let run = files.path_for_run("demo");
        assert!(run.starts_with("/base/kubeconfigs/demo"));
        assert_eq!(run, files.path_for_run("demo"));
        assert!(run
            .to_string_lossy()
            .contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_write_creates_dirs_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let files = CredentialFiles::new(dir.path());
        let path = files.path_for_session("write-test", "session-abc");

        files.write(&path, "apiVersion: v1\nkind: Config").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "apiVersion: v1\nkind: Config"
        );

        files.write(&path, "replaced").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "replaced");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let files = CredentialFiles::new(dir.path());
        let path = files.path_for_session("perm", "s");
        files.write(&path, "x").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let files = CredentialFiles::new(dir.path());
        let path = files.path_for_session("c", "s");

        assert!(!files.remove(&path).unwrap());
        files.write(&path, "x").unwrap();
        assert!(files.remove(&path).unwrap());
        assert!(!path.exists());
    }
}
