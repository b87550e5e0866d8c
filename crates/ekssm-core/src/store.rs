//! Persistent session state
//!
//! Sessions are stored as one JSON document in `<base_dir>/sessions.json`,
//! created empty on first access and rewritten wholesale on every mutation. Each load-mutate-save cycle runs
//! under an in-process mutex and a cross-process [`FileLock`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Config;
use crate::error::{EkssmError, Result};
use crate::lock::FileLock;
use crate::types::{SessionMap, SessionRecord};

/// File-backed map from session ID to [`SessionRecord`]
#[derive(Debug)]
pub struct SessionStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    mutex: Mutex<()>,
}

/// Both locks held for one critical section
struct Critical<'a> {
    _process: MutexGuard<'a, ()>,
    _file: FileLock,
}

impl SessionStore {
    /// Create a store using the paths derived from `config`
    pub fn new(config: &Config) -> Self {
        Self::with_paths(config.state_path(), config.lock_path(), config.lock_timeout)
    }

    /// Create a store with explicit state and lock paths
    pub fn with_paths(
        state_path: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            lock_path: lock_path.into(),
            lock_timeout,
            mutex: Mutex::new(()),
        }
    }

    /// Path of the backing state file
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Insert or overwrite a record keyed by its session ID
    pub fn add(&self, record: SessionRecord) -> Result<()> {
        if record.session_id.is_empty() {
            return Err(EkssmError::Validation(
                "session ID cannot be empty".to_string(),
            ));
        }

        let _critical = self.enter()?;
        let mut sessions = self.load()?;
        let id = record.session_id.clone();
        sessions.insert(id.clone(), record);
        self.save(&sessions)?;
        tracing::debug!("Added session {} to state", id);
        Ok(())
    }

    /// Remove a record; removing an unknown ID is a no-op
    pub fn remove(&self, session_id: &str) -> Result<()> {
        if session_id.is_empty() {
            return Err(EkssmError::Validation(
                "session ID cannot be empty".to_string(),
            ));
        }

        let _critical = self.enter()?;
        let mut sessions = self.load()?;
        if sessions.remove(session_id).is_none() {
            tracing::debug!("Session {} not present in state, nothing to remove", session_id);
            return Ok(());
        }
        self.save(&sessions)?;
        tracing::debug!("Removed session {} from state", session_id);
        Ok(())
    }

    /// Look up one record
    pub fn get(&self, session_id: &str) -> Result<SessionRecord> {
        let _critical = self.enter()?;
        self.load()?
            .remove(session_id)
            .ok_or_else(|| EkssmError::NotFound(session_id.to_string()))
    }

    /// All records, keyed by session ID
    pub fn get_all(&self) -> Result<SessionMap> {
        let _critical = self.enter()?;
        self.load()
    }

    /// Persist an empty map
    pub fn clear_all(&self) -> Result<()> {
        let _critical = self.enter()?;
        self.save(&SessionMap::new())?;
        tracing::debug!("Cleared all sessions from state");
        Ok(())
    }

    fn enter(&self) -> Result<Critical<'_>> {
        // The guarded value is `()`, so a poisoned mutex carries no broken state.
        let process = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let file = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        Ok(Critical {
            _process: process,
            _file: file,
        })
    }

    fn load(&self) -> Result<SessionMap> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let sessions = SessionMap::new();
                self.save(&sessions)?;
                tracing::debug!("Created empty state file {:?}", self.state_path);
                return Ok(sessions);
            }
            Err(e) => {
                return Err(EkssmError::State {
                    path: self.state_path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(SessionMap::new());
        }

        serde_json::from_str(&content).map_err(|e| EkssmError::State {
            path: self.state_path.clone(),
            reason: e.to_string(),
        })
    }

    fn save(&self, sessions: &SessionMap) -> Result<()> {
        let content = serde_json::to_string_pretty(sessions).map_err(|e| EkssmError::State {
            path: self.state_path.clone(),
            reason: format!("failed to serialize sessions: {}", e),
        })?;

        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EkssmError::write(parent, e))?;
        }

        // Write to a temp file first, then rename over the state file
        let temp_path = self.state_path.with_extension("json.tmp");
        let written = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&temp_path, &self.state_path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(EkssmError::write(&self.state_path, e));
        }
        Ok(())
    }
}
