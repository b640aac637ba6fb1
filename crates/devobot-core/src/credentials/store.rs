/// Session-scoped storage for the cached credential
///
/// Backends:
/// - `MemoryTokenStore`: lives as long as the process
/// - `SessionFileTokenStore`: one JSON record under the login session's
///   runtime directory, shared by every instance started in that session
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use super::credential::Credential;
use crate::error::ClientError;

const STORE_DIR: &str = "devobot";
const STORE_FILE: &str = "credential.json";

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, ClientError>;
    fn save(&self, credential: &Credential) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>, ClientError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), ClientError> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot.lock() = None;
        Ok(())
    }
}

pub struct SessionFileTokenStore {
    path: PathBuf,
}

impl SessionFileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store in `$XDG_RUNTIME_DIR/devobot/credential.json` (temp dir if unset)
    pub fn in_runtime_dir() -> Self {
        Self::new(runtime_dir().join(STORE_DIR).join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory whose lifetime matches the user's login session
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn store_error(action: &str, path: &Path, err: impl std::fmt::Display) -> ClientError {
    ClientError::TokenStore(format!("failed to {} {}: {}", action, path.display(), err))
}

impl TokenStore for SessionFileTokenStore {
    fn load(&self) -> Result<Option<Credential>, ClientError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("read", &self.path, e)),
        };

        match serde_json::from_str(&contents) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // A broken record means a fresh exchange, not a hard failure
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt credential record");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| store_error("create", parent, e))?;
        }

        let json = serde_json::to_string(credential)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| store_error("write", &tmp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| store_error("protect", &tmp_path, e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| store_error("replace", &self.path, e))
    }

    fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already gone is success
            Err(e) => Err(store_error("remove", &self.path, e)),
        }
    }
}
