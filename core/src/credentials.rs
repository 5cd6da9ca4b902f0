use serde::Deserialize;
use serde::Serialize;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialized form of the credential file. A missing file (or a file with
/// no token) means logged out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct AuthDotJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

/// Durable store for the bearer credential: one JSON file under the client
/// state directory, mirrored in memory so reads never touch disk. Writes
/// happen on login, refresh and logout only.
#[derive(Clone)]
pub struct CredentialStore {
    auth_file: PathBuf,
    cached: Arc<Mutex<Option<String>>>,
}

pub fn auth_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("auth.json")
}

impl CredentialStore {
    /// Loads any persisted credential from `state_dir`, creating the
    /// directory if needed.
    pub fn new(state_dir: &Path) -> Result<Self, CredentialError> {
        std::fs::create_dir_all(state_dir)?;
        let auth_file = auth_file_path(state_dir);
        let cached = match read_auth_json(&auth_file) {
            Ok(Some(auth)) => auth.access_token,
            Ok(None) => None,
            Err(err) => {
                tracing::warn!("ignoring unreadable credential file: {err}");
                None
            }
        };
        Ok(Self {
            auth_file,
            cached: Arc::new(Mutex::new(cached)),
        })
    }

    /// Current bearer token, if logged in.
    pub fn current(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }

    /// Persists a new token and updates the in-memory mirror.
    pub fn store(&self, token: &str) -> Result<(), CredentialError> {
        let auth = AuthDotJson {
            access_token: Some(token.to_string()),
        };
        write_auth_json(&self.auth_file, &auth)?;
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(token.to_string());
        }
        Ok(())
    }

    /// Deletes the persisted credential. Returns `Ok(true)` if a file was
    /// removed, `Ok(false)` if none was present.
    pub fn clear(&self) -> Result<bool, CredentialError> {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = None;
        }
        match std::fs::remove_file(&self.auth_file) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn read_auth_json(auth_file: &Path) -> Result<Option<AuthDotJson>, CredentialError> {
    let mut file = match File::open(auth_file) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let auth: AuthDotJson = serde_json::from_str(&contents)?;
    Ok(Some(auth))
}

fn write_auth_json(auth_file: &Path, auth: &AuthDotJson) -> Result<(), CredentialError> {
    let json_data = serde_json::to_string_pretty(auth)?;
    let mut options = OpenOptions::new();
    options.truncate(true).write(true).create(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(auth_file)?;
    file.write_all(json_data.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn roundtrips_the_token_through_disk() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path()).expect("store");
        assert_eq!(store.current(), None);
        assert!(!store.is_logged_in());

        store.store("bearer-token").expect("store token");
        assert_eq!(store.current(), Some("bearer-token".to_string()));

        // A fresh store over the same directory sees the persisted value.
        let reopened = CredentialStore::new(dir.path()).expect("reopen");
        assert_eq!(reopened.current(), Some("bearer-token".to_string()));
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path()).expect("store");
        store.store("t").expect("store token");
        assert!(store.clear().expect("clear"));
        assert_eq!(store.current(), None);
        assert!(!auth_file_path(dir.path()).exists());
        // Clearing again is a no-op.
        assert!(!store.clear().expect("clear"));
    }

    #[test]
    fn malformed_file_is_treated_as_logged_out() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(auth_file_path(dir.path()), "not json").expect("write");
        let store = CredentialStore::new(dir.path()).expect("store");
        assert_eq!(store.current(), None);
    }

    #[cfg(unix)]
    #[test]
    fn auth_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path()).expect("store");
        store.store("t").expect("store token");
        let mode = std::fs::metadata(auth_file_path(dir.path()))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
