//! Session Vault Module
//!
//! Persists the signed-in session between launches. The payload is sealed
//! with Windows DPAPI; other platforms store it unsealed.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::auth::Session;

const VAULT_FILE: &str = "session.dat";

/// Encrypted on-disk session slot
pub struct SessionVault {
    path: PathBuf,
}

impl SessionVault {
    /// Vault inside `dir`, created if missing.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Failed to create vault directory: {}", e);
        }
        debug!("Session vault at: {:?}", dir);

        Self {
            path: dir.join(VAULT_FILE),
        }
    }

    /// Vault in the per-user application data directory.
    pub fn in_app_data() -> Self {
        Self::new(app_data_dir())
    }

    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_vec(session)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let sealed = seal(&json)?;

        std::fs::write(&self.path, sealed).map_err(|e| StorageError::Io(e.to_string()))?;
        info!("Session saved for user: {}", session.user.user_id);
        Ok(())
    }

    /// Stored session, or `None` when the vault is empty.
    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        let sealed = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let json = unseal(&sealed)?;
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Stored session removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }
}

impl Default for SessionVault {
    fn default() -> Self {
        Self::in_app_data()
    }
}

/// Per-user data directory for this app
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("GeoTrack")
}

#[cfg(windows)]
fn seal(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    dpapi::transform(data, dpapi::Direction::Protect)
}

#[cfg(windows)]
fn unseal(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    dpapi::transform(data, dpapi::Direction::Unprotect)
}

#[cfg(not(windows))]
fn seal(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

#[cfg(not(windows))]
fn unseal(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    Ok(data.to_vec())
}

#[cfg(windows)]
mod dpapi {
    use super::StorageError;
    use windows::Win32::Foundation::{LocalFree, HLOCAL};
    use windows::Win32::Security::Cryptography::{
        CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
    };

    pub(super) enum Direction {
        Protect,
        Unprotect,
    }

    pub(super) fn transform(data: &[u8], direction: Direction) -> Result<Vec<u8>, StorageError> {
        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };
        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: std::ptr::null_mut(),
        };

        // SAFETY: `input` borrows `data` for the duration of the call and the
        // output buffer is allocated by the OS and released with LocalFree.
        unsafe {
            let result = match direction {
                Direction::Protect => CryptProtectData(
                    &input,
                    None,
                    None,
                    None,
                    None,
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                ),
                Direction::Unprotect => CryptUnprotectData(
                    &input,
                    None,
                    None,
                    None,
                    None,
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                ),
            };

            if result.is_err() {
                return Err(match direction {
                    Direction::Protect => StorageError::Encryption("DPAPI protect failed".into()),
                    Direction::Unprotect => {
                        StorageError::Decryption("DPAPI unprotect failed".into())
                    }
                });
            }

            let bytes = std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();
            LocalFree(HLOCAL(output.pbData as *mut std::ffi::c_void));
            Ok(bytes)
        }
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}
