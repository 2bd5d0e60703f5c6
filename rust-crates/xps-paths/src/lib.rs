//! Filesystem locations shared by the XPS daemon and listener.
//!
//! # Platform Behavior
//!
//! | Platform | Data Directory | Socket Directory |
//! |----------|----------------|------------------|
//! | Linux    | `~/.local/share/xps-stream` | `$XDG_RUNTIME_DIR` or data dir |
//! | macOS    | `~/Library/Application Support/xps-stream` | Same as data dir |
//! | Windows  | `%APPDATA%/xps-stream` | Same as data dir |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Errors specific to path resolution.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("Could not determine config directory")]
    NoConfigDirectory,
}

/// Application identifier used in path construction.
const APP_NAME: &str = "xps-stream";

/// Socket the instrument process writes run events to.
const INGEST_SOCKET_NAME: &str = "xps.sock";

/// SQLite file holding the durable run store.
const STORE_DB_NAME: &str = "runs.db";

/// Create `dir` (and parents) if missing, owner-only on Unix.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms)
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Get the application data directory, creating it if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().ok_or(PathError::NoDataDirectory)?;
    let data_dir = base_dir.join(APP_NAME);
    ensure_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Get the directory holding IPC sockets.
///
/// On Linux `$XDG_RUNTIME_DIR` is preferred; every other platform falls back
/// to the data directory.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.exists() {
                return Ok(runtime_dir);
            }
        }
    }

    get_data_dir()
}

/// Path of the instrument ingest socket.
pub fn get_ingest_socket_path() -> Result<PathBuf> {
    Ok(get_socket_dir()?.join(INGEST_SOCKET_NAME))
}

/// Get the configuration directory.
///
/// # Platform Behavior
/// - **Linux**: `~/.config/xps-stream`
/// - **macOS/Windows**: the data directory
pub fn get_config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let config_base = dirs::config_dir().ok_or(PathError::NoConfigDirectory)?;
        let config_dir = config_base.join(APP_NAME);
        ensure_private_dir(&config_dir)?;
        Ok(config_dir)
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Directory for the durable run store (`<data_dir>/store`).
pub fn get_store_dir() -> Result<PathBuf> {
    let store_dir = get_data_dir()?.join("store");
    ensure_private_dir(&store_dir)?;
    Ok(store_dir)
}

/// Default SQLite database path for the run store.
pub fn get_store_db_path() -> Result<PathBuf> {
    Ok(get_store_dir()?.join(STORE_DB_NAME))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or(PathError::NoHomeDirectory)?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Restrict a Unix socket to its owner (0o600). No-op elsewhere.
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(socket_path, perms).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}
