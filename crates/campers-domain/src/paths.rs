//! Locations of campers' persistent state on disk.
//!
//! `$CAMPERS_DIR` (default `~/.campers`) holds `keys/` (private PEMs),
//! `sessions/` (supervisor session records), and `logs/`.

use std::path::PathBuf;

pub fn campers_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CAMPERS_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".campers")
}

pub fn keys_dir() -> PathBuf {
    campers_dir().join("keys")
}

pub fn sessions_dir() -> PathBuf {
    campers_dir().join("sessions")
}

pub fn logs_dir() -> PathBuf {
    campers_dir().join("logs")
}

/// Private key path for one supervisor invocation's unique id.
pub fn key_file(unique_id: &str) -> PathBuf {
    keys_dir().join(format!("{}.pem", unique_id))
}
