//! PID file management.
//!
//! The daemon writes its PID into the user's runtime directory (temp
//! directory as a fallback) so the out-of-process `reload` command can find
//! it and deliver SIGHUP.

use std::fs;
use std::path::{Path, PathBuf};

const PID_FILE_NAME: &str = "nginxops.pid";

/// `<dir>/nginxops.pid` without touching the filesystem.
pub fn pid_file_path_at(dir: &Path) -> PathBuf {
    dir.join(PID_FILE_NAME)
}

/// PID file directory: `$XDG_RUNTIME_DIR` when available, temp dir otherwise.
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// PID file location in the default runtime directory.
pub fn pid_file_path() -> PathBuf {
    pid_file_path_at(&runtime_dir())
}

/// Write the current process id into the default runtime directory.
pub fn write_pid_file() -> std::io::Result<PathBuf> {
    write_pid_file_at(&runtime_dir())
}

/// Read the PID recorded in the default runtime directory.
pub fn read_pid() -> std::io::Result<i32> {
    read_pid_at(&runtime_dir())
}

/// Remove the PID file from the default runtime directory.
pub fn remove_pid_file() {
    remove_pid_file_at(&runtime_dir())
}

/// Write the current process id. Returns the path written.
pub fn write_pid_file_at(dir: &Path) -> std::io::Result<PathBuf> {
    let path = pid_file_path_at(dir);
    fs::write(&path, std::process::id().to_string())?;
    Ok(path)
}

/// Read and parse the PID recorded at `dir`.
pub fn read_pid_at(dir: &Path) -> std::io::Result<i32> {
    let path = pid_file_path_at(dir);
    let contents = fs::read_to_string(&path)?;
    contents
        .trim()
        .parse()
        .map_err(|err| std::io::Error::other(format!("invalid PID in {}: {err}", path.display())))
}

/// Remove the PID file, ignoring a missing one.
pub fn remove_pid_file_at(dir: &Path) {
    let path = pid_file_path_at(dir);
    if let Err(err) = fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove PID file");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn write_read_remove_round_trip() {
        let dir = TempDir::new().expect("dir");
        let path = write_pid_file_at(dir.path()).expect("write");
        assert!(path.exists());

        let pid = read_pid_at(dir.path()).expect("read");
        assert_eq!(pid as u32, std::process::id());

        remove_pid_file_at(dir.path());
        assert!(!path.exists());
    }

    #[test]
    fn read_missing_pid_file_is_an_error() {
        let dir = TempDir::new().expect("dir");
        assert!(read_pid_at(dir.path()).is_err());
    }

    #[test]
    fn read_garbage_pid_is_an_error() {
        let dir = TempDir::new().expect("dir");
        fs::write(pid_file_path_at(dir.path()), "not-a-pid").expect("write");
        assert!(read_pid_at(dir.path()).is_err());
    }
}
