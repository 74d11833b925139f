//! Shared helpers for the blockhost daemon.

use std::path::Path;

use tokio::process::Command;

/// Apply platform-specific flags to hide the console window on Windows.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// Total size in bytes of every regular file under `dir`.
/// Unreadable entries count as zero; symlinks are not followed.
pub fn dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        } else if file_type.is_dir() {
            total += dir_size(&entry.path());
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_size_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), vec![0u8; 1000]).unwrap();
        std::fs::create_dir_all(dir.path().join("world/region")).unwrap();
        std::fs::write(dir.path().join("world/region/r.0.0.mca"), vec![0u8; 24]).unwrap();

        assert_eq!(dir_size(dir.path()), 1024);
    }

    #[test]
    fn test_dir_size_missing_dir_is_zero() {
        assert_eq!(dir_size(Path::new("/definitely/not/here")), 0);
    }
}
