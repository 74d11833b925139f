use std::path::{Path, PathBuf};

use super::{heap_ceiling, split_custom_args, Invocation, RunnerError, RunnerKind, ServerRunner, HEAP_FLOOR};

#[cfg(target_os = "windows")]
pub const MANIFEST_NAME: &str = "win_args.txt";
#[cfg(not(target_os = "windows"))]
pub const MANIFEST_NAME: &str = "unix_args.txt";

const USER_JVM_ARGS: &str = "user_jvm_args.txt";

/// Forge / NeoForge: the classpath lives in an `@file` manifest under `libraries/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModdedRunner;

impl ServerRunner for ModdedRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Modded
    }

    fn build_invocation(
        &self,
        java_path: &Path,
        working_dir: &Path,
        ram_mb: u32,
        custom_args: &str,
    ) -> Result<Invocation, RunnerError> {
        let libraries = working_dir.join("libraries");
        if !libraries.is_dir() {
            return Err(RunnerError::LibrariesNotFound(libraries));
        }

        let manifest = find_manifest(&libraries)?.ok_or_else(|| RunnerError::ManifestNotFound {
            name: MANIFEST_NAME,
            dir: libraries.clone(),
        })?;

        let mut args = vec![heap_ceiling(ram_mb), HEAP_FLOOR.to_string()];

        let user_jvm_args = working_dir.join(USER_JVM_ARGS);
        if user_jvm_args.is_file() {
            args.push(format!("@{}", user_jvm_args.display()));
        }

        args.extend(split_custom_args(custom_args));
        args.push(format!("@{}", manifest.display()));
        args.push("nogui".to_string());

        Ok(Invocation {
            program: java_path.to_path_buf(),
            args,
            working_dir: working_dir.to_path_buf(),
        })
    }
}

/// Recursively search `libraries` for the platform manifest. First hit wins.
fn find_manifest(libraries: &Path) -> Result<Option<PathBuf>, RunnerError> {
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&libraries.to_string_lossy()),
        MANIFEST_NAME
    );

    let entries = glob::glob(&pattern).map_err(|e| RunnerError::Io {
        path: libraries.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })?;

    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => return Ok(Some(path)),
            Ok(_) => {}
            Err(e) => tracing::debug!("Skipping unreadable library entry: {}", e),
        }
    }
    Ok(None)
}
