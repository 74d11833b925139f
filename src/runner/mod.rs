//! Launch strategies: how a server flavor turns into a JVM invocation.
//!
//! Two families exist: modded loaders that ship a `libraries/` tree with an
//! argument manifest, and everything else, which runs a single `server.jar`.

pub mod jar;
pub mod modded;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;

pub use jar::JarRunner;
pub use modded::ModdedRunner;

/// Floor heap size passed as `-Xms`. Not validated against the ceiling.
pub const HEAP_FLOOR: &str = "-Xms512M";

/// Console command every supported flavor understands as graceful shutdown.
pub const SHUTDOWN_COMMAND: &str = "stop";

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("server jar not found at {0}")]
    JarNotFound(PathBuf),

    #[error("libraries directory not found in {0} (required for Forge/NeoForge)")]
    LibrariesNotFound(PathBuf),

    #[error("args file {name} not found in {dir}")]
    ManifestNotFound { name: &'static str, dir: PathBuf },

    #[error("error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Jar,
    Modded,
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl Invocation {
    /// Build a `tokio` command with piped stdio, ready to spawn.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);
        crate::utils::apply_creation_flags(&mut cmd);
        cmd
    }
}

pub trait ServerRunner: Send + Sync {
    fn kind(&self) -> RunnerKind;

    fn build_invocation(
        &self,
        java_path: &Path,
        working_dir: &Path,
        ram_mb: u32,
        custom_args: &str,
    ) -> Result<Invocation, RunnerError>;

    /// Line written to stdin to ask the server to shut down.
    fn shutdown_command(&self) -> &'static str {
        SHUTDOWN_COMMAND
    }
}

/// Pick the launch strategy for a loader tag.
///
/// Unknown tags fall back to the single-jar runner, so a new flavor still
/// launches as long as a `server.jar` is present.
pub fn select_runner(loader: &str) -> Box<dyn ServerRunner> {
    match loader.to_ascii_lowercase().as_str() {
        "forge" | "neoforge" => Box::new(ModdedRunner),
        "vanilla" | "paper" | "fabric" => Box::new(JarRunner::default()),
        other => {
            tracing::debug!("Unknown loader '{}', using single-jar runner", other);
            Box::new(JarRunner::default())
        }
    }
}

fn heap_ceiling(ram_mb: u32) -> String {
    format!("-Xmx{}M", ram_mb)
}

fn split_custom_args(custom_args: &str) -> impl Iterator<Item = String> + '_ {
    custom_args.split_whitespace().map(str::to_string)
}
