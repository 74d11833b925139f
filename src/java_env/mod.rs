//! Java runtime resolution for launched servers.
//!
//! ## Lookup order
//! 1. Explicit override (`java_path` in config or `BLOCKHOST_JAVA_PATH`)
//! 2. `JAVA_HOME`
//! 3. `<runtimes_path>/java-<major>/**/bin/java`
//! 4. `java` on `PATH`
//!
//! Every candidate is checked with `java -version` and must report the
//! requested major version. Downloading runtimes is not handled here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::utils::apply_creation_flags;

pub const JAVA_PATH_ENV: &str = "BLOCKHOST_JAVA_PATH";

#[cfg(target_os = "windows")]
const JAVA_BIN: &str = "java.exe";
#[cfg(not(target_os = "windows"))]
const JAVA_BIN: &str = "java";

/// Collaborator that hands the supervisor an absolute path to a JVM.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    async fn ensure_runtime(&self, major: u32) -> Result<PathBuf>;
}

/// Java major version a Minecraft release needs.
///
/// 1.20.5 and newer → 21, 1.18 → 17, older → 8. Version schemes that do not
/// start with `1.` are treated as current and get 21.
pub fn required_java_major(game_version: &str) -> u32 {
    let mut parts = game_version.trim().split('.');
    let first: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    if first != 1 {
        return 21;
    }

    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    if minor >= 21 || (minor == 20 && patch >= 5) {
        21
    } else if minor >= 18 {
        17
    } else {
        8
    }
}

/// Resolves installed JVMs on the host.
#[derive(Debug, Clone)]
pub struct JavaRuntimes {
    runtimes_dir: PathBuf,
    override_path: Option<PathBuf>,
}

impl JavaRuntimes {
    pub fn new(runtimes_dir: impl Into<PathBuf>, override_path: Option<PathBuf>) -> Self {
        let override_path = override_path.or_else(|| std::env::var_os(JAVA_PATH_ENV).map(PathBuf::from));
        Self {
            runtimes_dir: runtimes_dir.into(),
            override_path,
        }
    }

    fn candidates(&self, major: u32) -> Vec<PathBuf> {
        let mut out = Vec::new();

        if let Some(p) = &self.override_path {
            out.push(java_in(p));
        }
        if let Some(home) = std::env::var_os("JAVA_HOME") {
            out.push(Path::new(&home).join("bin").join(JAVA_BIN));
        }

        let install_dir = self.runtimes_dir.join(format!("java-{}", major));
        out.push(install_dir.join("bin").join(JAVA_BIN));
        out.extend(find_java_bins(&install_dir));

        out.push(PathBuf::from(JAVA_BIN));
        out
    }
}

#[async_trait]
impl RuntimeProvider for JavaRuntimes {
    async fn ensure_runtime(&self, major: u32) -> Result<PathBuf> {
        for candidate in self.candidates(major) {
            match java_major_of(&candidate).await {
                Ok(found) if found == major => {
                    let path = if candidate.is_absolute() || candidate.components().count() > 1 {
                        std::path::absolute(&candidate).unwrap_or(candidate)
                    } else {
                        candidate
                    };
                    tracing::info!("Using Java {} at {}", major, path.display());
                    return Ok(path);
                }
                Ok(found) => {
                    tracing::debug!("{} is Java {}, need {}", candidate.display(), found, major);
                }
                Err(e) => tracing::debug!("{} unusable: {:#}", candidate.display(), e),
            }
        }

        Err(anyhow::anyhow!(
            "Java {} runtime not found (install it under {} or set {})",
            major,
            self.runtimes_dir.join(format!("java-{}", major)).display(),
            JAVA_PATH_ENV
        ))
    }
}

/// An override may point at a JDK directory or at the binary itself.
fn java_in(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join("bin").join(JAVA_BIN)
    } else {
        path.to_path_buf()
    }
}

/// Archives unpack into a versioned folder (`jdk-21.0.2+13-jre/bin/java`).
fn find_java_bins(install_dir: &Path) -> Vec<PathBuf> {
    if !install_dir.is_dir() {
        return Vec::new();
    }
    let pattern = format!("{}/**/bin/{}", glob::Pattern::escape(&install_dir.to_string_lossy()), JAVA_BIN);
    match glob::glob(&pattern) {
        Ok(paths) => paths.flatten().filter(|p| p.is_file()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn java_major_of(java: &Path) -> Result<u32> {
    let mut cmd = Command::new(java);
    cmd.arg("-version");
    apply_creation_flags(&mut cmd);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to run {} -version", java.display()))?;

    // java -version writes to stderr
    let text = String::from_utf8_lossy(&output.stderr);
    let first = text.lines().next().unwrap_or_default();
    parse_java_major(first).ok_or_else(|| anyhow::anyhow!("unrecognised java version output: {}", first))
}

/// `openjdk version "21.0.2" 2024-01-16` → 21, `java version "1.8.0_402"` → 8
fn parse_java_major(first_line: &str) -> Option<u32> {
    let ver = match first_line.split('"').nth(1) {
        Some(quoted) => quoted,
        None => first_line
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?,
    };

    let leading = |s: &str| -> Option<u32> {
        let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        s[..end].parse().ok()
    };

    match ver.strip_prefix("1.") {
        Some(rest) => leading(rest),
        None => leading(ver),
    }
}
