use std::path::Path;

use super::{heap_ceiling, split_custom_args, Invocation, RunnerError, RunnerKind, ServerRunner, HEAP_FLOOR};

const DEFAULT_JAR: &str = "server.jar";

/// Vanilla, Paper, Fabric and any unknown flavor: `java ... -jar server.jar nogui`.
#[derive(Debug, Clone)]
pub struct JarRunner {
    pub jar_name: String,
}

impl Default for JarRunner {
    fn default() -> Self {
        Self { jar_name: DEFAULT_JAR.to_string() }
    }
}

impl ServerRunner for JarRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Jar
    }

    fn build_invocation(
        &self,
        java_path: &Path,
        working_dir: &Path,
        ram_mb: u32,
        custom_args: &str,
    ) -> Result<Invocation, RunnerError> {
        let jar_name = if self.jar_name.is_empty() { DEFAULT_JAR } else { self.jar_name.as_str() };
        let jar_path = working_dir.join(jar_name);

        match std::fs::metadata(&jar_path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::JarNotFound(jar_path));
            }
            Err(e) => return Err(RunnerError::Io { path: jar_path, source: e }),
        }

        let mut args = vec![heap_ceiling(ram_mb), HEAP_FLOOR.to_string()];
        args.extend(split_custom_args(custom_args));
        args.extend(["-jar".to_string(), jar_name.to_string(), "nogui".to_string()]);

        Ok(Invocation {
            program: java_path.to_path_buf(),
            args,
            working_dir: working_dir.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_jar_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JarRunner::default()
            .build_invocation(Path::new("/usr/bin/java"), dir.path(), 2048, "")
            .unwrap_err();
        assert!(matches!(err, RunnerError::JarNotFound(p) if p == dir.path().join("server.jar")));
    }

    #[test]
    fn test_builds_jar_invocation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"jar").unwrap();

        let inv = JarRunner::default()
            .build_invocation(Path::new("/opt/java-21/bin/java"), dir.path(), 4096, "")
            .unwrap();

        assert_eq!(inv.program, PathBuf::from("/opt/java-21/bin/java"));
        assert_eq!(inv.working_dir, dir.path());
        assert_eq!(inv.args, vec!["-Xmx4096M", "-Xms512M", "-jar", "server.jar", "nogui"]);
    }

    #[test]
    fn test_custom_args_go_before_jar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"jar").unwrap();

        let inv = JarRunner::default()
            .build_invocation(Path::new("java"), dir.path(), 1024, "-XX:+UseG1GC -Dlog4j2.formatMsgNoLookups=true")
            .unwrap();

        assert_eq!(
            inv.args,
            vec![
                "-Xmx1024M",
                "-Xms512M",
                "-XX:+UseG1GC",
                "-Dlog4j2.formatMsgNoLookups=true",
                "-jar",
                "server.jar",
                "nogui"
            ]
        );
    }

    #[test]
    fn test_ceiling_below_floor_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.jar"), b"jar").unwrap();

        let inv = JarRunner::default().build_invocation(Path::new("java"), dir.path(), 256, "").unwrap();
        assert_eq!(&inv.args[..2], &["-Xmx256M", "-Xms512M"]);
    }
}
