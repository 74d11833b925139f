//! `server.properties` maintenance.

use std::fs;
use std::io;
use std::path::Path;

pub const PROPERTIES_FILE: &str = "server.properties";
pub const PORT_KEY: &str = "server-port";

/// Make the `server-port` line in `path` match `port`.
///
/// Other lines (comments included) keep their text and order. An existing
/// port line is replaced in place, otherwise one is appended. Returns
/// `false` when the file already had the right value and was left untouched.
pub fn ensure_port(path: &Path, port: u16) -> io::Result<bool> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let lines: Vec<&str> = content.lines().collect();
    let wanted = port.to_string();

    if lines.iter().any(|l| property_value(l) == Some(wanted.as_str())) {
        return Ok(false);
    }

    let mut replaced = false;
    let mut out: Vec<String> = lines
        .iter()
        .map(|line| {
            if property_value(line).is_some() {
                replaced = true;
                format!("{}={}", PORT_KEY, wanted)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        out.push(format!("{}={}", PORT_KEY, wanted));
    }

    let mut body = out.join("\n");
    body.push('\n');
    fs::write(path, body)?;
    Ok(true)
}

/// Value of a `server-port` line, or `None` for any other line.
fn property_value(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    (key.trim() == PORT_KEY).then(|| value.trim())
}
