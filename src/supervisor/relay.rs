//! Byte pumps between a child process and its console hub.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::process::StdinHandle;
use crate::console::ConsoleHub;

/// Longest line relayed as one message. Longer output is split into chunks
/// of this size so a server printing without newlines cannot grow the
/// buffer without bound.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Forward every line of `stream` to `hub` until EOF.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte from the server does
/// not end the relay.
pub fn pump_output<R>(instance_id: &str, stream: R, hub: Arc<ConsoleHub>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match (&mut reader).take(MAX_LINE_BYTES as u64).read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => hub.broadcast(decode_line(&buf)).await,
                Err(e) => {
                    tracing::warn!("Output relay for '{}' failed: {}", instance_id, e);
                    break;
                }
            }
        }
        tracing::debug!("Output relay for '{}' finished", instance_id);
    })
}

/// Write commands submitted through the hub to the process stdin.
///
/// Ends when the hub stops, the queue closes, or stdin breaks.
pub fn pump_commands(
    instance_id: &str,
    mut commands: mpsc::Receiver<String>,
    stdin: StdinHandle,
    hub: Arc<ConsoleHub>,
) -> JoinHandle<()> {
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = hub.stopped() => break,
                next = commands.recv() => {
                    let Some(command) = next else { break };
                    let mut guard = stdin.lock().await;
                    if let Err(e) = write_line(&mut *guard, &command).await {
                        tracing::warn!("Command relay for '{}' lost stdin: {}", instance_id, e);
                        break;
                    }
                }
            }
        }
        tracing::debug!("Command relay for '{}' finished", instance_id);
    })
}

/// Write `text` followed by exactly one `\n`, then flush.
pub async fn write_line<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = text.trim_end_matches(['\r', '\n']).to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\r', '\n']).to_string()
}
