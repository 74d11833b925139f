use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use super::super::IPCServer;
use crate::console::ConsoleHub;
use crate::supervisor::SupervisorError;

fn ensure_instance(state: &IPCServer, id: &str) -> Result<(), SupervisorError> {
    match state.supervisor.repository().get_instance(id)? {
        Some(_) => Ok(()),
        None => Err(SupervisorError::InstanceNotFound(id.to_string())),
    }
}

/// GET /api/instance/:id/console - 콘솔 WebSocket
///
/// Server → client: one text frame per console line, from the moment of
/// subscription on. Client → server: each text frame is a console command.
pub async fn console_socket(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<Response, SupervisorError> {
    ensure_instance(&state, &id)?;
    let hub = state.supervisor.hubs().get_or_create(&id);
    Ok(ws.on_upgrade(move |socket| handle_console(socket, hub, state)))
}

async fn handle_console(socket: WebSocket, hub: Arc<ConsoleHub>, state: IPCServer) {
    let instance_id = hub.instance_id().to_string();
    let mut subscription = match hub.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("Console socket for '{}' refused: {}", instance_id, e);
            return;
        }
    };
    let subscriber_id = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    // hub → socket
    let writer_id = instance_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(line) = subscription.recv().await {
            if sender.send(Message::Text(line)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        tracing::debug!("Console writer for '{}' ended", writer_id);
    });

    tracing::info!("Console viewer {} attached to '{}'", subscriber_id, instance_id);

    // socket → hub
    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = receiver.next() => {
                let msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!("Console socket error for '{}': {}", instance_id, e);
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => submit(&state, &hub, &text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    hub.unsubscribe(subscriber_id).await;
    writer.abort();
    tracing::info!("Console viewer {} detached from '{}'", subscriber_id, instance_id);
}

fn submit(state: &IPCServer, hub: &ConsoleHub, text: &str) {
    let command = text.trim();
    if command.is_empty() {
        return;
    }
    // 정지 상태에서 보낸 명령은 다음 시작 때 실행되지 않도록 버림
    if !state.supervisor.is_running(hub.instance_id()) {
        tracing::debug!("Dropping console command for stopped '{}'", hub.instance_id());
        return;
    }
    if let Err(e) = hub.submit_command(command) {
        tracing::warn!("{}", e);
    }
}

/// GET /api/instance/:id/console/history - 최근 콘솔 출력
pub async fn console_history(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    ensure_instance(&state, &id)?;
    let lines = match state.supervisor.hubs().get(&id) {
        Some(hub) => hub.history().await,
        None => Vec::new(),
    };
    Ok(Json(json!({ "instance_id": id, "lines": lines })))
}
