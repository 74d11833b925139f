use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::super::{CommandRequest, IPCServer, InstanceInfo, InstanceListResponse};
use crate::supervisor::SupervisorError;

/// GET /api/instances - 모든 인스턴스 목록 (실행 여부 포함)
pub async fn list_instances(State(state): State<IPCServer>) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = &state.supervisor;
    let instances = supervisor
        .repository()
        .list_instances()?
        .into_iter()
        .map(|instance| InstanceInfo {
            running: supervisor.is_running(&instance.id),
            instance,
        })
        .collect();

    Ok(Json(InstanceListResponse { instances }))
}

/// POST /api/instance/:id/start - 서버 시작
pub async fn start_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let launch = state.supervisor.start(&id).await?;
    Ok(Json(json!({
        "success": true,
        "instance_id": launch.instance_id,
        "pid": launch.pid,
        "port": launch.port,
        "java_major": launch.java_major,
    })))
}

/// POST /api/instance/:id/stop - 정상 종료 요청 (stop 명령 전송)
pub async fn stop_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    state.supervisor.stop(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "message": format!("Stop requested for '{}'", id) })),
    ))
}

/// POST /api/instance/:id/kill - 강제 종료
pub async fn kill_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    state.supervisor.kill(&id)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}

/// POST /api/instance/:id/command - 콘솔 명령어 전송
pub async fn execute_command(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(req): Json<CommandRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    state.supervisor.send_command(&id, &req.command).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/instance/:id/stats
pub async fn instance_stats(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    Ok(Json(state.supervisor.stats(&id).await?))
}
