//! Supervisor 전용 에러 타입. 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

use crate::port::PortError;
use crate::runner::RunnerError;

/// Supervisor 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Server '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Port allocation failed: {0}")]
    Port(#[from] PortError),

    #[error("Cannot build launch command: {0}")]
    Runner(#[from] RunnerError),

    #[error("Java {major} runtime unavailable: {reason}")]
    Runtime { major: u32, reason: String },

    #[error("Failed to launch server '{id}': {reason}")]
    Spawn { id: String, reason: String },

    #[error("Failed to write to console of '{id}': {source}")]
    Stdin {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyRunning(_) | Self::NotRunning(_) => StatusCode::CONFLICT,
            Self::Port(PortError::InvalidRange { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Port(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Runner(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Runtime { .. } | Self::Spawn { .. } | Self::Stdin { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::NotRunning(_) => "NOT_RUNNING",
            Self::Port(_) => "PORT_UNAVAILABLE",
            Self::Runner(_) => "LAUNCH_FILES_MISSING",
            Self::Runtime { .. } => "RUNTIME_UNAVAILABLE",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::Stdin { .. } => "CONSOLE_WRITE_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
