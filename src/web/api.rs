//! Defines the Axum API routes and handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::arm::{ArmError, ArmHandle};
use crate::command::{parse_command, DirectCommand, Intent};
use crate::hardware::EncoderReadings;
use crate::motion::MoveRequest;
use crate::telemetry::Telemetry;
use crate::web::models::{CommandRequest, CommandResponse, ErrorResponse};
use crate::web::ws::ws_handler;

pub type AppState = ArmHandle;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(handle: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/encoders", get(get_encoders))
        .route("/api/v1/command", post(post_command))
        .route("/api/v1/move", post(post_move))
        .route("/api/v1/direct", post(post_direct))
        .route("/api/v1/calibrate", post(post_calibrate))
        .route("/api/v1/stop", post(post_stop))
        .route("/api/v1/resume", post(post_resume))
        .route("/ws", get(ws_handler))
        .with_state(handle)
}

/// Error wrapper mapping the arm taxonomy onto HTTP status codes.
pub struct ApiError(pub ArmError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArmError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            ArmError::Unreachable { .. }
            | ArmError::ExceedsSafeReach { .. }
            | ArmError::JointLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ArmError::Halted => StatusCode::CONFLICT,
            ArmError::ControlLoopClosed => StatusCode::SERVICE_UNAVAILABLE,
            ArmError::ConvergenceTimeout { .. } | ArmError::Hardware(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.0.name().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ArmError> for ApiError {
    fn from(e: ArmError) -> Self {
        ApiError(e)
    }
}

/// Handler to get the latest telemetry with live encoder readings.
async fn get_status(State(handle): State<AppState>) -> Json<Telemetry> {
    Json(handle.snapshot())
}

async fn get_encoders(State(handle): State<AppState>) -> Json<EncoderReadings> {
    Json(handle.encoder_readings())
}

/// Handler to execute a single textual command.
async fn post_command(
    State(handle): State<AppState>,
    Json(payload): Json<CommandRequest>,
) -> Result<Response, ApiError> {
    let intent = parse_command(&payload.command)?;
    if intent == Intent::Stop {
        return Ok(stop(&handle)?);
    }
    Ok(run(&handle, intent).await?.into_response())
}

async fn post_move(
    State(handle): State<AppState>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    run(&handle, Intent::MoveTo(request)).await
}

async fn post_direct(
    State(handle): State<AppState>,
    Json(command): Json<DirectCommand>,
) -> Result<Json<CommandResponse>, ApiError> {
    run(&handle, Intent::DirectControl(command)).await
}

async fn post_calibrate(State(handle): State<AppState>) -> Result<Json<CommandResponse>, ApiError> {
    run(&handle, Intent::Calibrate).await
}

async fn post_resume(State(handle): State<AppState>) -> Result<Json<CommandResponse>, ApiError> {
    run(&handle, Intent::Resume).await
}

/// Stop is acknowledged as soon as the flag is raised.
async fn post_stop(State(handle): State<AppState>) -> Result<Response, ApiError> {
    stop(&handle)
}

fn stop(handle: &ArmHandle) -> Result<Response, ApiError> {
    handle.emergency_stop()?;
    Ok((StatusCode::ACCEPTED, Json(handle.snapshot())).into_response())
}

async fn run(handle: &ArmHandle, intent: Intent) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = handle.execute(intent).await?;
    Ok(Json(CommandResponse {
        outcome,
        telemetry: handle.snapshot(),
    }))
}
