use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{catch, get, post, Request, State};
use serde_json::Value;

use crate::app_state::{AppState, SegmentJob};
use crate::engine::{AutomaticJob, PromptJob};
use crate::error::ApiError;
use crate::types::{ErrorDetail, HealthResponse, ProjectListing, SegmentRequest};

#[get("/health")]
pub fn health(state: &State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        engine: state.engine.name().to_string(),
        available_workers: state.available_workers(),
    })
}

/// Lists the detection artifacts of one project. Runs on the request task.
#[get("/predictions?<project_id>")]
pub fn list_predictions(
    state: &State<AppState>,
    project_id: Option<String>,
) -> Result<Json<ProjectListing>, ApiError> {
    let project_id = project_id.unwrap_or_default();
    let listing = state.artifacts.list_project(&project_id)?;
    Ok(Json(listing))
}

#[post("/segment_automatic", data = "<req>")]
pub async fn segment_automatic(
    state: &State<AppState>,
    req: Json<SegmentRequest>,
) -> Result<Json<Value>, ApiError> {
    let req = req.into_inner();
    let zoom = req.zoom.coerce().map_err(ApiError::Validation)?;

    let job = SegmentJob::Automatic(AutomaticJob {
        bbox: req.bbox,
        zoom,
        id: req.id,
        project: req.project,
    });
    let outcome = state.dispatch(job).await?;
    Ok(Json(outcome.into_body()))
}

#[post("/segment_predictor", data = "<req>")]
pub async fn segment_predictor(
    state: &State<AppState>,
    req: Json<SegmentRequest>,
) -> Result<Json<Value>, ApiError> {
    let req = req.into_inner();
    let zoom = req.zoom.coerce().map_err(ApiError::Validation)?;

    let job = SegmentJob::Prompted(PromptJob {
        bbox: req.bbox,
        zoom,
        point_coords: req.point_coords,
        point_labels: req.point_labels,
        id: req.id,
        project: req.project,
    });
    let outcome = state.dispatch(job).await?;
    Ok(Json(outcome.into_body()))
}

/// Framework-level failures (unknown route, bad body, ...) in the same `{"detail": ...}` shape.
#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request) -> status::Custom<Json<ErrorDetail>> {
    status::Custom(
        status,
        Json(ErrorDetail {
            detail: status.reason_lossy().to_string(),
        }),
    )
}
