use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use result_recorder::validation::validate_results;
use result_recorder::ExitCategory;
use serde_json::{json, Value};

use crate::AppState;

pub fn status_for(category: ExitCategory) -> StatusCode {
    match category {
        ExitCategory::Ok => StatusCode::OK,
        ExitCategory::MissingEnvConfig => StatusCode::INTERNAL_SERVER_ERROR,
        ExitCategory::UnreadableFile => StatusCode::NOT_FOUND,
        ExitCategory::MalformedSchema => StatusCode::UNPROCESSABLE_ENTITY,
        ExitCategory::RowOmissions => StatusCode::CONFLICT,
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn handle_results_hook(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!("Received update trigger");

    let AppState {
        results_path,
        schema_path,
        options,
        ..
    } = state;
    let outcome = tokio::task::spawn_blocking(move || {
        validate_results(results_path.as_deref(), schema_path.as_deref(), options)
    })
    .await;

    let (report, category) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Validation task failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Validation task failed" })),
            );
        }
    };

    let mut body = match serde_json::to_value(&report) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to serialize validation report: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to serialize report" })),
            );
        }
    };
    body["exit_code"] = json!(category.code());

    tracing::info!(exit_code = category.code(), "{}", report.summary_line(category));
    (status_for(category), Json(body))
}
