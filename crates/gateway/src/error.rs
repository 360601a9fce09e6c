//! Mapping from workflow errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use pke_core::error::StoreError;
use pke_workflow::{GatingError, WorkflowError};
use serde_json::{Map, Value, json};
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// The `X-User-Id` header was missing or blank.
    UserIdRequired,
    AnchorNotFound(String),
    Workflow(WorkflowError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Workflow(WorkflowError::BadRequest(message.into()))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::UserIdRequired => "USER_ID_REQUIRED",
            ApiError::AnchorNotFound(_) => "ANCHOR_NOT_FOUND",
            ApiError::Workflow(e) => e.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UserIdRequired => StatusCode::BAD_REQUEST,
            ApiError::AnchorNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Workflow(e) => workflow_status(e),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::UserIdRequired => "X-User-Id header required".into(),
            ApiError::AnchorNotFound(id) => format!("Anchor not found: {id}"),
            ApiError::Workflow(e) => e.to_string(),
        }
    }
}

fn workflow_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::Gating(gating) => match gating {
            GatingError::NoCourseId => StatusCode::BAD_REQUEST,
            GatingError::CourseNotFound(_) => StatusCode::NOT_FOUND,
            GatingError::AccessDenied
            | GatingError::GateBFailed
            | GatingError::PrerequisitesNotMet { .. }
            | GatingError::WrongStage { .. } => StatusCode::FORBIDDEN,
        },
        WorkflowError::InvalidInvocation(_)
        | WorkflowError::BadRequest(_)
        | WorkflowError::RevisionInputRequired
        | WorkflowError::TemplateRequired
        | WorkflowError::InvalidContent { .. } => StatusCode::BAD_REQUEST,
        WorkflowError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::AcceptanceConflict { .. } | WorkflowError::CourseConflict { .. } => {
            StatusCode::CONFLICT
        }
        WorkflowError::Generation(_)
        | WorkflowError::IllegalTransition { .. }
        | WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Gate, prerequisite and stage details added beside `error` and `code`.
fn details(err: &ApiError, body: &mut Map<String, Value>) {
    let ApiError::Workflow(WorkflowError::Gating(gating)) = err else {
        return;
    };
    if let Some(gate) = gating.gate() {
        body.insert("gate".into(), json!(gate));
    }
    match gating {
        GatingError::PrerequisitesNotMet {
            required,
            completed,
            missing,
            ..
        } => {
            body.insert("required".into(), json!(required));
            body.insert("completed".into(), json!(completed));
            body.insert("missing".into(), json!(missing));
        }
        GatingError::WrongStage { current, allowed } => {
            body.insert("currentStage".into(), json!(current));
            body.insert("allowedStages".into(), json!(allowed));
        }
        _ => {}
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self.message(), "Request failed");
        }

        let mut body = Map::new();
        body.insert("success".into(), Value::Bool(false));
        body.insert("error".into(), Value::String(self.message()));
        body.insert("code".into(), json!(self.code()));
        details(&self, &mut body);

        (status, Json(Value::Object(body))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Workflow(err)
    }
}

impl From<GatingError> for ApiError {
    fn from(err: GatingError) -> Self {
        ApiError::Workflow(err.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Workflow(err.into())
    }
}
