//! HTTP API v1 for the invocation workflow.
//!
//! Endpoints (all require an `X-User-Id` header):
//!
//! - `POST   /v1/invoke/{n}`            run invocation 1-5
//! - `POST   /v1/invoke/{n}/accept`     accept output of invocation 1-4
//! - `POST   /v1/invoke/{n}/revise`     regenerate with feedback (1-4)
//! - `POST   /v1/invoke/5/apply`        apply a template mapping
//! - `GET    /v1/courses`               courses the user can see
//! - `POST   /v1/courses`               create a course
//! - `GET    /v1/courses/{id}`          read a course
//! - `PUT    /v1/courses/{id}`          edit description and metadata
//! - `PUT    /v1/courses/{id}/title`    set the title (opens Gate B)
//! - `POST   /v1/courses/{id}/collaborators`          add a collaborator (owner only)
//! - `DELETE /v1/courses/{id}/collaborators/{userId}` remove a collaborator (owner only)
//! - `GET    /v1/courses/{id}/history`  revision history, oldest first
//! - `GET    /v1/courses/{id}/evidence` per-invocation grades and overall score
//! - `GET    /v1/courses/{id}/audit`    audit trail, newest first
//! - `GET    /v1/admin/audit`           filtered, paginated audit trail
//! - `GET    /v1/admin/stats`           invocation and evidence aggregates
//! - `GET    /v1/admin/anchors`         list anchors, optionally by `kind`
//! - `POST   /v1/admin/anchors`         create an anchor
//! - `PUT    /v1/admin/anchors/{id}`    replace an anchor
//! - `DELETE /v1/admin/anchors/{id}`    delete an anchor

use axum::{
    Router,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::Json,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, NaiveDate, Utc};
use pke_audit::{AuditLog, AuditStats};
use pke_config::AppConfig;
use pke_core::anchor::{Anchor, AnchorKind};
use pke_core::audit::{AuditAction, AuditQuery, AuditRecord};
use pke_core::course::{Course, RevisionEntry};
use pke_core::evidence::EvidenceGrade;
use pke_core::invocation::Invocation;
use pke_core::provider::Provider;
use pke_core::store::{AnchorRepository, AuditSink};
use pke_store::Stores;
use pke_workflow::{
    AcceptOutcome, AcceptRequest, ApplyOutcome, ApplyRequest, CourseService, CourseUpdate,
    EvidenceReport, Generator, InvocationOutcome, InvocationRequest, NewCourse, Orchestrator,
    RevisionInput, RevisionRequest, WorkflowError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiState {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
    pub courses: CourseService,
    pub anchors: Arc<dyn AnchorRepository>,
    pub audit: Arc<AuditLog>,
    pub start_time: DateTime<Utc>,
}

pub type SharedApiState = Arc<ApiState>;

impl ApiState {
    /// Wire the engine over `stores`, `anchors` and a generation backend.
    pub fn new(
        config: AppConfig,
        stores: Stores,
        anchors: Arc<dyn AnchorRepository>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let audit = Arc::new(AuditLog::with_tracing(stores.audit));
        let generator = Generator::from_config(provider, &config);
        let orchestrator = Orchestrator::new(
            stores.courses.clone(),
            audit.clone(),
            anchors.clone(),
            generator,
        )
        .revalidate_on_accept(config.workflow.revalidate_on_accept);

        Self {
            courses: CourseService::new(stores.courses, audit.clone()),
            orchestrator,
            anchors,
            audit,
            config,
            start_time: Utc::now(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/invoke/{n}", post(invoke_handler))
        .route("/invoke/{n}/accept", post(accept_handler))
        .route("/invoke/{n}/revise", post(revise_handler))
        .route("/invoke/{n}/apply", post(apply_handler))
        .route("/courses", get(list_courses_handler).post(create_course_handler))
        .route(
            "/courses/{id}",
            get(get_course_handler).put(update_course_handler),
        )
        .route("/courses/{id}/title", put(update_title_handler))
        .route("/courses/{id}/collaborators", post(add_collaborator_handler))
        .route(
            "/courses/{id}/collaborators/{user_id}",
            delete(remove_collaborator_handler),
        )
        .route("/courses/{id}/history", get(history_handler))
        .route("/courses/{id}/evidence", get(evidence_handler))
        .route("/courses/{id}/audit", get(audit_handler))
        .route("/admin/audit", get(admin_audit_handler))
        .route("/admin/stats", get(admin_stats_handler))
        .route(
            "/admin/anchors",
            get(list_anchors_handler).post(create_anchor_handler),
        )
        .route(
            "/admin/anchors/{id}",
            put(update_anchor_handler).delete(delete_anchor_handler),
        )
        .with_state(state)
}

// ── Extractors and envelopes ──────────────────────────────────────────────

/// The caller, from the `X-User-Id` header.
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(ApiError::UserIdRequired)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

/// Decode a JSON body. An empty body reads as `{}`.
fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &body[..]
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))
}

fn parse_invocation(raw: &str) -> Result<Invocation, ApiError> {
    let n: u8 = raw
        .trim()
        .parse()
        .map_err(|_| WorkflowError::InvalidInvocation(format!("'{raw}' is not an invocation number")))?;
    Ok(Invocation::try_from(n).map_err(WorkflowError::InvalidInvocation)?)
}

// ── Request bodies ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AcceptBody {
    course_id: Option<String>,
    content: Value,
    evidence_grade: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReviseBody {
    course_id: Option<String>,
    feedback: Option<String>,
    specific_changes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApplyBody {
    course_id: Option<String>,
    mapping_profile_id: Option<String>,
    mappings: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TitleBody {
    title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CollaboratorBody {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuditParams {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AdminAuditParams {
    action: Option<String>,
    user_id: Option<String>,
    course_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Serialize)]
struct Pagination {
    page: usize,
    limit: usize,
    total: usize,
    pages: usize,
}

#[derive(Debug, Serialize)]
struct AuditPage {
    logs: Vec<AuditRecord>,
    pagination: Pagination,
}

/// An RFC 3339 timestamp or a plain `YYYY-MM-DD` date. A plain date as an
/// upper bound covers the whole day.
fn parse_date(raw: &str, field: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ApiError::bad_request(format!("{field} must be a date or RFC 3339 timestamp"))
    })?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| ApiError::bad_request(format!("{field} is out of range")))
}

#[derive(Debug, Default, Deserialize)]
struct AnchorParams {
    kind: Option<String>,
}

// ── Invocation handlers ───────────────────────────────────────────────────

async fn invoke_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(n): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<InvocationOutcome>>, ApiError> {
    let invocation = parse_invocation(&n)?;
    let body: Value = json_body(&body)?;
    let req = InvocationRequest::from_json(invocation, user, &body)?;
    Ok(ok(state.orchestrator.invoke(req).await?))
}

async fn accept_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(n): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<AcceptOutcome>>, ApiError> {
    let invocation = parse_invocation(&n)?;
    let body: AcceptBody = json_body(&body)?;
    if body.content.is_null() {
        return Err(ApiError::bad_request("content is required"));
    }
    let evidence_grade = body
        .evidence_grade
        .as_deref()
        .map(str::parse::<EvidenceGrade>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let outcome = state
        .orchestrator
        .accept(AcceptRequest {
            invocation,
            course_id: body.course_id,
            user_id: user,
            content: body.content,
            evidence_grade,
        })
        .await?;
    Ok(ok(outcome))
}

async fn revise_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(n): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<InvocationOutcome>>, ApiError> {
    let invocation = parse_invocation(&n)?;
    let body: ReviseBody = json_body(&body)?;
    let outcome = state
        .orchestrator
        .revise(RevisionRequest {
            invocation,
            course_id: body.course_id,
            user_id: user,
            input: RevisionInput {
                feedback: body.feedback,
                specific_changes: body.specific_changes,
            },
        })
        .await?;
    Ok(ok(outcome))
}

async fn apply_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(n): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<ApplyOutcome>>, ApiError> {
    if parse_invocation(&n)? != Invocation::TemplateMapping {
        return Err(WorkflowError::InvalidInvocation(
            "only invocation 5 output can be applied".into(),
        )
        .into());
    }
    let body: ApplyBody = json_body(&body)?;
    let outcome = state
        .orchestrator
        .apply_template_mapping(ApplyRequest {
            course_id: body.course_id,
            user_id: user,
            mapping_profile_id: body.mapping_profile_id,
            mappings: body.mappings,
        })
        .await?;
    Ok(ok(outcome))
}

// ── Course handlers ───────────────────────────────────────────────────────

async fn list_courses_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
) -> Result<Json<Envelope<Vec<Course>>>, ApiError> {
    Ok(ok(state.courses.list(&user).await?))
}

async fn create_course_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<Course>>), ApiError> {
    let new: NewCourse = json_body(&body)?;
    let course = state.courses.create(&user, new).await?;
    Ok((StatusCode::CREATED, ok(course)))
}

async fn get_course_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Course>>, ApiError> {
    Ok(ok(state.courses.get(&id, &user).await?))
}

async fn update_title_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<Course>>, ApiError> {
    let body: TitleBody = json_body(&body)?;
    Ok(ok(state.courses.update_title(&id, &user, &body.title).await?))
}

async fn update_course_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<Course>>, ApiError> {
    let update: CourseUpdate = json_body(&body)?;
    Ok(ok(state.courses.update(&id, &user, update).await?))
}

async fn add_collaborator_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<Course>>, ApiError> {
    let body: CollaboratorBody = json_body(&body)?;
    Ok(ok(state
        .courses
        .add_collaborator(&id, &user, &body.user_id)
        .await?))
}

async fn remove_collaborator_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path((id, collaborator)): Path<(String, String)>,
) -> Result<Json<Envelope<Course>>, ApiError> {
    Ok(ok(state
        .courses
        .remove_collaborator(&id, &user, &collaborator)
        .await?))
}

async fn history_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Vec<RevisionEntry>>>, ApiError> {
    Ok(ok(state.courses.history(&id, &user).await?))
}

async fn evidence_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<Envelope<EvidenceReport>>, ApiError> {
    Ok(ok(state.courses.evidence(&id, &user).await?))
}

async fn audit_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Envelope<Vec<AuditRecord>>>, ApiError> {
    let limit = params.limit.unwrap_or(100);
    Ok(ok(state.courses.audit_trail(&id, &user, Some(limit)).await?))
}

// ── Audit administration ──────────────────────────────────────────────────

async fn admin_audit_handler(
    State(state): State<SharedApiState>,
    UserId(_user): UserId,
    Query(params): Query<AdminAuditParams>,
) -> Result<Json<Envelope<AuditPage>>, ApiError> {
    let action = params
        .action
        .as_deref()
        .map(|a| {
            AuditAction::parse(a)
                .ok_or_else(|| ApiError::bad_request(format!("unknown action '{a}'")))
        })
        .transpose()?;
    let since = params
        .start_date
        .as_deref()
        .map(|d| parse_date(d, "startDate", false))
        .transpose()?;
    let until = params
        .end_date
        .as_deref()
        .map(|d| parse_date(d, "endDate", true))
        .transpose()?;
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let filter = AuditQuery {
        course_id: params.course_id,
        user_id: params.user_id,
        action,
        since,
        until,
        ..Default::default()
    };
    let total = state.audit.count_matching(filter.clone()).await?;
    let logs = state
        .audit
        .query(AuditQuery {
            offset: (page - 1) * limit,
            limit: Some(limit),
            ..filter
        })
        .await?;

    Ok(ok(AuditPage {
        logs,
        pagination: Pagination {
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        },
    }))
}

async fn admin_stats_handler(
    State(state): State<SharedApiState>,
    UserId(_user): UserId,
) -> Result<Json<Envelope<AuditStats>>, ApiError> {
    Ok(ok(state.audit.stats(Utc::now()).await?))
}

// ── Anchor administration ─────────────────────────────────────────────────

async fn list_anchors_handler(
    State(state): State<SharedApiState>,
    UserId(_user): UserId,
    Query(params): Query<AnchorParams>,
) -> Result<Json<Envelope<Vec<Anchor>>>, ApiError> {
    let kind = params
        .kind
        .map(|k| serde_json::from_value::<AnchorKind>(Value::String(k.clone())))
        .transpose()
        .map_err(|_| ApiError::bad_request("kind must be policy, knowledge_pack or template"))?;
    Ok(ok(state.anchors.list(kind).await?))
}

async fn create_anchor_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<Anchor>>), ApiError> {
    let anchor: Anchor = json_body(&body)?;
    let created = state.anchors.create(anchor).await?;
    record_anchor_action(&state, &user, "ANCHOR_CREATED", &created).await;
    Ok((StatusCode::CREATED, ok(created)))
}

async fn update_anchor_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<Anchor>>, ApiError> {
    let mut anchor: Anchor = json_body(&body)?;
    anchor.id = id.clone();
    let updated = match state.anchors.update(anchor).await {
        Ok(updated) => updated,
        Err(pke_core::error::StoreError::NotFound(_)) => return Err(ApiError::AnchorNotFound(id)),
        Err(e) => return Err(e.into()),
    };
    record_anchor_action(&state, &user, "ANCHOR_UPDATED", &updated).await;
    Ok(ok(updated))
}

async fn delete_anchor_handler(
    State(state): State<SharedApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    if !state.anchors.delete(&id).await? {
        return Err(ApiError::AnchorNotFound(id));
    }
    state
        .audit
        .record(
            AuditRecord::new(AuditAction::AdminAction)
                .user(&user)
                .metadata(json!({ "action": "ANCHOR_DELETED", "anchorId": id })),
        )
        .await;
    info!(anchor_id = %id, "Anchor deleted");
    Ok(ok(json!({ "id": id, "deleted": true })))
}

async fn record_anchor_action(state: &ApiState, user: &str, action: &str, anchor: &Anchor) {
    info!(anchor_id = %anchor.id, kind = anchor.kind.as_str(), action, "Anchor changed");
    state
        .audit
        .record(
            AuditRecord::new(AuditAction::AdminAction)
                .user(user)
                .metadata(json!({
                    "action": action,
                    "anchorId": anchor.id,
                    "kind": anchor.kind,
                })),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pke_core::error::ProviderError;
    use pke_core::message::Message;
    use pke_core::provider::{ProviderRequest, ProviderResponse, Usage};
    use pke_store::InMemoryAnchorRepository;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Replies with canned text in order.
    struct MockProvider {
        replies: Mutex<VecDeque<String>>,
    }

    impl MockProvider {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Network("no scripted reply".into()))?;
            Ok(ProviderResponse {
                message: Message::assistant(reply),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
                finish_reason: Some("stop".into()),
            })
        }
    }

    fn test_api_state(replies: &[&str]) -> SharedApiState {
        Arc::new(ApiState::new(
            AppConfig::default(),
            Stores::in_memory(),
            Arc::new(InMemoryAnchorRepository::new()),
            Arc::new(MockProvider::new(replies)),
        ))
    }

    async fn call(
        state: &SharedApiState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        call_as(state, "author", method, uri, body).await
    }

    async fn call_as(
        state: &SharedApiState,
        user: &str,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, user)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn create_course(state: &SharedApiState, title: &str) -> String {
        let (status, json) = call(state, "POST", "/courses", Some(json!({ "title": title }))).await;
        assert_eq!(status, StatusCode::CREATED);
        json["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn missing_user_header_is_rejected() {
        let req = Request::builder()
            .method("GET")
            .uri("/courses")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(test_api_state(&[])).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "USER_ID_REQUIRED");
    }

    #[tokio::test]
    async fn invoke_then_accept_description() {
        let state = test_api_state(&[r#"{"description": "Learn X.", "assistanceTier": "minimal"}"#]);
        let id = create_course(&state, "Intro to X").await;

        let (status, json) = call(&state, "POST", "/invoke/1", Some(json!({ "courseId": id }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["result"]["description"], "Learn X.");
        assert_eq!(json["data"]["evidenceGrade"], "D");
        assert_eq!(json["data"]["actions"], json!(["accept", "revise"]));

        let (status, json) = call(
            &state,
            "POST",
            "/invoke/1/accept",
            Some(json!({
                "courseId": id,
                "content": json["data"]["result"],
                "evidenceGrade": "D",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["message"], "Invocation 1 accepted");
        assert_eq!(json["data"]["nextInvocation"], 2);
        assert_eq!(json["data"]["course"]["currentStage"], "design");
        assert_eq!(json["data"]["course"]["metadata"]["assistanceTier"], "minimal");

        let (_, json) = call(&state, "GET", &format!("/courses/{id}/evidence"), None).await;
        assert_eq!(json["data"]["overall"]["total"], 1);
    }

    #[tokio::test]
    async fn gating_failures_carry_details() {
        let state = test_api_state(&[]);
        let untitled = create_course(&state, "").await;
        let (status, json) =
            call(&state, "POST", "/invoke/1", Some(json!({ "courseId": untitled }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "GATE_B_FAILED");
        assert_eq!(json["gate"], "B");

        let titled = create_course(&state, "Intro to X").await;
        let (status, json) =
            call(&state, "POST", "/invoke/3", Some(json!({ "courseId": titled }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "PREREQUISITES_NOT_MET");
        assert_eq!(json["missing"], json!([1, 2]));

        let (status, json) = call(&state, "POST", "/invoke/1", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "NO_COURSE_ID");

        let (status, json) =
            call(&state, "POST", "/invoke/1", Some(json!({ "courseId": "nope" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "COURSE_NOT_FOUND");
    }

    #[tokio::test]
    async fn bad_invocation_numbers_are_rejected() {
        let state = test_api_state(&[]);
        for uri in ["/invoke/0", "/invoke/9", "/invoke/abc"] {
            let (status, json) = call(&state, "POST", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json["code"], "INVALID_INVOCATION");
        }
        let (status, json) = call(&state, "POST", "/invoke/3/apply", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_INVOCATION");
    }

    #[tokio::test]
    async fn template_mapping_needs_a_template() {
        let state = test_api_state(&[]);
        let (status, json) = call(&state, "POST", "/invoke/5", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "TEMPLATE_REQUIRED");

        let (status, json) =
            call(&state, "POST", "/invoke/5", Some(json!({ "templateId": "missing" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "TEMPLATE_NOT_FOUND");
    }

    #[tokio::test]
    async fn generation_failure_is_500() {
        let state = test_api_state(&[]);
        let id = create_course(&state, "Intro to X").await;
        let (status, json) = call(&state, "POST", "/invoke/1", Some(json!({ "courseId": id }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "GENERATION_FAILED");
    }

    #[tokio::test]
    async fn accept_validates_body() {
        let state = test_api_state(&[]);
        let id = create_course(&state, "Intro to X").await;

        let (status, _) =
            call(&state, "POST", "/invoke/1/accept", Some(json!({ "courseId": id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(
            &state,
            "POST",
            "/invoke/1/accept",
            Some(json!({ "courseId": id, "content": { "description": "D" }, "evidenceGrade": "Z" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");

        let (status, json) = call(
            &state,
            "POST",
            "/invoke/2/revise",
            Some(json!({ "courseId": id, "feedback": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "REVISION_INPUT_REQUIRED");
    }

    #[tokio::test]
    async fn retitle_opens_gate_b() {
        let state = test_api_state(&[r#"{"description": "D"}"#]);
        let id = create_course(&state, "").await;
        let (status, json) = call(
            &state,
            "PUT",
            &format!("/courses/{id}/title"),
            Some(json!({ "title": "Intro to X" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["title"], "Intro to X");

        let (status, _) = call(&state, "POST", "/invoke/1", Some(json!({ "courseId": id }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = call(&state, "GET", &format!("/courses/{id}/audit?limit=2"), None).await;
        let trail = json["data"].as_array().unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0]["action"], "INVOCATION_COMPLETED");
    }

    #[tokio::test]
    async fn anchor_admin_crud() {
        let state = test_api_state(&[]);
        let (status, json) = call(
            &state,
            "POST",
            "/admin/anchors",
            Some(json!({ "kind": "policy", "name": "Site safety", "domain": "safety" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["data"]["id"].as_str().unwrap().to_string();

        let (_, json) = call(&state, "GET", "/admin/anchors?kind=policy", None).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        let (_, json) = call(&state, "GET", "/admin/anchors?kind=template", None).await;
        assert!(json["data"].as_array().unwrap().is_empty());

        let (status, json) = call(
            &state,
            "PUT",
            &format!("/admin/anchors/{id}"),
            Some(json!({ "kind": "policy", "name": "Renamed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["name"], "Renamed");

        let (status, _) = call(&state, "DELETE", &format!("/admin/anchors/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = call(&state, "DELETE", &format!("/admin/anchors/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "ANCHOR_NOT_FOUND");

        let (status, _) = call(&state, "GET", "/admin/anchors?kind=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn collaborator_added_later_can_invoke() {
        let state = test_api_state(&[r#"{"description": "Learn X."}"#]);
        let id = create_course(&state, "Intro to X").await;
        let invoke = json!({ "courseId": id });

        let (status, json) =
            call_as(&state, "helper", "POST", "/invoke/1", Some(invoke.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "ACCESS_DENIED");

        let uri = format!("/courses/{id}/collaborators");
        let (status, json) =
            call_as(&state, "helper", "POST", &uri, Some(json!({ "userId": "helper" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "ACCESS_DENIED");

        let (status, json) = call(&state, "POST", &uri, Some(json!({ "userId": "helper" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["collaborators"], json!(["helper"]));

        let (status, json) = call_as(&state, "helper", "POST", "/invoke/1", Some(invoke)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["result"]["description"], "Learn X.");

        let (status, json) = call(&state, "DELETE", &format!("{uri}/helper"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["collaborators"], json!([]));
        let (status, _) = call_as(&state, "helper", "GET", &format!("/courses/{id}"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, json) = call(&state, "GET", &format!("/courses/{id}/history"), None).await;
        let kinds: Vec<&str> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["changeType"].as_str())
            .collect();
        assert_eq!(kinds, vec!["COLLABORATOR_ADDED", "COLLABORATOR_REMOVED"]);
    }

    #[tokio::test]
    async fn course_metadata_update() {
        let state = test_api_state(&[]);
        let id = create_course(&state, "Intro to X").await;
        let (status, json) = call(
            &state,
            "PUT",
            &format!("/courses/{id}"),
            Some(json!({
                "description": "All about X",
                "level": "beginner",
                "targetAudience": "new hires",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["title"], "Intro to X");
        assert_eq!(json["data"]["description"], "All about X");
        assert_eq!(json["data"]["metadata"]["level"], "beginner");
        assert_eq!(json["data"]["metadata"]["targetAudience"], "new hires");

        let (status, json) = call(
            &state,
            "PUT",
            &format!("/courses/{id}"),
            Some(json!({ "level": "wizard" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn admin_audit_filters_and_paginates() {
        let state = test_api_state(&[]);
        for title in ["A", "B", "C"] {
            create_course(&state, title).await;
        }
        call_as(&state, "other", "POST", "/courses", Some(json!({ "title": "D" }))).await;

        let (status, json) = call(&state, "GET", "/admin/audit?userId=author&limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["logs"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"]["logs"][0]["courseTitle"], "C");
        assert_eq!(
            json["data"]["pagination"],
            json!({ "page": 1, "limit": 2, "total": 3, "pages": 2 })
        );

        let (_, json) = call(
            &state,
            "GET",
            "/admin/audit?userId=author&limit=2&page=2",
            None,
        )
        .await;
        let logs = json["data"]["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["courseTitle"], "A");

        let (_, json) = call(&state, "GET", "/admin/audit?action=course_created", None).await;
        assert_eq!(json["data"]["pagination"]["total"], 4);
        assert_eq!(json["data"]["pagination"]["limit"], 50);

        let (_, json) = call(&state, "GET", "/admin/audit?endDate=2000-01-01", None).await;
        assert_eq!(json["data"]["pagination"]["total"], 0);
        assert_eq!(json["data"]["pagination"]["pages"], 0);
        let (_, json) = call(&state, "GET", "/admin/audit?startDate=2000-01-01", None).await;
        assert_eq!(json["data"]["pagination"]["total"], 4);

        let (status, _) = call(&state, "GET", "/admin/audit?action=nope", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&state, "GET", "/admin/audit?startDate=yesterday", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_stats_reports_completed_invocations() {
        let state = test_api_state(&[r#"{"description": "Learn X."}"#]);
        let id = create_course(&state, "Intro to X").await;
        let (status, _) = call(&state, "POST", "/invoke/1", Some(json!({ "courseId": id }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = call(&state, "GET", "/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        let stats = &json["data"];
        assert_eq!(stats["last24Hours"], 2);
        assert_eq!(stats["byInvocation"][0]["invocation"], 1);
        assert_eq!(stats["byInvocation"][0]["count"], 1);
        assert!(stats["byInvocation"][0]["avgDurationMs"].is_number());
        assert_eq!(stats["evidenceDistribution"][3], json!({ "grade": "D", "count": 1 }));
        assert!(stats["generatedAt"].is_string());
    }
}
