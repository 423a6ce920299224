//! API routes for Rolodex note endpoints

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use rolodex_persist::{NewNote, Note, NoteChanges};
use rolodex_queue::{NoteMutation, NoteSnapshot};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Field names the note text is accepted under, in order of precedence
const NOTE_BODY_FIELDS: [&str; 4] = ["body", "note_body", "noteText", "noteTextBody"];

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub database: ComponentStatus,
    pub queue: ComponentStatus,
}

/// Individual component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ComponentStatus {
    fn from_check(healthy: bool, latency: std::time::Duration) -> Self {
        Self {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            latency_ms: Some(latency.as_millis() as u64),
        }
    }
}

/// Basic health check handler (lightweight)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        components: None,
    })
}

/// Detailed health check with database and broker connectivity
pub async fn health_detailed(State(state): State<AppState>) -> Json<HealthResponse> {
    let start = std::time::Instant::now();
    let db_healthy = state.notes().is_healthy().await;
    let db_status = ComponentStatus::from_check(db_healthy, start.elapsed());

    let start = std::time::Instant::now();
    let queue_healthy = state.queue().is_healthy().await;
    let queue_status = ComponentStatus::from_check(queue_healthy, start.elapsed());

    // The API keeps serving writes while the broker is down
    let overall_status = match (db_healthy, queue_healthy) {
        (true, true) => "healthy",
        (false, _) => "unhealthy",
        (true, false) => "degraded",
    };

    Json(HealthResponse {
        status: overall_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        components: Some(ComponentHealth {
            database: db_status,
            queue: queue_status,
        }),
    })
}

/// Pull the note text out of a raw request body.
///
/// Accepts any of the known field names; the first non-blank string wins.
pub fn normalize_note_body(raw: &[u8]) -> ApiResult<String> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(empty_body());
    }

    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let fields = match value {
        serde_json::Value::Object(fields) if fields.is_empty() => return Err(empty_body()),
        serde_json::Value::Object(fields) => fields,
        _ => {
            return Err(ApiError::BadRequest(
                "Invalid request: request body must be a JSON object".to_string(),
            ))
        }
    };

    NOTE_BODY_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name).and_then(serde_json::Value::as_str))
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Note body is required".to_string()))
}

fn empty_body() -> ApiError {
    ApiError::BadRequest("Invalid request: request body cannot be empty".to_string())
}

fn require_contact_id(contact_id: &str) -> ApiResult<&str> {
    let trimmed = contact_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(
            "Contact ID (path parameter) is required".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Malformed note ids can never match a stored note
fn parse_note_id(note_id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(note_id).map_err(|_| note_not_found())
}

fn note_not_found() -> ApiError {
    ApiError::NotFound("Note not found".to_string())
}

/// Hand a committed note to the job queue. Broker trouble is logged and never
/// reaches the client; the note is already stored.
async fn publish_note_job(state: &AppState, mutation: NoteMutation, note: &Note) {
    let user_id = match mutation {
        NoteMutation::Created => note.created_by.clone(),
        NoteMutation::Updated => note.updated_by.clone(),
    };
    let snapshot = NoteSnapshot {
        note_id: note.id.to_string(),
        contact_id: note.contact_id.clone(),
        user_id,
        body: note.body.clone(),
    };

    if let Err(e) = state.producer().publish(mutation, snapshot).await {
        warn!(
            error = %e,
            note_id = %note.id,
            job_type = %mutation.job_type(),
            "Failed to enqueue note job"
        );
    }
}

/// Create note handler
pub async fn create_note(
    Extension(user): Extension<AuthUser>,
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let contact_id = require_contact_id(&contact_id)?;
    let text = normalize_note_body(&body)?;

    let note = state
        .notes()
        .create(NewNote {
            contact_id: contact_id.to_string(),
            body: text,
            created_by: Some(user.user_id),
        })
        .await?;

    publish_note_job(&state, NoteMutation::Created, &note).await;

    Ok((StatusCode::CREATED, Json(note)))
}

/// List notes of a contact
pub async fn list_notes(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
) -> ApiResult<Json<Vec<Note>>> {
    let contact_id = require_contact_id(&contact_id)?;
    let notes = state.notes().list_for_contact(contact_id).await?;
    Ok(Json(notes))
}

/// Fetch a single note
pub async fn get_note(
    State(state): State<AppState>,
    Path((contact_id, note_id)): Path<(String, String)>,
) -> ApiResult<Json<Note>> {
    let contact_id = require_contact_id(&contact_id)?;
    let note_id = parse_note_id(&note_id)?;

    state
        .notes()
        .find(contact_id, note_id)
        .await?
        .map(Json)
        .ok_or_else(note_not_found)
}

/// Update note handler
pub async fn update_note(
    Extension(user): Extension<AuthUser>,
    State(state): State<AppState>,
    Path((contact_id, note_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Note>> {
    let contact_id = require_contact_id(&contact_id)?;
    let text = normalize_note_body(&body)?;
    let note_id = parse_note_id(&note_id)?;

    let note = state
        .notes()
        .update(
            contact_id,
            note_id,
            NoteChanges {
                body: text,
                updated_by: Some(user.user_id),
            },
        )
        .await?
        .ok_or_else(note_not_found)?;

    publish_note_job(&state, NoteMutation::Updated, &note).await;

    Ok(Json(note))
}

/// Delete note handler
pub async fn delete_note(
    State(state): State<AppState>,
    Path((contact_id, note_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let contact_id = require_contact_id(&contact_id)?;
    let note_id = parse_note_id(&note_id)?;

    if state.notes().delete(contact_id, note_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(note_not_found())
    }
}

/// Build the API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Public endpoints
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        // Note endpoints
        .route("/contacts/{id}/notes", get(list_notes).post(create_note))
        .route(
            "/contacts/{id}/notes/{note_id}",
            get(get_note).put(update_note).delete(delete_note),
        )
        .with_state(state)
}
