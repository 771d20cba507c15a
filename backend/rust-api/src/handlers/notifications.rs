use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::{parse_object_id, Result},
    extractors::AppJson,
    models::notification::{ListNotificationsQuery, SendNotificationRequest},
    models::user::Actor,
    services::AppState,
};

/// GET /api/v1/notifications - Current user's notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<impl IntoResponse> {
    let items = state.notification_service().list(&actor.id, query).await?;
    Ok(Json(items))
}

/// GET /api/v1/notifications/unread-count - Unread counter
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse> {
    let count = state.notification_service().unread_count(&actor.id).await?;
    Ok(Json(json!({ "count": count })))
}

/// PATCH /api/v1/notifications/{id}/read - Mark one as read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "notification id")?;
    state.notification_service().mark_read(&actor.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/notifications/read-all - Mark all as read
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse> {
    let updated = state.notification_service().mark_all_read(&actor.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// DELETE /api/v1/notifications/{id} - Delete a notification
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "notification id")?;
    state.notification_service().delete(&actor.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/notifications/send - Broadcast to users, groups or courses (staff)
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    AppJson(req): AppJson<SendNotificationRequest>,
) -> Result<impl IntoResponse> {
    let report = state.notification_service().send(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(report)))
}
