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
    models::announcement::{
        CommentRequest, CreateAnnouncementRequest, ListAnnouncementsQuery,
        UpdateAnnouncementRequest,
    },
    models::user::Actor,
    services::AppState,
};

/// POST /api/v1/announcements - Create an announcement
pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    AppJson(req): AppJson<CreateAnnouncementRequest>,
) -> Result<impl IntoResponse> {
    let created = state.announcement_service().create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/announcements - List announcements visible to the caller
pub async fn list_announcements(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListAnnouncementsQuery>,
) -> Result<impl IntoResponse> {
    let items = state.announcement_service().list(&actor, query).await?;
    Ok(Json(items))
}

/// GET /api/v1/announcements/{id} - Get an announcement (records a read)
pub async fn get_announcement(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let announcement = state.announcement_service().get(&actor, &id).await?;
    Ok(Json(announcement))
}

/// PATCH /api/v1/announcements/{id} - Edit an announcement
pub async fn update_announcement(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateAnnouncementRequest>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let updated = state
        .announcement_service()
        .update(&actor, &id, req)
        .await?;
    Ok(Json(updated))
}

/// DELETE /api/v1/announcements/{id} - Delete an announcement
pub async fn delete_announcement(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    state.announcement_service().delete(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/announcements/{id}/archive - Archive (admin only)
pub async fn archive_announcement(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let archived = state.announcement_service().archive(&actor, &id).await?;
    Ok(Json(archived))
}

/// POST /api/v1/announcements/{id}/read - Mark as read
pub async fn mark_announcement_read(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let first_read = state.announcement_service().mark_read(&actor, &id).await?;
    Ok(Json(json!({ "first_read": first_read })))
}

/// POST /api/v1/announcements/{id}/like - Like or unlike
pub async fn toggle_like(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let like = state.announcement_service().toggle_like(&actor, &id).await?;
    Ok(Json(like))
}

/// POST /api/v1/announcements/{id}/comment - Add a comment
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    AppJson(req): AppJson<CommentRequest>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let comment = state
        .announcement_service()
        .add_comment(&actor, &id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST /api/v1/announcements/{id}/comments/{comment_id}/replies - Reply to a comment
pub async fn add_reply(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((id, comment_id)): Path<(String, String)>,
    AppJson(req): AppJson<CommentRequest>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let comment_id = parse_object_id(&comment_id, "comment id")?;
    let reply = state
        .announcement_service()
        .add_reply(&actor, &id, &comment_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

/// GET /api/v1/announcements/{id}/stats - Read and engagement stats
pub async fn announcement_stats(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = parse_object_id(&id, "announcement id")?;
    let stats = state.announcement_service().stats(&actor, &id).await?;
    Ok(Json(stats))
}
