use axum::{
    extract::{Extension, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{error::Result, models::user::Actor, services::AppState};

/// POST /api/v1/admin/notifications/sweep - Run the read-notification retention sweep now
pub async fn sweep_notifications(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse> {
    let retention_days = state.config.notifications.retention_days;
    let deleted = state
        .notification_service()
        .sweep_read_older_than(retention_days)
        .await?;

    tracing::info!(admin = %actor.id, deleted, "Manual notification sweep");

    Ok(Json(json!({
        "deleted": deleted,
        "retention_days": retention_days,
    })))
}
