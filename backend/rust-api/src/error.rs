use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Comments are disabled for this announcement")]
    CommentsDisabled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::CommentsDisabled => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Database(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:#}", err);
                "Database error occurred".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Parse a hex ObjectId coming from a path or body field
pub fn parse_object_id(value: &str, field: &str) -> Result<ObjectId> {
    ObjectId::parse_str(value)
        .map_err(|_| AppError::BadRequest(format!("Invalid {}: must be ObjectId", field)))
}

/// Parse a list of ids from a request body; any malformed entry is a validation failure
pub fn parse_object_ids(values: &[String], field: &str) -> Result<Vec<ObjectId>> {
    values
        .iter()
        .map(|value| {
            ObjectId::parse_str(value).map_err(|_| {
                AppError::Validation(format!("{} contains an invalid id: {}", field, value))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            AppError::not_found("Announcement").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::forbidden("not the author").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::CommentsDisabled.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::validation("title").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn parse_object_ids_rejects_malformed_entries() {
        let good = ObjectId::new().to_hex();
        assert_eq!(
            parse_object_ids(&[good.clone()], "target_users")
                .map(|ids| ids.len())
                .ok(),
            Some(1)
        );
        let err = parse_object_ids(&[good, "nope".to_string()], "target_users");
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(
            AppError::not_found("Announcement").to_string(),
            "Announcement not found"
        );
    }
}
