//! Error type of the HTTP layer and its mapping onto responses.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::database::StoreError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Observation ID {0} not found")]
    NotFound(String),

    #[error("Observation ID {0} already exists")]
    Conflict(String),

    #[error("no authorisation details")]
    MissingCredentials,

    #[error("error - username or password is incorrect")]
    InvalidCredentials,

    #[error("a valid token is missing")]
    MissingToken,

    #[error("token is invalid")]
    InvalidToken,

    #[error("{0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            StoreError::Conflict(id) => ApiError::Conflict(id),
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MissingCredentials
            | ApiError::InvalidCredentials
            | ApiError::MissingToken
            | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!(target: "observd::http", "Request failed: \'{}\'", self);
        } else {
            log::debug!(target: "observd::http", "Request rejected with {}: \'{}\'", status, self);
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ObservationField;

    #[test]
    fn store_errors_keep_their_meaning() {
        assert!(matches!(ApiError::from(StoreError::NotFound("a".into())), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from(StoreError::Conflict("a".into())), ApiError::Conflict(_)));
        assert_eq!(ApiError::from(StoreError::Poisoned).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_messages_pass_through() {
        let err = ApiError::from(ValidationError::InvalidField(ObservationField::Haze));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid data format");
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::InvalidCredentials.to_string(), "error - username or password is incorrect");
    }
}
